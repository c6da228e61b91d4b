//! Gree YAW1F remote protocol: an 8-byte state sent as two 4-byte blocks.

use log::debug;

use crate::controller::{AcDriver, TransmitError};

pub const STATE_LEN: usize = 8;
pub const CARRIER_KHZ: u32 = 38;

const HDR_MARK_US: u16 = 9_000;
const HDR_SPACE_US: u16 = 4_500;
const BIT_MARK_US: u16 = 620;
const ONE_SPACE_US: u16 = 1_600;
const ZERO_SPACE_US: u16 = 540;
const MSG_SPACE_US: u16 = 19_980;
const BLOCK_FOOTER: u8 = 0b010;
const BLOCK_FOOTER_BITS: u8 = 3;

const RESET_STATE: [u8; STATE_LEN] = [0x00, 0x09, 0x20, 0x50, 0x00, 0x20, 0x00, 0x50];

const MODE_AUTO: u8 = 0;
const MODE_DRY: u8 = 2;
const MODE_HEAT: u8 = 4;
const MIN_TEMP_C: u8 = 16;
const MAX_TEMP_C: u8 = 30;
const FAN_MIN: u8 = 1;
const FAN_MAX: u8 = 3;

const SWING_LAST_POS: u8 = 0;
const SWING_AUTO: u8 = 1;

// byte 0
const MODE_MASK: u8 = 0b0000_0111;
const POWER_BIT: u8 = 1 << 3;
const FAN_SHIFT: u8 = 4;
const FAN_MASK: u8 = 0b0011_0000;
const SWING_AUTO_BIT: u8 = 1 << 6;
const SLEEP_BIT: u8 = 1 << 7;
// byte 1
const TEMP_MASK: u8 = 0b0000_1111;
// byte 2
const TURBO_BIT: u8 = 1 << 4;
const LIGHT_BIT: u8 = 1 << 5;
const MODEL_A_BIT: u8 = 1 << 6;
const XFAN_BIT: u8 = 1 << 7;
// byte 4
const SWING_V_MASK: u8 = 0b0000_1111;

/// Sink for one raw mark/space sequence in microseconds, starting with a mark.
pub trait FrameTransmitter {
    fn transmit(&mut self, timings: &[u16]) -> Result<(), TransmitError>;
}

pub struct GreeAc<T> {
    state: [u8; STATE_LEN],
    transmitter: T,
}

impl<T: FrameTransmitter> GreeAc<T> {
    pub fn new(transmitter: T) -> Self {
        Self {
            state: RESET_STATE,
            transmitter,
        }
    }

    pub fn transmitter(&self) -> &T {
        &self.transmitter
    }

    /// Current frame with its checksum filled in.
    pub fn raw(&self) -> [u8; STATE_LEN] {
        let mut raw = self.state;
        raw[7] = (raw[7] & 0x0F) | (checksum(&raw) << 4);
        raw
    }

    pub fn mode(&self) -> u8 {
        self.state[0] & MODE_MASK
    }

    pub fn temp(&self) -> u8 {
        (self.state[1] & TEMP_MASK) + MIN_TEMP_C
    }

    pub fn fan(&self) -> u8 {
        (self.state[0] & FAN_MASK) >> FAN_SHIFT
    }

    pub fn swing_vertical(&self) -> (bool, u8) {
        (
            self.state[0] & SWING_AUTO_BIT != 0,
            self.state[4] & SWING_V_MASK,
        )
    }

    pub fn power(&self) -> bool {
        self.state[0] & POWER_BIT != 0
    }

    /// Mark/space timings of the current frame.
    pub fn timings(&self) -> Vec<u16> {
        let raw = self.raw();
        let mut timings = Vec::with_capacity(140);

        timings.push(HDR_MARK_US);
        timings.push(HDR_SPACE_US);
        push_bytes(&mut timings, &raw[..4]);
        push_bits(&mut timings, BLOCK_FOOTER, BLOCK_FOOTER_BITS);
        timings.push(BIT_MARK_US);
        timings.push(MSG_SPACE_US);
        push_bytes(&mut timings, &raw[4..]);
        timings.push(BIT_MARK_US);
        timings.push(MSG_SPACE_US);

        timings
    }

    fn set_flag(&mut self, byte: usize, bit: u8, on: bool) {
        if on {
            self.state[byte] |= bit;
        } else {
            self.state[byte] &= !bit;
        }
    }
}

impl<T: FrameTransmitter> AcDriver for GreeAc<T> {
    fn set_mode(&mut self, mode: u8) {
        let mode = if mode <= MODE_HEAT { mode } else { MODE_AUTO };
        self.state[0] = (self.state[0] & !MODE_MASK) | mode;
    }

    fn set_temp(&mut self, celsius: u8) {
        let offset = celsius.clamp(MIN_TEMP_C, MAX_TEMP_C) - MIN_TEMP_C;
        self.state[1] = (self.state[1] & !TEMP_MASK) | offset;
    }

    fn set_fan(&mut self, speed: u8) {
        let mut speed = speed.min(FAN_MAX);
        // dry mode only runs the fan at its lowest speed
        if self.mode() == MODE_DRY {
            speed = FAN_MIN;
        }
        self.state[0] = (self.state[0] & !FAN_MASK) | (speed << FAN_SHIFT);
    }

    fn set_swing_vertical(&mut self, automatic: bool, position: u8) {
        let position = if automatic {
            match position {
                1 | 7 | 9 | 11 => position,
                _ => SWING_AUTO,
            }
        } else {
            match position {
                2..=6 => position,
                _ => SWING_LAST_POS,
            }
        };
        self.set_flag(0, SWING_AUTO_BIT, automatic);
        self.state[4] = (self.state[4] & !SWING_V_MASK) | position;
    }

    fn set_light(&mut self, on: bool) {
        self.set_flag(2, LIGHT_BIT, on);
    }

    fn set_turbo(&mut self, on: bool) {
        self.set_flag(2, TURBO_BIT, on);
    }

    fn set_xfan(&mut self, on: bool) {
        self.set_flag(2, XFAN_BIT, on);
    }

    fn set_sleep(&mut self, on: bool) {
        self.set_flag(0, SLEEP_BIT, on);
    }

    fn set_power(&mut self, on: bool) {
        self.set_flag(0, POWER_BIT, on);
        self.set_flag(2, MODEL_A_BIT, on);
    }

    fn send(&mut self) -> Result<(), TransmitError> {
        let raw = self.raw();
        debug!("sending gree frame {raw:02X?}");
        let timings = self.timings();
        self.transmitter.transmit(&timings)
    }
}

/// Low nibbles of bytes 0-3 plus high nibbles of bytes 4-6, seeded with 10.
fn checksum(raw: &[u8; STATE_LEN]) -> u8 {
    let low: u32 = raw[..4].iter().map(|byte| u32::from(byte & 0x0F)).sum();
    let high: u32 = raw[4..7].iter().map(|byte| u32::from(byte >> 4)).sum();
    ((10 + low + high) & 0x0F) as u8
}

fn push_bytes(timings: &mut Vec<u16>, bytes: &[u8]) {
    for byte in bytes {
        push_bits(timings, *byte, 8);
    }
}

/// LSB first.
fn push_bits(timings: &mut Vec<u16>, value: u8, bits: u8) {
    for bit in 0..bits {
        timings.push(BIT_MARK_US);
        timings.push(if (value >> bit) & 1 == 1 {
            ONE_SPACE_US
        } else {
            ZERO_SPACE_US
        });
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct Capture {
        frames: Vec<Vec<u16>>,
    }

    impl FrameTransmitter for Capture {
        fn transmit(&mut self, timings: &[u16]) -> Result<(), TransmitError> {
            self.frames.push(timings.to_vec());
            Ok(())
        }
    }

    #[test]
    fn reset_frame_checksum_matches_remote() {
        let ac = GreeAc::new(Capture::default());
        assert_eq!(ac.raw(), [0x00, 0x09, 0x20, 0x50, 0x00, 0x20, 0x00, 0x50]);
        assert_eq!(ac.temp(), 25);
    }

    #[test]
    fn setters_map_to_frame_bits() {
        let mut ac = GreeAc::new(Capture::default());
        ac.set_mode(1);
        ac.set_temp(22);
        ac.set_fan(2);
        ac.set_swing_vertical(false, 4);
        ac.set_light(false);
        ac.set_turbo(true);
        ac.set_xfan(true);
        ac.set_sleep(false);
        ac.set_power(true);

        let raw = ac.raw();
        assert_eq!(raw[0], 0x01 | POWER_BIT | (2 << FAN_SHIFT));
        assert_eq!(raw[1] & TEMP_MASK, 6);
        assert_eq!(raw[2], TURBO_BIT | MODEL_A_BIT | XFAN_BIT);
        assert_eq!(raw[4] & SWING_V_MASK, 4);
        assert_eq!(raw[7] >> 4, checksum(&raw));
    }

    #[test]
    fn out_of_range_values_are_coerced() {
        let mut ac = GreeAc::new(Capture::default());

        ac.set_mode(9);
        assert_eq!(ac.mode(), MODE_AUTO);

        ac.set_temp(31);
        assert_eq!(ac.temp(), 30);
        ac.set_temp(3);
        assert_eq!(ac.temp(), 16);

        ac.set_fan(7);
        assert_eq!(ac.fan(), 3);

        ac.set_swing_vertical(true, 5);
        assert_eq!(ac.swing_vertical(), (true, SWING_AUTO));
        ac.set_swing_vertical(false, 9);
        assert_eq!(ac.swing_vertical(), (false, SWING_LAST_POS));
        ac.set_swing_vertical(true, 11);
        assert_eq!(ac.swing_vertical(), (true, 11));
    }

    #[test]
    fn dry_mode_forces_lowest_fan() {
        let mut ac = GreeAc::new(Capture::default());
        ac.set_mode(MODE_DRY);
        ac.set_fan(3);
        assert_eq!(ac.fan(), FAN_MIN);
    }

    #[test]
    fn send_transmits_two_blocks() {
        let mut ac = GreeAc::new(Capture::default());
        ac.set_power(true);
        ac.send().unwrap();

        let frame = &ac.transmitter().frames[0];
        assert_eq!(frame.len(), 2 + 64 + 6 + 2 + 64 + 2);
        assert_eq!(&frame[..2], &[HDR_MARK_US, HDR_SPACE_US]);
        // footer 0b010, LSB first
        assert_eq!(
            &frame[66..72],
            &[
                BIT_MARK_US,
                ZERO_SPACE_US,
                BIT_MARK_US,
                ONE_SPACE_US,
                BIT_MARK_US,
                ZERO_SPACE_US
            ]
        );
        assert_eq!(&frame[72..74], &[BIT_MARK_US, MSG_SPACE_US]);
        assert_eq!(frame.last(), Some(&MSG_SPACE_US));
    }

    #[test]
    fn power_bit_is_first_byte_bit_three() {
        let mut ac = GreeAc::new(Capture::default());
        ac.set_power(true);
        let timings = ac.timings();

        // byte 0 bit 3 lives at header (2) + 3 * 2 marks/spaces, space slot
        assert_eq!(timings[2 + 3 * 2 + 1], ONE_SPACE_US);
        assert!(ac.power());
    }
}
