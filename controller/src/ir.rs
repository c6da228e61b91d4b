use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{
        config::{CarrierConfig, DutyPercent, TransmitConfig},
        PinState, Pulse, PulseTicks, RmtChannel, TxRmtDriver, VariableLengthSignal,
    },
    units::FromValueType,
};
use log::warn;

use acremote_common::{FrameTransmitter, TransmitError};

// 80 MHz APB clock divided down to 1 us ticks
const IR_TICK_DIVIDER: u8 = 80;
const IR_DUTY_PERCENT: u8 = 33;

enum IrBackend {
    Rmt(TxRmtDriver<'static>),
    Disabled,
}

/// RMT-backed IR LED. Each call to `transmit` puts one frame on air.
pub struct RmtTransmitter {
    backend: IrBackend,
}

impl RmtTransmitter {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        carrier_khz: u32,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let carrier = CarrierConfig::new()
            .frequency(carrier_khz.kHz().into())
            .carrier_level(PinState::High)
            .duty_percent(DutyPercent::new(IR_DUTY_PERCENT)?);

        let config = TransmitConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .carrier(Some(carrier))
            .idle(Some(PinState::Low));

        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT IR driver")?;

        Ok(Self {
            backend: IrBackend::Rmt(tx),
        })
    }

    pub fn disabled() -> Self {
        Self {
            backend: IrBackend::Disabled,
        }
    }

    fn build_signal(timings: &[u16]) -> anyhow::Result<VariableLengthSignal> {
        let mut pulses = Vec::with_capacity(timings.len());
        for (index, duration) in timings.iter().enumerate() {
            let level = if index % 2 == 0 {
                PinState::High
            } else {
                PinState::Low
            };

            pulses.push(Pulse::new(
                level,
                PulseTicks::new(*duration).context("invalid IR pulse duration")?,
            ));
        }

        let pulse_refs: Vec<&Pulse> = pulses.iter().collect();
        let mut signal = VariableLengthSignal::with_capacity(pulses.len());
        signal
            .push(pulse_refs)
            .context("failed to convert IR timings to RMT signal")?;
        Ok(signal)
    }
}

impl FrameTransmitter for RmtTransmitter {
    fn transmit(&mut self, timings: &[u16]) -> Result<(), TransmitError> {
        let IrBackend::Rmt(tx) = &mut self.backend else {
            warn!("IR disabled, dropping frame with {} timings", timings.len());
            return Err(TransmitError::Disabled);
        };

        let signal =
            Self::build_signal(timings).map_err(|err| TransmitError::Failed(format!("{err:#}")))?;
        tx.start_blocking(&signal)
            .map_err(|err| TransmitError::Failed(format!("RMT transmit failed: {err}")))
    }
}
