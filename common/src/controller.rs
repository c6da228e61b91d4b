use std::{thread, time::Duration};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    codec,
    config::ControllerConfig,
    store::{StateStore, Storage, Validated},
    types::{AcCommand, AcMode, AcState, AcStatus, FanSpeed, TransmitDiagnostics},
};

#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("IR transmitter disabled")]
    Disabled,
    #[error("IR transmission failed: {0}")]
    Failed(String),
}

/// Setter surface of the vendor IR protocol. Setters only change the pending
/// frame; [`AcDriver::send`] encodes and transmits it once.
pub trait AcDriver {
    fn set_mode(&mut self, mode: u8);
    fn set_temp(&mut self, celsius: u8);
    fn set_fan(&mut self, speed: u8);
    fn set_swing_vertical(&mut self, automatic: bool, position: u8);
    fn set_light(&mut self, on: bool);
    fn set_turbo(&mut self, on: bool);
    fn set_xfan(&mut self, on: bool);
    fn set_sleep(&mut self, on: bool);
    fn set_power(&mut self, on: bool);
    fn send(&mut self) -> Result<(), TransmitError>;
}

pub trait Delay {
    fn delay_ms(&mut self, ms: u64);
}

/// Sleeps the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingDelay;

impl Delay for BlockingDelay {
    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub frames_sent: u8,
    pub failed_sends: u8,
    pub persisted: bool,
}

/// Applies validated commands to the unit and keeps the stored state in step.
pub struct AcController<D, S, W> {
    driver: D,
    store: StateStore<S>,
    delay: W,
    config: ControllerConfig,
    diagnostics: TransmitDiagnostics,
}

impl<D, S, W> AcController<D, S, W>
where
    D: AcDriver,
    S: Storage,
    W: Delay,
{
    /// Primes the driver with the restored state. Nothing is transmitted.
    pub fn new(mut driver: D, store: StateStore<S>, delay: W, mut config: ControllerConfig) -> Self {
        config.sanitize();
        push_settings(&mut driver, store.state());
        driver.set_power(store.state().is_on());
        info!("driver primed with stored state {}", codec::encode(store.state()));

        let diagnostics = TransmitDiagnostics {
            repeat_count: config.cmd_repeat,
            repeat_gap_ms: config.repeat_gap_ms,
            ..TransmitDiagnostics::default()
        };

        Self {
            driver,
            store,
            delay,
            config,
            diagnostics,
        }
    }

    pub fn state(&self) -> &AcState {
        self.store.state()
    }

    pub fn store(&self) -> &StateStore<S> {
        &self.store
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn delay(&self) -> &W {
        &self.delay
    }

    pub fn diagnostics(&self) -> &TransmitDiagnostics {
        &self.diagnostics
    }

    /// Drives the unit to `command` and commits the resulting state.
    ///
    /// Blocks for `cmd_repeat` transmissions separated by `repeat_gap_ms`.
    /// Transmit and storage failures are logged and reported, never fatal.
    pub fn apply(&mut self, command: Validated<AcCommand>) -> ApplyReport {
        let power_on = command.get().is_power_on();
        if power_on {
            push_settings(&mut self.driver, &command.get().as_state());
        }
        self.driver.set_power(power_on);

        let mut report = ApplyReport {
            frames_sent: 0,
            failed_sends: 0,
            persisted: false,
        };

        for repeat in 0..self.config.cmd_repeat {
            match self.driver.send() {
                Ok(()) => {
                    report.frames_sent += 1;
                    self.diagnostics.sent_frames = self.diagnostics.sent_frames.saturating_add(1);
                    self.diagnostics.last_error = None;
                }
                Err(err) => {
                    warn!("IR send {}/{} failed: {err}", repeat + 1, self.config.cmd_repeat);
                    report.failed_sends += 1;
                    self.diagnostics.failed_sends =
                        self.diagnostics.failed_sends.saturating_add(1);
                    self.diagnostics.last_error = Some(err.to_string());
                }
            }

            if repeat + 1 < self.config.cmd_repeat {
                self.delay.delay_ms(self.config.repeat_gap_ms);
            }
        }

        let next = self.store.current().with_command(&command);
        match self.store.commit(next) {
            Ok(()) => report.persisted = true,
            Err(err) => {
                warn!("failed to persist state {}: {err}", codec::encode(next.get()));
                self.diagnostics.persist_failures =
                    self.diagnostics.persist_failures.saturating_add(1);
            }
        }

        self.diagnostics.commands_applied = self.diagnostics.commands_applied.saturating_add(1);
        debug!("apply finished: {report:?}");
        report
    }

    pub fn status(&self) -> AcStatus {
        let state = self.store.state();
        AcStatus {
            state: codec::encode(state),
            mode: AcMode::from_code(state.mode)
                .map(AcMode::as_str)
                .unwrap_or("UNKNOWN"),
            temperature: state.temperature,
            fan_speed: FanSpeed::from_code(state.fan_speed)
                .map(FanSpeed::as_str)
                .unwrap_or("UNKNOWN"),
            flap_auto: state.flap_auto == 1,
            flap_position: state.flap_position,
            light: state.light == 1,
            turbo: state.turbo == 1,
            xfan: state.xfan == 1,
            sleep: state.sleep == 1,
            power: state.is_on(),
            transmit: self.diagnostics.clone(),
        }
    }
}

/// Pushes fields 0 through 8 in protocol order. Power is left to the caller.
fn push_settings<D: AcDriver>(driver: &mut D, state: &AcState) {
    driver.set_mode(state.mode);
    driver.set_temp(state.temperature);
    driver.set_fan(state.fan_speed);
    driver.set_swing_vertical(state.flap_auto == 1, state.flap_position);
    driver.set_light(state.light == 1);
    driver.set_turbo(state.turbo == 1);
    driver.set_xfan(state.xfan == 1);
    driver.set_sleep(state.sleep == 1);
}
