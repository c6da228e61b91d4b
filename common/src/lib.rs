pub mod auth;
pub mod codec;
pub mod config;
pub mod controller;
pub mod gree;
pub mod store;
pub mod types;

pub use auth::{authorize, AuthOutcome};
pub use config::{AuthConfig, ControllerConfig, IrHardwareConfig, NetworkConfig, RuntimeConfig};
pub use controller::{AcController, AcDriver, ApplyReport, BlockingDelay, Delay, TransmitError};
pub use gree::{FrameTransmitter, GreeAc};
pub use store::{CommandError, MemoryStorage, StateStore, Storage, StorageError, Validated};
pub use types::{AcCommand, AcMode, AcState, AcStatus, FanSpeed, TransmitDiagnostics, FIELD_COUNT};
