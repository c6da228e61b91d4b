use serde::{Deserialize, Serialize};

/// Number of fields carried by a state record and by a command.
pub const FIELD_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AcMode {
    Auto,
    Cool,
    Dry,
    Fan,
    Heat,
}

impl AcMode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Auto),
            1 => Some(Self::Cool),
            2 => Some(Self::Dry),
            3 => Some(Self::Fan),
            4 => Some(Self::Heat),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Cool => "COOL",
            Self::Dry => "DRY",
            Self::Fan => "FAN",
            Self::Heat => "HEAT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FanSpeed {
    Auto,
    Low,
    Mid,
    Max,
}

impl FanSpeed {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Auto),
            1 => Some(Self::Low),
            2 => Some(Self::Mid),
            3 => Some(Self::Max),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Low => "LOW",
            Self::Mid => "MID",
            Self::Max => "MAX",
        }
    }
}

/// Ten-field air conditioner configuration, in wire and storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcState {
    pub mode: u8,
    pub temperature: u8,
    pub fan_speed: u8,
    pub flap_auto: u8,
    pub flap_position: u8,
    pub light: u8,
    pub turbo: u8,
    pub xfan: u8,
    pub sleep: u8,
    pub power: u8,
}

impl AcState {
    /// Replacement for any record that fails range validation.
    pub const DEFAULT: AcState = AcState {
        mode: 0,
        temperature: 24,
        fan_speed: 0,
        flap_auto: 1,
        flap_position: 1,
        light: 0,
        turbo: 0,
        xfan: 0,
        sleep: 0,
        power: 0,
    };

    pub fn from_fields(fields: [u8; FIELD_COUNT]) -> Self {
        let [mode, temperature, fan_speed, flap_auto, flap_position, light, turbo, xfan, sleep, power] =
            fields;
        Self {
            mode,
            temperature,
            fan_speed,
            flap_auto,
            flap_position,
            light,
            turbo,
            xfan,
            sleep,
            power,
        }
    }

    pub fn to_fields(&self) -> [u8; FIELD_COUNT] {
        [
            self.mode,
            self.temperature,
            self.fan_speed,
            self.flap_auto,
            self.flap_position,
            self.light,
            self.turbo,
            self.xfan,
            self.sleep,
            self.power,
        ]
    }

    /// The light, turbo, xfan and sleep flags (fields 5 through 8).
    pub fn options(&self) -> [u8; 4] {
        [self.light, self.turbo, self.xfan, self.sleep]
    }

    pub fn is_on(&self) -> bool {
        self.power == 1
    }
}

impl Default for AcState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Externally supplied command. Same shape as [`AcState`], but nothing about
/// its contents has been checked yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcCommand(pub [u8; FIELD_COUNT]);

impl AcCommand {
    pub fn fields(&self) -> &[u8; FIELD_COUNT] {
        &self.0
    }

    pub fn power(&self) -> u8 {
        self.0[FIELD_COUNT - 1]
    }

    pub fn is_power_on(&self) -> bool {
        self.power() == 1
    }

    pub fn as_state(&self) -> AcState {
        AcState::from_fields(self.0)
    }
}

impl From<AcState> for AcCommand {
    fn from(state: AcState) -> Self {
        Self(state.to_fields())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AcStatus {
    pub state: String,
    pub mode: &'static str,
    pub temperature: u8,
    #[serde(rename = "fanSpeed")]
    pub fan_speed: &'static str,
    #[serde(rename = "flapAuto")]
    pub flap_auto: bool,
    #[serde(rename = "flapPosition")]
    pub flap_position: u8,
    pub light: bool,
    pub turbo: bool,
    pub xfan: bool,
    pub sleep: bool,
    pub power: bool,
    pub transmit: TransmitDiagnostics,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransmitDiagnostics {
    #[serde(rename = "repeatCount")]
    pub repeat_count: u8,
    #[serde(rename = "repeatGapMs")]
    pub repeat_gap_ms: u64,
    #[serde(rename = "commandsApplied")]
    pub commands_applied: u64,
    #[serde(rename = "sentFrames")]
    pub sent_frames: u64,
    #[serde(rename = "failedSends")]
    pub failed_sends: u64,
    #[serde(rename = "persistFailures")]
    pub persist_failures: u64,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_follow_wire_order() {
        let state = AcState::from_fields([4, 18, 3, 0, 5, 1, 1, 0, 0, 1]);

        assert_eq!(state.mode, 4);
        assert_eq!(state.temperature, 18);
        assert_eq!(state.flap_position, 5);
        assert_eq!(state.options(), [1, 1, 0, 0]);
        assert!(state.is_on());
        assert_eq!(state.to_fields(), [4, 18, 3, 0, 5, 1, 1, 0, 0, 1]);
    }

    #[test]
    fn command_power_is_last_field() {
        let command = AcCommand([0, 24, 0, 1, 1, 0, 0, 0, 0, 1]);
        assert!(command.is_power_on());

        let command = AcCommand::default();
        assert_eq!(command.power(), 0);
        assert!(!command.is_power_on());
    }

    #[test]
    fn mode_and_fan_names() {
        assert_eq!(AcMode::from_code(4).map(AcMode::as_str), Some("HEAT"));
        assert_eq!(AcMode::from_code(5), None);
        assert_eq!(FanSpeed::from_code(3).map(FanSpeed::as_str), Some("MAX"));
        assert_eq!(FanSpeed::from_code(4), None);
    }
}
