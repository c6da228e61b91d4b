use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Transmissions per command, for units that miss a frame.
    pub cmd_repeat: u8,
    pub repeat_gap_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cmd_repeat: 3,
            repeat_gap_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            http_port: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub realm: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: String::new(),
            realm: "greeAC".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn enabled(&self) -> bool {
        !self.password.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IrHardwareConfig {
    pub tx_pin: i32,
    pub rmt_channel: u8,
    pub carrier_khz: u32,
}

impl Default for IrHardwareConfig {
    fn default() -> Self {
        Self {
            tx_pin: 4,
            rmt_channel: 0,
            carrier_khz: crate::gree::CARRIER_KHZ,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub ir: IrHardwareConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.controller.sanitize();
        self.ir.sanitize();
        if self.auth.realm.trim().is_empty() {
            self.auth.realm = AuthConfig::default().realm;
        }
        if self.network.http_port == 0 {
            self.network.http_port = NetworkConfig::default().http_port;
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.cmd_repeat = self.cmd_repeat.clamp(1, 10);
        self.repeat_gap_ms = self.repeat_gap_ms.min(10_000);
    }
}

impl IrHardwareConfig {
    pub fn sanitize(&mut self) {
        if self.tx_pin < 0 {
            self.tx_pin = 4;
        }

        if self.rmt_channel > 7 {
            self.rmt_channel = 0;
        }

        self.carrier_khz = self.carrier_khz.clamp(10, 100);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"auth":{"username":"antani","password":"antani","realm":"greeAC"}}"#)
                .unwrap();

        assert_eq!(config.controller, ControllerConfig::default());
        assert_eq!(config.ir.carrier_khz, 38);
        assert!(config.auth.enabled());
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut config = RuntimeConfig::default();
        config.controller.cmd_repeat = 0;
        config.controller.repeat_gap_ms = 60_000;
        config.ir.rmt_channel = 9;
        config.ir.carrier_khz = 500;
        config.ir.tx_pin = -3;
        config.auth.realm = " ".to_string();
        config.network.http_port = 0;

        config.sanitize();

        assert_eq!(config.controller.cmd_repeat, 1);
        assert_eq!(config.controller.repeat_gap_ms, 10_000);
        assert_eq!(config.ir.rmt_channel, 0);
        assert_eq!(config.ir.carrier_khz, 100);
        assert_eq!(config.ir.tx_pin, 4);
        assert_eq!(config.auth.realm, "greeAC");
        assert_eq!(config.network.http_port, 80);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{"auth":{"password":"s3cret"},"network":{"wifi_ssid":"home"},"controller":{"cmd_repeat":5}}"#,
        )
        .unwrap();

        assert!(config.auth.enabled());
        assert_eq!(config.auth.username, "admin");
        assert_eq!(config.auth.realm, "greeAC");
        assert_eq!(config.network.wifi_ssid, "home");
        assert_eq!(config.network.http_port, 80);
        assert_eq!(config.controller.cmd_repeat, 5);
        assert_eq!(config.controller.repeat_gap_ms, 1_500);
    }

    #[test]
    fn auth_disabled_without_password() {
        assert!(!AuthConfig::default().enabled());
    }
}
