//! HTTP Basic credential checks for the command transport.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Disabled,
    Granted,
    Denied,
}

impl AuthOutcome {
    pub fn allowed(self) -> bool {
        !matches!(self, Self::Denied)
    }
}

/// Checks an `Authorization` header value against the configured account.
pub fn authorize(config: &AuthConfig, header: Option<&str>) -> AuthOutcome {
    if !config.enabled() {
        return AuthOutcome::Disabled;
    }

    let Some((username, password)) = header.and_then(parse_basic) else {
        return AuthOutcome::Denied;
    };

    // compared as fixed-size digests, never as raw strings
    let user_ok = digest(&username) == digest(&config.username);
    let pass_ok = digest(&password) == digest(&config.password);
    if user_ok & pass_ok {
        AuthOutcome::Granted
    } else {
        AuthOutcome::Denied
    }
}

/// Value for the `WWW-Authenticate` response header.
pub fn challenge(config: &AuthConfig) -> String {
    format!("Basic realm=\"{}\", charset=\"UTF-8\"", config.realm)
}

fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}
