//! Caller classes and the limits that apply to each.

use std::fmt;
use std::time::Duration;

/// Which quota namespace a request is evaluated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientClass {
    /// Caller identified by network address
    Anonymous,
    /// Caller that presented a credential token
    Credentialed,
}

impl ClientClass {
    /// Classify by whether a credential was presented.
    pub fn from_credential(has_credential: bool) -> Self {
        if has_credential {
            ClientClass::Credentialed
        } else {
            ClientClass::Anonymous
        }
    }

    /// Short name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientClass::Anonymous => "anonymous",
            ClientClass::Credentialed => "credentialed",
        }
    }
}

impl fmt::Display for ClientClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-second ceiling and lockout length for one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLimits {
    /// Requests admitted per window
    pub limit: u64,
    /// How long an identifier stays blocked after crossing `limit`
    pub block_duration: Duration,
}

/// Static limits for both caller classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub anonymous: ClassLimits,
    pub credentialed: ClassLimits,
}

impl LimitPolicy {
    /// Limits applying to a class.
    pub fn limits_for(&self, class: ClientClass) -> ClassLimits {
        match class {
            ClientClass::Anonymous => self.anonymous,
            ClientClass::Credentialed => self.credentialed,
        }
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            anonymous: ClassLimits {
                limit: 5,
                block_duration: Duration::from_secs(60),
            },
            credentialed: ClassLimits {
                limit: 20,
                block_duration: Duration::from_secs(300),
            },
        }
    }
}
