//! Store key generation for counter and block records.

/// Segment naming the per-window request counters.
const REQUESTS_SEGMENT: &str = "requests";
/// Segment naming the block records.
const BLOCKED_SEGMENT: &str = "blocked";

/// Builds the store keys an identifier's records live under.
///
/// Keys have the shape `<prefix>:requests:<identifier>` and
/// `<prefix>:blocked:<identifier>`. With an empty prefix the leading segment
/// is dropped entirely, so the layout becomes `requests:<identifier>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Create a key space under the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of the request counter for an identifier.
    pub fn requests(&self, identifier: &str) -> String {
        self.key(REQUESTS_SEGMENT, identifier)
    }

    /// Key of the block record for an identifier.
    pub fn blocked(&self, identifier: &str) -> String {
        self.key(BLOCKED_SEGMENT, identifier)
    }

    /// Map a block key back to the counter key of the same identifier.
    ///
    /// Returns `None` if the key does not belong to this key space.
    pub fn requests_for_blocked(&self, blocked_key: &str) -> Option<String> {
        let identifier = blocked_key.strip_prefix(&self.key(BLOCKED_SEGMENT, ""))?;
        Some(self.requests(identifier))
    }

    fn key(&self, segment: &str, identifier: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}:{}", segment, identifier)
        } else {
            format!("{}:{}:{}", self.prefix, segment, identifier)
        }
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("limiter")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prefix() {
        let keys = KeySpace::default();

        assert_eq!(keys.requests("192.168.1.1"), "limiter:requests:192.168.1.1");
        assert_eq!(keys.blocked("192.168.1.1"), "limiter:blocked:192.168.1.1");
    }

    #[test]
    fn test_empty_prefix_drops_leading_segment() {
        let keys = KeySpace::new("");

        assert_eq!(keys.requests("token-abc"), "requests:token-abc");
        assert_eq!(keys.blocked("token-abc"), "blocked:token-abc");
    }

    #[test]
    fn test_requests_for_blocked() {
        let keys = KeySpace::new("app");

        assert_eq!(
            keys.requests_for_blocked("app:blocked:10.0.0.1"),
            Some("app:requests:10.0.0.1".to_string())
        );
        assert_eq!(keys.requests_for_blocked("other:blocked:10.0.0.1"), None);
    }

    #[test]
    fn test_identifier_with_colons_round_trips() {
        let keys = KeySpace::default();
        let blocked = keys.blocked("::1");

        assert_eq!(blocked, "limiter:blocked:::1");
        assert_eq!(
            keys.requests_for_blocked(&blocked),
            Some("limiter:requests:::1".to_string())
        );
    }
}
