use std::time::Duration;

/// How long a peer gets to deliver a complete ClientHello or request head.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on bytes buffered while sniffing one connection.
pub const DEFAULT_MAX_HANDSHAKE_BYTES: usize = 64 * 1024;

/// Which hostname to keep when a server_name extension lists several.
///
/// Real clients send exactly one, so this rarely matters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SniSelection {
    #[default]
    First,
    Last,
}

impl SniSelection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first" => Some(Self::First),
            "last" => Some(Self::Last),
            _ => None,
        }
    }
}

/// Per-connection sniffing limits.
#[derive(Debug, Clone)]
pub struct SniffConfig {
    /// Single deadline covering every read of one sniffing attempt.
    pub handshake_timeout: Duration,
    /// Cap on bytes consumed from the peer before giving up.
    pub max_handshake_bytes: usize,
    pub sni_selection: SniSelection,
}

impl Default for SniffConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_handshake_bytes: DEFAULT_MAX_HANDSHAKE_BYTES,
            sni_selection: SniSelection::First,
        }
    }
}

impl SniffConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_max_handshake_bytes(mut self, max: usize) -> Self {
        self.max_handshake_bytes = max;
        self
    }

    pub fn with_sni_selection(mut self, selection: SniSelection) -> Self {
        self.sni_selection = selection;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SniffConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.max_handshake_bytes, 65536);
        assert_eq!(config.sni_selection, SniSelection::First);
    }

    #[test]
    fn sni_selection_parse() {
        assert_eq!(SniSelection::parse("first"), Some(SniSelection::First));
        assert_eq!(SniSelection::parse("last"), Some(SniSelection::Last));
        assert_eq!(SniSelection::parse("middle"), None);
    }
}
