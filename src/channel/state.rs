use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle of a push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Idle,
    Connecting,
    Authenticating,
    Open,
    Reconnecting,
    Closed,
}

impl ChannelState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    /// No further transitions happen from this state
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Close code reported when the peer sent a close frame without a status
pub const NO_STATUS_CODE: u16 = 1005;

/// Close code for a connection lost without any close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Which close codes end the channel instead of reconnecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseCodePolicy {
    fatal: BTreeSet<u16>,
}

impl Default for CloseCodePolicy {
    /// Protocol error, abnormal closure, bad payload, policy violation (invalid token)
    fn default() -> Self {
        Self::new([1002, 1006, 1007, 1008])
    }
}

impl CloseCodePolicy {
    pub fn new(codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            fatal: codes.into_iter().collect(),
        }
    }

    /// Parse a comma-separated list such as `1002,1008,4001`
    pub fn parse(list: &str) -> Result<Self, String> {
        let mut codes = BTreeSet::new();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let code: u16 = part
                .parse()
                .map_err(|_| format!("Invalid close code '{}'", part))?;
            if !(1000..=4999).contains(&code) {
                return Err(format!("Close code {} outside 1000-4999", code));
            }
            codes.insert(code);
        }
        Ok(Self { fatal: codes })
    }

    pub fn is_fatal(&self, code: u16) -> bool {
        self.fatal.contains(&code)
    }

    pub fn codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.fatal.iter().copied()
    }
}
