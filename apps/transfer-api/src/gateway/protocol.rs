//! Wire constants and framing for the plugin's streaming connection.

use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Text frames
// ---------------------------------------------------------------------------

/// Keepalive check sent by older plugins (matched as a prefix).
pub const HEARTBEAT_CHECK: &str = "\x01\x01HEARTCHECK";
/// Reply to [`HEARTBEAT_CHECK`].
pub const HEARTBEAT_ACK: &str = "\x01\x02HEARTCHECKOK";
/// Prefix marking a server notice rather than a relayed chat line.
pub const NOTICE_HEADER: &str = "\x01\x03\x01";

pub const RATE_LIMIT_WARNING: &str =
    "Exceeded the limit on the number of messages sent per minute.";

/// Out-of-band prompt sent through the chat network on a token request.
pub const TOKEN_PROMPT: &str = "Sync wants to request other services that the Token uses to access the Bot. Reply \"!assign_token\" to generate and send a token to Sync.";

// ---------------------------------------------------------------------------
// Binary frames: [u16 LE command][payload]
// ---------------------------------------------------------------------------

/// Client → server: ask for a bearer token.
pub const CMD_REQUEST_TOKEN: u16 = 1;
/// Server → client: `[u16 cmd][i32 len][token bytes]`, little-endian.
pub const CMD_TOKEN_REPLY: u16 = 2;

/// RFC 6455 policy-violation close code.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Read the command code of a binary frame. Frames shorter than two bytes
/// carry no command.
pub fn decode_command(frame: &[u8]) -> Option<u16> {
    match frame {
        [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

/// Build the `token-reply` frame.
pub fn encode_token_reply(token: &str) -> Vec<u8> {
    let bytes = token.as_bytes();
    let mut frame = Vec::with_capacity(2 + 4 + bytes.len());
    frame.extend_from_slice(&CMD_TOKEN_REPLY.to_le_bytes());
    frame.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
    frame.extend_from_slice(bytes);
    frame
}

/// Prefix `text` with the notice header.
pub fn notice(text: &str) -> String {
    format!("{NOTICE_HEADER}{text}")
}

/// Collapse a plugin chat line to a single IRC-safe line.
pub fn normalize_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ").trim().to_string()
}

// ---------------------------------------------------------------------------
// Plugin protocol version
// ---------------------------------------------------------------------------

/// `major.minor.patch` version announced by the plugin. Missing components
/// count as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

/// Assumed when the plugin does not announce a version.
pub const DEFAULT_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

/// Oldest plugin that understands the token-reply frame.
pub const TOKEN_MIN_VERSION: ProtocolVersion = ProtocolVersion::new(1, 1, 0);

impl Default for ProtocolVersion {
    fn default() -> Self {
        DEFAULT_VERSION
    }
}

impl FromStr for ProtocolVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('v');
        let mut parts = s.split('.');
        let mut next = |required: bool| -> Result<u32, ()> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| ()),
                None if required => Err(()),
                None => Ok(0),
            }
        };
        let version = ProtocolVersion::new(next(true)?, next(false)?, next(false)?);
        if parts.next().is_some() {
            return Err(());
        }
        Ok(version)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
