use crate::identity::IDENTITY_ENV_KEYS;
use crate::locker::CacheChannel;

pub const COMMAND_PREFIX: &str = "lemc.";
const ENV_COMMAND: &str = "env";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Trunc,
    Append,
}

impl CacheOp {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "trunc" => Some(Self::Trunc),
            "append" => Some(Self::Append),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolLine {
    Cache {
        channel: CacheChannel,
        op: CacheOp,
        payload: String,
    },
    Export {
        key: String,
        value: String,
    },
    Text(String),
}

/// Classifies one stdout line. Anything that is not a recognized command,
/// including malformed ones, comes back as [`ProtocolLine::Text`].
pub fn parse_line(line: &str) -> ProtocolLine {
    parse_command(line).unwrap_or_else(|| ProtocolLine::Text(line.to_string()))
}

fn parse_command(line: &str) -> Option<ProtocolLine> {
    let rest = line.strip_prefix(COMMAND_PREFIX)?;
    let (head, payload) = rest.split_once(';')?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if head == ENV_COMMAND {
        let (key, value) = payload.split_once('=')?;
        if !is_exportable_key(key) {
            return None;
        }
        return Some(ProtocolLine::Export {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    let (channel, op) = head.split_once('.')?;
    Some(ProtocolLine::Cache {
        channel: CacheChannel::parse(channel)?,
        op: CacheOp::parse(op)?,
        payload: payload.to_string(),
    })
}

fn is_exportable_key(key: &str) -> bool {
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        && !IDENTITY_ENV_KEYS.contains(&key)
}
