//! Size-based rotation.
//!
//! A [`MaxSize`] accepts either a raw byte count or a human unit
//! (`k`, `m`, `g`, case-insensitive, fractional allowed). Values that do not
//! parse mean "no limit".

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Upper bound on the size of a single file, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaxSize(u64);

impl MaxSize {
    /// A limit of exactly `bytes` bytes.
    #[must_use]
    pub const fn bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Returns the limit in bytes.
    #[must_use]
    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Parses `"1048576"`, `"10k"`, `"0.5M"` or `"2g"`.
    ///
    /// Returns `None` for empty, zero, negative or malformed input.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim().to_ascii_lowercase();
        if input.is_empty() {
            return None;
        }

        let (number, multiplier) = match input.as_bytes()[input.len() - 1] {
            b'k' => (&input[..input.len() - 1], 1024f64),
            b'm' => (&input[..input.len() - 1], 1024f64 * 1024.0),
            b'g' => (&input[..input.len() - 1], 1024f64 * 1024.0 * 1024.0),
            _ => (input.as_str(), 1f64),
        };

        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return None;
        }
        let value: f64 = number.parse().ok()?;
        let bytes = (value * multiplier).round();
        if !bytes.is_finite() || bytes < 1.0 || bytes > u64::MAX as f64 {
            return None;
        }
        Some(Self(bytes as u64))
    }
}

impl fmt::Display for MaxSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for MaxSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for MaxSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(0) => Err(serde::de::Error::custom("max size must be positive")),
            Raw::Bytes(n) => Ok(Self(n)),
            Raw::Text(s) => Self::parse(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("unrecognized size: {s}"))),
        }
    }
}

/// Reads an optional size limit, treating a value that does not parse as
/// "no limit".
///
/// # Errors
///
/// Only fails if the deserializer itself fails.
pub fn deserialize_max_size<'de, D>(deserializer: D) -> Result<Option<MaxSize>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    let max = match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Bytes(0)) => {
            tracing::warn!("ignoring max size of 0 bytes, files will not rotate on size");
            None
        }
        Some(Raw::Bytes(n)) => Some(MaxSize(n)),
        Some(Raw::Text(s)) => {
            let parsed = MaxSize::parse(&s);
            if parsed.is_none() {
                tracing::warn!(value = %s, "ignoring unrecognized max size, files will not rotate on size");
            }
            parsed
        }
        Some(Raw::Other(_)) => {
            tracing::warn!("ignoring max size that is neither a number nor a string");
            None
        }
    };
    Ok(max)
}

/// Returns true if the active file must rotate before the next write.
///
/// The check is made against the size before the incoming write, so a file
/// may end slightly larger than `max` but a write is never split.
#[must_use]
pub fn should_rotate(current: u64, _incoming: u64, max: Option<MaxSize>) -> bool {
    max.is_some_and(|max| current >= max.0)
}
