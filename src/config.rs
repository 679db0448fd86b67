//! Connection settings consumed by the LOCAL INFILE handler.
//!
//! Settings come either from the builder methods or from a driver DSN
//! query string (`allowAllFiles=true&loc=Local&maxAllowedPacket=4194304`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::error::{InfileError, InfileResult};

/// Server default for `max_allowed_packet` (64 MiB).
pub const DEFAULT_MAX_ALLOWED_PACKET: usize = 64 << 20;

/// Smallest `max_allowed_packet` the server accepts.
pub const MIN_MAX_ALLOWED_PACKET: usize = 1024;

/// Timezone used to render timestamps in programmatic rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Location {
    #[default]
    Utc,
    /// The host's local timezone.
    Local,
    Fixed(FixedOffset),
}

impl Location {
    /// Wall-clock time of `ts` in this location.
    pub fn to_naive(&self, ts: &DateTime<Utc>) -> NaiveDateTime {
        match self {
            Location::Utc => ts.naive_utc(),
            Location::Local => ts.with_timezone(&chrono::Local).naive_local(),
            Location::Fixed(offset) => ts.with_timezone(offset).naive_local(),
        }
    }
}

impl FromStr for Location {
    type Err = InfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "UTC" | "utc" | "Z" => return Ok(Location::Utc),
            "Local" | "local" => return Ok(Location::Local),
            _ => {}
        }

        let invalid = || InfileError::Config(format!("invalid location '{}'", s));
        let (sign, rest) = match s.as_bytes().first() {
            Some(b'+') => (1, &s[1..]),
            Some(b'-') => (-1, &s[1..]),
            _ => return Err(invalid()),
        };
        let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if minutes >= 60 {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Location::Fixed)
            .ok_or_else(invalid)
    }
}

impl TryFrom<String> for Location {
    type Error = InfileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Utc => write!(f, "UTC"),
            Location::Local => write!(f, "Local"),
            Location::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

/// Per-connection LOCAL INFILE settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InfileConfig {
    pub max_allowed_packet: usize,
    /// Stream any readable file, ignoring the whitelist.
    pub allow_all_files: bool,
    #[serde(rename = "loc")]
    pub location: Location,
    /// Reject rows holding unsupported values instead of sending an empty field.
    pub strict_values: bool,
}

impl Default for InfileConfig {
    fn default() -> Self {
        Self {
            max_allowed_packet: DEFAULT_MAX_ALLOWED_PACKET,
            allow_all_files: false,
            location: Location::Utc,
            strict_values: false,
        }
    }
}

impl InfileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server's `max_allowed_packet`.
    pub fn max_allowed_packet(mut self, size: usize) -> Self {
        self.max_allowed_packet = size;
        self
    }

    /// Allow every local file, bypassing the whitelist.
    pub fn allow_all_files(mut self, enabled: bool) -> Self {
        self.allow_all_files = enabled;
        self
    }

    /// Set the timezone used for timestamp rendering.
    pub fn location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn strict_values(mut self, enabled: bool) -> Self {
        self.strict_values = enabled;
        self
    }

    /// Largest packet payload the client may write.
    pub fn max_write_size(&self) -> usize {
        self.max_allowed_packet.saturating_sub(1)
    }

    pub fn validate(&self) -> InfileResult<()> {
        if self.max_allowed_packet < MIN_MAX_ALLOWED_PACKET {
            return Err(InfileError::Config(format!(
                "maxAllowedPacket must be at least {} (got {})",
                MIN_MAX_ALLOWED_PACKET, self.max_allowed_packet
            )));
        }
        Ok(())
    }

    /// Parse the DSN query string of a driver URL.
    ///
    /// Recognizes `allowAllFiles`, `loc`, `maxAllowedPacket` and
    /// `strictValues`. Other parameters belong to the rest of the driver and
    /// are skipped.
    pub fn from_dsn_params(query: &str) -> InfileResult<Self> {
        let mut config = Self::default();
        let query = query.trim_start_matches('?');

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "allowAllFiles" => config.allow_all_files = parse_bool(&key, &value)?,
                "strictValues" => config.strict_values = parse_bool(&key, &value)?,
                "loc" => config.location = value.parse()?,
                "maxAllowedPacket" => {
                    config.max_allowed_packet = value.parse().map_err(|_| {
                        InfileError::Config(format!("invalid maxAllowedPacket '{}'", value))
                    })?;
                }
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> InfileResult<bool> {
    match value {
        "1" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(InfileError::Config(format!(
            "invalid bool value for {}: '{}'",
            key, value
        ))),
    }
}
