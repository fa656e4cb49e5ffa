//! Wire format selection for subscriber payloads

use serde::{Deserialize, Serialize};

/// Payload format pushed to WebSocket subscribers
///
/// There is no negotiation with clients: the relay is configured for one format and every
/// subscriber receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Compact little-endian binary frames
    #[default]
    Binary,

    /// Space-separated legacy text frames
    Text,
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::Binary => f.write_str("binary"),
            WireFormat::Text => f.write_str("text"),
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = crate::RelayError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" => Ok(WireFormat::Binary),
            "text" => Ok(WireFormat::Text),
            other => Err(crate::RelayError::invalid_config(format!(
                "unknown wire format '{}', expected 'binary' or 'text'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Binary".parse::<WireFormat>().unwrap(), WireFormat::Binary);
        assert_eq!(" text ".parse::<WireFormat>().unwrap(), WireFormat::Text);
        assert!("json".parse::<WireFormat>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for format in [WireFormat::Binary, WireFormat::Text] {
            assert_eq!(format.to_string().parse::<WireFormat>().unwrap(), format);
        }
    }
}
