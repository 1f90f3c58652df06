//! Representation of the HTTP version token on the request/status line.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::ParseError;

/// Representation of the requested HTTP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// HTTP/1.0
    H1_0,
    /// HTTP/1.1
    H1_1,
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::H1_0 => "HTTP/1.0",
            Self::H1_1 => "HTTP/1.1",
        })
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP/1.0" => Ok(Self::H1_0),
            "HTTP/1.1" => Ok(Self::H1_1),
            _ => Err(ParseError::Version),
        }
    }
}

impl Version {
    /// Whether this version defaults to persistent connections absent an
    /// explicit `Connection` header (RFC 9112 9.3: HTTP/1.1 defaults to
    /// `keep-alive`, HTTP/1.0 defaults to `close`).
    pub fn defaults_to_keep_alive(self) -> bool {
        matches!(self, Self::H1_1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_versions() {
        assert_eq!(Version::H1_1, "HTTP/1.1".parse().unwrap());
        assert_eq!(Version::H1_0, "HTTP/1.0".parse().unwrap());
    }

    #[test]
    fn rejects_unknown_version() {
        assert!("HTTP/2".parse::<Version>().is_err());
    }

    #[test]
    fn h1_1_defaults_to_keep_alive() {
        assert!(Version::H1_1.defaults_to_keep_alive());
        assert!(!Version::H1_0.defaults_to_keep_alive());
    }
}
