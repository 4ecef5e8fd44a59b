//! Artifact versions: `major[.minor[.micro[.qualifier]]]`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RegistrationError;

/// Marker used to recognise unstable builds when no other is configured.
pub const DEFAULT_SNAPSHOT_MARKER: &str = "SNAPSHOT";

/// A parsed artifact version.
///
/// Numeric segments compare numerically, the qualifier compares
/// lexicographically and an empty qualifier sorts lowest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub micro: u64,
    pub qualifier: String,
}

impl Version {
    pub fn new(major: u64, minor: u64, micro: u64) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// Parses a version string.
    ///
    /// Accepts the Maven style `1.0-SNAPSHOT` and normalises it to
    /// `1.0.0.SNAPSHOT`.
    pub fn parse(input: &str) -> Result<Self, RegistrationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid(input, "version must not be empty"));
        }

        let mut segments = trimmed.splitn(4, '.');
        let mut numeric = [0u64; 3];
        let mut qualifier = String::new();
        let mut dashed = false;

        for (index, slot) in numeric.iter_mut().enumerate() {
            let Some(segment) = segments.next() else {
                break;
            };
            let (digits, dash_qualifier) = match segment.split_once('-') {
                Some((digits, rest)) => (digits, Some(rest)),
                None => (segment, None),
            };
            *slot = digits.parse::<u64>().map_err(|_| {
                invalid(
                    input,
                    &format!("segment {} '{}' is not a number", index + 1, digits),
                )
            })?;
            if let Some(rest) = dash_qualifier {
                qualifier = rest.to_string();
                dashed = true;
                break;
            }
        }

        if let Some(rest) = segments.next() {
            if dashed {
                return Err(invalid(input, "qualifier must be the last segment"));
            }
            qualifier = rest.to_string();
        }

        if !qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid(input, "qualifier may only contain [A-Za-z0-9_-]"));
        }

        Ok(Self {
            major: numeric[0],
            minor: numeric[1],
            micro: numeric[2],
            qualifier,
        })
    }

    /// Returns true if the qualifier carries the unstable-build marker.
    pub fn is_snapshot(&self, marker: &str) -> bool {
        !marker.is_empty() && self.qualifier.contains(marker)
    }
}

fn invalid(input: &str, reason: &str) -> RegistrationError {
    RegistrationError::InvalidVersion {
        version: input.to_string(),
        reason: reason.to_string(),
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.micro.cmp(&other.micro))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let v = Version::parse("1.2.3.beta").unwrap();
        assert_eq!(v.major, 1);
        assert_eq!(v.minor, 2);
        assert_eq!(v.micro, 3);
        assert_eq!(v.qualifier, "beta");
    }

    #[test]
    fn test_parse_partial_fills_zeroes() {
        assert_eq!(Version::parse("2").unwrap(), Version::new(2, 0, 0));
        assert_eq!(Version::parse("2.5").unwrap(), Version::new(2, 5, 0));
    }

    #[test]
    fn test_parse_maven_snapshot() {
        let v = Version::parse("1.0-SNAPSHOT").unwrap();
        assert_eq!(v, Version::new(1, 0, 0).with_qualifier("SNAPSHOT"));
        assert_eq!(v.to_string(), "1.0.0.SNAPSHOT");
        assert!(v.is_snapshot(DEFAULT_SNAPSHOT_MARKER));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("one.two").is_err());
        assert!(Version::parse("1.0.0.a b").is_err());
        assert!(Version::parse("1.0.0.x-1-y").is_ok());
    }

    #[test]
    fn test_ordering() {
        let v1 = Version::parse("1.0.0").unwrap();
        let v2 = Version::parse("1.0.1").unwrap();
        let v10 = Version::parse("1.10").unwrap();
        let q = Version::parse("1.0.0.a").unwrap();
        assert!(v1 < v2);
        assert!(v2 < v10);
        assert!(v1 < q);
        assert!(q < v2);
    }

    #[test]
    fn test_snapshot_marker() {
        let v = Version::parse("1.0.0.20240101-SNAPSHOT").unwrap();
        assert!(v.is_snapshot("SNAPSHOT"));
        assert!(!v.is_snapshot("UNSTABLE"));
        assert!(!Version::new(1, 0, 0).is_snapshot("SNAPSHOT"));
        assert!(!v.is_snapshot(""));
    }

    #[test]
    fn test_serde_as_string() {
        let v = Version::parse("3.1.4.RC1").unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"3.1.4.RC1\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
