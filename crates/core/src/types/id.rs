//! Catalog identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected product id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid product id: {0}")]
pub struct InvalidProductId(pub String);

/// Database id of a catalog product. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

impl ProductId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ProductId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for ProductId {
    type Err = InvalidProductId;

    /// Parse a path segment. Only plain positive decimal integers pass.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidProductId(s.to_owned()));
        }
        match s.parse::<i64>() {
            Ok(id) if id > 0 => Ok(Self(id)),
            _ => Err(InvalidProductId(s.to_owned())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positive() {
        assert_eq!("42".parse::<ProductId>().unwrap(), ProductId::new(42));
        assert_eq!("007".parse::<ProductId>().unwrap().as_i64(), 7);
    }

    #[test]
    fn test_parse_rejects_non_positive_and_junk() {
        for bad in ["", "0", "-3", "+3", "1.5", "abc", " 4", "99999999999999999999"] {
            assert!(bad.parse::<ProductId>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_serializes_as_number() {
        let json = serde_json::to_string(&ProductId::new(9)).unwrap();
        assert_eq!(json, "9");
        assert_eq!(ProductId::new(9).to_string(), "9");
    }
}
