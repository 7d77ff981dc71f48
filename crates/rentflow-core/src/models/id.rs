//! Record identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const TEMPORARY_PREFIX: &str = "tmp-";

/// Identifier of an entity record.
///
/// Records created while offline carry a client-generated `Temporary` id until
/// the remote service confirms them and assigns its own id. Confirmed ids are
/// stable and stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawRecordId", into = "String")]
pub enum RecordId {
    /// Client-generated placeholder, rendered as `tmp-<uuid>`
    Temporary(Uuid),
    /// Server-assigned identifier
    Confirmed(String),
}

impl RecordId {
    /// Create a new temporary id using UUID v7 (time-sortable)
    #[must_use]
    pub fn temporary() -> Self {
        Self::Temporary(Uuid::now_v7())
    }

    /// Wrap a server-assigned id
    pub fn confirmed(id: impl Into<String>) -> Self {
        Self::Confirmed(id.into())
    }

    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary(uuid) => write!(f, "{TEMPORARY_PREFIX}{uuid}"),
            Self::Confirmed(id) => f.write_str(id),
        }
    }
}

impl FromStr for RecordId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("record id must not be empty".to_string());
        }
        if let Some(raw) = s.strip_prefix(TEMPORARY_PREFIX) {
            if let Ok(uuid) = Uuid::parse_str(raw) {
                return Ok(Self::Temporary(uuid));
            }
        }
        Ok(Self::Confirmed(s.to_string()))
    }
}

/// Wire shape of an id; some backends hand out integer keys.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecordId {
    Text(String),
    Integer(i64),
}

impl TryFrom<RawRecordId> for RecordId {
    type Error = String;

    fn try_from(value: RawRecordId) -> Result<Self, Self::Error> {
        match value {
            RawRecordId::Text(text) => text.parse(),
            RawRecordId::Integer(number) => Ok(Self::Confirmed(number.to_string())),
        }
    }
}

impl From<RecordId> for String {
    fn from(value: RecordId) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_ids_are_unique_and_tagged() {
        let a = RecordId::temporary();
        let b = RecordId::temporary();
        assert_ne!(a, b);
        assert!(a.is_temporary());
        assert!(a.as_str().starts_with("tmp-"));
    }

    #[test]
    fn parse_distinguishes_temporary_from_confirmed() {
        let temp = RecordId::temporary();
        let parsed: RecordId = temp.as_str().parse().unwrap();
        assert_eq!(parsed, temp);

        let server: RecordId = "srv-77".parse().unwrap();
        assert_eq!(server, RecordId::confirmed("srv-77"));

        // A prefix without a valid uuid is just a server id that happens to look odd
        let odd: RecordId = "tmp-1".parse().unwrap();
        assert!(!odd.is_temporary());
    }

    #[test]
    fn parse_rejects_empty() {
        assert!("  ".parse::<RecordId>().is_err());
    }

    #[test]
    fn serde_uses_plain_strings() {
        let id = RecordId::confirmed("42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");
        let back: RecordId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(back, id);
        let numeric: RecordId = serde_json::from_str("42").unwrap();
        assert_eq!(numeric, id);
    }
}
