//! Core data model: timestamps, authors, changesets and transactions.
//!
//! A [`Transaction`] is one committed, author-tagged unit of change in the
//! shared log. Its changeset is a list of object-level [`Change`]s, each
//! carrying the post-image of one entity (or a delete marker), which is
//! enough to re-apply the change to any materialized view.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Wall-clock instant in microseconds since the Unix epoch.
///
/// This is the total-order key of the log. [`Timestamp::DISTANT_PAST`] sorts
/// before every real instant and stands in for "never merged".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Earliest representable instant.
    pub const DISTANT_PAST: Self = Self(i64::MIN);

    /// Build a timestamp from raw microseconds.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Raw microseconds since the Unix epoch.
    #[must_use]
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Current system time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_micros())
    }

    /// The next representable instant (one microsecond later).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Subtract a duration, clamping at [`Timestamp::DISTANT_PAST`].
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(micros))
    }

    /// Add a duration, clamping at the far future.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(micros))
    }

    /// Convert to a `chrono` UTC datetime, if in range.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::DISTANT_PAST {
            return f.write_str("distant-past");
        }
        match self.to_datetime() {
            Some(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Micros, true)),
            None => write!(f, "{}us", self.0),
        }
    }
}

/// Error parsing a [`Timestamp`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timestamp '{0}': expected microseconds since epoch or RFC 3339")]
pub struct ParseTimestampError(String);

impl FromStr for Timestamp {
    type Err = ParseTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "distant-past" {
            return Ok(Self::DISTANT_PAST);
        }
        if let Ok(micros) = trimmed.parse::<i64>() {
            return Ok(Self(micros));
        }
        DateTime::parse_from_rfc3339(trimmed)
            .map(|dt| Self(dt.with_timezone(&Utc).timestamp_micros()))
            .map_err(|_| ParseTimestampError(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Authors
// ---------------------------------------------------------------------------

/// Errors building a [`Roster`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("author roster is empty")]
    Empty,

    #[error("author names must not be empty")]
    EmptyName,

    #[error("author '{0}' is listed more than once")]
    Duplicate(String),
}

/// The closed, enumerable set of known authors declared by the application.
///
/// Every consumer that calls into the engine must be a member. Order is the
/// declaration order and is preserved for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Roster {
    names: Vec<String>,
}

impl Roster {
    /// Build a roster from author names.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty, contains an empty name, or
    /// repeats a name.
    pub fn new<I, S>(names: I) -> Result<Self, RosterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(RosterError::Empty);
        }

        let mut seen = HashSet::new();
        for name in &names {
            if name.trim().is_empty() {
                return Err(RosterError::EmptyName);
            }
            if !seen.insert(name.as_str()) {
                return Err(RosterError::Duplicate(name.clone()));
            }
        }

        Ok(Self { names })
    }

    /// All author names in declaration order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether `author` is a known author.
    #[must_use]
    pub fn contains(&self, author: &str) -> bool {
        self.names.iter().any(|n| n == author)
    }

    /// Every known author except `current`.
    #[must_use]
    pub fn others(&self, current: &str) -> Vec<String> {
        self.names.iter().filter(|n| *n != current).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl TryFrom<Vec<String>> for Roster {
    type Error = RosterError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<Roster> for Vec<String> {
    fn from(roster: Roster) -> Self {
        roster.names
    }
}

// ---------------------------------------------------------------------------
// Changesets
// ---------------------------------------------------------------------------

/// Stable identity of one entity in the shared data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happened to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeOp {
    /// Entity created or replaced; carries the full post-image.
    Upsert { value: serde_json::Value },
    /// Entity removed.
    Delete,
}

/// One entity-level change inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub entity: EntityId,
    pub op: ChangeOp,
}

impl Change {
    pub fn upsert(entity: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            entity: EntityId::new(entity),
            op: ChangeOp::Upsert { value },
        }
    }

    pub fn delete(entity: impl Into<String>) -> Self {
        Self {
            entity: EntityId::new(entity),
            op: ChangeOp::Delete,
        }
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Position of a transaction in the log: timestamp first, then sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub timestamp: Timestamp,
    pub seq: i64,
}

/// An immutable, committed unit of change recorded by the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Log sequence number; never reused, even after compaction.
    pub seq: i64,
    /// Name of the author that committed it.
    pub author: String,
    /// Commit time; strictly increasing across the whole log.
    pub timestamp: Timestamp,
    pub changes: Vec<Change>,
}

impl Transaction {
    #[must_use]
    pub const fn version(&self) -> Version {
        Version {
            timestamp: self.timestamp,
            seq: self.seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distant_past_sorts_first_and_displays() {
        assert!(Timestamp::DISTANT_PAST < Timestamp::from_micros(i64::MIN + 1));
        assert!(Timestamp::DISTANT_PAST < Timestamp::from_micros(0));
        assert_eq!(Timestamp::DISTANT_PAST.to_string(), "distant-past");
    }

    #[test]
    fn saturating_sub_clamps() {
        let ts = Timestamp::from_micros(i64::MIN + 5);
        assert_eq!(
            ts.saturating_sub(Duration::from_secs(1)),
            Timestamp::DISTANT_PAST
        );
        let ts = Timestamp::from_micros(10_000_000);
        assert_eq!(
            ts.saturating_sub(Duration::from_secs(1)),
            Timestamp::from_micros(9_000_000)
        );
    }

    #[test]
    fn timestamp_parses_micros_and_rfc3339() {
        assert_eq!(
            "1700000000000000".parse::<Timestamp>(),
            Ok(Timestamp::from_micros(1_700_000_000_000_000))
        );
        let parsed: Timestamp = "2023-11-14T22:13:20Z".parse().expect("rfc3339");
        assert_eq!(parsed, Timestamp::from_micros(1_700_000_000_000_000));
        assert!("yesterday".parse::<Timestamp>().is_err());
    }

    #[test]
    fn display_is_rfc3339_with_micros() {
        let ts = Timestamp::from_micros(1_700_000_000_000_001);
        assert_eq!(ts.to_string(), "2023-11-14T22:13:20.000001Z");
    }

    #[test]
    fn roster_rejects_empty_and_duplicates() {
        assert_eq!(Roster::new(Vec::<String>::new()), Err(RosterError::Empty));
        assert_eq!(Roster::new(["a", ""]), Err(RosterError::EmptyName));
        assert_eq!(
            Roster::new(["a", "b", "a"]),
            Err(RosterError::Duplicate("a".into()))
        );
    }

    #[test]
    fn roster_others_excludes_current() {
        let roster = Roster::new(["app", "widget", "importer"]).expect("roster");
        assert_eq!(roster.others("widget"), vec!["app", "importer"]);
        assert_eq!(roster.others("stranger").len(), 3);
        assert!(roster.contains("importer"));
        assert!(!roster.contains("stranger"));
    }

    #[test]
    fn roster_deserializes_from_list() {
        let roster: Roster = serde_json::from_str(r#"["a","b"]"#).expect("parse");
        assert_eq!(roster.names(), ["a", "b"]);
        assert!(serde_json::from_str::<Roster>("[]").is_err());
    }

    #[test]
    fn change_serializes_with_kind_tag() {
        let change = Change::upsert("student-1", serde_json::json!({"name": "Ada"}));
        let json = serde_json::to_value(&change).expect("serialize");
        assert_eq!(json["entity"], "student-1");
        assert_eq!(json["op"]["kind"], "upsert");

        let delete = serde_json::to_value(Change::delete("student-1")).expect("serialize");
        assert_eq!(delete["op"]["kind"], "delete");
    }

    #[test]
    fn version_orders_by_timestamp_then_seq() {
        let a = Version {
            timestamp: Timestamp::from_micros(5),
            seq: 9,
        };
        let b = Version {
            timestamp: Timestamp::from_micros(6),
            seq: 1,
        };
        let c = Version {
            timestamp: Timestamp::from_micros(6),
            seq: 2,
        };
        assert!(a < b && b < c);
    }
}
