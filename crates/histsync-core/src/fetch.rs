//! Fetch strategies: which log entries a consumer should merge.
//!
//! Both strategies exclude the current author's own transactions, so a
//! consumer never re-ingests its own writes.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::{Roster, Timestamp, Transaction};
use crate::store::{AuthorFilter, Store};

/// Retrieves log entries strictly after a timestamp, ascending.
pub trait Fetcher: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SyncError::LogUnavailable`] if the log cannot be queried.
    fn fetch(&self, log: &Store, minimum: Timestamp) -> Result<Vec<Transaction>, SyncError>;
}

/// Only transactions written by known peers (`roster - current`).
/// Authors outside the roster are ignored.
#[derive(Debug, Clone)]
pub struct ClosedWorldFetcher {
    current_author: String,
    peers: Vec<String>,
}

impl ClosedWorldFetcher {
    #[must_use]
    pub fn new(current_author: &str, roster: &Roster) -> Self {
        Self {
            current_author: current_author.to_string(),
            peers: roster.others(current_author),
        }
    }

    #[must_use]
    pub fn peers(&self) -> &[String] {
        &self.peers
    }
}

impl Fetcher for ClosedWorldFetcher {
    fn fetch(&self, log: &Store, minimum: Timestamp) -> Result<Vec<Transaction>, SyncError> {
        let transactions = log
            .query_after(minimum, &AuthorFilter::Among(self.peers.clone()))
            .map_err(SyncError::LogUnavailable)?;
        tracing::debug!(
            author = %self.current_author,
            peers = self.peers.len(),
            after = %minimum,
            fetched = transactions.len(),
            "closed-world fetch"
        );
        Ok(transactions)
    }
}

/// Every transaction not written by the current author, including those
/// from authors outside the roster (an external import agent, say).
#[derive(Debug, Clone)]
pub struct OpenWorldFetcher {
    current_author: String,
}

impl OpenWorldFetcher {
    pub fn new(current_author: impl Into<String>) -> Self {
        Self {
            current_author: current_author.into(),
        }
    }
}

impl Fetcher for OpenWorldFetcher {
    fn fetch(&self, log: &Store, minimum: Timestamp) -> Result<Vec<Transaction>, SyncError> {
        let transactions = log
            .query_after(minimum, &AuthorFilter::Except(self.current_author.clone()))
            .map_err(SyncError::LogUnavailable)?;
        tracing::debug!(
            author = %self.current_author,
            after = %minimum,
            fetched = transactions.len(),
            "open-world fetch"
        );
        Ok(transactions)
    }
}

/// Which default fetcher a tracker uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    #[default]
    ClosedWorld,
    OpenWorld,
}

impl FetchPolicy {
    /// Build the fetcher for this policy.
    #[must_use]
    pub fn fetcher(self, current_author: &str, roster: &Roster) -> Box<dyn Fetcher> {
        match self {
            Self::ClosedWorld => Box::new(ClosedWorldFetcher::new(current_author, roster)),
            Self::OpenWorld => Box::new(OpenWorldFetcher::new(current_author)),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClosedWorld => "closed-world",
            Self::OpenWorld => "open-world",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClosedWorldFetcher, FetchPolicy, Fetcher, OpenWorldFetcher};
    use crate::model::{Change, Roster, Timestamp};
    use crate::store::Store;
    use serde_json::json;

    fn log_with(entries: &[(&str, i64)]) -> Store {
        let mut store = Store::open_in_memory().expect("open");
        for (author, ts) in entries {
            store
                .commit(
                    author,
                    &[Change::upsert(format!("{author}-{ts}"), json!(ts))],
                    Timestamp::from_micros(*ts),
                )
                .expect("commit");
        }
        store
    }

    fn authors_of(txs: &[crate::model::Transaction]) -> Vec<&str> {
        txs.iter().map(|t| t.author.as_str()).collect()
    }

    #[test]
    fn closed_world_ignores_self_and_strangers() {
        let log = log_with(&[("app", 1), ("widget", 2), ("importer", 3), ("widget", 4)]);
        let roster = Roster::new(["app", "widget"]).expect("roster");
        let fetcher = ClosedWorldFetcher::new("app", &roster);

        let txs = fetcher.fetch(&log, Timestamp::DISTANT_PAST).expect("fetch");
        assert_eq!(authors_of(&txs), vec!["widget", "widget"]);
        assert_eq!(fetcher.peers(), ["widget"]);
    }

    #[test]
    fn open_world_admits_strangers_but_not_self() {
        let log = log_with(&[("app", 1), ("widget", 2), ("importer", 3)]);
        let fetcher = OpenWorldFetcher::new("app");

        let txs = fetcher.fetch(&log, Timestamp::DISTANT_PAST).expect("fetch");
        assert_eq!(authors_of(&txs), vec!["widget", "importer"]);
    }

    #[test]
    fn fetch_is_strictly_after_minimum() {
        let log = log_with(&[("b", 10), ("b", 20), ("b", 30)]);
        let roster = Roster::new(["a", "b"]).expect("roster");
        let fetcher = FetchPolicy::ClosedWorld.fetcher("a", &roster);

        let txs = fetcher.fetch(&log, Timestamp::from_micros(20)).expect("fetch");
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].timestamp, Timestamp::from_micros(30));
    }

    #[test]
    fn sole_author_fetches_nothing() {
        let log = log_with(&[("a", 10)]);
        let roster = Roster::new(["a"]).expect("roster");
        let fetcher = ClosedWorldFetcher::new("a", &roster);
        assert!(fetcher.fetch(&log, Timestamp::DISTANT_PAST).expect("fetch").is_empty());
    }

    #[test]
    fn policy_parses_kebab_case() {
        let policy: FetchPolicy = serde_json::from_str("\"open-world\"").expect("parse");
        assert_eq!(policy, FetchPolicy::OpenWorld);
        assert_eq!(FetchPolicy::default().as_str(), "closed-world");
    }
}
