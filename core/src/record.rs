//! Durable conversation record: a [`Series`] of [`Episode`]s, each a run of
//! [`Exchange`]s inside one context window.
//!
//! Hashes are derived from content at construction and never updated in
//! place; changing membership means building a new value.

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// Stands in for the session id when hashing a sessionless series.
pub const EPHEMERAL_SERIES: &str = "ephemeral";

pub(crate) fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub hash: String,
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub id: Option<String>,
}

impl Exchange {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        let input = input.into();
        let output = output.into();
        Self {
            hash: digest(&format!("{input}:{output}")),
            input,
            output,
            id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub id: Option<String>,
    pub hash: String,
    pub exchanges: Vec<Exchange>,
}

impl Episode {
    pub fn new(id: Option<String>, exchanges: Vec<Exchange>) -> Self {
        let joined: String = exchanges
            .iter()
            .map(|exchange| exchange.hash.as_str())
            .collect();
        Self {
            id,
            hash: digest(&joined),
            exchanges,
        }
    }

    /// Returns a copy extended by `exchange`, keeping the identifier.
    pub fn appended(&self, exchange: Exchange) -> Self {
        let mut exchanges = self.exchanges.clone();
        exchanges.push(exchange);
        Self::new(self.id.clone(), exchanges)
    }

    /// True when this episode belongs to `session_id`, either directly or as
    /// one of its post-compaction windows (`<session_id>/<n>`).
    pub fn descends_from(&self, session_id: &str) -> bool {
        match self.id.as_deref() {
            Some(id) => {
                id == session_id
                    || id
                        .strip_prefix(session_id)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub id: Option<String>,
    pub hash: String,
    pub episodes: Vec<Episode>,
}

impl Series {
    pub fn new(id: Option<String>, episodes: Vec<Episode>) -> Self {
        let hash = digest(id.as_deref().unwrap_or(EPHEMERAL_SERIES));
        Self { id, hash, episodes }
    }

    pub fn latest_episode(&self) -> Option<&Episode> {
        self.episodes.last()
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.episodes
            .iter()
            .flat_map(|episode| episode.exchanges.iter())
    }
}
