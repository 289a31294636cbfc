use tracing::debug;

use crate::record::Episode;
use crate::record::Exchange;
use crate::record::Series;

/// How a new exchange was attached to the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Appended to the latest episode.
    Continuation,
    /// Opened a numbered window after a vendor-side compaction.
    CompactionSplit,
    /// Opened a fresh episode.
    NewWindow,
}

/// Merges `exchange` into `prior` and returns the resulting series. `prior`
/// itself is left untouched.
pub fn reconcile(
    prior: Option<&Series>,
    exchange: Exchange,
    session_id: Option<&str>,
    compacted: bool,
) -> (Series, Placement) {
    let latest = prior.and_then(Series::latest_episode);
    let placement = match (session_id, latest) {
        (Some(id), Some(latest)) if !compacted && latest.id.as_deref() == Some(id) => {
            Placement::Continuation
        }
        (Some(id), Some(latest)) if compacted && latest.descends_from(id) => {
            Placement::CompactionSplit
        }
        _ => Placement::NewWindow,
    };

    let mut episodes: Vec<Episode> = prior
        .map(|series| series.episodes.clone())
        .unwrap_or_default();
    match placement {
        Placement::Continuation => {
            if let Some(latest) = episodes.last_mut() {
                *latest = latest.appended(exchange);
            }
        }
        Placement::CompactionSplit => {
            let window = format!("{}/{}", session_id.unwrap_or_default(), episodes.len());
            episodes.push(Episode::new(Some(window), vec![exchange]));
        }
        Placement::NewWindow => {
            episodes.push(Episode::new(
                session_id.map(ToString::to_string),
                vec![exchange],
            ));
        }
    }

    debug!(
        ?placement,
        session_id,
        compacted,
        episodes = episodes.len(),
        "reconciled exchange into series"
    );
    (
        Series::new(session_id.map(ToString::to_string), episodes),
        placement,
    )
}
