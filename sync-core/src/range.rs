//! Range planning for room lists.
//!
//! Decides which window(s) of a list to request next. Pure: the same inputs
//! always give the same ranges, and nothing here advances on its own. The
//! caller moves `page_start` (or feeds back the prior ranges) only when the
//! application asks for more rooms.

use serde::{Deserialize, Serialize};
use sync_types::ListRange;

/// How a list's window moves over the server's room collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Ranges are set explicitly by the caller and never advance.
    Selective,
    /// One batch-sized page at a time.
    Paging,
    /// One window anchored at 0 that grows by a batch each time.
    Growing,
}

/// Compute the ranges to request for a list.
///
/// - `Selective` returns `prior` unchanged.
/// - `Paging` returns `[page_start, page_start + batch_size - 1]`, clamped to
///   `max_rooms - 1`. Empty once the page starts past the clamp.
/// - `Growing` returns `[0, batch_size - 1]` with no prior range, otherwise
///   `[0, prior_end + batch_size]`, clamped to `max_rooms - 1`.
pub fn plan(
    mode: SyncMode,
    prior: &[ListRange],
    batch_size: usize,
    page_start: usize,
    max_rooms: Option<usize>,
) -> Vec<ListRange> {
    match mode {
        SyncMode::Selective => prior.to_vec(),
        SyncMode::Paging => {
            let end = page_start.saturating_add(batch_size.saturating_sub(1));
            clamped(page_start, end, max_rooms)
        }
        SyncMode::Growing => {
            let end = match prior.last() {
                Some(last) => last.end().saturating_add(batch_size),
                None => batch_size.saturating_sub(1),
            };
            clamped(0, end, max_rooms)
        }
    }
}

fn clamped(start: usize, end: usize, max_rooms: Option<usize>) -> Vec<ListRange> {
    let end = match max_rooms {
        Some(max) => match max.checked_sub(1) {
            Some(last) => end.min(last),
            None => return Vec::new(),
        },
        None => end,
    };

    if start > end {
        Vec::new()
    } else {
        vec![ListRange::new(start, end)]
    }
}

/// Whether `ranges` are individually valid, ascending, and non-overlapping.
pub fn ranges_are_well_formed(ranges: &[ListRange]) -> bool {
    ranges.iter().all(ListRange::is_valid)
        && ranges.windows(2).all(|pair| pair[0].end() < pair[1].start())
}
