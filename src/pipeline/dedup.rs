//! Message dedup filter — which scraped messages are new since the watermark.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::pipeline::types::RawMessage;
use crate::store::Watermark;

/// Index of the first batch message after the watermark.
///
/// The boundary is the last occurrence of the watermark's identity in the
/// batch. When the watermark is absent from the batch (scroll window too
/// short, history rotated) the whole batch is treated as new: reprocessing is
/// absorbed by sheet dedup, a silent skip would lose jobs.
pub fn resume_index(batch: &[RawMessage], watermark: Option<&Watermark>) -> usize {
    let Some(mark) = watermark else {
        return 0;
    };
    let key = mark.identity_key();
    match batch.iter().rposition(|m| m.identity_key() == key) {
        Some(idx) => idx + 1,
        None => {
            info!(
                batch = batch.len(),
                "Watermark not found in scraped batch, treating whole batch as new"
            );
            0
        }
    }
}

/// Return the messages after the watermark, with exact repeats collapsed.
pub fn new_messages(batch: &[RawMessage], watermark: Option<&Watermark>) -> Vec<RawMessage> {
    let start = resume_index(batch, watermark);

    let mut seen = HashSet::new();
    let mut fresh = Vec::with_capacity(batch.len() - start);
    for message in &batch[start..] {
        if seen.insert(message.identity_key()) {
            fresh.push(message.clone());
        } else {
            debug!(
                sender = %message.sender,
                timestamp = %message.timestamp,
                "Duplicate scrape suppressed"
            );
        }
    }

    debug!(
        batch = batch.len(),
        skipped = start,
        fresh = fresh.len(),
        "Message dedup complete"
    );
    fresh
}

/// Pick the message to save as the next watermark.
///
/// `start` is the batch index processing began at and `retry_from` the first
/// message that must be seen again next run. The next run resumes after the
/// *last* occurrence of the saved identity, so a candidate qualifies only if
/// its last occurrence in the batch lies before the first occurrence of
/// `retry_from`. Returns `None` when no message qualifies; the watermark then
/// stays where it was.
pub fn commit_boundary<'a>(
    batch: &'a [RawMessage],
    start: usize,
    retry_from: Option<&RawMessage>,
) -> Option<&'a RawMessage> {
    let pending = batch.get(start..)?;
    let Some(failed) = retry_from else {
        return pending.last();
    };

    let failed_key = failed.identity_key();
    let stop = start
        + pending
            .iter()
            .position(|m| m.identity_key() == failed_key)
            .unwrap_or(0);

    let last_seen: HashMap<String, usize> = batch
        .iter()
        .enumerate()
        .map(|(idx, m)| (m.identity_key(), idx))
        .collect();

    let boundary = batch[start..stop].iter().rev().find(|m| {
        last_seen
            .get(&m.identity_key())
            .is_some_and(|&last| last < stop)
    });
    if boundary.is_none() {
        debug!(
            sender = %failed.sender,
            timestamp = %failed.timestamp,
            "No message before the retry point can be committed"
        );
    }
    boundary
}
