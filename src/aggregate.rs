//! Fan-in of N concurrent scrape streams into slot-array emissions.
//!
//! For N input URLs the aggregator keeps a slot array of the current best
//! snapshot per slot. It emits an owned copy of the array immediately
//! after start (all empty), after every slot update (near-simultaneous
//! updates may coalesce into one emission), and once more when every
//! stream has terminated. Dropping the receiver cancels all in-flight
//! scrapes. Per-stream errors are logged and never abort peers.

use crate::browser::{Browser, ScrapeOptions};
use crate::types::PageSnapshot;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use url::Url;

/// The current best snapshot for one slot, with a version that increments
/// on every supersession. `(slot, version)` identifies a snapshot for
/// caching formatted output.
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub snapshot: Arc<PageSnapshot>,
    pub version: u64,
}

/// One emission: the slot array as of some instant. Position `i`
/// corresponds to input URL `i`; `None` slots have produced nothing yet.
pub type SlotArray = Vec<Option<SlotSnapshot>>;

/// Start scraping every URL concurrently and return the emission stream.
///
/// Slots whose URL is `None` (unscrapable input) never update.
pub fn scrape_many(
    browser: Arc<dyn Browser>,
    urls: Vec<Option<Url>>,
    opts: ScrapeOptions,
) -> mpsc::Receiver<SlotArray> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(drive(browser, urls, opts, tx));
    rx
}

async fn drive(
    browser: Arc<dyn Browser>,
    urls: Vec<Option<Url>>,
    opts: ScrapeOptions,
    tx: mpsc::Sender<SlotArray>,
) {
    let slot_count = urls.len();
    let mut slots: SlotArray = vec![None; slot_count];

    let (update_tx, mut update_rx) = mpsc::channel::<(usize, PageSnapshot)>(slot_count.max(1) * 2);
    let mut streams = JoinSet::new();
    for (slot, url) in urls.into_iter().enumerate() {
        let Some(url) = url else {
            continue;
        };
        let browser = Arc::clone(&browser);
        let opts = opts.clone();
        let update_tx = update_tx.clone();
        streams.spawn(async move {
            match browser.scrape(url.clone(), opts).await {
                Ok(mut stream) => {
                    while let Some(item) = stream.recv().await {
                        match item {
                            Ok(snapshot) => {
                                if update_tx.send((slot, snapshot)).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(slot, url = %url, error = %err, "scrape stream error");
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(slot, url = %url, error = %err, "scrape failed to start");
                }
            }
        });
    }
    drop(update_tx);

    // First emission: the all-empty array, so consumers can render stubs
    // without waiting for the first page.
    if tx.send(slots.clone()).await.is_err() {
        streams.abort_all();
        return;
    }

    while let Some((slot, snapshot)) = update_rx.recv().await {
        apply_update(&mut slots, slot, snapshot);
        // Coalesce whatever else is already queued into this emission.
        while let Ok((slot, snapshot)) = update_rx.try_recv() {
            apply_update(&mut slots, slot, snapshot);
        }
        if tx.send(slots.clone()).await.is_err() {
            streams.abort_all();
            return;
        }
    }

    // All streams terminated: one final emission.
    let _ = tx.send(slots).await;
}

fn apply_update(slots: &mut SlotArray, slot: usize, snapshot: PageSnapshot) {
    let Some(entry) = slots.get_mut(slot) else {
        return;
    };
    let version = entry.as_ref().map(|s| s.version + 1).unwrap_or(1);
    *entry = Some(SlotSnapshot {
        snapshot: Arc::new(snapshot),
        version,
    });
}
