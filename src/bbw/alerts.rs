/// Alert ring buffer and subscriber fan-out (§4.6 "Emission").
///
/// Grounded on the teacher's `realtime.rs` `RealtimeManager` broadcast:
/// `tokio::sync::broadcast` already drops from the head and reports lag to
/// slow subscribers via `RecvError::Lagged`, which is exactly the "oldest
/// evicted, counter increments" behavior this needs — no custom ring
/// required on the subscriber side, only on the retained-history side.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::domain::InstrumentKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertType {
    Threshold,
    Pattern,
    Squeeze,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub instrument_key: InstrumentKey,
    pub alert_type: AlertType,
    pub current_bb_width: f64,
    pub distance_from_min_percent: f64,
    pub pattern_length: Option<u32>,
    pub fired_at: DateTime<Utc>,
}

/// Bounded history of fired alerts; oldest evicted on overflow.
pub struct AlertRing {
    capacity: usize,
    entries: VecDeque<Alert>,
}

impl AlertRing {
    pub fn new(capacity: usize) -> Self {
        AlertRing {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, alert: Alert) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(alert);
    }

    pub fn history(&self) -> impl Iterator<Item = &Alert> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Broadcast fan-out for live alert subscribers. A lagging subscriber's
/// backlog is dropped from the head by the channel itself; `dropped_total`
/// just surfaces that it happened, for metrics/logging.
#[derive(Clone)]
pub struct AlertBus {
    sender: broadcast::Sender<Alert>,
    dropped_total: Arc<AtomicU64>,
}

impl AlertBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        AlertBus {
            sender,
            dropped_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.sender.subscribe()
    }

    pub fn publish(&self, alert: Alert) {
        // No subscribers is not an error; publishing is best-effort.
        let _ = self.sender.send(alert);
    }

    pub fn record_dropped(&self, n: u64) {
        self.dropped_total.fetch_add(n, Ordering::SeqCst);
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::SeqCst)
    }
}
