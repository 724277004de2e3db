/// Data-frame pool (§4.5.4).
///
/// A reusable pool of columnar frames to reduce allocation pressure across
/// indicator computations. Acquire/release is lock-free via a
/// `crossbeam_queue::ArrayQueue` free-list; when the queue is empty,
/// `acquire` simply allocates a fresh frame rather than falling back to a
/// mutex-protected slow path — the free-list itself never blocks.
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

use crate::domain::{Candle, Price};

/// Tabular columnar view over a candle series plus scratch derived columns.
#[derive(Debug, Default, Clone)]
pub struct DataFrame {
    pub timestamps_ms: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<u64>,
}

impl DataFrame {
    pub fn clear(&mut self) {
        self.timestamps_ms.clear();
        self.open.clear();
        self.high.clear();
        self.low.clear();
        self.close.clear();
        self.volume.clear();
    }

    pub fn load(&mut self, candles: &[Candle]) {
        self.clear();
        self.timestamps_ms.reserve(candles.len());
        self.open.reserve(candles.len());
        self.high.reserve(candles.len());
        self.low.reserve(candles.len());
        self.close.reserve(candles.len());
        self.volume.reserve(candles.len());

        for c in candles {
            self.timestamps_ms.push(c.timestamp.timestamp_millis());
            self.open.push(c.open.as_f64());
            self.high.push(c.high.as_f64());
            self.low.push(c.low.as_f64());
            self.close.push(c.close.as_f64());
            self.volume.push(c.volume);
        }
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }
}

impl From<&[Candle]> for DataFrame {
    fn from(candles: &[Candle]) -> Self {
        let mut frame = DataFrame::default();
        frame.load(candles);
        frame
    }
}

/// A frame checked out of the pool; returned automatically on drop.
pub struct PooledFrame {
    frame: Option<DataFrame>,
    pool: Arc<ArrayQueue<DataFrame>>,
}

impl std::ops::Deref for PooledFrame {
    type Target = DataFrame;
    fn deref(&self) -> &DataFrame {
        self.frame.as_ref().expect("frame taken before drop")
    }
}

impl std::ops::DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut DataFrame {
        self.frame.as_mut().expect("frame taken before drop")
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(mut frame) = self.frame.take() {
            frame.clear();
            let _ = self.pool.push(frame);
        }
    }
}

pub struct DataFramePool {
    free: Arc<ArrayQueue<DataFrame>>,
}

impl DataFramePool {
    pub fn new(capacity: usize) -> Self {
        DataFramePool {
            free: Arc::new(ArrayQueue::new(capacity.max(1))),
        }
    }

    /// Acquires a frame from the free-list, allocating a fresh one if the
    /// pool is empty (§4.5.4: "acquire may allocate when empty").
    pub fn acquire(&self) -> PooledFrame {
        let frame = self.free.pop().unwrap_or_default();
        PooledFrame {
            frame: Some(frame),
            pool: Arc::clone(&self.free),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Interval};
    use chrono::Utc;

    fn candle(close: f64) -> Candle {
        Candle {
            instrument_key: "X".into(),
            timestamp: Utc::now(),
            interval: Interval::OneMinute,
            open: Price::from_f64(close),
            high: Price::from_f64(close + 1.0),
            low: Price::from_f64(close - 1.0),
            close: Price::from_f64(close),
            volume: 1,
            open_interest: 0,
        }
    }

    #[test]
    fn acquired_frame_is_returned_cleared_on_drop() {
        let pool = DataFramePool::new(2);
        {
            let mut frame = pool.acquire();
            frame.load(&[candle(1.0), candle(2.0)]);
            assert_eq!(frame.len(), 2);
        }
        let reused = pool.acquire();
        assert!(reused.is_empty());
    }

    #[test]
    fn acquire_allocates_fresh_frame_when_pool_empty() {
        let pool = DataFramePool::new(1);
        let a = pool.acquire();
        let b = pool.acquire(); // pool empty, must allocate rather than block
        assert!(a.is_empty() && b.is_empty());
    }
}
