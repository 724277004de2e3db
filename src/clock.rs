/// Abstraction d'horloge (§9, REDESIGN FLAGS).
///
/// Le code métier ne lit jamais `Utc::now()` directement: le scheduler (C7)
/// et la porte d'heures de marché (C6) reçoivent un `Arc<dyn Clock>`, ce qui
/// permet de piloter le temps de façon déterministe dans les tests.
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock mutable utilisée par les tests: démarre figée sur une valeur donnée
/// et avance uniquement sur appel explicite de `advance`/`set`.
pub struct SteppedClock {
    millis: AtomicI64,
}

impl SteppedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        SteppedClock {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        self.millis
            .fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for SteppedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stepped_clock_advances_only_on_request() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 9, 15, 0).unwrap();
        let clock = SteppedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));
    }
}
