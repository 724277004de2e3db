/// Upstream fetcher (C2, §4.2).
///
/// ARCHITECTURE SIMPLIFIÉE (grounded on the teacher's retriever.rs):
/// un seul call récupère un batch de bougies; le retry/backoff vit ici, pas
/// chez l'appelant. Généralisation par rapport au teacher: le teacher
/// parlait directement à `binance::market::Market`; ici le broker est
/// abstrait derrière le trait `UpstreamFetcher` et une implémentation HTTP
/// générique via `reqwest`.
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::domain::{Candle, Interval, InstrumentKey, Price};
use crate::error::{EngineError, EngineResult};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
}

#[async_trait::async_trait]
pub trait UpstreamFetcher: Send + Sync {
    async fn get_historical(
        &self,
        session: &Session,
        instrument: &InstrumentKey,
        interval: Interval,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<Candle>>;

    async fn get_intraday(
        &self,
        session: &Session,
        instrument: &InstrumentKey,
        interval: Interval,
    ) -> EngineResult<Vec<Candle>>;

    fn initiate_login(&self) -> (String, String);

    async fn handle_callback(&self, code: &str, state: &str) -> EngineResult<Session>;
}

/// Raw wire tuple: `[timestamp, open, high, low, close, volume, open_interest]` (§6).
#[derive(Debug, Deserialize)]
struct RawCandleTuple(String, f64, f64, f64, f64, u64, u64);

#[derive(Debug, Deserialize)]
struct CandlesPayload {
    data: CandlesData,
}

#[derive(Debug, Deserialize)]
struct CandlesData {
    candles: Vec<RawCandleTuple>,
}

/// HTTP-backed broker client. Bounded concurrency via a semaphore of
/// `max_concurrent_requests` permits, shared across every call made
/// through this instance.
pub struct HttpUpstreamFetcher {
    client: reqwest::Client,
    base_url: String,
    semaphore: Arc<Semaphore>,
}

impl HttpUpstreamFetcher {
    pub fn new(base_url: String, max_concurrent_requests: usize) -> Self {
        HttpUpstreamFetcher {
            client: reqwest::Client::new(),
            base_url,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        }
    }

    fn parse_candles(
        instrument: &InstrumentKey,
        interval: Interval,
        payload: CandlesPayload,
    ) -> EngineResult<Vec<Candle>> {
        let mut out = Vec::with_capacity(payload.data.candles.len());
        for tuple in payload.data.candles {
            let RawCandleTuple(ts, open, high, low, close, volume, open_interest) = tuple;
            let timestamp = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| EngineError::Decode(format!("bad timestamp {ts}: {e}")))?
                .with_timezone(&Utc);

            if [open, high, low, close]
                .iter()
                .any(|v| v.is_nan() || v.is_infinite())
            {
                return Err(EngineError::Decode(format!(
                    "non-finite OHLC in candle at {ts}"
                )));
            }

            out.push(Candle {
                instrument_key: instrument.clone(),
                timestamp,
                interval,
                open: Price::from_f64(open),
                high: Price::from_f64(high),
                low: Price::from_f64(low),
                close: Price::from_f64(close),
                volume,
                open_interest,
            });
        }
        Ok(out)
    }

    /// One HTTP attempt, classifying the response into the §7 taxonomy.
    async fn attempt(
        &self,
        session: &Session,
        url: &str,
    ) -> EngineResult<CandlesPayload> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EngineError::Internal("fetcher semaphore closed".into()))?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EngineError::Auth("token expired".into()));
        }
        if status.is_client_error() {
            return Err(EngineError::Validation(format!(
                "upstream rejected request: {status}"
            )));
        }
        if status.is_server_error() {
            return Err(EngineError::Transient(format!("upstream {status}")));
        }

        response
            .json::<CandlesPayload>()
            .await
            .map_err(|e| EngineError::Decode(format!("malformed payload: {e}")))
    }

    /// Retries `ErrTransient` up to `MAX_ATTEMPTS` with exponential backoff
    /// and jitter; a single blocking refresh-then-retry on `ErrAuth`;
    /// anything else is fatal for the call (§4.2).
    async fn fetch_with_retry(
        &self,
        session: &Session,
        url: &str,
    ) -> EngineResult<CandlesPayload> {
        let mut refreshed = false;
        let mut attempt_no = 0u32;

        loop {
            attempt_no += 1;
            match self.attempt(session, url).await {
                Ok(payload) => return Ok(payload),
                Err(EngineError::Auth(msg)) if !refreshed => {
                    refreshed = true;
                    tracing::warn!(reason = %msg, "token expired, refreshing once");
                    // A real broker integration would refresh via its OAuth
                    // endpoint here; out of scope for the core (§1).
                    continue;
                }
                Err(e) if e.is_retriable() && attempt_no < MAX_ATTEMPTS => {
                    let backoff = backoff_with_jitter(attempt_no);
                    tracing::warn!(attempt = attempt_no, backoff_ms = backoff.as_millis() as u64, "retrying transient fetch error");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BASE_BACKOFF_MS * 2u64.pow(attempt.saturating_sub(1));
    let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
    let millis = (base as f64 * (1.0 + jitter_frac)).max(0.0) as u64;
    Duration::from_millis(millis)
}

#[async_trait::async_trait]
impl UpstreamFetcher for HttpUpstreamFetcher {
    async fn get_historical(
        &self,
        session: &Session,
        instrument: &InstrumentKey,
        interval: Interval,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<Candle>> {
        let url = format!(
            "{}/historical/{}/{}/{}/{}",
            self.base_url,
            instrument,
            interval.as_str(),
            to.format("%Y-%m-%d"),
            from.format("%Y-%m-%d"),
        );
        let payload = self.fetch_with_retry(session, &url).await?;
        Self::parse_candles(instrument, interval, payload)
    }

    async fn get_intraday(
        &self,
        session: &Session,
        instrument: &InstrumentKey,
        interval: Interval,
    ) -> EngineResult<Vec<Candle>> {
        let url = format!(
            "{}/intraday/{}/{}",
            self.base_url,
            instrument,
            interval.as_str(),
        );
        let payload = self.fetch_with_retry(session, &url).await?;
        Self::parse_candles(instrument, interval, payload)
    }

    fn initiate_login(&self) -> (String, String) {
        let state = uuid::Uuid::new_v4().to_string();
        let auth_url = format!("{}/oauth/authorize?state={}", self.base_url, state);
        (auth_url, state)
    }

    async fn handle_callback(&self, code: &str, state: &str) -> EngineResult<Session> {
        let url = format!(
            "{}/oauth/token?code={}&state={}",
            self.base_url, code, state
        );
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| EngineError::Auth(format!("token exchange failed: {e}")))?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Decode(format!("malformed token response: {e}")))?;
        Ok(Session {
            access_token: token.access_token,
        })
    }
}

/// Test-only stub shared across modules that need an `UpstreamFetcher`
/// without a real broker (e.g. the batch coordinator and orchestrator).
#[cfg(test)]
pub mod tests_support {
    use super::*;

    pub struct NoopFetcher;

    #[async_trait::async_trait]
    impl UpstreamFetcher for NoopFetcher {
        async fn get_historical(
            &self,
            _session: &Session,
            _instrument: &InstrumentKey,
            _interval: Interval,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> EngineResult<Vec<Candle>> {
            Ok(vec![])
        }

        async fn get_intraday(
            &self,
            _session: &Session,
            _instrument: &InstrumentKey,
            _interval: Interval,
        ) -> EngineResult<Vec<Candle>> {
            Ok(vec![])
        }

        fn initiate_login(&self) -> (String, String) {
            ("http://example".into(), "state".into())
        }

        async fn handle_callback(&self, _code: &str, _state: &str) -> EngineResult<Session> {
            Ok(Session { access_token: "tok".into() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_respects_jitter_bounds() {
        let b1 = backoff_with_jitter(1);
        let b2 = backoff_with_jitter(2);
        assert!(b1.as_millis() >= (BASE_BACKOFF_MS as f64 * 0.8) as u128);
        assert!(b1.as_millis() <= (BASE_BACKOFF_MS as f64 * 1.2) as u128);
        assert!(b2.as_millis() >= b1.as_millis() / 2);
    }
}
