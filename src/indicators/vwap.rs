/// VWAP: cumulative sum(typical_price * volume) / sum(volume), reset at
/// session start (§4.5.2). Takes high/low/close directly rather than the
/// pipeline's flat close series, since typical price needs all three.
use crate::error::{EngineError, EngineResult};

pub struct Vwap;

impl Vwap {
    pub fn compute(&self, highs: &[f64], lows: &[f64], closes: &[f64], volumes: &[u64]) -> EngineResult<Vec<f64>> {
        if highs.len() != lows.len() || lows.len() != closes.len() || closes.len() != volumes.len() {
            return Err(EngineError::Validation(
                "VWAP input columns must have equal length".into(),
            ));
        }
        if closes.iter().chain(highs.iter()).chain(lows.iter()).any(|v| !v.is_finite()) {
            return Err(EngineError::BadInput("non-finite value in OHLC input".into()));
        }
        if closes.is_empty() {
            return Err(EngineError::InsufficientData { required: 1, got: 0 });
        }

        let mut out = Vec::with_capacity(closes.len());
        let mut cum_pv = 0.0;
        let mut cum_vol = 0.0;
        for i in 0..closes.len() {
            let typical = (highs[i] + lows[i] + closes[i]) / 3.0;
            cum_pv += typical * volumes[i] as f64;
            cum_vol += volumes[i] as f64;
            out.push(if cum_vol > 0.0 { cum_pv / cum_vol } else { typical });
        }
        Ok(out)
    }
}
