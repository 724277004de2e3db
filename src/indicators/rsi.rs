/// RSI(period): Wilder's smoothing (§4.5.2).
///
/// ALGORITHME (grounded on the teacher's `rsi.rs`, generalized from a
/// `Vec<Option<f64>>` padded series to the pipeline's dense output
/// convention — callers that need the padding reconstruct it themselves
/// from the known offset, `period`).
///
/// - Premier RSI: moyenne simple des `period` premiers deltas.
/// - RSI suivants: `avg = (avg*(period-1) + value) / period`.
/// - RSI = 100 - 100/(1+RS), RS = avg_gain / avg_loss.
use crate::error::EngineResult;
use crate::indicators::{require_length, validate_closes, IndicatorTask};

pub struct Rsi {
    pub period: usize,
}

impl Rsi {
    /// Output length = N - period (one RSI value per delta past the seed).
    pub fn compute(&self, closes: &[f64]) -> EngineResult<Vec<f64>> {
        validate_closes(closes)?;
        require_length(closes, self.period + 1)?;

        let mut gains = Vec::with_capacity(closes.len() - 1);
        let mut losses = Vec::with_capacity(closes.len() - 1);
        for i in 1..closes.len() {
            let change = closes[i] - closes[i - 1];
            if change > 0.0 {
                gains.push(change);
                losses.push(0.0);
            } else {
                gains.push(0.0);
                losses.push(change.abs());
            }
        }

        let period = self.period;
        let mut avg_gain: f64 = gains[..period].iter().sum::<f64>() / period as f64;
        let mut avg_loss: f64 = losses[..period].iter().sum::<f64>() / period as f64;

        let mut out = Vec::with_capacity(gains.len() - period + 1);
        out.push(rsi_from_averages(avg_gain, avg_loss));

        for i in period..gains.len() {
            avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
            avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
            out.push(rsi_from_averages(avg_gain, avg_loss));
        }

        Ok(out)
    }
}

impl IndicatorTask for Rsi {
    type Output = Vec<f64>;

    fn id(&self) -> String {
        format!("rsi:{}", self.period)
    }

    fn execute(&self, closes: &[f64], _volumes: &[u64]) -> EngineResult<Self::Output> {
        self.compute(closes)
    }
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_element_output_at_minimum_length() {
        let rsi = Rsi { period: 3 };
        let out = rsi.compute(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn all_gains_yields_rsi_100() {
        let rsi = Rsi { period: 3 };
        let out = rsi.compute(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((out[0] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn all_losses_yields_rsi_0() {
        let rsi = Rsi { period: 3 };
        let out = rsi.compute(&[4.0, 3.0, 2.0, 1.0]).unwrap();
        assert!(out[0].abs() < 1e-9);
    }

    #[test]
    fn insufficient_data_reports_minimum_required() {
        let rsi = Rsi { period: 14 };
        let err = rsi.compute(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::EngineError::InsufficientData { required: 15, got: 2 }
        ));
    }
}
