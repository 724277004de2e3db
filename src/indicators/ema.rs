/// EMA(period): smoothing alpha = 2/(period+1), seeded by the simple
/// average of the first `period` closes (§4.5.2).
use crate::error::EngineResult;
use crate::indicators::{require_length, validate_closes, IndicatorTask};

pub struct Ema {
    pub period: usize,
}

impl Ema {
    /// Output length = N - period + 1.
    pub fn compute(&self, closes: &[f64]) -> EngineResult<Vec<f64>> {
        validate_closes(closes)?;
        require_length(closes, self.period)?;

        let alpha = 2.0 / (self.period as f64 + 1.0);
        let seed: f64 = closes[..self.period].iter().sum::<f64>() / self.period as f64;

        let mut out = Vec::with_capacity(closes.len() - self.period + 1);
        out.push(seed);

        let mut prev = seed;
        for &close in &closes[self.period..] {
            let value = alpha * close + (1.0 - alpha) * prev;
            out.push(value);
            prev = value;
        }
        Ok(out)
    }
}

impl IndicatorTask for Ema {
    type Output = Vec<f64>;

    fn id(&self) -> String {
        format!("ema:{}", self.period)
    }

    fn execute(&self, closes: &[f64], _volumes: &[u64]) -> EngineResult<Self::Output> {
        self.compute(closes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_simple_average_of_first_period() {
        let ema = Ema { period: 3 };
        let out = ema.compute(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(out.len(), 1);
        assert!((out[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn output_length_matches_spec_formula() {
        let ema = Ema { period: 3 };
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let out = ema.compute(&closes).unwrap();
        assert_eq!(out.len(), closes.len() - 3 + 1);
    }

    #[test]
    fn insufficient_data_reports_minimum_required() {
        let ema = Ema { period: 9 };
        let err = ema.compute(&[1.0, 2.0]).unwrap_err();
        match err {
            crate::error::EngineError::InsufficientData { required, got } => {
                assert_eq!(required, 9);
                assert_eq!(got, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_finite_input() {
        let ema = Ema { period: 2 };
        assert!(ema.compute(&[1.0, f64::NAN]).is_err());
    }
}
