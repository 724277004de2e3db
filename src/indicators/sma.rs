/// SMA(period): arithmetic mean over the trailing `period` closes.
use crate::error::EngineResult;
use crate::indicators::{require_length, validate_closes, IndicatorTask};

pub struct Sma {
    pub period: usize,
}

impl Sma {
    pub fn compute(&self, closes: &[f64]) -> EngineResult<Vec<f64>> {
        validate_closes(closes)?;
        require_length(closes, self.period)?;

        let mut out = Vec::with_capacity(closes.len() - self.period + 1);
        for window in closes.windows(self.period) {
            out.push(window.iter().sum::<f64>() / self.period as f64);
        }
        Ok(out)
    }
}

impl IndicatorTask for Sma {
    type Output = Vec<f64>;

    fn id(&self) -> String {
        format!("sma:{}", self.period)
    }

    fn execute(&self, closes: &[f64], _volumes: &[u64]) -> EngineResult<Self::Output> {
        self.compute(closes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_element_output_at_minimum_length() {
        let sma = Sma { period: 3 };
        let out = sma.compute(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(out, vec![2.0]);
    }

    #[test]
    fn trailing_window_average() {
        let sma = Sma { period: 2 };
        let out = sma.compute(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(out, vec![1.5, 2.5, 3.5]);
    }
}
