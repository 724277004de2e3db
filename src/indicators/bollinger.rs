/// Bollinger(period, k): middle = SMA(period), population-variance stddev
/// over the trailing window, upper/lower = middle +/- k*sigma (§4.5.2).
use crate::error::EngineResult;
use crate::indicators::{require_length, validate_closes, IndicatorTask};

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBand {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
    pub width: f64,
    pub width_normalized: f64,
}

pub struct Bollinger {
    pub period: usize,
    pub k: f64,
}

impl Bollinger {
    pub fn compute(&self, closes: &[f64]) -> EngineResult<Vec<BollingerBand>> {
        validate_closes(closes)?;
        require_length(closes, self.period)?;

        let mut out = Vec::with_capacity(closes.len() - self.period + 1);
        for window in closes.windows(self.period) {
            let middle = window.iter().sum::<f64>() / self.period as f64;
            let variance =
                window.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / self.period as f64;
            let sigma = variance.sqrt();

            let upper = middle + self.k * sigma;
            let lower = middle - self.k * sigma;
            let width = upper - lower;
            let width_normalized = if middle != 0.0 { width / middle } else { 0.0 };

            out.push(BollingerBand {
                middle,
                upper,
                lower,
                width,
                width_normalized,
            });
        }
        Ok(out)
    }
}

impl IndicatorTask for Bollinger {
    type Output = Vec<BollingerBand>;

    fn id(&self) -> String {
        format!("bollinger:{}:{}", self.period, self.k)
    }

    fn execute(&self, closes: &[f64], _volumes: &[u64]) -> EngineResult<Self::Output> {
        self.compute(closes)
    }
}
