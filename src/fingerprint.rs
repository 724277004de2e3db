/// Empreinte stable d'une requête d'indicateur (§3).
///
/// `fingerprint = xxhash64(instrument + interval + indicator_type + params + range)`
///
/// Règle stricte: n'inclut aucune valeur non déterministe (horloge murale,
/// ordre d'itération d'un HashMap). Deux requêtes avec la même empreinte
/// DOIVENT produire des sorties identiques — c'est la condition d'intégrité
/// du cache de C5.
use chrono::{DateTime, Utc};
use xxhash_rust::xxh64::xxh64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn as_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

pub struct FingerprintInput<'a> {
    pub instrument_key: &'a str,
    pub interval: &'a str,
    pub indicator_type: &'a str,
    pub params: &'a [i64],
    pub range_from: DateTime<Utc>,
    pub range_to: DateTime<Utc>,
}

pub fn compute_fingerprint(input: &FingerprintInput<'_>) -> Fingerprint {
    let mut buf = Vec::with_capacity(128);

    buf.extend_from_slice(input.instrument_key.as_bytes());
    buf.push(0xFF);
    buf.extend_from_slice(input.interval.as_bytes());
    buf.push(0xFF);
    buf.extend_from_slice(input.indicator_type.as_bytes());
    buf.push(0xFF);
    for p in input.params {
        buf.extend_from_slice(&p.to_le_bytes());
    }
    buf.push(0xFF);
    buf.extend_from_slice(&input.range_from.timestamp_millis().to_le_bytes());
    buf.push(0xFF);
    buf.extend_from_slice(&input.range_to.timestamp_millis().to_le_bytes());

    Fingerprint(xxh64(&buf, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn identical_inputs_yield_identical_fingerprint() {
        let from = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        let a = FingerprintInput {
            instrument_key: "NSE_EQ|X",
            interval: "1minute",
            indicator_type: "ema",
            params: &[9],
            range_from: from,
            range_to: to,
        };
        let b = FingerprintInput { params: &[9], ..a };
        assert_eq!(compute_fingerprint(&a), compute_fingerprint(&b));
    }

    #[test]
    fn differing_params_yield_differing_fingerprint() {
        let from = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        let a = compute_fingerprint(&FingerprintInput {
            instrument_key: "NSE_EQ|X",
            interval: "1minute",
            indicator_type: "ema",
            params: &[9],
            range_from: from,
            range_to: to,
        });
        let b = compute_fingerprint(&FingerprintInput {
            instrument_key: "NSE_EQ|X",
            interval: "1minute",
            indicator_type: "ema",
            params: &[20],
            range_from: from,
            range_to: to,
        });
        assert_ne!(a, b);
    }
}
