//! Dissemination priority. Fresh, unforwarded statuses score 100; the
//! hop/replication weight decays as a status spreads, recency takes over as it
//! ages, and likes only matter once both have decayed.

use crate::store::ScoringRecord;

/// The three weights of a score. They always sum to 100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreComponents {
    /// Hop count and replication.
    pub a: f64,
    /// Recency.
    pub b: f64,
    /// Popularity.
    pub c: f64,
}

fn age_factor(time_of_creation: u64, now: u64) -> f64 {
    let age_seconds = now.saturating_sub(time_of_creation) as f64 / 1000.0;
    (age_seconds / 3600.0 + 1.0).ln().floor() + 1.0
}

pub fn score_components(hop_count: u8, replication: u32, time_of_creation: u64, now: u64) -> ScoreComponents {
    let spread = f64::from(hop_count) + f64::from(replication);
    let a = (100.0 / ((spread + 1.0).ln().floor() + 1.0)).min(100.0);
    let b = (100.0 - a).min((100.0 - a) / age_factor(time_of_creation, now));
    let c = 100.0 - a - b;
    ScoreComponents { a, b, c }
}

/// Score of `record` at `now` (milliseconds since the epoch).
pub fn score(record: &ScoringRecord, now: u64) -> f64 {
    let ScoreComponents { a, b, c } = score_components(
        record.hop_count,
        record.replication,
        record.time_of_creation,
        now,
    );
    let like = f64::from(record.like);
    let popularity = 100.0 * like / (1.0 + like);
    a + b * (100.0 / age_factor(record.time_of_creation, now)) + c * popularity / (a + b + c)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: u64 = 3_600_000;
    const NOW: u64 = 1_700_000_000_000;

    fn record(hop_count: u8, replication: u32, like: u16, age_ms: u64) -> ScoringRecord {
        ScoringRecord {
            id: 1,
            hop_count,
            like,
            replication,
            time_of_creation: NOW - age_ms,
            ttl: 0,
        }
    }

    #[test]
    fn brand_new_status_scores_100() {
        let c = score_components(0, 0, NOW, NOW);
        assert_eq!(c, ScoreComponents { a: 100.0, b: 0.0, c: 0.0 });
        assert_eq!(score(&record(0, 0, 0, 0), NOW), 100.0);
        // likes cannot lift it above the ceiling while c is 0
        assert_eq!(score(&record(0, 0, 500, 0), NOW), 100.0);
    }

    #[test]
    fn spread_weight_never_increases() {
        let mut last = f64::INFINITY;
        for spread in 0..400u32 {
            let hop = spread.min(255) as u8;
            let rep = spread - u32::from(hop);
            let a = score_components(hop, rep, NOW - 5 * HOUR, NOW).a;
            assert!(a <= last, "a rose at spread {spread}");
            last = a;
        }
        assert!(last < 100.0);
    }

    #[test]
    fn components_sum_to_100() {
        for (hop, rep, age) in [(0, 0, 0), (3, 1, HOUR), (20, 40, 48 * HOUR), (255, 9, 10_000 * HOUR)] {
            let c = score_components(hop, rep, NOW - age, NOW);
            assert!((c.a + c.b + c.c - 100.0).abs() < 1e-9);
            assert!(c.b >= 0.0 && c.c >= 0.0);
        }
    }

    #[test]
    fn likes_count_once_weights_decay() {
        let plain = score(&record(60, 0, 0, 50_000 * HOUR), NOW);
        let liked = score(&record(60, 0, 9, 50_000 * HOUR), NOW);
        assert!(liked > plain);
    }

    #[test]
    fn future_timestamps_count_as_fresh() {
        assert_eq!(score_components(0, 0, NOW + HOUR, NOW).a, 100.0);
        assert_eq!(age_factor(NOW + HOUR, NOW), 1.0);
    }
}
