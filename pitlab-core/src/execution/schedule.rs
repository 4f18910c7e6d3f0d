//! Participation schedules: split an order into timed child slices.
//!
//! TWAP uses even slices; VWAP weights slices by the historical intraday
//! volume curve. Slice quantities are whole shares and always sum to the
//! parent quantity. Slice start times are randomized inside their bucket by a
//! seeded RNG so replays with the same seed produce the same times.

use crate::config::SimAlgo;
use chrono::Duration;
use rand::Rng;

/// One child slice of a parent order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slice {
    /// Offset from the start of execution.
    pub offset: Duration,
    pub quantity: u64,
    /// Share of the horizon's expected volume traded in this bucket.
    pub volume_share: f64,
}

/// Split `total` across buckets in proportion to `weights` using the
/// largest-remainder method. The result always sums to `total`.
pub fn apportion(total: u64, weights: &[f64]) -> Vec<u64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let sum: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    let weights: Vec<f64> = if sum > 0.0 {
        weights
            .iter()
            .map(|w| if w.is_finite() && *w > 0.0 { w / sum } else { 0.0 })
            .collect()
    } else {
        vec![1.0 / weights.len() as f64; weights.len()]
    };

    let raw: Vec<f64> = weights.iter().map(|w| w * total as f64).collect();
    let mut out: Vec<u64> = raw.iter().map(|r| r.floor() as u64).collect();
    let assigned: u64 = out.iter().sum();
    let mut leftover = total.saturating_sub(assigned);

    // Largest fractional part first; ties go to the earlier bucket.
    let mut order: Vec<usize> = (0..raw.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = raw[a] - raw[a].floor();
        let fb = raw[b] - raw[b].floor();
        fb.total_cmp(&fa).then(a.cmp(&b))
    });
    for &i in order.iter().cycle() {
        if leftover == 0 {
            break;
        }
        out[i] += 1;
        leftover -= 1;
    }
    out
}

/// Bucket weights for an algorithm. VWAP falls back to even weights when the
/// curve is missing, the wrong length, or carries no volume.
pub fn bucket_weights(algo: SimAlgo, slices: usize, curve: Option<&[f64]>) -> Vec<f64> {
    let slices = slices.max(1);
    let even = vec![1.0 / slices as f64; slices];
    match (algo, curve) {
        (SimAlgo::Vwap, Some(curve)) if curve.len() == slices => {
            let sum: f64 = curve.iter().filter(|v| v.is_finite() && **v > 0.0).sum();
            if sum > 0.0 {
                curve
                    .iter()
                    .map(|v| if v.is_finite() && *v > 0.0 { v / sum } else { 0.0 })
                    .collect()
            } else {
                even
            }
        }
        _ => even,
    }
}

/// Build the slice schedule for one parent order.
///
/// `jitter` in `[0, 1]` is the fraction of a bucket over which the slice
/// start may be shifted. Zero-quantity slices are dropped.
pub fn build_schedule<R: Rng>(
    algo: SimAlgo,
    total: u64,
    slices: usize,
    horizon: Duration,
    curve: Option<&[f64]>,
    jitter: f64,
    rng: &mut R,
) -> Vec<Slice> {
    let weights = bucket_weights(algo, slices, curve);
    let quantities = apportion(total, &weights);
    let bucket_ms = horizon.num_milliseconds().max(0) / weights.len() as i64;
    let jitter = jitter.clamp(0.0, 1.0);

    let mut out = Vec::with_capacity(weights.len());
    for (i, (&quantity, &share)) in quantities.iter().zip(&weights).enumerate() {
        // Draw even for empty slices so the RNG stream does not depend on
        // how quantities round.
        let u: f64 = rng.gen();
        if quantity == 0 {
            continue;
        }
        let shift = (u * jitter * bucket_ms as f64) as i64;
        out.push(Slice {
            offset: Duration::milliseconds(i as i64 * bucket_ms + shift),
            quantity,
            volume_share: share,
        });
    }
    out
}
