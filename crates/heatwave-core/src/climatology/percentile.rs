//! Empirical percentiles with linear interpolation between order statistics.

/// Percentile `q` (0–100) of an ascending slice. `None` if empty.
///
/// rank = q/100 · (n − 1); the result interpolates linearly between the two
/// neighbouring order statistics.
pub fn percentile_sorted(sorted: &[f32], q: f64) -> Option<f32> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    let a = sorted[lo] as f64;
    let b = sorted[hi] as f64;
    Some((a + (b - a) * frac) as f32)
}

/// Sort `values` in place and take percentile `q`. NaNs must already be
/// filtered out.
pub fn percentile(values: &mut [f32], q: f64) -> Option<f32> {
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    percentile_sorted(values, q)
}
