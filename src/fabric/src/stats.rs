//! Small descriptive statistics shared by the monitor and the analysis layer.
//!
//! Every function returns `None` for an empty input so that callers can tell
//! "no data" apart from zero.

pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    Some(xs.iter().sum::<f64>() / xs.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(xs: &[f64]) -> Option<f64> {
    let m = mean(xs)?;
    let var = xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64;
    Some(var.sqrt())
}

/// Index-based percentile of an ascending sequence: the element at
/// `floor(n * p)`, clamped to the last one. No interpolation.
pub fn index_percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let ix = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
    Some(sorted[ix])
}

/// The element at `n / 2` of an ascending sequence.
pub fn index_median(sorted: &[f64]) -> Option<f64> {
    sorted.get(sorted.len() / 2).copied()
}

pub fn min(xs: &[f64]) -> Option<f64> {
    xs.iter().copied().fold(None, |acc, x| match acc {
        Some(m) if m <= x => Some(m),
        _ => Some(x),
    })
}

pub fn max(xs: &[f64]) -> Option<f64> {
    xs.iter().copied().fold(None, |acc, x| match acc {
        Some(m) if m >= x => Some(m),
        _ => Some(x),
    })
}

/// Ascending copy, NaNs last.
pub fn sorted(xs: &[f64]) -> Vec<f64> {
    let mut v = xs.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan())));
    v
}

/// `1 - std/mean` of per-link mean utilizations: 1 for a perfectly even spread.
/// 0 when the mean is 0.
pub fn balance_score(means: &[f64]) -> Option<f64> {
    let m = mean(means)?;
    if m == 0. {
        return Some(0.);
    }
    Some(1. - std_dev(means)? / m)
}

/// Relative change in percent, oriented so that a positive value is an
/// improvement of `new` over `old`. 0 when `old` is 0.
pub fn improvement(old: f64, new: f64, higher_is_better: bool) -> f64 {
    if old == 0. {
        return 0.;
    }
    let delta = if higher_is_better { new - old } else { old - new };
    delta / old * 100.
}
