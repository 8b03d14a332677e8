//! Wilcoxon signed-rank test for paired samples.

/// Outcome of a Wilcoxon signed-rank test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WxTestResult {
    /// Two-sided p-value.
    pub p_value: f64,
    /// Rank sum of positive differences (`baseline > tested`).
    pub w_plus: f64,
    /// Rank sum of negative differences.
    pub w_minus: f64,
}

/// Largest sample size for which the exact null distribution is used.
const EXACT_MAX_N: usize = 20;

/// Wilcoxon signed-rank test on `baseline[i] - tested[i]`.
///
/// Pairs beyond the shorter input are ignored, as are zero differences.
/// Absolute differences are ranked with average ranks for ties. Without ties
/// and with at most 20 nonzero differences the exact null distribution is
/// used; otherwise the normal approximation with tie and continuity
/// correction. With no nonzero difference the p-value is 1.
pub fn wx_test(baseline: &[f64], tested: &[f64]) -> WxTestResult {
    let mut diffs: Vec<f64> = baseline
        .iter()
        .zip(tested)
        .map(|(b, t)| b - t)
        .filter(|d| *d != 0.0 && !d.is_nan())
        .collect();
    let n = diffs.len();
    if n == 0 {
        return WxTestResult {
            p_value: 1.0,
            w_plus: 0.0,
            w_minus: 0.0,
        };
    }

    diffs.sort_by(|a, b| a.abs().total_cmp(&b.abs()));

    let mut w_plus = 0.0;
    let mut w_minus = 0.0;
    // Σ(t³ - t) over tie groups.
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && diffs[j].abs() == diffs[i].abs() {
            j += 1;
        }
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        for d in &diffs[i..j] {
            if *d > 0.0 {
                w_plus += avg_rank;
            } else {
                w_minus += avg_rank;
            }
        }
        let t = (j - i) as f64;
        tie_term += t * t * t - t;
        i = j;
    }

    let p_value = if tie_term == 0.0 && n <= EXACT_MAX_N {
        exact_p_value(n, w_plus)
    } else {
        normal_p_value(n, w_plus, tie_term)
    };

    WxTestResult {
        p_value,
        w_plus,
        w_minus,
    }
}

/// Two-sided p-value from the exact distribution of W+ under the null.
fn exact_p_value(n: usize, w_plus: f64) -> f64 {
    let max_sum = n * (n + 1) / 2;
    // counts[s] = number of rank subsets summing to s.
    let mut counts = vec![0.0f64; max_sum + 1];
    counts[0] = 1.0;
    for rank in 1..=n {
        for s in (rank..=max_sum).rev() {
            counts[s] += counts[s - rank];
        }
    }
    let total = 2f64.powi(n as i32);
    let w = w_plus.round() as usize;
    let lower: f64 = counts[..=w.min(max_sum)].iter().sum::<f64>() / total;
    let upper: f64 = counts[w.min(max_sum)..].iter().sum::<f64>() / total;
    (2.0 * lower.min(upper)).min(1.0)
}

/// Two-sided p-value from the normal approximation.
fn normal_p_value(n: usize, w_plus: f64, tie_term: f64) -> f64 {
    let n = n as f64;
    let mean = n * (n + 1.0) / 4.0;
    let variance = n * (n + 1.0) * (2.0 * n + 1.0) / 24.0 - tie_term / 48.0;
    if variance <= 0.0 {
        return 1.0;
    }
    let deviation = w_plus - mean;
    let corrected = (deviation.abs() - 0.5).max(0.0);
    let z = corrected / variance.sqrt();
    (2.0 * (1.0 - normal_cdf(z))).clamp(0.0, 1.0)
}

/// Standard normal CDF.
fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Abramowitz-Stegun approximation of the error function.
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}
