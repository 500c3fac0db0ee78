use crate::aggregation::daily_totals;
use crate::schema::TransactionRecord;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Value at `quantile` of `amounts` by sorted index `floor(n * quantile)`.
///
/// An index past the end falls back to the largest amount. `None` for empty input.
pub fn quantile_threshold(amounts: &[f64], quantile: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = amounts.iter().copied().filter(|a| a.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let raw_index = (sorted.len() as f64 * quantile).floor();
    let index = if raw_index.is_nan() || raw_index < 0.0 {
        0
    } else {
        raw_index as usize
    };

    sorted.get(index).or_else(|| sorted.last()).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    Strong,
    Moderate,
    WeakOrNone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationDirection {
    Positive,
    Negative,
    /// Exactly zero.
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CorrelationResult {
    pub coefficient: f64,
    pub strength: CorrelationStrength,
    pub direction: CorrelationDirection,
    /// Number of data-bearing days the coefficient was computed over.
    pub days: usize,
}

impl CorrelationResult {
    pub fn from_coefficient(coefficient: f64, days: usize) -> Self {
        let magnitude = coefficient.abs();
        let strength = if magnitude > 0.7 {
            CorrelationStrength::Strong
        } else if magnitude > 0.3 {
            CorrelationStrength::Moderate
        } else {
            CorrelationStrength::WeakOrNone
        };
        let direction = if coefficient > 0.0 {
            CorrelationDirection::Positive
        } else if coefficient < 0.0 {
            CorrelationDirection::Negative
        } else {
            CorrelationDirection::Neutral
        };

        Self {
            coefficient,
            strength,
            direction,
            days,
        }
    }

    pub fn label(&self) -> String {
        let strength = match self.strength {
            CorrelationStrength::Strong => "strong",
            CorrelationStrength::Moderate => "moderate",
            CorrelationStrength::WeakOrNone => "weak/no",
        };
        let direction = match self.direction {
            CorrelationDirection::Positive => " positive",
            CorrelationDirection::Negative => " negative",
            CorrelationDirection::Neutral => "",
        };
        format!("{}{} correlation", strength, direction)
    }
}

/// Pearson's r. `None` when fewer than two pairs or the slices differ in length.
/// A degenerate (zero-variance) input yields `0.0`.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        covariance += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denominator = (var_x * var_y).sqrt();
    if !(denominator > 0.0) {
        return Some(0.0);
    }

    Some((covariance / denominator).clamp(-1.0, 1.0))
}

/// Correlation between how many transactions a day has and how much was spent that day.
pub fn count_total_correlation(records: &[TransactionRecord]) -> Option<CorrelationResult> {
    let days = daily_totals(records);
    let counts: Vec<f64> = days.iter().map(|d| d.count as f64).collect();
    let totals: Vec<f64> = days.iter().map(|d| d.total).collect();

    pearson(&counts, &totals).map(|r| CorrelationResult::from_coefficient(r, days.len()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WelchTTest {
    pub mean_a: f64,
    pub mean_b: f64,
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    /// Two-sided.
    pub p_value: f64,
}

impl WelchTTest {
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

fn mean_and_variance(sample: &[f64]) -> (f64, f64) {
    let n = sample.len() as f64;
    let mean = sample.iter().sum::<f64>() / n;
    let variance = sample.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}

/// Welch's unequal-variance t-test. Needs two values per sample and some variance.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<WelchTTest> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }

    let (mean_a, var_a) = mean_and_variance(a);
    let (mean_b, var_b) = mean_and_variance(b);
    let se_a = var_a / a.len() as f64;
    let se_b = var_b / b.len() as f64;
    let se_sum = se_a + se_b;
    if !(se_sum > 0.0) {
        return None;
    }

    let t_statistic = (mean_a - mean_b) / se_sum.sqrt();
    let degrees_of_freedom = se_sum.powi(2)
        / (se_a.powi(2) / (a.len() as f64 - 1.0) + se_b.powi(2) / (b.len() as f64 - 1.0));
    let p_value = student_t_two_sided_p(t_statistic, degrees_of_freedom);

    Some(WelchTTest {
        mean_a,
        mean_b,
        t_statistic,
        degrees_of_freedom,
        p_value,
    })
}

/// P(|T| >= |t|) for Student's t with `df` degrees of freedom.
pub fn student_t_two_sided_p(t: f64, df: f64) -> f64 {
    let x = df / (df + t * t);
    regularized_incomplete_beta(x, df / 2.0, 0.5).clamp(0.0, 1.0)
}

fn ln_gamma(x: f64) -> f64 {
    // Lanczos approximation, g = 7
    const G: f64 = 7.0;
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        return PI.ln() - (PI * x).sin().ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + G + 0.5;
    let mut series = COEFFICIENTS[0];
    for (i, coefficient) in COEFFICIENTS.iter().enumerate().skip(1) {
        series += coefficient / (x + i as f64);
    }
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITERATIONS: usize = 300;
    const EPSILON: f64 = 3e-14;
    const TINY: f64 = 1e-300;

    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let even = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + even * d);
        c = guard(1.0 + even / c);
        h *= d * c;

        let odd = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + odd * d);
        c = guard(1.0 + odd / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }

    h
}
