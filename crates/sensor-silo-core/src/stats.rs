//! Incremental sample statistics.

/// Running mean and variance over a sample stream (Welford's algorithm).
///
/// Variance is the population variance (`M2 / n`). All statistics are NaN
/// while no samples have been pushed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards all samples.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Adds a sample.
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.m2 / self.count as f64
    }

    pub fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }

    /// One-line summary for operator review.
    pub fn synopsis(&self) -> String {
        format!(
            "n={}, mean={:.3}, var={:.3}, sd={:.3}",
            self.count,
            self.mean(),
            self.variance(),
            self.standard_deviation()
        )
    }
}
