//! Robust loss functions for outlier-aware estimation.
//!
//! The coarse global aligner drives these through a graduated non-convexity
//! (GNC) schedule: the parameter starts large (near-quadratic surrogate) and
//! is annealed toward the target value, which lets the optimizer escape the
//! local minima introduced by heavy outlier contamination.

/// Robust loss functions with an adjustable scale parameter.
#[derive(Debug, Clone, Copy)]
pub enum RobustLoss {
    /// Truncated Least Squares: rho(r) = { r^2 if r < c, c^2 otherwise }.
    /// Outliers get exactly zero weight; the loss behind certifiable
    /// bounded-outlier estimation.
    TruncatedLeastSquares { c: f32 },
    /// Geman-McClure: rho(r) = (mu * r^2) / (mu + r^2).
    GemanMcClure { mu: f32 },
    /// Welsch/Leclerc: rho(r) = mu * (1 - exp(-r^2/mu)).
    Welsch { mu: f32 },
}

impl RobustLoss {
    /// Evaluate the loss rho(r).
    pub fn evaluate(&self, residual: f32) -> f32 {
        let r = residual.abs();
        match self {
            RobustLoss::TruncatedLeastSquares { c } => {
                if r < *c {
                    r * r
                } else {
                    c * c
                }
            }
            RobustLoss::GemanMcClure { mu } => (mu * r * r) / (mu + r * r),
            RobustLoss::Welsch { mu } => mu * (1.0 - (-r * r / mu).exp()),
        }
    }

    /// Weight for iteratively reweighted least squares: rho'(r) / r.
    pub fn weight(&self, residual: f32) -> f32 {
        let r = residual.abs();
        if r < 1e-6 {
            return 1.0;
        }
        match self {
            RobustLoss::TruncatedLeastSquares { c } => {
                if r < *c {
                    1.0
                } else {
                    0.0
                }
            }
            RobustLoss::GemanMcClure { mu } => {
                let r2 = r * r;
                (2.0 * mu * mu) / ((mu + r2) * (mu + r2))
            }
            RobustLoss::Welsch { mu } => (-r * r / mu).exp(),
        }
    }

    pub fn get_param(&self) -> f32 {
        match self {
            RobustLoss::TruncatedLeastSquares { c } => *c,
            RobustLoss::GemanMcClure { mu } => *mu,
            RobustLoss::Welsch { mu } => *mu,
        }
    }

    /// Update the scale parameter (used by the GNC schedule).
    pub fn update_param(&mut self, new_param: f32) {
        match self {
            RobustLoss::TruncatedLeastSquares { c } => *c = new_param,
            RobustLoss::GemanMcClure { mu } => *mu = new_param,
            RobustLoss::Welsch { mu } => *mu = new_param,
        }
    }

    /// GNC parameter schedule: interpolate from a convex surrogate
    /// (`alpha = 0`) down to the target scale `target` (`alpha = 1`).
    pub fn schedule(&self, target: f32, alpha: f32) -> f32 {
        let max = match self {
            // TLS saturates hard, so a 10x relaxation is enough to start.
            RobustLoss::TruncatedLeastSquares { .. } => target * 10.0,
            RobustLoss::GemanMcClure { .. } | RobustLoss::Welsch { .. } => target * 100.0,
        };
        max * (1.0 - alpha) + target * alpha
    }
}
