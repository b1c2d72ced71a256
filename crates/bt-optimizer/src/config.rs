//! Session configuration for an optimization run.

use serde::{Deserialize, Serialize};

use bt_types::{config_error, validate_filters, BtResult, Filter};

use crate::acquisition::AcquisitionKind;
use crate::space::ParameterSpace;

/// Whether we are maximizing or minimizing the objective metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

/// Top-level configuration for an optimization session.
///
/// Immutable once a session starts; the defaults mirror what the popup
/// exposes to a user tuning a backtest report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// The parameter search space.
    pub space: ParameterSpace,

    /// Feasibility constraints on auxiliary metrics.
    pub filters: Vec<Filter>,

    /// Metric name to optimize (e.g. "net_profit", "sharpe_ratio").
    pub objective_metric: String,

    /// Direction of optimization.
    pub direction: ObjectiveDirection,

    /// Size of the space-filling initial design.
    pub init_points: usize,

    /// Maximum number of surrogate-guided steps after the initial design.
    pub max_iterations: usize,

    /// Which acquisition function scores the candidate pool.
    pub acquisition: AcquisitionKind,

    /// Expected-improvement exploration margin.
    pub xi: f64,

    /// Upper-confidence-bound exploration weight.
    pub kappa: f64,

    /// Candidate pool size scored per iteration.
    pub n_candidates: usize,

    /// Early-stop window: stop after this many iterations without a feasible
    /// improvement. `None` disables the heuristic. This is a heuristic, not
    /// a convergence guarantee.
    pub convergence_window: Option<usize>,

    /// RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl OptimizerConfig {
    pub fn new(space: ParameterSpace, objective_metric: impl Into<String>) -> Self {
        Self {
            space,
            filters: Vec::new(),
            objective_metric: objective_metric.into(),
            direction: ObjectiveDirection::Maximize,
            init_points: 5,
            max_iterations: 25,
            acquisition: AcquisitionKind::Ei,
            xi: 0.01,
            kappa: 2.576,
            n_candidates: 100,
            convergence_window: Some(10),
            seed: None,
        }
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_init_points(mut self, n: usize) -> Self {
        self.init_points = n;
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_acquisition(mut self, kind: AcquisitionKind) -> Self {
        self.acquisition = kind;
        self
    }

    pub fn with_xi(mut self, xi: f64) -> Self {
        self.xi = xi;
        self
    }

    pub fn with_kappa(mut self, kappa: f64) -> Self {
        self.kappa = kappa;
        self
    }

    pub fn with_n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n;
        self
    }

    pub fn with_convergence_window(mut self, window: Option<usize>) -> Self {
        self.convergence_window = window;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the whole configuration. Surfaced synchronously before any
    /// evaluation is issued; a session never starts on an invalid config.
    pub fn validate(&self) -> BtResult<()> {
        self.space.validate()?;
        validate_filters(&self.filters)?;
        if self.objective_metric.trim().is_empty() {
            return Err(config_error!("objective metric name is empty"));
        }
        if self.max_iterations == 0 {
            return Err(config_error!("max_iterations must be at least 1"));
        }
        if self.n_candidates == 0 {
            return Err(config_error!("n_candidates must be at least 1"));
        }
        if !self.xi.is_finite() || self.xi < 0.0 {
            return Err(config_error!("xi must be finite and non-negative"));
        }
        if !self.kappa.is_finite() || self.kappa < 0.0 {
            return Err(config_error!("kappa must be finite and non-negative"));
        }
        if self.convergence_window == Some(0) {
            return Err(config_error!(
                "convergence window must be at least 1 (use None to disable)"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_types::Comparator;

    fn space() -> ParameterSpace {
        ParameterSpace::new().add_continuous("x", 0.0, 10.0)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = OptimizerConfig::new(space(), "net_profit");
        assert_eq!(config.init_points, 5);
        assert_eq!(config.acquisition, AcquisitionKind::Ei);
        assert_eq!(config.xi, 0.01);
        assert_eq!(config.kappa, 2.576);
        assert_eq!(config.n_candidates, 100);
        assert_eq!(config.convergence_window, Some(10));
        assert_eq!(config.direction, ObjectiveDirection::Maximize);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_chain() {
        let config = OptimizerConfig::new(space(), "sharpe_ratio")
            .with_direction(ObjectiveDirection::Minimize)
            .with_filters(vec![Filter::new("trades", Comparator::Gte, 30.0)])
            .with_init_points(8)
            .with_max_iterations(40)
            .with_acquisition(AcquisitionKind::Ucb)
            .with_kappa(1.5)
            .with_convergence_window(None)
            .with_seed(42);
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.max_iterations, 40);
        assert_eq!(config.seed, Some(42));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_configs() {
        let base = OptimizerConfig::new(space(), "net_profit");

        assert!(base.clone().with_max_iterations(0).validate().is_err());
        assert!(base.clone().with_n_candidates(0).validate().is_err());
        assert!(base.clone().with_xi(f64::NAN).validate().is_err());
        assert!(base.clone().with_kappa(-1.0).validate().is_err());
        assert!(base
            .clone()
            .with_convergence_window(Some(0))
            .validate()
            .is_err());

        let empty_space = OptimizerConfig::new(ParameterSpace::new(), "net_profit");
        assert!(empty_space.validate().is_err());

        let bad_filter = base.with_filters(vec![Filter::new("m", Comparator::Gt, f64::NAN)]);
        assert!(bad_filter.validate().is_err());

        let no_metric = OptimizerConfig::new(space(), "  ");
        assert!(no_metric.validate().is_err());
    }

    #[test]
    fn config_serde_round_trip() {
        let config = OptimizerConfig::new(space(), "net_profit").with_seed(7);
        let json = serde_json::to_string(&config).unwrap();
        let back: OptimizerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
