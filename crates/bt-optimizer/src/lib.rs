//! # bt-optimizer
//!
//! Gaussian-process parameter search engine for BackTune.
//!
//! Provides parameter-space encoding, Latin Hypercube initial designs, a
//! GP surrogate with Expected Improvement / Upper Confidence Bound
//! acquisition, and the session controller that drives one expensive
//! backtest evaluation at a time through a host-supplied [`Evaluator`].

mod acquisition;
mod config;
mod design;
mod session;
mod space;
mod surrogate;

pub use acquisition::{expected_improvement, upper_confidence_bound, AcquisitionKind};
pub use config::{ObjectiveDirection, OptimizerConfig};
pub use design::{lhs, optimized_lhs, random_design, unit_lhs, LhsCriterion};
pub use session::{
    Evaluator, Observation, OptimizationSession, ProposalSource, SessionReport, SessionStatus,
    StopHandle, StopReason,
};
pub use space::{Assignment, ParamValue, ParameterKind, ParameterSpace, ParameterSpec};
pub use surrogate::{GaussianProcess, Prediction};
