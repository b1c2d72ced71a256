//! Optimization session: the sequential evaluate/fit/propose loop.
//!
//! A session owns the full history of observations and drives one candidate
//! at a time through an external [`Evaluator`] (in the deployed system, the
//! page-automation layer that re-runs the backtest and scrapes the report).
//! Evaluation is the expensive step, so everything in-process (fitting,
//! sampling, acquisition scoring) is synchronous CPU work between awaits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bt_types::{feasible, BtResult, MetricReport};

use crate::config::{ObjectiveDirection, OptimizerConfig};
use crate::design;
use crate::space::Assignment;
use crate::surrogate::GaussianProcess;

/// The external evaluation capability a host must supply. One call runs the
/// backtest for an assignment and returns the scraped metrics; calls are
/// issued strictly one at a time.
#[async_trait]
pub trait Evaluator: Send {
    async fn evaluate(&mut self, assignment: &Assignment) -> BtResult<MetricReport>;
}

/// Cooperative cancellation handle for a running session.
///
/// `stop` is checked before each new evaluation request; an in-flight
/// evaluation is never interrupted, but no further proposal is issued once
/// it returns.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

/// Why a session terminated normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    MaxIterations,
    Converged,
    Cancelled,
}

/// Where a proposed candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalSource {
    /// Space-filling initial design.
    InitialDesign,
    /// Acquisition-maximizing candidate from the fitted surrogate.
    Surrogate,
    /// Random draw: too few feasible observations, or a surrogate failure.
    RandomFallback,
}

/// One completed evaluation. Append-only; iteration numbers are
/// monotonically increasing and gap-free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub iteration: usize,
    pub assignment: Assignment,
    pub features: Vec<f64>,
    pub metrics: MetricReport,
    /// Objective metric value; `None` when the evaluation failed or the
    /// report did not contain the objective metric.
    pub target: Option<f64>,
    pub feasible: bool,
    pub source: ProposalSource,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Snapshot of a finished (or cancelled) session, serializable so a host
/// can persist or export it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub id: Uuid,
    pub status: SessionStatus,
    pub stop_reason: Option<StopReason>,
    pub best: Option<Observation>,
    pub observations: Vec<Observation>,
    /// How often the surrogate was successfully fitted (diagnostic).
    pub surrogate_fits: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Drives the optimization loop against an external evaluator.
///
/// Each session owns an independent history, surrogate and RNG; nothing is
/// shared across sessions.
pub struct OptimizationSession {
    id: Uuid,
    config: OptimizerConfig,
    surrogate: GaussianProcess,
    rng: ChaCha8Rng,
    observations: Vec<Observation>,
    /// Index of the best feasible observation, if any.
    best: Option<usize>,
    status: SessionStatus,
    stop_reason: Option<StopReason>,
    stop: StopHandle,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl OptimizationSession {
    pub fn new(config: OptimizerConfig) -> Self {
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        Self {
            id: Uuid::new_v4(),
            surrogate: GaussianProcess::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
            observations: Vec::new(),
            best: None,
            status: SessionStatus::Idle,
            stop_reason: None,
            stop: StopHandle::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// The best feasible observation so far. Infeasible observations never
    /// appear here.
    pub fn best(&self) -> Option<&Observation> {
        self.best.map(|i| &self.observations[i])
    }

    /// Handle a host can use to request cancellation from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run the full search: initial design, then up to `max_iterations`
    /// surrogate-guided steps. Configuration errors surface synchronously
    /// before any evaluation; evaluation and numerical errors are absorbed
    /// into per-observation metadata and the loop continues.
    pub async fn run<E>(&mut self, evaluator: &mut E) -> BtResult<SessionReport>
    where
        E: Evaluator + ?Sized,
    {
        if let Err(err) = self.config.validate() {
            self.status = SessionStatus::Failed;
            return Err(err);
        }
        self.status = SessionStatus::Running;
        self.started_at = Some(Utc::now());
        info!(
            session = %self.id,
            init_points = self.config.init_points,
            max_iterations = self.config.max_iterations,
            objective = %self.config.objective_metric,
            "starting optimization session"
        );

        // Space-filling initial design; lhs degenerates to random for n < 2.
        let initial = design::lhs(
            &self.config.space,
            self.config.init_points,
            false,
            &mut self.rng,
        )?;
        for assignment in initial {
            if self.stop.is_stopped() {
                return Ok(self.finish(SessionStatus::Stopped, StopReason::Cancelled));
            }
            self.evaluate_and_record(evaluator, assignment, ProposalSource::InitialDesign)
                .await?;
        }

        // Loop iterations since the last feasible improvement.
        let mut stale = 0usize;
        for _ in 0..self.config.max_iterations {
            if self.stop.is_stopped() {
                return Ok(self.finish(SessionStatus::Stopped, StopReason::Cancelled));
            }
            if let Some(window) = self.config.convergence_window {
                if self.best.is_some() && stale >= window {
                    return Ok(self.finish(SessionStatus::Completed, StopReason::Converged));
                }
            }

            let (assignment, source) = self.propose()?;
            let improved = self.evaluate_and_record(evaluator, assignment, source).await?;
            if improved {
                stale = 0;
            } else {
                stale += 1;
            }
        }

        Ok(self.finish(SessionStatus::Completed, StopReason::MaxIterations))
    }

    /// Pick the next candidate. Needs at least two feasible observations to
    /// fit the surrogate; otherwise, and whenever fitting or prediction
    /// fails, falls back to a uniform random draw for this iteration.
    fn propose(&mut self) -> BtResult<(Assignment, ProposalSource)> {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for obs in &self.observations {
            if let (true, Some(target)) = (obs.feasible, obs.target) {
                x.push(obs.features.clone());
                y.push(self.internal_target(target));
            }
        }

        if x.len() < 2 {
            debug!(feasible = x.len(), "too few feasible observations, proposing randomly");
            let assignment = self.config.space.sample_random(&mut self.rng);
            return Ok((assignment, ProposalSource::RandomFallback));
        }

        if let Err(err) = self.surrogate.fit(&x, &y) {
            warn!(error = %err, "surrogate fit failed, proposing randomly");
            let assignment = self.config.space.sample_random(&mut self.rng);
            return Ok((assignment, ProposalSource::RandomFallback));
        }

        let mut pool = Vec::with_capacity(self.config.n_candidates);
        let mut encoded = Vec::with_capacity(self.config.n_candidates);
        for _ in 0..self.config.n_candidates {
            let candidate = self.config.space.sample_random(&mut self.rng);
            encoded.push(self.config.space.encode(&candidate)?);
            pool.push(candidate);
        }

        let prediction = match self.surrogate.predict(&encoded) {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, "surrogate prediction failed, proposing randomly");
                let assignment = self.config.space.sample_random(&mut self.rng);
                return Ok((assignment, ProposalSource::RandomFallback));
            }
        };

        let best_internal = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let scores = self.config.acquisition.score(
            &prediction.mean,
            &prediction.variance,
            best_internal,
            self.config.xi,
            self.config.kappa,
        );
        let mut best_idx = 0;
        for (i, score) in scores.iter().enumerate() {
            if *score > scores[best_idx] {
                best_idx = i;
            }
        }

        Ok((pool.swap_remove(best_idx), ProposalSource::Surrogate))
    }

    /// Issue one evaluation, commit the observation, and update the best
    /// feasible marker. Returns whether the observation improved on it.
    async fn evaluate_and_record<E>(
        &mut self,
        evaluator: &mut E,
        assignment: Assignment,
        source: ProposalSource,
    ) -> BtResult<bool>
    where
        E: Evaluator + ?Sized,
    {
        let iteration = self.observations.len();
        let features = self.config.space.encode(&assignment)?;
        debug!(iteration, source = ?source, "requesting evaluation");

        let (metrics, target, error) = match evaluator.evaluate(&assignment).await {
            Ok(report) => {
                let target = report
                    .get(&self.config.objective_metric)
                    .filter(|t| t.is_finite());
                let error = match target {
                    Some(_) => None,
                    None => Some(format!(
                        "objective metric '{}' missing from report",
                        self.config.objective_metric
                    )),
                };
                (report, target, error)
            }
            Err(err) => {
                warn!(iteration, error = %err, "evaluation failed, recording infeasible observation");
                (MetricReport::new(), None, Some(err.to_string()))
            }
        };

        let is_feasible =
            target.is_some() && error.is_none() && feasible(&self.config.filters, &metrics);
        let improved = match target {
            Some(t) if is_feasible => self.improves(t),
            _ => false,
        };

        self.observations.push(Observation {
            id: Uuid::new_v4(),
            iteration,
            assignment,
            features,
            metrics,
            target,
            feasible: is_feasible,
            source,
            error,
            completed_at: Utc::now(),
        });

        if improved {
            self.best = Some(iteration);
            info!(
                iteration,
                target = target.unwrap_or(f64::NAN),
                "new best feasible observation"
            );
        }
        Ok(improved)
    }

    /// Direction-adjusted target so the surrogate and acquisition always
    /// maximize internally.
    fn internal_target(&self, target: f64) -> f64 {
        match self.config.direction {
            ObjectiveDirection::Maximize => target,
            ObjectiveDirection::Minimize => -target,
        }
    }

    fn improves(&self, target: f64) -> bool {
        match self.best {
            None => true,
            Some(i) => {
                let current = self.observations[i]
                    .target
                    .expect("best observation always has a target");
                match self.config.direction {
                    ObjectiveDirection::Maximize => target > current,
                    ObjectiveDirection::Minimize => target < current,
                }
            }
        }
    }

    fn finish(&mut self, status: SessionStatus, reason: StopReason) -> SessionReport {
        self.status = status;
        self.stop_reason = Some(reason);
        self.finished_at = Some(Utc::now());
        info!(
            session = %self.id,
            status = ?status,
            reason = ?reason,
            observations = self.observations.len(),
            best = self.best().and_then(|o| o.target).unwrap_or(f64::NAN),
            "optimization session finished"
        );
        self.report()
    }

    /// Snapshot of the session's current state.
    pub fn report(&self) -> SessionReport {
        SessionReport {
            id: self.id,
            status: self.status,
            stop_reason: self.stop_reason,
            best: self.best().cloned(),
            observations: self.observations.clone(),
            surrogate_fits: self.surrogate.fit_count(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::AcquisitionKind;
    use crate::space::{ParamValue, ParameterSpace};
    use bt_types::{BtError, Comparator, Filter};

    /// Synthetic backtest: peak objective at x = 7, plus a trade count.
    struct QuadraticEval;

    #[async_trait]
    impl Evaluator for QuadraticEval {
        async fn evaluate(&mut self, assignment: &Assignment) -> BtResult<MetricReport> {
            let x = assignment.get("x").and_then(ParamValue::as_f64).unwrap();
            Ok(MetricReport::from_pairs([
                ("net_profit", -(x - 7.0) * (x - 7.0)),
                ("trades", 50.0),
            ]))
        }
    }

    fn one_dim_config() -> OptimizerConfig {
        let space = ParameterSpace::new().add_continuous("x", 0.0, 10.0);
        OptimizerConfig::new(space, "net_profit")
            .with_init_points(5)
            .with_max_iterations(20)
            .with_acquisition(AcquisitionKind::Ei)
            .with_seed(42)
    }

    #[tokio::test]
    async fn quadratic_scenario_finds_the_peak() {
        let mut session = OptimizationSession::new(one_dim_config());
        let report = session.run(&mut QuadraticEval).await.unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        let best = report.best.expect("feasible best must exist");
        let x = best.assignment.get("x").and_then(ParamValue::as_f64).unwrap();
        assert!(
            (x - 7.0).abs() <= 1.0,
            "best x = {x} not within 1.0 of the peak at 7"
        );
        assert!(best.feasible);
        assert!(report.surrogate_fits > 0);
    }

    #[tokio::test]
    async fn iteration_numbers_are_gap_free() {
        let mut session = OptimizationSession::new(one_dim_config().with_max_iterations(8));
        let report = session.run(&mut QuadraticEval).await.unwrap();
        for (i, obs) in report.observations.iter().enumerate() {
            assert_eq!(obs.iteration, i);
        }
        // Initial design carries its own source marker
        assert!(report.observations[..5]
            .iter()
            .all(|o| o.source == ProposalSource::InitialDesign));
    }

    #[tokio::test]
    async fn minimization_flips_the_comparison() {
        struct BowlEval;
        #[async_trait]
        impl Evaluator for BowlEval {
            async fn evaluate(&mut self, assignment: &Assignment) -> BtResult<MetricReport> {
                let x = assignment.get("x").and_then(ParamValue::as_f64).unwrap();
                Ok(MetricReport::from_pairs([(
                    "max_drawdown",
                    (x - 7.0) * (x - 7.0),
                )]))
            }
        }

        let space = ParameterSpace::new().add_continuous("x", 0.0, 10.0);
        let config = OptimizerConfig::new(space, "max_drawdown")
            .with_direction(crate::config::ObjectiveDirection::Minimize)
            .with_acquisition(AcquisitionKind::Ucb)
            .with_init_points(5)
            .with_max_iterations(15)
            .with_seed(7);

        let mut session = OptimizationSession::new(config);
        let report = session.run(&mut BowlEval).await.unwrap();
        let best = report.best.unwrap();
        let x = best.assignment.get("x").and_then(ParamValue::as_f64).unwrap();
        assert!((x - 7.0).abs() <= 1.0, "minimized best x = {x}");
    }

    #[tokio::test]
    async fn always_infeasible_keeps_best_none_and_runs_to_max() {
        struct NegativeEval;
        #[async_trait]
        impl Evaluator for NegativeEval {
            async fn evaluate(&mut self, _assignment: &Assignment) -> BtResult<MetricReport> {
                Ok(MetricReport::from_pairs([("net_profit", 1.0), ("m", -1.0)]))
            }
        }

        let space = ParameterSpace::new().add_continuous("x", 0.0, 1.0);
        let config = OptimizerConfig::new(space, "net_profit")
            .with_filters(vec![Filter::new("m", Comparator::Gte, 0.0)])
            .with_init_points(3)
            .with_max_iterations(5)
            // Tight window: must NOT fire, the heuristic only compares
            // feasible observations
            .with_convergence_window(Some(2))
            .with_seed(1);

        let mut session = OptimizationSession::new(config);
        let report = session.run(&mut NegativeEval).await.unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.stop_reason, Some(StopReason::MaxIterations));
        assert!(report.best.is_none());
        assert_eq!(report.observations.len(), 8);
        assert!(report.observations.iter().all(|o| !o.feasible));
        // Never enough feasible points to fit the surrogate
        assert_eq!(report.surrogate_fits, 0);
        assert!(report.observations[3..]
            .iter()
            .all(|o| o.source == ProposalSource::RandomFallback));
    }

    #[tokio::test]
    async fn evaluation_failures_are_absorbed() {
        struct FailingEval;
        #[async_trait]
        impl Evaluator for FailingEval {
            async fn evaluate(&mut self, _assignment: &Assignment) -> BtResult<MetricReport> {
                Err(BtError::Evaluation("report never refreshed".to_string()))
            }
        }

        let config = one_dim_config().with_init_points(2).with_max_iterations(3);
        let mut session = OptimizationSession::new(config);
        let report = session.run(&mut FailingEval).await.unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.observations.len(), 5);
        for obs in &report.observations {
            assert!(!obs.feasible);
            assert!(obs.target.is_none());
            assert!(obs.error.as_deref().unwrap().contains("report never refreshed"));
        }
        assert!(report.best.is_none());
    }

    #[tokio::test]
    async fn cancellation_is_honored_between_evaluations() {
        struct StoppingEval {
            stop: StopHandle,
            calls: usize,
        }
        #[async_trait]
        impl Evaluator for StoppingEval {
            async fn evaluate(&mut self, assignment: &Assignment) -> BtResult<MetricReport> {
                self.calls += 1;
                if self.calls == 2 {
                    // Requested mid-evaluation; the pending result must
                    // still be committed before the session stops.
                    self.stop.stop();
                }
                QuadraticEval.evaluate(assignment).await
            }
        }

        let mut session = OptimizationSession::new(one_dim_config());
        let mut evaluator = StoppingEval {
            stop: session.stop_handle(),
            calls: 0,
        };
        let report = session.run(&mut evaluator).await.unwrap();

        assert_eq!(report.status, SessionStatus::Stopped);
        assert_eq!(report.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(report.observations.len(), 2);
        assert_eq!(evaluator.calls, 2);
    }

    #[tokio::test]
    async fn convergence_heuristic_stops_a_flat_objective() {
        struct FlatEval;
        #[async_trait]
        impl Evaluator for FlatEval {
            async fn evaluate(&mut self, _assignment: &Assignment) -> BtResult<MetricReport> {
                Ok(MetricReport::from_pairs([("net_profit", 1.0)]))
            }
        }

        let config = one_dim_config()
            .with_init_points(2)
            .with_max_iterations(50)
            .with_convergence_window(Some(3));
        let mut session = OptimizationSession::new(config);
        let report = session.run(&mut FlatEval).await.unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.stop_reason, Some(StopReason::Converged));
        // 2 init + exactly `window` stale loop steps
        assert_eq!(report.observations.len(), 5);
    }

    #[tokio::test]
    async fn disabled_heuristic_runs_to_max_iterations() {
        struct FlatEval;
        #[async_trait]
        impl Evaluator for FlatEval {
            async fn evaluate(&mut self, _assignment: &Assignment) -> BtResult<MetricReport> {
                Ok(MetricReport::from_pairs([("net_profit", 1.0)]))
            }
        }

        let config = one_dim_config()
            .with_init_points(2)
            .with_max_iterations(6)
            .with_convergence_window(None);
        let mut session = OptimizationSession::new(config);
        let report = session.run(&mut FlatEval).await.unwrap();
        assert_eq!(report.stop_reason, Some(StopReason::MaxIterations));
        assert_eq!(report.observations.len(), 8);
    }

    #[tokio::test]
    async fn config_errors_surface_before_any_evaluation() {
        struct PanickingEval;
        #[async_trait]
        impl Evaluator for PanickingEval {
            async fn evaluate(&mut self, _assignment: &Assignment) -> BtResult<MetricReport> {
                panic!("must not be called");
            }
        }

        let config = OptimizerConfig::new(ParameterSpace::new(), "net_profit");
        let mut session = OptimizationSession::new(config);
        let err = session.run(&mut PanickingEval).await.unwrap_err();
        assert!(matches!(err, BtError::Config(_)));
        assert_eq!(session.status(), SessionStatus::Failed);
        assert!(session.observations().is_empty());
    }

    #[tokio::test]
    async fn missing_objective_metric_is_recorded_infeasible() {
        struct WrongMetricEval;
        #[async_trait]
        impl Evaluator for WrongMetricEval {
            async fn evaluate(&mut self, _assignment: &Assignment) -> BtResult<MetricReport> {
                Ok(MetricReport::from_pairs([("sharpe_ratio", 2.0)]))
            }
        }

        let config = one_dim_config().with_init_points(2).with_max_iterations(2);
        let mut session = OptimizationSession::new(config);
        let report = session.run(&mut WrongMetricEval).await.unwrap();
        assert!(report.best.is_none());
        assert!(report
            .observations
            .iter()
            .all(|o| o.error.as_deref().unwrap().contains("missing from report")));
    }

    #[tokio::test]
    async fn seeded_sessions_are_reproducible() {
        let mut a = OptimizationSession::new(one_dim_config().with_max_iterations(6));
        let mut b = OptimizationSession::new(one_dim_config().with_max_iterations(6));
        let ra = a.run(&mut QuadraticEval).await.unwrap();
        let rb = b.run(&mut QuadraticEval).await.unwrap();
        let xs = |r: &SessionReport| -> Vec<f64> {
            r.observations
                .iter()
                .map(|o| o.assignment.get("x").and_then(ParamValue::as_f64).unwrap())
                .collect()
        };
        assert_eq!(xs(&ra), xs(&rb));
    }

    #[tokio::test]
    async fn report_serializes() {
        let mut session = OptimizationSession::new(
            one_dim_config().with_init_points(2).with_max_iterations(2),
        );
        let report = session.run(&mut QuadraticEval).await.unwrap();
        let json = serde_json::to_string(&report).unwrap();
        let back: SessionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.observations.len(), report.observations.len());
        assert_eq!(back.status, report.status);
    }
}
