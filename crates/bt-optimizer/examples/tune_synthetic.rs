//! Tune a synthetic strategy end to end.
//!
//! Stands in for the real page-automation evaluator with a closed-form
//! "backtest": a two-parameter profit surface plus auxiliary metrics, so the
//! whole optimizer loop can be watched without a browser attached.
//!
//! Run with: `RUST_LOG=info cargo run --example tune_synthetic`

use anyhow::Result;
use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use bt_optimizer::{
    AcquisitionKind, Assignment, Evaluator, OptimizationSession, OptimizerConfig, ParamValue,
    ParameterSpace,
};
use bt_types::{BtResult, Comparator, Filter, MetricReport};

/// Synthetic backtest: profit peaks at stop_loss = 2.2, fast_length = 12,
/// and the trailing stop adds a flat bonus. Trade count falls off with
/// longer lookbacks, which the feasibility filter pushes against.
struct SyntheticBacktest;

#[async_trait]
impl Evaluator for SyntheticBacktest {
    async fn evaluate(&mut self, assignment: &Assignment) -> BtResult<MetricReport> {
        let stop_loss = assignment
            .get("stop_loss")
            .and_then(ParamValue::as_f64)
            .unwrap_or(1.0);
        let fast_length = assignment
            .get("fast_length")
            .and_then(ParamValue::as_i64)
            .unwrap_or(10) as f64;
        let trailing = assignment
            .get("use_trailing")
            .and_then(ParamValue::as_bool)
            .unwrap_or(false);

        let profit = 1000.0 - 120.0 * (stop_loss - 2.2).powi(2)
            - 8.0 * (fast_length - 12.0).powi(2)
            + if trailing { 75.0 } else { 0.0 };
        let trades = 220.0 - 6.0 * fast_length;

        Ok(MetricReport::from_pairs([
            ("net_profit", profit),
            ("trades", trades),
            ("max_drawdown", -0.08 * stop_loss),
        ]))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let space = ParameterSpace::new()
        .add_continuous("stop_loss", 0.5, 5.0)
        .add_integer("fast_length", 5, 30)
        .add_boolean("use_trailing");

    let config = OptimizerConfig::new(space, "net_profit")
        .with_filters(vec![Filter::new("trades", Comparator::Gte, 60.0)])
        .with_init_points(8)
        .with_max_iterations(30)
        .with_acquisition(AcquisitionKind::Ei)
        .with_seed(42);

    let mut session = OptimizationSession::new(config);
    let report = session.run(&mut SyntheticBacktest).await?;

    println!(
        "finished: {:?} ({:?}) after {} evaluations",
        report.status,
        report.stop_reason,
        report.observations.len()
    );
    match report.best {
        Some(best) => {
            println!("best net_profit: {:.1}", best.target.unwrap_or(f64::NAN));
            let mut names: Vec<_> = best.assignment.keys().collect();
            names.sort();
            for name in names {
                println!("  {name} = {}", best.assignment[name]);
            }
        }
        None => println!("no feasible candidate found"),
    }
    Ok(())
}
