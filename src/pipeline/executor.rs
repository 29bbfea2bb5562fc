//! Per-image fan-out with failure bookkeeping.

use super::traits::RunContext;
use super::types::{FailedImage, StageReport, StageState};
use crate::error::{self, MesoscalerError};
use crate::logging::ImageSpan;
use crate::Result;
use instant::Instant;
use rayon::prelude::*;
use tracing::{debug, error, warn};

/// What happened to one image.
pub enum Step<T> {
    Written(T),
    /// Output was already present and readable.
    Skipped(T),
}

enum Outcome<T> {
    Done(Step<T>),
    Failed(FailedImage),
    Fatal(anyhow::Error),
}

/// Apply `work` to every item, on the pool when `parallel` is set.
///
/// Results come back in input order. Non-fatal errors are recorded and the
/// remaining items still run; the first fatal error is returned.
pub fn process_images<I, T, K, F>(
    ctx: &RunContext,
    stage: &str,
    items: &[I],
    parallel: bool,
    key: K,
    work: F,
) -> Result<(StageReport, Vec<T>)>
where
    I: Sync,
    T: Send,
    K: Fn(&I) -> &str + Sync,
    F: Fn(&I) -> Result<Step<T>> + Sync,
{
    let start = Instant::now();
    let run_one = |item: &I| -> Outcome<T> {
        let image_key = key(item);
        let span = ImageSpan::new(stage, image_key, Some(ctx.correlation_id()));
        let _guard = span.enter();
        match work(item) {
            Ok(step) => {
                span.record_outcome(match step {
                    Step::Written(_) => "written",
                    Step::Skipped(_) => "skipped",
                });
                Outcome::Done(step)
            }
            Err(e) if error::is_fatal(&e) => {
                span.record_outcome("fatal");
                error!(stage, image = image_key, error = %e, "Unrecoverable error");
                Outcome::Fatal(e.context(format!("{} failed on {}", stage, image_key)))
            }
            Err(e) => {
                span.record_outcome("failed");
                let kind = e
                    .downcast_ref::<MesoscalerError>()
                    .map(MesoscalerError::kind)
                    .unwrap_or("Other");
                warn!(stage, image = image_key, kind, error = %e, "Skipping image");
                Outcome::Failed(FailedImage {
                    key: image_key.to_string(),
                    kind: kind.to_string(),
                    message: e.to_string(),
                })
            }
        }
    };

    let outcomes: Vec<Outcome<T>> = if parallel {
        ctx.install(|| items.par_iter().map(&run_one).collect())
    } else {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let outcome = run_one(item);
            let fatal = matches!(outcome, Outcome::Fatal(_));
            out.push(outcome);
            if fatal {
                break;
            }
        }
        out
    };

    let mut report = StageReport::new(stage);
    let mut values = Vec::with_capacity(outcomes.len());
    for (item, outcome) in items.iter().zip(outcomes) {
        match outcome {
            Outcome::Done(Step::Written(v)) => {
                report.succeeded.push(key(item).to_string());
                values.push(v);
            }
            Outcome::Done(Step::Skipped(v)) => {
                report.skipped.push(key(item).to_string());
                values.push(v);
            }
            Outcome::Failed(failed) => report.failed.push(failed),
            Outcome::Fatal(e) => return Err(e),
        }
    }
    report.state = StageState::Completed;
    report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    debug!(
        stage,
        succeeded = report.succeeded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Stage images processed"
    );
    Ok((report, values))
}
