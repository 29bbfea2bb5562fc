//! Spans for stage and per-image work.
//!
//! Every field recorded after creation is declared up front as
//! `tracing::field::Empty`; recording an undeclared field is silently dropped.

use instant::Instant;
use tracing::field::Empty;
use tracing::{span, Level, Span};
use uuid::Uuid;

/// Span for one pipeline stage
pub struct PipelineSpan {
    span: Span,
    start_time: Instant,
    stage_name: String,
}

impl PipelineSpan {
    pub fn new(stage_name: &str, correlation_id: Option<Uuid>) -> Self {
        let span = span!(
            Level::INFO,
            "pipeline_stage",
            stage = stage_name,
            correlation_id = correlation_id.map(|id| id.to_string()),
            inputs = Empty,
            images = Empty,
            succeeded = Empty,
            failed = Empty,
            skipped = Empty,
            success = Empty,
            execution_time_ms = Empty,
        );

        Self {
            span,
            start_time: Instant::now(),
            stage_name: stage_name.to_string(),
        }
    }

    /// Record which stores the stage reads and how many images it will see
    pub fn record_input(&self, inputs: &[&str], images: usize) {
        let inputs = inputs.join(",");
        self.span.record("inputs", inputs.as_str());
        self.span.record("images", images);
        tracing::debug!(
            parent: &self.span,
            stage = %self.stage_name,
            inputs = %inputs,
            images,
            "Pipeline stage input recorded"
        );
    }

    /// Record stage completion with per-image counts
    pub fn record_completion(&self, succeeded: usize, skipped: usize, failed: usize, success: bool) {
        let duration = self.start_time.elapsed();
        self.span.record("succeeded", succeeded);
        self.span.record("skipped", skipped);
        self.span.record("failed", failed);
        self.span.record("success", success);
        self.span.record("execution_time_ms", duration.as_secs_f64() * 1000.0);

        tracing::info!(
            parent: &self.span,
            stage = %self.stage_name,
            succeeded,
            skipped,
            failed,
            success,
            execution_time_ms = duration.as_millis() as u64,
            "Pipeline stage completed"
        );
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span for the work done on a single image inside a stage
pub struct ImageSpan {
    span: Span,
    start_time: Instant,
}

impl ImageSpan {
    pub fn new(stage_name: &str, image_key: &str, correlation_id: Option<Uuid>) -> Self {
        let span = span!(
            Level::DEBUG,
            "image",
            stage = stage_name,
            image = image_key,
            correlation_id = correlation_id.map(|id| id.to_string()),
            outcome = Empty,
            execution_time_ms = Empty,
        );
        Self {
            span,
            start_time: Instant::now(),
        }
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.span.record("outcome", outcome);
        self.span
            .record("execution_time_ms", self.start_time.elapsed().as_secs_f64() * 1000.0);
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}
