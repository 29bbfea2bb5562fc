use crate::logging::{get_correlation_id, new_correlation_id, PipelineSpan};
use crate::pipeline::store::{write_atomic, RunLayout, StoreKind};
use crate::pipeline::{PipelineStage, RunContext, RunSummary, StageReport, StageState, StageTime};
use crate::Result;
use instant::Instant;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Builder for the stage sequence of one run
pub struct PipelineBuilder {
    stages: Vec<Box<dyn PipelineStage>>,
    name: String,
    workers: usize,
    overwrite: bool,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            stages: Vec::new(),
            name: name.into(),
            workers: 1,
            overwrite: false,
        }
    }

    /// Add a stage to the pipeline
    pub fn add_stage<S>(mut self, stage: S) -> Self
    where
        S: PipelineStage + 'static,
    {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn add_boxed_stage(mut self, stage: Box<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Size of the per-image worker pool
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Build the pipeline over the stores rooted at `layout`
    pub fn build(self, layout: RunLayout) -> Pipeline {
        Pipeline {
            stages: self.stages,
            name: self.name,
            workers: self.workers,
            overwrite: self.overwrite,
            layout,
        }
    }
}

/// Executable pipeline
pub struct Pipeline {
    stages: Vec<Box<dyn PipelineStage>>,
    name: String,
    workers: usize,
    overwrite: bool,
    layout: RunLayout,
}

impl Pipeline {
    /// Run every stage in order.
    ///
    /// A stage error leaves earlier artifacts in place and aborts the run.
    pub fn run(&self) -> Result<RunSummary> {
        let correlation_id = get_correlation_id().unwrap_or_else(new_correlation_id);

        info!(
            pipeline = %self.name,
            total_stages = self.stages.len(),
            workers = self.workers,
            root = %self.layout.root().display(),
            correlation_id = %correlation_id,
            "Starting pipeline execution"
        );
        self.warn_on_unproduced_inputs();

        let ctx = RunContext::new(self.layout.clone(), self.workers, self.overwrite, correlation_id)?;
        let mut states = vec![StageState::Pending; self.stages.len()];
        let mut reports: Vec<StageReport> = Vec::new();
        let mut stage_timings = Vec::new();

        for (idx, stage) in self.stages.iter().enumerate() {
            let stage_name = stage.stage_name().to_string();
            states[idx] = StageState::Running;

            let pipeline_span = PipelineSpan::new(&stage_name, Some(correlation_id));
            let _span_guard = pipeline_span.enter();
            let start = Instant::now();

            let inputs: Vec<&str> = stage.inputs().iter().map(StoreKind::dir_name).collect();
            let images = ctx.collected_records().map(|r| r.len()).unwrap_or(0);
            pipeline_span.record_input(&inputs, images);

            debug!(
                stage = %stage_name,
                stage_index = idx,
                output = %stage.output(),
                parallel = stage.can_parallelize(),
                "Executing pipeline stage"
            );

            match stage.execute(&ctx) {
                Ok(mut report) => {
                    let duration = start.elapsed().as_secs_f64() * 1000.0;
                    states[idx] = report.state;
                    report.duration_ms = duration;
                    stage_timings.push(StageTime {
                        stage_name: stage_name.clone(),
                        duration_ms: duration,
                    });

                    pipeline_span.record_completion(
                        report.succeeded.len(),
                        report.skipped.len(),
                        report.failed.len(),
                        true,
                    );
                    for failed in &report.failed {
                        warn!(
                            stage = %stage_name,
                            image = %failed.key,
                            kind = %failed.kind,
                            "Image failed"
                        );
                    }
                    reports.push(report);
                }
                Err(e) => {
                    let duration = start.elapsed().as_secs_f64() * 1000.0;
                    states[idx] = StageState::Failed;
                    pipeline_span.record_completion(0, 0, 0, false);

                    error!(
                        stage = %stage_name,
                        duration_ms = duration,
                        error = %e,
                        "Pipeline stage failed"
                    );

                    let mut failed = StageReport::new(stage_name.clone());
                    failed.state = StageState::Failed;
                    failed.duration_ms = duration;
                    reports.push(failed);
                    let summary = self.summary(correlation_id, reports, stage_timings);
                    if let Err(write_err) = self.write_summary(&summary) {
                        warn!(error = %write_err, "Could not write run summary");
                    }
                    return Err(e.context(format!("pipeline '{}' aborted in stage '{}'", self.name, stage_name)));
                }
            }
        }

        let summary = self.summary(correlation_id, reports, stage_timings);
        self.write_summary(&summary)?;

        let total_duration = summary.stage_timings.iter().map(|t| t.duration_ms).sum::<f64>();
        info!(
            pipeline = %self.name,
            total_duration_ms = total_duration,
            stages_executed = summary.stages.len(),
            failed_images = summary.failed_images().len(),
            correlation_id = %correlation_id,
            "Pipeline execution completed successfully"
        );

        Ok(summary)
    }

    /// Get pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get number of stages
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage_name()).collect()
    }

    fn summary(
        &self,
        correlation_id: uuid::Uuid,
        stages: Vec<StageReport>,
        stage_timings: Vec<StageTime>,
    ) -> RunSummary {
        RunSummary {
            pipeline: self.name.clone(),
            correlation_id,
            stages,
            stage_timings,
        }
    }

    fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(summary)?;
        write_atomic(&self.layout.summary_path(), &bytes)?;
        Ok(())
    }

    // Step-by-step runs read stores left by earlier invocations.
    fn warn_on_unproduced_inputs(&self) {
        let mut produced = HashSet::new();
        for stage in &self.stages {
            for input in stage.inputs() {
                let on_disk = self.layout.store(*input).dir().exists();
                if !produced.contains(input) && !on_disk {
                    warn!(
                        stage = %stage.stage_name(),
                        store = %input,
                        "Input store is neither produced earlier nor present"
                    );
                }
            }
            produced.insert(stage.output());
        }
    }
}
