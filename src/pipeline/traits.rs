use super::store::{ArtifactStore, RunLayout, StoreKind};
use super::types::{ImageRecord, StageReport};
use crate::error::CoreResult;
use crate::Result;
use uuid::Uuid;

/// Name of the collection index inside the collected store.
pub const METADATA_KEY: &str = "metadata";

/// One step of the pipeline: reads named stores, writes exactly one.
pub trait PipelineStage: Send + Sync {
    /// Get the name of this stage for logging/debugging
    fn stage_name(&self) -> &str;

    /// Stores this stage reads from
    fn inputs(&self) -> &[StoreKind];

    /// Store this stage writes
    fn output(&self) -> StoreKind;

    /// Check if per-image work may run on the worker pool
    fn can_parallelize(&self) -> bool {
        true
    }

    /// Run the stage over every collected image.
    ///
    /// Per-image failures belong in the report; an `Err` aborts the pipeline.
    fn execute(&self, ctx: &RunContext) -> Result<StageReport>;
}

/// Shared state handed to every stage of one run.
pub struct RunContext {
    layout: RunLayout,
    overwrite: bool,
    correlation_id: Uuid,
    pool: rayon::ThreadPool,
}

impl RunContext {
    pub fn new(layout: RunLayout, workers: usize, overwrite: bool, correlation_id: Uuid) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("mesoscaler-worker-{}", i))
            .build()?;
        Ok(Self {
            layout,
            overwrite,
            correlation_id,
            pool,
        })
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn store(&self, kind: StoreKind) -> ArtifactStore {
        self.layout.store(kind)
    }

    /// Recompute outputs even when they already exist.
    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `f` on the bounded worker pool.
    pub fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(f)
    }

    /// Images recorded by the collection stage, empty if it has not run.
    pub fn collected_records(&self) -> CoreResult<Vec<ImageRecord>> {
        Ok(self
            .store(StoreKind::Collected)
            .get_json(METADATA_KEY)?
            .unwrap_or_default())
    }
}
