//! Stage orchestration over file-backed artifact stores.

pub mod builder;
pub mod executor;
pub mod stage;
pub mod store;
pub mod traits;
pub mod types;

pub use builder::*;
pub use stage::*;
pub use store::{ArtifactStore, RunLayout, StoreKind};
pub use traits::*;
pub use types::*;
