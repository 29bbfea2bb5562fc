pub mod annotate;
pub mod collection;
pub mod loader;

pub use annotate::*;
pub use collection::*;
pub use loader::*;
