//! Incremental eigenbasis of patch appearance
//!
//! - [`sklm`]: one Sequential Karhunen-Loeve update step
//! - [`model`]: batched model with scoring, masking and persistence

pub mod model;
pub mod sklm;

pub use model::{BasisUpdate, IncrementalSubspace, SubspaceConfig, SubspaceSnapshot, SubspaceState};
pub use sklm::{sklm, SklmOutput};
