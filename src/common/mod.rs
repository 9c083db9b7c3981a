//! Shared building blocks: numerical constants, error types and the small
//! set of linear algebra helpers the subspace update relies on.

pub mod constants;
pub mod errors;
pub mod linalg;
