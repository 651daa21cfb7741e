//! Domain layer types and invariants.

pub mod error;
pub mod intent;
pub mod jobs;
pub mod options;
pub mod page;
pub mod production;
pub mod project;
