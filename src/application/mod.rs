//! Application services: preview rendering, production composition and the
//! job system, wired together by the [`orchestrator`].

pub mod error;
pub mod jobs;
pub mod layout;
pub mod orchestrator;
pub mod preview;
pub mod production;
pub mod render;
pub mod repos;
