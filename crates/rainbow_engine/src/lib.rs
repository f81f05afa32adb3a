pub mod engine;
pub mod error;
pub mod report;

pub use engine::RoutineEngine;
pub use error::EngineError;
pub use report::{BatchFailure, BatchReport, SessionReport, Turn};
