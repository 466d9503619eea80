//! HTTP surface for job submission and operator control.
//!
//! Thin layer over the orchestrator: handlers translate requests into
//! orchestrator calls and domain errors into JSON error responses. All
//! job state decisions stay in the pipeline crate.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{AppError, AppResult};
pub use response::DataResponse;
pub use router::build_app_router;
pub use state::AppState;
