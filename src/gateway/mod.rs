//! Execution gateway for natural-language queries.
//!
//! A query first goes to the remote analysis backend. When that backend is not
//! configured, unreachable, slow or failing, the gateway asks the code
//! generator for an analysis snippet and runs it in the local sandbox instead.
//! [`ExecutionGateway::try_remote`] and [`ExecutionGateway::run_local`] expose
//! the two stages separately; [`ExecutionGateway::analyze`] drives both.

pub mod client;
pub mod executor;
pub mod prompts;
pub mod sandbox;
pub mod types;

pub use client::{AnalysisBackend, CodeGenerator, HttpAnalysisBackend, OllamaCodeGenerator};
pub use executor::ExecutionGateway;
pub use sandbox::{Sandbox, SandboxSlot};
pub use types::{
    AnalysisOptions, AnalysisRequest, AnalysisResponse, FallbackReason, GatewayConfig,
    GatewayEvent, RemoteStage,
};
