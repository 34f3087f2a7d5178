//! Parallel mode: one goal fanned out into verified lanes

pub mod events;
pub mod lane;
pub mod orchestrator;
pub mod planner;
pub mod scope;
pub mod verifier;

pub use events::{OrchestrationSummary, OrchestratorEvent};
pub use lane::{Lane, LaneStatus, Manifest, ManifestNode};
pub use orchestrator::{Orchestrator, ParallelConfig};
pub use planner::{ModelPlanner, Planner, StaticPlanner};
pub use scope::ScopedBackend;
pub use verifier::{ModelVerifier, Verdict, Verifier, VerifyRequest};
