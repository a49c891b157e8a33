//! Rotation execution: secret generation, the step state machine, and the
//! orchestrator that drives a credential through a full rotation

pub mod generate;
pub mod orchestrator;
pub mod state;

pub use generate::{generate_secret, ComplexityProfile};
pub use orchestrator::Orchestrator;
pub use state::RotationStep;
