pub mod orchestrator;

pub use orchestrator::DispatchOrchestrator;
