pub mod adapter;
pub mod executor;
pub mod orchestrator;

pub use adapter::OrderGateway;
pub use executor::{Authorization, GatewayAuthenticator, GatewayExecutor};
pub use orchestrator::OrderOrchestrator;
