pub mod builder;
pub mod discovery;
pub mod monitor;
pub mod normalize;
pub mod orchestrator;
pub mod strategy;

pub use builder::ConnectorBuilder;
pub use discovery::{AccountDiscoveryFlow, Discovery};
pub use monitor::{RefreshMonitor, RefreshStream};
pub use orchestrator::ConnectionOrchestrator;
pub use strategy::NetworkDialer;
