pub mod connector;
pub mod core;

pub use connector::{ConnectionOrchestrator, ConnectorBuilder, RefreshMonitor};
pub use crate::core::{
    config::{ConnectorConfig, Credentials},
    errors::{ConnectorError, ErrorCategory},
    traits::AccountTelemetry,
    types::*,
};
