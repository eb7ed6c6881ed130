//! # Client Factory
//!
//! Backend client construction module.
//!
//! Responsibilities:
//! - Build HTTPS, relay-socket and cloud-ingestion senders from a `ForwarderBlueprint`
//! - Classify send outcomes as delivered, retriable or fatal
//! - Compute reconnect backoff
//! - Provide mock clients for dispatcher tests

pub mod backoff;
pub mod cloud;
pub mod error;
pub mod factory;
pub mod http;
pub mod https;
pub mod mock_client;
pub mod relay;

pub use backoff::{Backoff, BackoffConfig};
pub use cloud::CloudIngestSender;
pub use contracts::{BackendClient, BackendKind, ConnectionState, DeliveryResult};
pub use error::{FactoryError, Result};
pub use factory::{ClientFactory, SenderFactory};
pub use https::HttpsSender;
pub use mock_client::{MockBackend, MockBackendClient, MockClientFactory};
pub use relay::{encode_forward_message, RelaySocketSender};
