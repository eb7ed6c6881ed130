//! Client Factory 核心实现
//!
//! Builds a fresh [`BackendClient`] per backend kind from the validated
//! configuration. The dispatcher calls it at startup and again after every
//! retriable failure, so a client instance is never reused once it failed.

use std::sync::Arc;

use async_trait::async_trait;
use contracts::{BackendClient, BackendKind, ForwarderBlueprint};
use tracing::{error, info, instrument};

use crate::cloud::CloudIngestSender;
use crate::error::{FactoryError, Result};
use crate::https::HttpsSender;
use crate::relay::RelaySocketSender;

/// Factory seam used by the dispatcher
///
/// Shared between the dispatcher loop and its reconnect tasks.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Build a new client for `kind`
    ///
    /// Connection problems yield a client in the `Failed` state; an error
    /// means the client could not be constructed at all.
    async fn build(&self, kind: BackendKind) -> Result<Box<dyn BackendClient>>;
}

#[async_trait]
impl<F: ClientFactory + ?Sized> ClientFactory for Arc<F> {
    async fn build(&self, kind: BackendKind) -> Result<Box<dyn BackendClient>> {
        (**self).build(kind).await
    }
}

/// Factory producing the real senders
#[derive(Debug, Clone)]
pub struct SenderFactory {
    blueprint: Arc<ForwarderBlueprint>,
}

impl SenderFactory {
    pub fn new(blueprint: Arc<ForwarderBlueprint>) -> Self {
        Self { blueprint }
    }

    pub fn blueprint(&self) -> &ForwarderBlueprint {
        &self.blueprint
    }

    /// Build the HTTPS sender
    ///
    /// # Errors
    /// - Certificate or key unreadable or malformed ([`FactoryError::TlsConfig`])
    #[instrument(name = "client_factory_build_https", skip(self))]
    pub fn build_https_sender(&self) -> Result<HttpsSender> {
        HttpsSender::build(&self.blueprint.https).inspect_err(|e| {
            error!(error = %e, "https sender could not be built");
        })
    }

    /// Build the relay sender
    ///
    /// Non-fatal: an unreachable socket yields a `Failed` sender.
    #[instrument(name = "client_factory_build_relay", skip(self))]
    pub async fn build_relay_socket_sender(&self) -> Result<RelaySocketSender> {
        let settings = self
            .blueprint
            .relay
            .as_ref()
            .ok_or(FactoryError::NotConfigured {
                kind: BackendKind::Relay,
            })?;
        Ok(RelaySocketSender::connect(settings).await)
    }

    /// Build the cloud ingestion sender
    ///
    /// Non-fatal: rejected credentials yield a `Failed` sender.
    #[instrument(name = "client_factory_build_cloud", skip(self))]
    pub async fn build_cloud_ingest_sender(&self) -> Result<CloudIngestSender> {
        let settings = self
            .blueprint
            .cloud
            .as_ref()
            .ok_or(FactoryError::NotConfigured {
                kind: BackendKind::CloudIngest,
            })?;
        CloudIngestSender::connect(settings).await
    }
}

#[async_trait]
impl ClientFactory for SenderFactory {
    async fn build(&self, kind: BackendKind) -> Result<Box<dyn BackendClient>> {
        let client: Box<dyn BackendClient> = match kind {
            BackendKind::Https => Box::new(self.build_https_sender()?),
            BackendKind::Relay => Box::new(self.build_relay_socket_sender().await?),
            BackendKind::CloudIngest => Box::new(self.build_cloud_ingest_sender().await?),
        };
        info!(backend = %kind, state = ?client.state(), "client built");
        Ok(client)
    }
}
