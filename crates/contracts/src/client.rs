//! BackendClient trait - Dispatcher output interface
//!
//! Uniform contract implemented by every sender.

use async_trait::async_trait;

use crate::{BackendKind, ConnectionState, DeliveryResult, Record};

/// Backend client trait
///
/// An instance is owned by exactly one dispatcher slot and is only ever
/// driven from that slot, so implementations need `Send` but not `Sync`.
/// A failed instance is discarded and rebuilt, never repaired in place.
#[async_trait]
pub trait BackendClient: Send {
    /// Backend this client talks to
    fn kind(&self) -> BackendKind;

    /// Connection state derived from the last observed result
    fn state(&self) -> ConnectionState;

    /// Last recorded connect/send error
    fn last_error(&self) -> Option<&str>;

    /// Send one record
    ///
    /// Expected failures are reported through the result, never as a panic.
    async fn send(&mut self, record: &Record) -> DeliveryResult;

    /// Release the underlying connection
    ///
    /// Idempotent: closing twice is a no-op.
    async fn close(&mut self);

    /// Cheap, non-blocking liveness check
    fn is_healthy(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}
