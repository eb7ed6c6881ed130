//! # Contracts
//!
//! Frozen interface contracts shared by every forwarder crate.
//! Business crates depend on this crate only, never on each other in reverse.
//!
//! ## Data flow
//! - Producers build [`Record`]s and push them into the dispatcher's buffer
//! - The dispatcher hands each record to every matching [`BackendClient`]
//! - Clients answer with a [`DeliveryResult`] that drives slot health

mod backend;
mod blueprint;
mod client;
mod configuration;
mod error;
mod record;

pub use backend::*;
pub use blueprint::*;
pub use client::BackendClient;
pub use configuration::Configuration;
pub use error::*;
pub use record::*;
