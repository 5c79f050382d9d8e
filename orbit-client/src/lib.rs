//! Authenticated transport, the credentials vault, and API discovery.
//!
//! Builds on [`orbit_core`]'s value types to talk to a real cluster.

pub mod client;
pub mod discovery;
pub mod error;
pub mod vault;

pub use client::{ApiClient, Transport};
pub use discovery::{Dimension, Discovery};
pub use error::{Error, Result};
pub use vault::{ConnectionInfo, Vault};
