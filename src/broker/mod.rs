//! Broker seam: the publish/subscribe primitives this runtime consumes.
//!
//! The module is organised around the [`BrokerClient`] trait plus an
//! in-process [`MemoryBroker`] used by tests and local runs.

pub mod client;
pub mod memory;

pub use client::{BrokerClient, BrokerError, MessageStream};
pub use memory::MemoryBroker;
