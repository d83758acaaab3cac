//! Ember+ consumer library
//!
//! Connects to a provider over S101-framed TCP, keeps a local cache of the
//! provider's tree, and exposes typed operations on it: directory fetches,
//! path resolution, parameter writes, matrix routing, function invocation
//! and subscriptions.

pub mod config;
pub mod consumer;
pub mod convergence;
pub mod error;
pub mod worker;

pub use config::{ConsumerConfig, DEFAULT_REQUEST_TIMEOUT};
pub use consumer::EmberConsumer;
pub use convergence::Scope;
pub use error::{ConsumerError, ConsumerResult};
pub use worker::ConsumerEvent;
