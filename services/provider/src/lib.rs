//! Ember+ provider service
//!
//! Serves an authoritative element tree over S101-framed TCP: directory
//! listings, parameter writes, matrix routing, function invocation, and
//! subscription fan-out to every connected consumer.

pub mod config;
pub mod dispatcher;
pub mod loader;
pub mod server;
pub mod subscriptions;

pub use config::{ConfigError, ProviderConfig};
pub use dispatcher::{Dispatcher, FunctionHandler, Outgoing};
pub use loader::{load_tree, parse_tree, LoadError};
pub use server::EmberProvider;
pub use subscriptions::SubscriptionRegistry;
