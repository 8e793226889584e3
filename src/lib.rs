//! neko-resolv: asynchronous A/MX resolution over UDP with a single-flight TTL cache.
//!
//! Lookups for the same name share one query, the number of names on the wire
//! is bounded (excess lookups queue FIFO), and responses are matched to their
//! queries by transaction id.

pub mod admission;
pub mod cache;
pub mod config;
pub mod correlator;
pub mod dns;
pub mod error;
pub mod overrides;
pub mod pending;
pub mod resolver;
pub mod transport;

pub use error::ResolveError;
pub use pending::PendingResult;
pub use resolver::{Addresses, Exchanges, MxRecord, Resolver, Seed};
