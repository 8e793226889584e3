use crate::dns::packet;
use crate::dns::types::RecordType;
use crate::pending::PendingResult;

use super::{Addresses, Resolver};

impl Resolver {
    /// Resolve `name` to its IPv4 addresses.
    ///
    /// Concurrent calls for the same name share one query and one result.
    /// A failed lookup stays cached as a failure for the cache TTL.
    pub fn resolve_a(&self, name: &str) -> PendingResult<Addresses> {
        self.resolve_cached(
            name,
            RecordType::A,
            &self.inner.a_cache,
            Resolver::resolve_a,
            |_, response| async move { Addresses::from(packet::answer_addresses(&response)) },
        )
    }
}
