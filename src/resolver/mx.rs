use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::dns::packet::{self, DnsPacket};
use crate::dns::types::RecordType;
use crate::pending::PendingResult;

use super::{Addresses, Exchanges, Resolver};

/// One mail exchange with the addresses it resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MxRecord {
    pub exchange: String,
    pub preference: u16,
    pub addresses: Vec<Ipv4Addr>,
}

enum Lookup {
    Hinted(Vec<Ipv4Addr>),
    Pending(PendingResult<Addresses>),
}

impl Lookup {
    async fn addresses(self, exchange: &str) -> Vec<Ipv4Addr> {
        match self {
            Lookup::Hinted(addrs) => addrs,
            Lookup::Pending(lookup) => match lookup.wait().await {
                Ok(addrs) => addrs.to_vec(),
                // one broken exchange must not sink the others
                Err(e) => {
                    debug!("No addresses for exchange {}: {}", exchange, e);
                    Vec::new()
                }
            },
        }
    }
}

impl Resolver {
    /// Resolve the mail exchanges of `name`, each with its A addresses,
    /// ordered by ascending preference.
    pub fn resolve_mx(&self, name: &str) -> PendingResult<Exchanges> {
        self.resolve_cached(
            name,
            RecordType::MX,
            &self.inner.mx_cache,
            Resolver::resolve_mx,
            |resolver, response| async move { resolver.collect_exchanges(response).await },
        )
    }

    /// Fan out one A lookup per exchange, fan in once all have settled.
    async fn collect_exchanges(&self, response: DnsPacket) -> Exchanges {
        let mut candidates = packet::answer_exchanges(&response);
        candidates.sort_by_key(|(preference, _)| *preference);

        let hints = if self.inner.config.use_additional_hints {
            packet::additional_addresses(&response)
        } else {
            HashMap::new()
        };

        // every lookup is issued before any is awaited
        let lookups: Vec<Lookup> = candidates
            .iter()
            .map(|(_, exchange)| match hints.get(&exchange.to_lowercase()) {
                Some(addrs) => Lookup::Hinted(addrs.clone()),
                None => Lookup::Pending(self.resolve_a(exchange)),
            })
            .collect();
        debug!(
            "{} exchange(s) for {}, {} from additional section",
            candidates.len(),
            response,
            lookups.iter().filter(|l| matches!(l, Lookup::Hinted(_))).count()
        );

        let resolved = join_all(
            lookups
                .into_iter()
                .zip(&candidates)
                .map(|(lookup, (_, exchange))| lookup.addresses(exchange)),
        )
        .await;

        candidates
            .into_iter()
            .zip(resolved)
            .map(|((preference, exchange), addresses)| MxRecord {
                exchange,
                preference,
                addresses,
            })
            .collect()
    }
}
