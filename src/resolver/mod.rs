//! Resolver context: caches, admission gate, transaction table and socket,
//! owned by one explicitly constructed value.

mod a;
mod mx;

pub use mx::MxRecord;

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::admission::AdmissionController;
use crate::cache::TtlCache;
use crate::config::ResolverConfig;
use crate::correlator::RequestCorrelator;
use crate::dns::packet::{self, DnsPacket};
use crate::dns::types::RecordType;
use crate::error::ResolveError;
use crate::overrides;
use crate::pending::PendingResult;
use crate::transport::Transport;

/// Addresses of one name, in answer order. Shared, never mutated.
pub type Addresses = Arc<[Ipv4Addr]>;

/// Mail exchanges of one name, ascending preference
pub type Exchanges = Arc<[MxRecord]>;

/// Value for `Resolver::seed`; the variant picks the cache
#[derive(Debug, Clone)]
pub enum Seed {
    A(Vec<Ipv4Addr>),
    Mx(Vec<MxRecord>),
}

struct Inner {
    config: ResolverConfig,
    a_cache: TtlCache<PendingResult<Addresses>>,
    mx_cache: TtlCache<PendingResult<Exchanges>>,
    admission: Arc<AdmissionController>,
    correlator: Arc<RequestCorrelator>,
    transport: Transport,
}

/// Handle to a resolver. Clones share all state.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<Inner>,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let correlator = Arc::new(RequestCorrelator::new());
        let transport = Transport::new(config.bind_address, Arc::clone(&correlator));
        let admission = Arc::new(AdmissionController::new(config.max_waiting));

        info!(
            "Resolver initialized (max_waiting: {}, query timeout: {:?}, resolution timeout: {:?})",
            config.max_waiting,
            config.query_timeout(),
            config.resolution_timeout()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                a_cache: TtlCache::new("A"),
                mx_cache: TtlCache::new("MX"),
                admission,
                correlator,
                transport,
            }),
        })
    }

    /// Register a nameserver; duplicates are ignored
    pub fn add_nameserver(&self, addr: SocketAddr) -> bool {
        self.inner.transport.add_nameserver(addr)
    }

    pub fn nameservers(&self) -> Vec<SocketAddr> {
        self.inner.transport.nameservers()
    }

    /// Put a settled value straight into the A or MX cache.
    /// A negative `ttl_secs` never expires.
    pub fn seed(&self, name: &str, value: Seed, ttl_secs: i64) {
        match value {
            Seed::A(addrs) => {
                self.inner
                    .a_cache
                    .put(name, PendingResult::succeeded(addrs.into()), ttl_secs);
            }
            Seed::Mx(records) => {
                self.inner
                    .mx_cache
                    .put(name, PendingResult::succeeded(records.into()), ttl_secs);
            }
        }
        debug!("Seeded cache entry for {} (ttl: {})", name, ttl_secs);
    }

    /// Seed the MX cache from override text; returns the number of domains
    pub fn load_mx_overrides(&self, text: &str) -> usize {
        let blocks = overrides::parse_mx_overrides(text);
        let count = blocks.len();
        for (domain, records) in blocks {
            self.seed(&domain, Seed::Mx(records), -1);
        }
        info!("Loaded {} static MX override(s)", count);
        count
    }

    /// Drop the socket; the next lookup binds a fresh one
    pub fn unbind(&self) {
        self.inner.transport.unbind();
    }

    pub fn stats(&self) -> serde_json::Value {
        let nameservers: Vec<String> = self.nameservers().iter().map(ToString::to_string).collect();
        serde_json::json!({
            "a_cache_entries": self.inner.a_cache.len(),
            "mx_cache_entries": self.inner.mx_cache.len(),
            "waiting": self.inner.admission.waiting(),
            "queued": self.inner.admission.queued(),
            "max_waiting": self.inner.admission.max_waiting(),
            "outstanding_transactions": self.inner.correlator.len(),
            "socket": self.inner.transport.local_addr().map(|a| a.to_string()),
            "nameservers": nameservers,
        })
    }

    /// Cache check, then admission, then dispatch. Shared by A and MX.
    ///
    /// A denied lookup is parked as a closure that replays `retry` from the
    /// cache check once a slot frees; the caller gets a result right away.
    fn resolve_cached<T, F, Fut>(
        &self,
        name: &str,
        qtype: RecordType,
        cache: &TtlCache<PendingResult<T>>,
        retry: fn(&Resolver, &str) -> PendingResult<T>,
        complete: F,
    ) -> PendingResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Resolver, DnsPacket) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        if let Some(hit) = cache.get(name) {
            debug!("Cache hit for {} {}", name, qtype.name());
            return hit;
        }

        if let Err(e) = Transport::require_runtime() {
            return PendingResult::failed(e);
        }

        let admission = &self.inner.admission;
        if !admission.try_acquire() {
            debug!(
                "Postponing {} {} because already waiting for {} queries",
                name,
                qtype.name(),
                admission.waiting()
            );
            let outer = PendingResult::new();
            let this = self.clone();
            let name = name.to_string();
            admission.enqueue(move || retry(&this, &name), outer.clone());
            // covers a slot freed between the denial and the enqueue
            admission.drain();
            return outer;
        }

        self.dispatch(name, qtype, cache, complete)
    }

    /// Send one query for `name` and cache its result before the answer arrives,
    /// so concurrent callers share the round trip. Holds one admission slot.
    fn dispatch<T, F, Fut>(
        &self,
        name: &str,
        qtype: RecordType,
        cache: &TtlCache<PendingResult<T>>,
        complete: F,
    ) -> PendingResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Resolver, DnsPacket) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let inner = &self.inner;
        debug!("Fulfilling {} {} from network", name, qtype.name());

        let result = PendingResult::new();
        result.arm_timeout(inner.config.resolution_timeout());
        cache.put(name, result.clone(), inner.config.cache_ttl_secs);

        let query = PendingResult::<DnsPacket>::new();
        self.release_when_done(&result, &query);

        let outgoing = match packet::check_name(name) {
            Ok(()) => {
                let id = inner.correlator.next_id();
                match inner
                    .correlator
                    .register(id, query.clone(), inner.config.query_timeout())
                {
                    Ok(()) => Some((id, packet::build_query(0, name, qtype, true))),
                    Err(e) => {
                        query.fail(e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("Refusing to query {} {}: {}", name, qtype.name(), e);
                query.fail(ResolveError::InvalidName(e.to_string()));
                None
            }
        };

        let this = self.clone();
        let settle = result.clone();
        tokio::spawn(async move {
            if let Some((id, packet)) = outgoing {
                if let Err(e) = this.inner.transport.send_query(packet, id).await {
                    this.inner.correlator.cancel(id, e);
                }
            }
            match query.wait().await {
                Ok(response) => {
                    let value = complete(this, response).await;
                    settle.succeed(value);
                }
                Err(e) => {
                    settle.fail(e);
                }
            }
        });

        result
    }

    /// Free the admission slot when the query is answered or the result
    /// settles, whichever comes first, then replay parked lookups.
    fn release_when_done<T>(&self, result: &PendingResult<T>, query: &PendingResult<DnsPacket>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let admission = Arc::clone(&self.inner.admission);
        let result = result.clone();
        let query = query.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = result.wait() => {}
                _ = query.wait() => {}
            }
            admission.release();
            admission.drain();
        });
    }
}
