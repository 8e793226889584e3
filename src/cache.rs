use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// When an entry stops being served
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    Never,
    At(Instant),
}

impl Expiry {
    /// Negative TTL means "never expires" (static overrides)
    pub fn after_secs(ttl_secs: i64) -> Self {
        match u64::try_from(ttl_secs) {
            Ok(secs) => Instant::now()
                .checked_add(Duration::from_secs(secs))
                .map_or(Expiry::Never, Expiry::At),
            Err(_) => Expiry::Never,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(at) => now >= *at,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub expiry: Expiry,
    pub value: V,
}

/// Expiring name -> value store, one instance per record type.
///
/// Expiration is lazy: a stale entry is evicted by the `get` that finds it.
/// Names are case-insensitive.
pub struct TtlCache<V> {
    label: &'static str,
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: DashMap::new(),
        }
    }

    /// Store `value`, replacing whatever was there for `name`
    pub fn put(&self, name: &str, value: V, ttl_secs: i64) {
        self.entries.insert(
            name.to_lowercase(),
            CacheEntry {
                expiry: Expiry::after_secs(ttl_secs),
                value,
            },
        );
    }

    /// Live value for `name`, evicting it first if it has expired
    pub fn get(&self, name: &str) -> Option<V> {
        let key = name.to_lowercase();
        let now = Instant::now();

        if let Some(entry) = self.entries.get(&key) {
            if !entry.expiry.is_expired(now) {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }

        // Expired
        if self.entries.remove_if(&key, |_, e| e.expiry.is_expired(now)).is_some() {
            debug!("Evicted stale {} entry for {}", self.label, key);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_value_lives_until_ttl() {
        let cache = TtlCache::new("A");
        cache.put("example.com", 1u32, 10);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get("example.com"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("example.com"), None);
        assert!(cache.is_empty(), "stale entry should be evicted on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_ttl_never_expires() {
        let cache = TtlCache::new("MX");
        cache.put("example.com", "static", -1);
        tokio::time::advance(Duration::from_secs(365 * 86400)).await;
        assert_eq!(cache.get("example.com"), Some("static"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_is_immediately_absent() {
        let cache = TtlCache::new("A");
        cache.put("example.com", 1u32, 0);
        assert_eq!(cache.get("example.com"), None);
    }

    #[tokio::test]
    async fn test_put_overwrites_and_ignores_case() {
        let cache = TtlCache::new("A");
        cache.put("Example.COM", 1u32, 300);
        cache.put("example.com", 2u32, 300);
        assert_eq!(cache.get("EXAMPLE.com"), Some(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("other.com"), None);
    }
}
