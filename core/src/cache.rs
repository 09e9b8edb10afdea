//! TTL cache decorator for the rule store.
//!
//! Serves the read-heavy per-request lookup path from memory: individual
//! rules are cached by id (including negative entries for unknown ids, so a
//! burst of requests for an absent host does not hammer the store), and a
//! reserved marker records that a complete list-all result is in the cache.
//! The marker expires strictly before the entries it summarizes, which is
//! what makes serving list-all from the cache sound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;

use crate::error::Result;
use crate::proxy::{
    CreateProxyOptions, ListProxiesOptions, ListProxiesPage, Proxy, ProxyService,
};

/// Default entry lifetime.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(15);

/// Reserved key for the all-listed marker.
const KEY_ALL: &str = "_all_";

/// How much earlier than regular entries the marker expires.
const MARKER_MARGIN: Duration = Duration::from_secs(1);

const CAPACITY: u64 = 10_000;

/// `None` is a negative entry; under [`KEY_ALL`] it is the marker.
type CacheEntry = Option<Proxy>;

struct ProxyExpiry {
    expiration: Duration,
}

impl Expiry<String, CacheEntry> for ProxyExpiry {
    fn expire_after_create(
        &self,
        key: &String,
        _value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        if key == KEY_ALL {
            Some(self.expiration - MARKER_MARGIN)
        } else {
            Some(self.expiration)
        }
    }
}

/// The marker must outlive nothing: entries created alongside it expire
/// after it does. An expiration at or below the margin would break that.
fn effective_expiration(expiration: Duration) -> Duration {
    if expiration > MARKER_MARGIN {
        expiration
    } else {
        DEFAULT_EXPIRATION
    }
}

/// Caching [`ProxyService`] decorator.
pub struct CacheProxyService {
    next: Arc<dyn ProxyService>,
    cache: Cache<String, CacheEntry>,
}

impl CacheProxyService {
    pub fn new(next: Arc<dyn ProxyService>, expiration: Duration) -> Self {
        let expiration = effective_expiration(expiration);
        let cache = Cache::builder()
            .max_capacity(CAPACITY)
            .expire_after(ProxyExpiry { expiration })
            .build();
        Self { next, cache }
    }

    /// Every non-negative entry currently cached, oldest first.
    fn cached_proxies(&self) -> Vec<Proxy> {
        let mut proxies: Vec<Proxy> = self
            .cache
            .iter()
            .filter(|(key, _)| key.as_str() != KEY_ALL)
            .filter_map(|(_, entry)| entry)
            .collect();
        proxies.sort_by(|a, b| {
            a.create_time
                .cmp(&b.create_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        proxies
    }
}

#[async_trait]
impl ProxyService for CacheProxyService {
    async fn create_proxy(&self, proxy: Proxy, opts: CreateProxyOptions) -> Result<Proxy> {
        let created = self.next.create_proxy(proxy, opts).await?;
        self.cache
            .insert(created.id.clone(), Some(created.clone()))
            .await;
        Ok(created)
    }

    async fn list_proxies(&self, opts: ListProxiesOptions) -> Result<ListProxiesPage> {
        if !opts.proxy_id.is_empty() {
            if let Some(entry) = self.cache.get(&opts.proxy_id).await {
                let proxies = match entry {
                    Some(proxy) => vec![proxy],
                    None => Vec::new(),
                };
                return Ok(ListProxiesPage {
                    proxies,
                    next_page_token: String::new(),
                });
            }

            let page = self.next.list_proxies(opts.clone()).await?;
            if page.proxies.is_empty() {
                self.cache.insert(opts.proxy_id.clone(), None).await;
            } else {
                for proxy in &page.proxies {
                    self.cache
                        .insert(proxy.id.clone(), Some(proxy.clone()))
                        .await;
                }
            }
            return Ok(page);
        }

        // List-all. The marker only ever describes complete results, so a
        // continuation request always goes to the store.
        if opts.page_token.is_empty() && self.cache.get(&KEY_ALL.to_string()).await.is_some() {
            return Ok(ListProxiesPage {
                proxies: self.cached_proxies(),
                next_page_token: String::new(),
            });
        }

        let page = self.next.list_proxies(opts.clone()).await?;
        for proxy in &page.proxies {
            self.cache
                .insert(proxy.id.clone(), Some(proxy.clone()))
                .await;
        }
        if opts.page_token.is_empty() && page.next_page_token.is_empty() {
            self.cache.insert(KEY_ALL.to_string(), None).await;
        }

        Ok(page)
    }

    async fn delete_proxy(&self, proxy_id: &str) -> Result<()> {
        self.next.delete_proxy(proxy_id).await?;
        self.cache.invalidate(&proxy_id.to_string()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct StubStore {
        proxies: Mutex<Vec<Proxy>>,
        list_calls: AtomicUsize,
        paginate: bool,
    }

    impl StubStore {
        fn new() -> Self {
            Self {
                proxies: Mutex::new(Vec::new()),
                list_calls: AtomicUsize::new(0),
                paginate: false,
            }
        }

        fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProxyService for StubStore {
        async fn create_proxy(
            &self,
            mut proxy: Proxy,
            _opts: CreateProxyOptions,
        ) -> Result<Proxy> {
            proxy.create_time = Some(crate::store::now_second_truncated());
            self.proxies.lock().await.push(proxy.clone());
            Ok(proxy)
        }

        async fn list_proxies(&self, opts: ListProxiesOptions) -> Result<ListProxiesPage> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let proxies = self.proxies.lock().await;
            let matched: Vec<Proxy> = proxies
                .iter()
                .filter(|p| opts.proxy_id.is_empty() || p.id == opts.proxy_id)
                .cloned()
                .collect();
            let next_page_token = if self.paginate {
                "1000".to_string()
            } else {
                String::new()
            };
            Ok(ListProxiesPage {
                proxies: matched,
                next_page_token,
            })
        }

        async fn delete_proxy(&self, proxy_id: &str) -> Result<()> {
            self.proxies.lock().await.retain(|p| p.id != proxy_id);
            Ok(())
        }
    }

    fn proxy(id: &str) -> Proxy {
        Proxy {
            id: id.to_string(),
            user: "u".to_string(),
            host: "h:22".to_string(),
            private_key: None,
            passphrase: None,
            password: Some("p".to_string()),
            node: "n".to_string(),
            port: 80,
            create_time: None,
            update_time: None,
        }
    }

    fn setup() -> (Arc<StubStore>, CacheProxyService) {
        let store = Arc::new(StubStore::new());
        let cached = CacheProxyService::new(store.clone(), DEFAULT_EXPIRATION);
        (store, cached)
    }

    fn by_id(id: &str) -> ListProxiesOptions {
        ListProxiesOptions {
            proxy_id: id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_writes_through() {
        let (store, cached) = setup();
        cached
            .create_proxy(proxy("a"), CreateProxyOptions::default())
            .await
            .unwrap();

        let page = cached.list_proxies(by_id("a")).await.unwrap();
        assert_eq!(page.proxies.len(), 1);
        assert_eq!(store.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_negative_entry_suppresses_repeat_misses() {
        let (store, cached) = setup();

        for _ in 0..3 {
            let page = cached.list_proxies(by_id("absent")).await.unwrap();
            assert!(page.proxies.is_empty());
        }
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_miss_fills_from_store() {
        let (store, cached) = setup();
        store
            .create_proxy(proxy("a"), CreateProxyOptions::default())
            .await
            .unwrap();

        let page = cached.list_proxies(by_id("a")).await.unwrap();
        assert_eq!(page.proxies.len(), 1);
        cached.list_proxies(by_id("a")).await.unwrap();
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_delete_invalidates_entry() {
        let (store, cached) = setup();
        cached
            .create_proxy(proxy("a"), CreateProxyOptions::default())
            .await
            .unwrap();

        cached.delete_proxy("a").await.unwrap();
        let page = cached.list_proxies(by_id("a")).await.unwrap();
        assert!(page.proxies.is_empty());
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_list_all_served_from_marker() {
        let (store, cached) = setup();
        for id in ["a", "b"] {
            store
                .create_proxy(proxy(id), CreateProxyOptions::default())
                .await
                .unwrap();
        }

        let first = cached
            .list_proxies(ListProxiesOptions::default())
            .await
            .unwrap();
        assert_eq!(first.proxies.len(), 2);

        let second = cached
            .list_proxies(ListProxiesOptions::default())
            .await
            .unwrap();
        assert_eq!(second.proxies.len(), 2);
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_created_rule_visible_in_cached_list_all() {
        let (_store, cached) = setup();
        cached
            .list_proxies(ListProxiesOptions::default())
            .await
            .unwrap();
        cached
            .create_proxy(proxy("late"), CreateProxyOptions::default())
            .await
            .unwrap();

        let page = cached
            .list_proxies(ListProxiesOptions::default())
            .await
            .unwrap();
        assert!(page.proxies.iter().any(|p| p.id == "late"));
    }

    #[tokio::test]
    async fn test_incomplete_listing_never_sets_marker() {
        let store = Arc::new(StubStore {
            paginate: true,
            ..StubStore::new()
        });
        let cached = CacheProxyService::new(store.clone(), DEFAULT_EXPIRATION);

        cached
            .list_proxies(ListProxiesOptions::default())
            .await
            .unwrap();
        cached
            .list_proxies(ListProxiesOptions::default())
            .await
            .unwrap();
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_continuation_requests_bypass_marker() {
        let (store, cached) = setup();
        cached
            .list_proxies(ListProxiesOptions::default())
            .await
            .unwrap();

        cached
            .list_proxies(ListProxiesOptions {
                page_token: "1000".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.list_calls(), 2);
    }

    #[test]
    fn test_marker_expires_before_entries() {
        let expiry = ProxyExpiry {
            expiration: DEFAULT_EXPIRATION,
        };
        let now = Instant::now();
        let marker = expiry.expire_after_create(&KEY_ALL.to_string(), &None, now);
        let entry = expiry.expire_after_create(&"x".to_string(), &None, now);
        assert!(marker.unwrap() < entry.unwrap());
    }

    #[test]
    fn test_tiny_expiration_falls_back_to_default() {
        assert_eq!(
            effective_expiration(Duration::from_millis(500)),
            DEFAULT_EXPIRATION
        );
        assert_eq!(
            effective_expiration(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }
}
