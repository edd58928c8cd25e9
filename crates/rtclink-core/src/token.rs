use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::LinkError;

/// Source of auth tokens, supplied by the host application.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a fresh token. May hit the network.
    async fn load_token(&self) -> Result<String, LinkError>;

    /// The provider's own cached token, if it keeps one.
    fn cached_token(&self) -> Option<String> {
        None
    }
}

/// Wraps a provider and remembers the last token it produced.
pub struct CacheableTokenProvider {
    inner: Arc<dyn TokenProvider>,
    cache: RwLock<Option<String>>,
}

impl CacheableTokenProvider {
    pub fn new(inner: Arc<dyn TokenProvider>) -> Self {
        Self {
            inner,
            cache: RwLock::new(None),
        }
    }

    /// Seed the cache, e.g. with a token handed over at login.
    pub fn with_initial_token(self, token: impl Into<String>) -> Self {
        *self.cache.write().unwrap() = Some(token.into());
        self
    }
}

#[async_trait]
impl TokenProvider for CacheableTokenProvider {
    async fn load_token(&self) -> Result<String, LinkError> {
        let token = self.inner.load_token().await?;
        *self.cache.write().unwrap() = Some(token.clone());
        Ok(token)
    }

    fn cached_token(&self) -> Option<String> {
        self.cache
            .read()
            .unwrap()
            .clone()
            .or_else(|| self.inner.cached_token())
    }
}

/// Everything a transport needs to authenticate a socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub api_key: Option<String>,
    pub user_id: Option<String>,
}

/// What a socket state machine consumes before every connect.
///
/// Implemented by [`TokenManager`] (SFU sockets) and
/// [`crate::credentials::CredentialsManager`] (coordinator socket).
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Returns usable credentials, loading the token first if none is cached.
    async fn ensure_credentials(&self) -> Result<Credentials, LinkError>;

    /// Drops the cached token so the next connect loads a fresh one.
    fn expire(&self);
}

const EMPTY_TOKEN: &str = "";

/// Owns the current auth token and the strategy used to load it.
///
/// Reads never wait on a load. `ensure_token_loaded` callers are serialized,
/// so concurrent callers coalesce onto a single provider call.
pub struct TokenManager {
    token: RwLock<String>,
    provider: RwLock<Option<Arc<dyn TokenProvider>>>,
    /// Bumped on every provider install, under both locks.
    generation: AtomicU64,
    load_lock: Mutex<()>,
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenManager {
    pub fn new() -> Self {
        Self {
            token: RwLock::new(EMPTY_TOKEN.to_string()),
            provider: RwLock::new(None),
            generation: AtomicU64::new(0),
            load_lock: Mutex::new(()),
        }
    }

    /// Install a provider and seed the cached token from the provider's own cache.
    ///
    /// Overwrites whatever token was cached before, even with the empty value.
    pub fn set_provider(&self, provider: Arc<dyn TokenProvider>) {
        let seeded = provider.cached_token().unwrap_or_default();
        tracing::debug!(
            "[token] provider installed, seeded from cache: {}",
            !seeded.is_empty()
        );
        let mut slot = self.provider.write().unwrap();
        let mut token = self.token.write().unwrap();
        *slot = Some(provider);
        *token = seeded;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Load the token only if none is cached.
    pub async fn ensure_token_loaded(&self) -> Result<String, LinkError> {
        if let Some(token) = self.current() {
            return Ok(token);
        }
        let _guard = self.load_lock.lock().await;
        // Another caller may have finished a load while we waited.
        if let Some(token) = self.current() {
            return Ok(token);
        }
        self.load_sync().await
    }

    /// Force a refresh through the provider and cache the result.
    ///
    /// A token loaded from a provider that was replaced mid-load is dropped.
    /// The caller gets the token seeded by the new provider, or a fresh load
    /// from it when it had nothing cached.
    pub async fn load_sync(&self) -> Result<String, LinkError> {
        loop {
            let (provider, generation) = {
                let slot = self.provider.read().unwrap();
                let provider = slot.clone().ok_or(LinkError::NoProviderConfigured)?;
                (provider, self.generation.load(Ordering::SeqCst))
            };
            tracing::debug!("[token] loading token from provider");
            let token = provider.load_token().await?;
            if token.is_empty() {
                return Err(LinkError::TokenLoad(
                    "provider returned an empty token".to_string(),
                ));
            }
            {
                let mut cached = self.token.write().unwrap();
                if self.generation.load(Ordering::SeqCst) == generation {
                    *cached = token.clone();
                    return Ok(token);
                }
                if cached.as_str() != EMPTY_TOKEN {
                    return Ok(cached.clone());
                }
            }
            tracing::debug!("[token] provider replaced during load, reloading");
        }
    }

    /// Replace the cached token directly.
    pub fn update_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap() = token.into();
    }

    pub fn expire_token(&self) {
        tracing::debug!("[token] token expired");
        *self.token.write().unwrap() = EMPTY_TOKEN.to_string();
    }

    pub fn has_token(&self) -> bool {
        self.token.read().unwrap().as_str() != EMPTY_TOKEN
    }

    pub fn token(&self) -> String {
        self.token.read().unwrap().clone()
    }

    fn current(&self) -> Option<String> {
        let token = self.token.read().unwrap();
        (token.as_str() != EMPTY_TOKEN).then(|| token.clone())
    }
}

#[async_trait]
impl CredentialSource for TokenManager {
    async fn ensure_credentials(&self) -> Result<Credentials, LinkError> {
        let token = self.ensure_token_loaded().await?;
        Ok(Credentials {
            token,
            ..Default::default()
        })
    }

    fn expire(&self) {
        self.expire_token();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingTokenProvider;
    use std::time::Duration;

    #[tokio::test]
    async fn load_without_provider_fails() {
        let manager = TokenManager::new();
        assert!(matches!(
            manager.load_sync().await,
            Err(LinkError::NoProviderConfigured)
        ));
        assert!(matches!(
            manager.ensure_token_loaded().await,
            Err(LinkError::NoProviderConfigured)
        ));
        assert!(!manager.has_token());
    }

    #[test]
    fn set_provider_seeds_from_provider_cache() {
        let manager = TokenManager::new();
        let provider = Arc::new(CountingTokenProvider::new("fresh").with_cached("cached"));
        manager.set_provider(provider.clone());
        assert!(manager.has_token());
        assert_eq!(manager.token(), "cached");
        assert_eq!(provider.loads(), 0);
    }

    #[test]
    fn set_provider_overwrites_previous_token() {
        let manager = TokenManager::new();
        manager.update_token("old");
        manager.set_provider(Arc::new(CountingTokenProvider::new("fresh")));
        assert!(!manager.has_token());

        manager.set_provider(Arc::new(
            CountingTokenProvider::new("fresh").with_cached("second"),
        ));
        assert_eq!(manager.token(), "second");
    }

    #[tokio::test]
    async fn ensure_is_noop_when_token_cached() {
        let manager = TokenManager::new();
        let provider = Arc::new(CountingTokenProvider::new("fresh").with_cached("cached"));
        manager.set_provider(provider.clone());
        assert_eq!(manager.ensure_token_loaded().await.unwrap(), "cached");
        assert_eq!(provider.loads(), 0);
    }

    #[tokio::test]
    async fn load_sync_always_refreshes() {
        let manager = TokenManager::new();
        let provider = Arc::new(CountingTokenProvider::new("fresh").with_cached("cached"));
        manager.set_provider(provider.clone());
        assert_eq!(manager.load_sync().await.unwrap(), "fresh-1");
        assert_eq!(manager.load_sync().await.unwrap(), "fresh-2");
        assert_eq!(manager.token(), "fresh-2");
        assert_eq!(provider.loads(), 2);
    }

    #[tokio::test]
    async fn expire_then_ensure_loads_exactly_once() {
        let manager = TokenManager::new();
        let provider = Arc::new(CountingTokenProvider::new("fresh").with_cached("cached"));
        manager.set_provider(provider.clone());

        manager.expire_token();
        assert!(!manager.has_token());

        manager.ensure_token_loaded().await.unwrap();
        manager.ensure_token_loaded().await.unwrap();
        assert_eq!(provider.loads(), 1);
        assert!(manager.has_token());
    }

    #[tokio::test]
    async fn concurrent_ensure_coalesces_into_one_load() {
        let manager = Arc::new(TokenManager::new());
        let provider =
            Arc::new(CountingTokenProvider::new("fresh").with_delay(Duration::from_millis(20)));
        manager.set_provider(provider.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(
                async move { manager.ensure_token_loaded().await },
            ));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "fresh-1");
        }
        assert_eq!(provider.loads(), 1);
    }

    #[tokio::test]
    async fn new_provider_is_used_after_swap() {
        let manager = TokenManager::new();
        let first = Arc::new(CountingTokenProvider::new("first"));
        let second = Arc::new(CountingTokenProvider::new("second"));
        manager.set_provider(first.clone());
        manager.set_provider(second.clone());

        assert_eq!(manager.ensure_token_loaded().await.unwrap(), "second-1");
        assert_eq!(first.loads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn swap_during_load_keeps_the_new_seed() {
        let manager = Arc::new(TokenManager::new());
        let old = Arc::new(CountingTokenProvider::new("old").with_delay(Duration::from_millis(50)));
        manager.set_provider(old.clone());

        let loading = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_token_loaded().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let new = Arc::new(CountingTokenProvider::new("new").with_cached("new-cached"));
        manager.set_provider(new.clone());

        assert_eq!(loading.await.unwrap().unwrap(), "new-cached");
        assert_eq!(manager.token(), "new-cached");
        assert_eq!(old.loads(), 1);
        assert_eq!(new.loads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn swap_to_uncached_provider_reloads_from_it() {
        let manager = Arc::new(TokenManager::new());
        let old = Arc::new(CountingTokenProvider::new("old").with_delay(Duration::from_millis(50)));
        manager.set_provider(old.clone());

        let loading = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.load_sync().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let new = Arc::new(CountingTokenProvider::new("new"));
        manager.set_provider(new.clone());

        assert_eq!(loading.await.unwrap().unwrap(), "new-1");
        assert_eq!(manager.token(), "new-1");
        assert_eq!(new.loads(), 1);
    }

    struct BlankProvider;

    #[async_trait]
    impl TokenProvider for BlankProvider {
        async fn load_token(&self) -> Result<String, LinkError> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn empty_token_is_a_load_error() {
        let manager = TokenManager::new();
        manager.set_provider(Arc::new(BlankProvider));
        let err = manager.ensure_token_loaded().await.unwrap_err();
        assert!(matches!(err, LinkError::TokenLoad(msg) if msg.contains("empty token")));
        assert!(!manager.has_token());
    }

    #[tokio::test]
    async fn cacheable_provider_remembers_last_token() {
        let inner = Arc::new(CountingTokenProvider::new("fresh"));
        let cacheable = Arc::new(CacheableTokenProvider::new(inner).with_initial_token("login"));
        assert_eq!(cacheable.cached_token().as_deref(), Some("login"));

        cacheable.load_token().await.unwrap();
        assert_eq!(cacheable.cached_token().as_deref(), Some("fresh-1"));

        let manager = TokenManager::new();
        manager.set_provider(cacheable);
        assert_eq!(manager.token(), "fresh-1");
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let manager = TokenManager::new();
        manager.set_provider(Arc::new(CountingTokenProvider::failing("offline")));
        let err = manager.ensure_token_loaded().await.unwrap_err();
        assert!(matches!(err, LinkError::TokenLoad(msg) if msg == "offline"));
        assert!(!manager.has_token());
    }
}
