//! Per-application session state shared by the REST and GraphQL clients.
//!
//! # Design
//! The bearer token and the CSRF token live in a `Session` that the
//! composition root creates and hands to each client. The bearer token sits
//! behind the [`TokenStore`] accessor/mutator trait; the default store is a
//! session-scoped key/value map holding it under [`SESSION_TOKEN_KEY`].
//!
//! The CSRF fetch is single-flight: concurrent first callers wait on the same
//! lock and observe the token fetched by whichever ran first. The REST token
//! refresh is serialized through `refresh_guard` for the same reason.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Key under which the bearer token is kept in [`SessionStorage`].
pub const SESSION_TOKEN_KEY: &str = "auth_token";

/// Reads the current bearer token. Called synchronously on every request.
pub type TokenGetter = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Receives a freshly issued bearer token.
pub type TokenSetter = Arc<dyn Fn(String) + Send + Sync>;

/// Drops the stored bearer token after a failed refresh.
pub type TokenClearer = Arc<dyn Fn() + Send + Sync>;

/// Storage for the bearer token.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, token: &str);
    fn clear(&self);
}

/// Session-scoped string storage. Lives as long as the owning `Session`.
#[derive(Debug, Default)]
pub struct SessionStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    pub fn set_item(&self, key: &str, value: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
    }

    pub fn remove_item(&self, key: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}

impl TokenStore for SessionStorage {
    fn get(&self) -> Option<String> {
        self.get_item(SESSION_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    fn set(&self, token: &str) {
        self.set_item(SESSION_TOKEN_KEY, token);
    }

    fn clear(&self) {
        self.remove_item(SESSION_TOKEN_KEY);
    }
}

/// Lazily fetched CSRF token.
#[derive(Debug, Default)]
pub struct CsrfCache {
    token: Mutex<Option<String>>,
}

impl CsrfCache {
    /// The cached token, if a fetch has completed and no fetch holds the lock.
    pub fn peek(&self) -> Option<String> {
        self.token.try_lock().ok().and_then(|guard| guard.clone())
    }

    /// Return the cached token or run `fetch` once to obtain it.
    ///
    /// A failed or empty fetch leaves the cache empty and yields `None`; the
    /// next caller fetches again.
    pub async fn get_or_fetch<F, Fut, E>(&self, fetch: F) -> Option<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: fmt::Display,
    {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Some(token.clone());
        }

        match fetch().await {
            Ok(token) if !token.is_empty() => {
                debug!("csrf token fetched");
                *guard = Some(token.clone());
                Some(token)
            }
            Ok(_) => {
                warn!("csrf endpoint returned an empty token");
                None
            }
            Err(err) => {
                warn!(error = %err, "csrf token fetch failed");
                None
            }
        }
    }

    /// Forget the cached token so the next caller fetches a new one.
    pub async fn clear(&self) {
        *self.token.lock().await = None;
    }
}

/// Explicit session context owned by the application's composition root.
#[derive(Clone)]
pub struct Session {
    tokens: Arc<dyn TokenStore>,
    csrf: Arc<CsrfCache>,
    refresh: Arc<Mutex<()>>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_store(Arc::new(SessionStorage::new()))
    }

    pub fn with_store(tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            tokens,
            csrf: Arc::new(CsrfCache::default()),
            refresh: Arc::new(Mutex::new(())),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.tokens.get()
    }

    pub fn set_token(&self, token: &str) {
        self.tokens.set(token);
    }

    pub fn clear_token(&self) {
        self.tokens.clear();
    }

    pub fn csrf(&self) -> &CsrfCache {
        &self.csrf
    }

    pub(crate) fn refresh_guard(&self) -> &Mutex<()> {
        &self.refresh
    }

    /// Accessor suitable for the GraphQL auth link.
    pub fn token_getter(&self) -> TokenGetter {
        let tokens = self.tokens.clone();
        Arc::new(move || tokens.get())
    }

    /// Mutator suitable for the GraphQL refresh callback.
    pub fn token_setter(&self) -> TokenSetter {
        let tokens = self.tokens.clone();
        Arc::new(move |token: String| tokens.set(&token))
    }

    /// Clears the stored token; paired with [`Session::token_setter`].
    pub fn token_clearer(&self) -> TokenClearer {
        let tokens = self.tokens.clone();
        Arc::new(move || tokens.clear())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("has_token", &self.tokens.get().is_some())
            .field("csrf", &self.csrf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn storage_keeps_token_under_fixed_key() {
        let storage = SessionStorage::new();
        storage.set("abc");
        assert_eq!(storage.get_item(SESSION_TOKEN_KEY).as_deref(), Some("abc"));
        storage.clear();
        assert!(storage.get().is_none());
    }

    #[test]
    fn empty_token_reads_as_absent() {
        let storage = SessionStorage::new();
        storage.set("");
        assert!(storage.get().is_none());
    }

    #[test]
    fn getter_and_setter_share_the_store() {
        let session = Session::new();
        let get = session.token_getter();
        let set = session.token_setter();
        assert!(get().is_none());
        set("fresh".to_string());
        assert_eq!(get().as_deref(), Some("fresh"));
        assert_eq!(session.token().as_deref(), Some("fresh"));
    }

    #[test]
    fn clearer_drops_the_stored_token() {
        let session = Session::new();
        session.set_token("stale");
        (session.token_clearer())();
        assert!(session.token().is_none());
    }

    #[test]
    fn clones_share_state() {
        let session = Session::new();
        let other = session.clone();
        session.set_token("t1");
        assert_eq!(other.token().as_deref(), Some("t1"));
        other.clear_token();
        assert!(session.token().is_none());
    }

    #[tokio::test]
    async fn csrf_fetch_runs_once_after_success() {
        let cache = CsrfCache::default();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let token = cache
                .get_or_fetch(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("csrf-1".to_string())
                })
                .await;
            assert_eq!(token.as_deref(), Some("csrf-1"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.peek().as_deref(), Some("csrf-1"));
    }

    #[tokio::test]
    async fn csrf_failure_fails_open_and_retries_next_time() {
        let cache = CsrfCache::default();

        let token = cache.get_or_fetch(|| async { Err::<String, _>("boom") }).await;
        assert!(token.is_none());
        assert!(cache.peek().is_none());

        let token = cache
            .get_or_fetch(|| async { Ok::<_, String>("csrf-2".to_string()) })
            .await;
        assert_eq!(token.as_deref(), Some("csrf-2"));
    }

    #[tokio::test]
    async fn cleared_csrf_token_is_fetched_again() {
        let cache = CsrfCache::default();
        cache.get_or_fetch(|| async { Ok::<_, String>("old".to_string()) }).await;

        cache.clear().await;
        assert!(cache.peek().is_none());

        let token = cache
            .get_or_fetch(|| async { Ok::<_, String>("new".to_string()) })
            .await;
        assert_eq!(token.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn concurrent_csrf_fetches_are_deduplicated() {
        let cache = Arc::new(CsrfCache::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_fetch(|| async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            Ok::<_, String>("shared".to_string())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().as_deref(), Some("shared"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
