use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{info, warn};

use crate::db::operations::StoreHandle;
use crate::error::DatabaseError;

/// Opens the underlying data-store connection.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<StoreHandle, DatabaseError>;

    /// Printable target for logs. Must not contain credentials.
    fn describe(&self) -> String;
}

type Attempt = Shared<BoxFuture<'static, Result<StoreHandle, DatabaseError>>>;

enum CacheState {
    Idle,
    Connecting { generation: u64, attempt: Attempt },
    Ready(StoreHandle),
}

struct Inner {
    connector: Arc<dyn StoreConnector>,
    timeout: Duration,
    state: Mutex<CacheState>,
    next_generation: AtomicU64,
    attempts: AtomicUsize,
}

/// Lazily connected, memoized handle to the credential store.
///
/// Created once per process and passed to whatever needs the store. The
/// first caller starts a single connection attempt; callers arriving while
/// it is in flight await that same attempt. A failed attempt is not
/// cached, so the next caller starts a fresh one.
#[derive(Clone)]
pub struct ConnectionCache {
    inner: Arc<Inner>,
}

impl ConnectionCache {
    pub fn new(connector: Arc<dyn StoreConnector>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                timeout,
                state: Mutex::new(CacheState::Idle),
                next_generation: AtomicU64::new(0),
                attempts: AtomicUsize::new(0),
            }),
        }
    }

    pub async fn acquire(&self) -> Result<StoreHandle, DatabaseError> {
        // The attempt is installed before the first await so that racing
        // callers always find it.
        let (generation, attempt) = {
            let mut state = self.lock_state();
            let in_flight = match &*state {
                CacheState::Ready(handle) => return Ok(handle.clone()),
                CacheState::Connecting { generation, attempt } => Some((*generation, attempt.clone())),
                CacheState::Idle => None,
            };

            match in_flight {
                Some(pair) => pair,
                None => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let attempt = self.start_attempt();
                    *state = CacheState::Connecting {
                        generation,
                        attempt: attempt.clone(),
                    };
                    (generation, attempt)
                }
            }
        };

        let outcome = attempt.await;

        let mut state = self.lock_state();
        let settles_current = matches!(
            &*state,
            CacheState::Connecting { generation: current, .. } if *current == generation
        );
        if settles_current {
            *state = match &outcome {
                Ok(handle) => CacheState::Ready(handle.clone()),
                Err(_) => CacheState::Idle,
            };
        }

        outcome
    }

    /// True once a handle is cached. Never triggers a connection.
    pub fn is_warm(&self) -> bool {
        matches!(&*self.lock_state(), CacheState::Ready(_))
    }

    /// Number of underlying connection attempts started so far.
    pub fn connect_attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    fn start_attempt(&self) -> Attempt {
        let connector = self.inner.connector.clone();
        let timeout = self.inner.timeout;
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);

        async move {
            let target = connector.describe();
            info!("Connecting to credential store at {}", target);

            match tokio::time::timeout(timeout, connector.connect()).await {
                Ok(Ok(handle)) => {
                    info!("Credential store connected at {}", target);
                    Ok(handle)
                }
                Ok(Err(e)) => {
                    warn!("Credential store connection failed: {}", e);
                    Err(e)
                }
                Err(_) => {
                    warn!("Credential store connection timed out after {:?}", timeout);
                    Err(DatabaseError::StoreUnavailable(format!(
                        "connection attempt exceeded {:?}",
                        timeout
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::operations::MemoryCredentialStore;
    use futures::future::join_all;

    struct ScriptedConnector {
        calls: AtomicUsize,
        latency: Duration,
        failures_before_success: usize,
    }

    impl ScriptedConnector {
        fn new(latency: Duration, failures_before_success: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                latency,
                failures_before_success,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StoreConnector for ScriptedConnector {
        async fn connect(&self) -> Result<StoreHandle, DatabaseError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            if call < self.failures_before_success {
                return Err(DatabaseError::StoreUnavailable("connection refused".into()));
            }
            let handle: StoreHandle = Arc::new(MemoryCredentialStore::new());
            Ok(handle)
        }

        fn describe(&self) -> String {
            "scripted://".to_string()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_acquires_share_one_attempt() {
        let connector = ScriptedConnector::new(Duration::from_secs(2), 0);
        let cache = ConnectionCache::new(connector.clone(), Duration::from_secs(10));

        let results = join_all((0..50).map(|_| cache.acquire())).await;

        assert_eq!(connector.calls(), 1);
        assert_eq!(cache.connect_attempts(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_first_acquires_share_one_attempt() {
        let connector = ScriptedConnector::new(Duration::from_secs(2), 0);
        let cache = ConnectionCache::new(connector.clone(), Duration::from_secs(10));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.acquire().await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_acquire_makes_no_new_attempt() {
        let connector = ScriptedConnector::new(Duration::from_millis(50), 0);
        let cache = ConnectionCache::new(connector.clone(), Duration::from_secs(10));
        assert!(!cache.is_warm());

        let first = cache.acquire().await.unwrap();
        assert!(cache.is_warm());

        for _ in 0..10 {
            let again = cache.acquire().await.unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_all_waiters_and_is_not_cached() {
        let connector = ScriptedConnector::new(Duration::from_millis(500), 1);
        let cache = ConnectionCache::new(connector.clone(), Duration::from_secs(10));

        let results = join_all((0..5).map(|_| cache.acquire())).await;
        assert_eq!(connector.calls(), 1);
        for result in &results {
            assert!(matches!(result, Err(DatabaseError::StoreUnavailable(_))));
        }
        assert!(!cache.is_warm());

        assert!(cache.acquire().await.is_ok());
        assert_eq!(connector.calls(), 2);
        assert!(cache.is_warm());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_connect_fails_with_store_unavailable() {
        let connector = ScriptedConnector::new(Duration::from_secs(60), 0);
        let cache = ConnectionCache::new(connector.clone(), Duration::from_secs(10));

        let started = tokio::time::Instant::now();
        let result = cache.acquire().await;

        assert!(matches!(result, Err(DatabaseError::StoreUnavailable(_))));
        assert!(started.elapsed() < Duration::from_secs(11));
        assert!(!cache.is_warm());
    }
}
