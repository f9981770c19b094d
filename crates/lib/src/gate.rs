//! Session gate: turns "is there a session" into exactly one navigation.
//!
//! Activation consumes the gate, so a gate resolves at most once. Resolution runs on the
//! runtime and can be torn down through the returned [`GateHandle`]; once teardown returns,
//! the navigator is never called.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::config::ResolveStrategy;
use crate::session::{Session, SessionStore};

/// Logical destinations of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Authenticated,
    Unauthenticated,
}

impl Route {
    pub fn for_session(session: Option<&Session>) -> Self {
        match session {
            Some(_) => Route::Authenticated,
            None => Route::Unauthenticated,
        }
    }
}

/// Host routing surface. `current` lets the gate skip a redirect to where the host already is.
pub trait Navigator: Send + Sync {
    fn current(&self) -> Option<Route>;
    fn navigate(&self, route: Route);
}

pub struct SessionGate {
    store: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    strategy: ResolveStrategy,
}

impl SessionGate {
    pub fn new(
        store: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
        strategy: ResolveStrategy,
    ) -> Self {
        Self {
            store,
            navigator,
            strategy,
        }
    }

    /// Resolve the current session. Cache hit short-circuits under `CacheFirst`; otherwise the
    /// store is asked. Store errors are logged and count as "no session".
    pub async fn resolve(&self) -> Option<Session> {
        if self.strategy == ResolveStrategy::CacheFirst {
            if let Some(session) = self.store.cached() {
                log::debug!("session gate: cached session {}", session.id);
                return Some(session);
            }
        }
        match self.store.current().await {
            Ok(session) => session,
            Err(e) => {
                log::warn!("session gate: resolution failed, treating as signed out: {}", e);
                None
            }
        }
    }

    /// Start resolution and navigate once it completes, unless torn down first.
    pub fn activate(self) -> GateHandle {
        let torn_down = Arc::new(Mutex::new(false));
        let flag = torn_down.clone();
        let task = tokio::spawn(async move {
            let session = self.resolve().await;
            let route = Route::for_session(session.as_ref());
            // Held across the check and the navigation so teardown cannot interleave.
            let guard = match flag.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *guard {
                log::debug!("session gate: torn down before resolution, discarding result");
                return None;
            }
            if self.navigator.current() == Some(route) {
                log::debug!("session gate: already at {:?}", route);
                return None;
            }
            log::info!("session gate: navigating to {:?}", route);
            self.navigator.navigate(route);
            drop(guard);
            Some(route)
        });
        GateHandle {
            torn_down,
            task: Some(task),
        }
    }
}

/// Pending gate activation. Dropping it tears the gate down.
pub struct GateHandle {
    torn_down: Arc<Mutex<bool>>,
    task: Option<JoinHandle<Option<Route>>>,
}

impl GateHandle {
    /// Discard any pending result. No navigation happens after this returns.
    pub fn teardown(mut self) {
        self.cancel();
    }

    /// Wait for the activation to finish. Returns the route navigated to, or `None` when
    /// navigation was skipped (already there) or the gate was torn down.
    pub async fn finished(mut self) -> Option<Route> {
        let task = self.task.take()?;
        task.await.ok().flatten()
    }

    fn cancel(&mut self) {
        match self.torn_down.lock() {
            Ok(mut g) => *g = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for GateHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemorySessionStore, SessionError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingNavigator {
        at: Mutex<Option<Route>>,
        calls: Mutex<Vec<Route>>,
    }

    impl RecordingNavigator {
        fn at(route: Route) -> Self {
            Self {
                at: Mutex::new(Some(route)),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Route> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Navigator for RecordingNavigator {
        fn current(&self) -> Option<Route> {
            *self.at.lock().unwrap()
        }

        fn navigate(&self, route: Route) {
            *self.at.lock().unwrap() = Some(route);
            self.calls.lock().unwrap().push(route);
        }
    }

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn current(&self) -> Result<Option<Session>, SessionError> {
            Err(SessionError::Unreachable("connection refused".to_string()))
        }
    }

    /// Answers only after `release` is notified; counts lookups.
    struct SlowStore {
        release: Arc<Notify>,
        lookups: AtomicUsize,
        cache: Option<Session>,
        answer: Option<Session>,
    }

    #[async_trait]
    impl SessionStore for SlowStore {
        fn cached(&self) -> Option<Session> {
            self.cache.clone()
        }

        async fn current(&self) -> Result<Option<Session>, SessionError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(self.answer.clone())
        }
    }

    fn ada() -> Session {
        Session::new("1", "Ada", "Core")
    }

    fn gate(store: Arc<dyn SessionStore>, nav: Arc<RecordingNavigator>) -> SessionGate {
        SessionGate::new(store, nav, ResolveStrategy::AlwaysValidate)
    }

    #[tokio::test]
    async fn session_present_navigates_to_authenticated_once() {
        let nav = Arc::new(RecordingNavigator::default());
        let store = Arc::new(MemorySessionStore::new(Some(ada())));
        let route = gate(store, nav.clone()).activate().finished().await;
        assert_eq!(route, Some(Route::Authenticated));
        assert_eq!(nav.calls(), vec![Route::Authenticated]);
    }

    #[tokio::test]
    async fn no_session_navigates_to_unauthenticated_once() {
        let nav = Arc::new(RecordingNavigator::default());
        let store = Arc::new(MemorySessionStore::default());
        let route = gate(store, nav.clone()).activate().finished().await;
        assert_eq!(route, Some(Route::Unauthenticated));
        assert_eq!(nav.calls(), vec![Route::Unauthenticated]);
    }

    #[tokio::test]
    async fn store_error_fails_toward_unauthenticated() {
        let nav = Arc::new(RecordingNavigator::default());
        let route = gate(Arc::new(FailingStore), nav.clone())
            .activate()
            .finished()
            .await;
        assert_eq!(route, Some(Route::Unauthenticated));
        assert_eq!(nav.calls(), vec![Route::Unauthenticated]);
    }

    #[tokio::test]
    async fn already_at_target_does_not_redirect() {
        let nav = Arc::new(RecordingNavigator::at(Route::Authenticated));
        let store = Arc::new(MemorySessionStore::new(Some(ada())));
        let route = gate(store, nav.clone()).activate().finished().await;
        assert_eq!(route, None);
        assert!(nav.calls().is_empty());
    }

    #[tokio::test]
    async fn teardown_before_resolution_discards_result() {
        let nav = Arc::new(RecordingNavigator::default());
        let release = Arc::new(Notify::new());
        let store = Arc::new(SlowStore {
            release: release.clone(),
            lookups: AtomicUsize::new(0),
            cache: None,
            answer: Some(ada()),
        });
        let handle = gate(store.clone(), nav.clone()).activate();
        tokio::task::yield_now().await;
        handle.teardown();
        release.notify_waiters();
        tokio::task::yield_now().await;
        assert!(nav.calls().is_empty());
    }

    #[tokio::test]
    async fn dropping_handle_tears_down() {
        let nav = Arc::new(RecordingNavigator::default());
        let release = Arc::new(Notify::new());
        let store = Arc::new(SlowStore {
            release: release.clone(),
            lookups: AtomicUsize::new(0),
            cache: None,
            answer: None,
        });
        drop(gate(store, nav.clone()).activate());
        release.notify_waiters();
        tokio::task::yield_now().await;
        assert!(nav.calls().is_empty());
    }

    #[tokio::test]
    async fn cache_first_skips_store_lookup() {
        let nav = Arc::new(RecordingNavigator::default());
        let store = Arc::new(SlowStore {
            release: Arc::new(Notify::new()),
            lookups: AtomicUsize::new(0),
            cache: Some(ada()),
            answer: None,
        });
        let g = SessionGate::new(store.clone(), nav.clone(), ResolveStrategy::CacheFirst);
        assert_eq!(g.activate().finished().await, Some(Route::Authenticated));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(nav.calls(), vec![Route::Authenticated]);
    }

    #[tokio::test]
    async fn always_validate_ignores_cache() {
        let nav = Arc::new(RecordingNavigator::default());
        let release = Arc::new(Notify::new());
        let store = Arc::new(SlowStore {
            release: release.clone(),
            lookups: AtomicUsize::new(0),
            cache: Some(ada()),
            answer: None,
        });
        let handle = gate(store.clone(), nav.clone()).activate();
        while store.lookups.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        release.notify_waiters();
        assert_eq!(handle.finished().await, Some(Route::Unauthenticated));
        assert_eq!(nav.calls(), vec![Route::Unauthenticated]);
    }
}
