//! In-memory webdav locksystem.
//!
//! Two indexes, `by_token` (primary) and `by_path` (secondary), always
//! mutated inside the same critical section so a lock is either in both
//! or in neither. Expired locks are dropped lazily whenever the state is
//! touched, and by a background sweep every 60 seconds. The sweeper task
//! is started by [`MemLs::new`] and stopped by [`MemLs::close`] (or drop).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;
use xmltree::Element;

use crate::davpath::{is_path_ancestor, DavPath};
use crate::ls::DavLock;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default and ceiling for lock leases, overridable per handler.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// In-memory locksystem implementation.
pub(crate) struct MemLs {
    state: Arc<Mutex<LsState>>,
    shutdown: Arc<Notify>,
}

#[derive(Default)]
struct LsState {
    by_token: HashMap<String, DavLock>,
    by_path: HashMap<String, HashSet<String>>,
}

impl MemLs {
    /// Create the locksystem and start its expiry sweeper.
    ///
    /// Outside of a tokio runtime no sweeper is started and expiry is
    /// purely lazy.
    pub(crate) fn new() -> Arc<MemLs> {
        let state = Arc::new(Mutex::new(LsState::default()));
        let shutdown = Arc::new(Notify::new());
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let state = state.clone();
            let shutdown = shutdown.clone();
            handle.spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.notified() => break,
                        _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                            state.lock().sweep(SystemTime::now());
                        }
                    }
                }
            });
        }
        Arc::new(MemLs { state, shutdown })
    }

    /// Stop the background sweeper.
    pub(crate) fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Try to create a lock. On conflict the blocking lock is returned.
    pub(crate) fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, DavLock> {
        let mut state = self.state.lock();
        state.sweep(SystemTime::now());

        if let Some(blocking) = state.find_conflict(path, shared, deep) {
            return Err(blocking.clone());
        }

        let lock = DavLock {
            token: format!("opaquelocktoken:{}", Uuid::new_v4().hyphenated()),
            path: path.clone(),
            principal: principal.map(|s| s.to_string()),
            owner: owner.cloned(),
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
            created: SystemTime::now(),
            shared,
            deep,
        };
        debug!("lock {} created on {}", lock.token, lock.path);
        state.insert(lock.clone());
        Ok(lock)
    }

    /// Remove a lock. The token must govern `path`.
    pub(crate) fn unlock(&self, path: &DavPath, token: &str) -> Result<(), ()> {
        let mut state = self.state.lock();
        state.sweep(SystemTime::now());
        let applies = state
            .by_token
            .get(token)
            .map(|l| l.covers(path))
            .unwrap_or(false);
        if applies {
            state.remove(token);
            Ok(())
        } else {
            Err(())
        }
    }

    /// Renew the lease: reset `created`, optionally change the timeout.
    pub(crate) fn refresh(
        &self,
        path: &DavPath,
        token: &str,
        timeout: Option<Duration>,
    ) -> Result<DavLock, ()> {
        let mut state = self.state.lock();
        state.sweep(SystemTime::now());
        let lock = state.by_token.get_mut(token).ok_or(())?;
        if !lock.covers(path) {
            return Err(());
        }
        if let Some(timeout) = timeout {
            lock.timeout = timeout;
        }
        lock.created = SystemTime::now();
        debug!("lock {} refreshed", lock.token);
        Ok(lock.clone())
    }

    /// Verify that an operation on `path` is allowed with the submitted
    /// tokens. With `deep` the whole subtree below `path` is validated as
    /// well (DELETE, MOVE source). Returns the first unsatisfied lock.
    pub(crate) fn check(
        &self,
        path: &DavPath,
        deep: bool,
        tokens: &[String],
    ) -> Result<(), DavLock> {
        let mut state = self.state.lock();
        state.sweep(SystemTime::now());
        for lock in state.by_token.values() {
            let relevant = lock.covers(path)
                || (deep && is_path_ancestor(path.as_str(), lock.path.as_str()));
            if relevant && !tokens.iter().any(|t| t == &lock.token) {
                return Err(lock.clone());
            }
        }
        Ok(())
    }

    /// True iff `token` resolves to a live lock governing `path`.
    pub(crate) fn has_valid_token(&self, path: &DavPath, token: &str) -> bool {
        let mut state = self.state.lock();
        state.sweep(SystemTime::now());
        state
            .by_token
            .get(token)
            .map(|l| l.covers(path))
            .unwrap_or(false)
    }

    /// All live locks governing `path`, for `lockdiscovery`.
    pub(crate) fn discover(&self, path: &DavPath) -> Vec<DavLock> {
        let mut state = self.state.lock();
        state.sweep(SystemTime::now());
        state
            .by_token
            .values()
            .filter(|l| l.covers(path))
            .cloned()
            .collect()
    }

    /// Purge every lock on `path` or below. Runs as part of DELETE and
    /// of an overwriting MOVE.
    pub(crate) fn delete_locks(&self, path: &DavPath) {
        let mut state = self.state.lock();
        let doomed: Vec<String> = state
            .by_token
            .values()
            .filter(|l| l.path == *path || is_path_ancestor(path.as_str(), l.path.as_str()))
            .map(|l| l.token.clone())
            .collect();
        for token in doomed {
            debug!("lock {token} removed (resource deleted)");
            state.remove(&token);
        }
    }

    /// MOVE migration: locks sitting exactly on `from` are re-keyed
    /// onto `to`.
    pub(crate) fn move_locks(&self, from: &DavPath, to: &DavPath) {
        let mut state = self.state.lock();
        let tokens: Vec<String> = state
            .by_path
            .get(from.as_str())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for token in tokens {
            if let Some(mut lock) = state.take(&token) {
                debug!("lock {} migrated {} -> {}", lock.token, from, to);
                lock.path = to.clone();
                state.insert(lock);
            }
        }
    }

    #[cfg(test)]
    fn backdate(&self, token: &str, by: Duration) {
        let mut state = self.state.lock();
        let lock = state.by_token.get_mut(token).unwrap();
        lock.created = lock.created.checked_sub(by).unwrap();
    }

    #[cfg(test)]
    fn index_len(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.by_token.len(), state.by_path.len())
    }
}

impl Drop for MemLs {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

impl LsState {
    fn insert(&mut self, lock: DavLock) {
        self.by_path
            .entry(lock.path.as_str().to_string())
            .or_default()
            .insert(lock.token.clone());
        self.by_token.insert(lock.token.clone(), lock);
    }

    fn take(&mut self, token: &str) -> Option<DavLock> {
        let lock = self.by_token.remove(token)?;
        if let Some(set) = self.by_path.get_mut(lock.path.as_str()) {
            set.remove(token);
            if set.is_empty() {
                self.by_path.remove(lock.path.as_str());
            }
        }
        Some(lock)
    }

    fn remove(&mut self, token: &str) {
        self.take(token);
    }

    fn sweep(&mut self, now: SystemTime) {
        let expired: Vec<String> = self
            .by_token
            .values()
            .filter(|l| l.is_expired(now))
            .map(|l| l.token.clone())
            .collect();
        for token in expired {
            debug!("lock {token} expired");
            self.remove(&token);
        }
    }

    // A new lock on `path` conflicts with an existing lock when their
    // scopes overlap, unless both are shared. Overlap goes both ways:
    // the existing lock may cover `path`, or the new deep lock would
    // cover the existing one.
    fn find_conflict(&self, path: &DavPath, shared: bool, deep: bool) -> Option<&DavLock> {
        self.by_token.values().find(|l| {
            if shared && l.shared {
                return false;
            }
            l.covers(path) || (deep && is_path_ancestor(path.as_str(), l.path.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    fn make(ls: &MemLs, path: &str, shared: bool, deep: bool) -> DavLock {
        ls.lock(&p(path), Some("u"), None, None, shared, deep)
            .expect("lock creation")
    }

    #[tokio::test]
    async fn test_exclusive_conflicts() {
        let ls = MemLs::new();
        let l = make(&ls, "/a/x", false, false);
        assert!(ls.lock(&p("/a/x"), None, None, None, false, false).is_err());
        assert!(ls.lock(&p("/a/x"), None, None, None, true, false).is_err());
        // a sibling is fine.
        assert!(ls.lock(&p("/a/y"), None, None, None, false, false).is_ok());
        ls.unlock(&p("/a/x"), &l.token).unwrap();
        assert!(ls.lock(&p("/a/x"), None, None, None, false, false).is_ok());
    }

    #[tokio::test]
    async fn test_shared_coexist() {
        let ls = MemLs::new();
        make(&ls, "/s", true, false);
        assert!(ls.lock(&p("/s"), None, None, None, true, false).is_ok());
        assert!(ls.lock(&p("/s"), None, None, None, false, false).is_err());
    }

    #[tokio::test]
    async fn test_deep_lock_covers_descendants() {
        let ls = MemLs::new();
        let l = make(&ls, "/a", false, true);
        // deny without token, at any depth.
        assert!(ls.check(&p("/a/b/c"), false, &[]).is_err());
        assert!(ls.check(&p("/a/b/c"), false, &[l.token.clone()]).is_ok());
        assert!(ls.has_valid_token(&p("/a/b/c"), &l.token));
        assert!(!ls.has_valid_token(&p("/other"), &l.token));
        // no new exclusive lock may overlap it, from above or below.
        assert!(ls.lock(&p("/a/b"), None, None, None, false, false).is_err());
        assert!(ls.lock(&p("/"), None, None, None, false, true).is_err());
    }

    #[tokio::test]
    async fn test_depth_zero_does_not_cover() {
        let ls = MemLs::new();
        make(&ls, "/a", false, false);
        assert!(ls.check(&p("/a/b"), false, &[]).is_ok());
    }

    #[tokio::test]
    async fn test_deep_check_finds_descendant_locks() {
        let ls = MemLs::new();
        let l = make(&ls, "/dir/leaf", false, false);
        // a subtree operation on /dir must satisfy the leaf lock.
        assert!(ls.check(&p("/dir"), true, &[]).is_err());
        assert!(ls.check(&p("/dir"), true, &[l.token]).is_ok());
    }

    #[tokio::test]
    async fn test_expiry_and_indexes() {
        let ls = MemLs::new();
        let l = make(&ls, "/e", false, false);
        assert_eq!(ls.index_len(), (1, 1));
        ls.backdate(&l.token, DEFAULT_TIMEOUT + Duration::from_secs(1));
        // any access observes the expiry; both indexes drop the lock.
        assert!(!ls.has_valid_token(&p("/e"), &l.token));
        assert_eq!(ls.index_len(), (0, 0));
        assert!(ls.refresh(&p("/e"), &l.token, None).is_err());
    }

    #[tokio::test]
    async fn test_refresh_resets_lease() {
        let ls = MemLs::new();
        let l = make(&ls, "/r", false, false);
        ls.backdate(&l.token, Duration::from_secs(60));
        let renewed = ls
            .refresh(&p("/r"), &l.token, Some(Duration::from_secs(300)))
            .unwrap();
        assert_eq!(renewed.timeout, Duration::from_secs(300));
        assert!(renewed.created > l.created);
    }

    #[tokio::test]
    async fn test_move_migrates_exact_path() {
        let ls = MemLs::new();
        let exact = make(&ls, "/src", false, false);
        let inner = make(&ls, "/src/child", false, false);
        ls.move_locks(&p("/src"), &p("/dst"));
        let moved = ls.discover(&p("/dst"));
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].token, exact.token);
        assert!(ls.discover(&p("/src")).is_empty());
        // the nested lock stays where it was.
        assert!(ls.has_valid_token(&p("/src/child"), &inner.token));
    }

    #[tokio::test]
    async fn test_delete_purges_subtree() {
        let ls = MemLs::new();
        make(&ls, "/d", false, false);
        make(&ls, "/d/a", false, false);
        make(&ls, "/other", false, false);
        ls.delete_locks(&p("/d"));
        assert!(ls.discover(&p("/d")).is_empty());
        assert!(ls.discover(&p("/d/a")).is_empty());
        assert_eq!(ls.discover(&p("/other")).len(), 1);
    }
}
