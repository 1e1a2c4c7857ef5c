//! Webdav locks and in-flight I/O stream locks.

pub(crate) mod memls;
pub(crate) mod streamls;

use std::time::{Duration, SystemTime};

use xmltree::Element;

use crate::davpath::DavPath;

/// A RFC4918 write lock.
///
/// The token is the identity; everything else except `timeout` and
/// `created` (reset on refresh) is fixed for the lifetime of the lock.
#[derive(Debug, Clone)]
pub struct DavLock {
    pub token: String,
    pub path: DavPath,
    pub principal: Option<String>,
    pub owner: Option<Element>,
    pub timeout: Duration,
    pub created: SystemTime,
    pub shared: bool,
    pub deep: bool,
}

impl DavLock {
    pub(crate) fn is_expired(&self, now: SystemTime) -> bool {
        now > self.created + self.timeout
    }

    /// Does this lock govern an operation on `path`?
    ///
    /// It does iff the lock sits on `path` itself, or on an ancestor
    /// with depth infinity.
    pub(crate) fn covers(&self, path: &DavPath) -> bool {
        self.path == *path || (self.deep && self.path.is_ancestor_of(path))
    }
}
