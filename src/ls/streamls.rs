//! Stream locks: an in-process guard against interleaved body I/O on
//! one path. Not part of RFC4918 — webdav locks authorize clients,
//! stream locks serialize the transfers themselves. Many readers or a
//! single writer; contention is answered with 503 upstream.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::davpath::DavPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamMode {
    Read,
    Write,
}

struct StreamState {
    mode: StreamMode,
    count: u32,
}

/// Table of paths with a body transfer in flight.
#[derive(Default)]
pub(crate) struct StreamLocks {
    table: Mutex<HashMap<String, StreamState>>,
}

impl StreamLocks {
    pub(crate) fn new() -> Arc<StreamLocks> {
        Arc::new(StreamLocks::default())
    }

    /// Try to start a transfer. `Read` joins other readers, `Write`
    /// needs the path idle. The returned guard releases on drop, which
    /// ties the release to every exit path of the transfer, client
    /// disconnects included.
    pub(crate) fn try_acquire(
        self: &Arc<Self>,
        path: &DavPath,
        mode: StreamMode,
    ) -> Option<StreamGuard> {
        let mut table = self.table.lock();
        match table.get_mut(path.as_str()) {
            None => {
                table.insert(path.as_str().to_string(), StreamState { mode, count: 1 });
            }
            Some(state) if state.mode == StreamMode::Read && mode == StreamMode::Read => {
                state.count += 1;
            }
            Some(_) => return None,
        }
        Some(StreamGuard {
            locks: self.clone(),
            path: path.as_str().to_string(),
        })
    }

    fn release(&self, path: &str) {
        let mut table = self.table.lock();
        if let Some(state) = table.get_mut(path) {
            state.count -= 1;
            if state.count == 0 {
                table.remove(path);
            }
        }
    }
}

/// Scoped hold on a stream lock.
pub(crate) struct StreamGuard {
    locks: Arc<StreamLocks>,
    path: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.locks.release(&self.path);
    }
}
