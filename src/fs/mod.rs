//! Contract between the method handlers and a filesystem backend.
//!
//! The handlers only ever talk to a `Box<dyn DavFileSystem>`. Included is
//! one implementation, the in-memory [`memfs`](crate::fs::memfs). External
//! backends implement this trait; they must be safe under concurrent calls
//! for distinct paths, same-path body I/O is serialized by the handler's
//! stream locks.

pub mod memfs;

use std::io;
use std::pin::Pin;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::Stream;
use http::StatusCode;

use crate::davpath::DavPath;

pub type FsResult<T> = Result<T, FsError>;
pub type FsFuture<'a, T> = BoxFuture<'a, FsResult<T>>;
pub type FsStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Lazy sequence of body chunks.
pub type BytesStream = FsStream<io::Result<Bytes>>;

/// Errors the backend can report. The dispatcher maps them onto
/// HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    Exists,
    Forbidden,
    /// Parent is missing or is a file.
    NotACollection,
    /// The request body went quiet past the upload deadline.
    Timeout,
    GeneralFailure,
}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for FsError {}

/// What lives at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Collection,
    Absent,
}

/// Resource metadata. `etag` changes on every content write, `created`
/// is reset on copy destinations.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub len: u64,
    pub is_collection: bool,
    pub etag: String,
    pub created: SystemTime,
    pub modified: SystemTime,
}

impl NodeMeta {
    pub fn is_dir(&self) -> bool {
        self.is_collection
    }

    pub fn is_file(&self) -> bool {
        !self.is_collection
    }
}

/// Inclusive byte range of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Random-access write window. `total` is the announced complete size,
/// missing bytes are zero-filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

/// A dead property. The value is stored as the verbatim XML fragment
/// of the property element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavProp {
    pub name: String,
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    pub xml: Option<Vec<u8>>,
}

impl DavProp {
    /// Namespace + local name, the lookup key of the dead-property store.
    pub(crate) fn key(&self) -> (String, String) {
        (
            self.namespace.clone().unwrap_or_default(),
            self.name.clone(),
        )
    }
}

/// The filesystem trait.
pub trait DavFileSystem: Send + Sync + 'static {
    /// Existence and type in one call.
    fn node_type<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, NodeType>;

    /// Size, type, etag and timestamps. `NotFound` if absent.
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, NodeMeta>;

    /// Create a collection. Missing parent collections are created too.
    fn create_collection<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Remove a file or a whole collection subtree, dead properties included.
    fn remove<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Duplicate a subtree. Dead properties travel along, the destination
    /// gets fresh etags and `created = now`.
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()>;

    /// Move a subtree, atomically with respect to concurrent readers.
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()>;

    /// Child names of a collection, sorted. `NotACollection` on a file.
    fn members<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<String>>;

    /// Stream file content, optionally only a byte range.
    fn read_stream<'a>(
        &'a self,
        path: &'a DavPath,
        range: Option<ByteRange>,
    ) -> FsFuture<'a, BytesStream>;

    /// Store file content from a stream. Without a range the content is
    /// replaced; with a range the window is spliced into the existing
    /// content (zero-padded where needed). Creates the file and missing
    /// parent collections. Returns the new metadata.
    fn write_stream<'a>(
        &'a self,
        path: &'a DavPath,
        body: BytesStream,
        range: Option<WriteRange>,
    ) -> FsFuture<'a, NodeMeta>;

    /// Get one dead property (the stored XML fragment).
    fn get_prop<'a>(&'a self, path: &'a DavPath, prop: DavProp) -> FsFuture<'a, Vec<u8>>;

    /// All dead properties. With `do_content` false only the names are
    /// filled in (PROPFIND `propname`).
    fn get_props<'a>(&'a self, path: &'a DavPath, do_content: bool)
        -> FsFuture<'a, Vec<DavProp>>;

    /// Apply an ordered set of property updates atomically. The per
    /// property result is reported back for the 207 body.
    fn patch_props<'a>(
        &'a self,
        path: &'a DavPath,
        set: Vec<DavProp>,
        remove: Vec<DavProp>,
    ) -> FsFuture<'a, Vec<(StatusCode, DavProp)>>;
}
