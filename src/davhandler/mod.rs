//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Buf;
use futures_util::stream::Stream;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{Body, StreamBody};
use crate::conditional::if_match_get_tokens;
use crate::davpath::DavPath;
use crate::fs::memfs::MemFs;
use crate::fs::DavFileSystem;
use crate::ls::memls::MemLs;
use crate::ls::streamls::StreamLocks;
use crate::util::{dav_method, DavMethod, DavMethodSet};

use crate::errors::DavError;
use crate::DavResult;

pub mod handle_copymove;
pub mod handle_delete;
pub mod handle_gethead;
pub mod handle_lock;
pub mod handle_mkcol;
pub mod handle_options;
pub mod handle_props;
pub mod handle_put;

/// Upper bound on a buffered XML request body (PROPFIND, PROPPATCH, LOCK).
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Filesystem backend.
    fs: FileSystem,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Principal is webdav speak for "user", used to give locks an owner.
    principal: Option<String>,
    /// Maximum size of a buffered XML request body.
    max_request_bytes: usize,
    /// Lease length for locks that don't ask for a timeout.
    default_lock_timeout: Duration,
    /// Inactivity window of a PUT body; `None` disables the deadline.
    upload_timeout: Option<Duration>,
}

/// File system backend.
#[derive(Clone)]
pub enum FileSystem {
    /// The built-in ephemeral in-memory filesystem.
    Mem,
    /// Any other implementation of the [`DavFileSystem`] contract.
    Other(Arc<dyn DavFileSystem>),
}

impl FileSystem {
    fn build(self) -> Arc<dyn DavFileSystem> {
        match self {
            FileSystem::Mem => MemFs::new(),
            FileSystem::Other(fs) => fs,
        }
    }
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(fs: FileSystem) -> DavBuilder {
        Self {
            prefix: String::new(),
            fs,
            allow: DavMethodSet::all(),
            principal: None,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            default_lock_timeout: Duration::from_secs(120),
            upload_timeout: None,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    ///
    /// This also starts the lock-expiry sweeper, so call it from within
    /// an async runtime and pair it with [`DavHandler::close`].
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a filesystem path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Set the name of the "webdav principal". This will be the owner of
    /// any created locks.
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Maximum size of a buffered XML request body.
    pub fn max_request_bytes(self, max: usize) -> Self {
        let mut this = self;
        this.max_request_bytes = max;
        this
    }

    /// Lease length of locks created without a `Timeout` header.
    pub fn default_lock_timeout(self, timeout: Duration) -> Self {
        let mut this = self;
        this.default_lock_timeout = timeout;
        this
    }

    /// Progressive inactivity deadline on uploads.
    pub fn upload_timeout(self, timeout: Duration) -> Self {
        let mut this = self;
        this.upload_timeout = Some(timeout);
        this
    }
}

/// The webdav handler struct.
///
/// The `builder` and `build` etc methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) fs: Arc<dyn DavFileSystem>,
    pub(crate) ls: Arc<MemLs>,
    pub(crate) streams: Arc<StreamLocks>,
    pub(crate) allow: DavMethodSet,
    pub(crate) principal: Option<Arc<String>>,
    pub(crate) max_request_bytes: usize,
    pub(crate) default_lock_timeout: Duration,
    pub(crate) upload_timeout: Option<Duration>,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            fs: cfg.fs.build(),
            ls: MemLs::new(),
            streams: StreamLocks::new(),
            allow: cfg.allow,
            principal: cfg.principal.map(Arc::new),
            max_request_bytes: cfg.max_request_bytes,
            default_lock_timeout: cfg.default_lock_timeout,
            upload_timeout: cfg.upload_timeout,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(fs: FileSystem) -> DavBuilder {
        DavBuilder::new(fs)
    }

    /// Stop the background lock-expiry sweeper. The handler itself
    /// stays usable, expiry becomes lazy.
    pub fn close(&self) {
        self.ls.close();
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// For example, the `principal` can be set for this request.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        if let Some(principal) = principal {
            this.principal = Some(Arc::new(principal));
        }
        this.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    /// Used with webserver frameworks that have not
    /// opted to use the `http_body` crate just yet.
    #[doc(hidden)]
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>> + Send + 'static,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }
}

impl DavHandler {
    // helper.
    pub(crate) async fn has_parent<'a>(&'a self, path: &'a DavPath) -> bool {
        let p = path.parent();
        self.fs
            .metadata(&p)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavPath {
        // This never fails (has been checked before)
        DavPath::from_uri_and_prefix(req.uri(), &self.prefix).unwrap()
    }

    // Harvest lock tokens from the If/Lock-Token headers, enforce the If
    // preconditions, and verify the operation against the locksystem.
    // `deep` extends the check to the whole subtree (DELETE, MOVE source).
    pub(crate) async fn check_locks(
        &self,
        req: &Request<()>,
        path: &DavPath,
        deep: bool,
    ) -> DavResult<Vec<String>> {
        let tokens = if_match_get_tokens(req, path, &self.prefix, &self.fs, &self.ls).await?;
        if let Err(lock) = self.ls.check(path, deep, &tokens) {
            debug!("access to {path} denied by lock {}", lock.token);
            return Err(DavError::Status(StatusCode::LOCKED));
        }
        Ok(tokens)
    }

    // drain request body and return it as a buffer.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::BAD_REQUEST.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = Response::builder();
                if let Some(secs) = err.retry_after() {
                    resp = resp.header("Retry-After", secs.to_string());
                }
                resp = resp.header("Content-Length", "0").status(err.statuscode());
                if err.must_close() {
                    resp = resp.header("connection", "close");
                }
                resp.body(Body::empty()).unwrap()
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.includes(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;

        // PUT is the only handler that streams the body. All the other
        // handlers either expect no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = match method {
            DavMethod::Put => (Some(body), Vec::new()),
            _ => (
                None,
                self.read_request(body, self.max_request_bytes).await?,
            ),
        };

        // Not all methods accept a body.
        if !DavMethodSet::WEBDAV_BODY.includes(method) && !body_data.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {:?} {}", method, path);

        match method {
            DavMethod::Options => self.handle_options(&req).await,
            DavMethod::PropFind => self.handle_propfind(&req, &body_data).await,
            DavMethod::PropPatch => self.handle_proppatch(&req, &body_data).await,
            DavMethod::MkCol => self.handle_mkcol(&req).await,
            DavMethod::Delete => self.handle_delete(&req).await,
            DavMethod::Lock => self.handle_lock(&req, &body_data).await,
            DavMethod::Unlock => self.handle_unlock(&req).await,
            DavMethod::Head | DavMethod::Get => self.handle_get(&req).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(&req, method).await,
            DavMethod::Put => self.handle_put(&req, body_strm.unwrap()).await,
        }
    }
}
