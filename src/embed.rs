//! Embedding glue: everything around the method engine that a host
//! application usually wants but that is not webdav itself. Basic
//! authentication, CORS, extra response headers, and the two request
//! deadlines (a fixed one for ordinary requests, a progressive one for
//! uploads) are composed here into a single handler chain.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;

use bytes::Buf;
use headers::authorization::Basic;
use headers::{Authorization, HeaderMapExt};
use http::header::{HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::davhandler::{DavBuilder, DavHandler};
use crate::util::{dav_method, DavMethod};

/// Adapter configuration.
#[derive(Clone, Default)]
pub struct DavConfig {
    /// Deadline for non-upload requests.
    pub request_timeout: Option<Duration>,
    /// Inactivity window for PUT bodies; the clock restarts per chunk.
    pub upload_timeout: Option<Duration>,
    /// Upper bound on buffered XML request bodies.
    pub max_request_bytes: Option<usize>,
    /// Lease length for locks without a `Timeout` header.
    pub default_lock_timeout: Option<Duration>,
    /// Basic authentication; `None` means open access.
    pub auth: Option<BasicAuth>,
    /// Cross-origin resource sharing; `None` means no CORS headers.
    pub cors: Option<CorsConfig>,
    /// Extra headers stamped on every response.
    pub custom_headers: Vec<(HeaderName, HeaderValue)>,
}

#[derive(Clone)]
pub struct BasicAuth {
    pub realm: String,
    /// username -> password
    pub users: HashMap<String, String>,
}

#[derive(Clone)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any.
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
    pub credentials: bool,
}

impl DavConfig {
    pub fn new() -> DavConfig {
        DavConfig::default()
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = Some(d);
        self
    }

    pub fn upload_timeout(mut self, d: Duration) -> Self {
        self.upload_timeout = Some(d);
        self
    }

    pub fn max_request_bytes(mut self, max: usize) -> Self {
        self.max_request_bytes = Some(max);
        self
    }

    pub fn default_lock_timeout(mut self, d: Duration) -> Self {
        self.default_lock_timeout = Some(d);
        self
    }

    pub fn auth(mut self, realm: impl Into<String>, users: HashMap<String, String>) -> Self {
        self.auth = Some(BasicAuth {
            realm: realm.into(),
            users,
        });
        self
    }

    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn custom_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.custom_headers.push((name, value));
        self
    }
}

/// A [`DavHandler`] wrapped with the adapter concerns. This is what a
/// host application mounts at a url prefix.
#[derive(Clone)]
pub struct DavServer {
    handler: DavHandler,
    config: DavConfig,
}

impl DavServer {
    /// Wire a configured engine and the adapter config together.
    pub fn new(builder: DavBuilder, config: DavConfig) -> DavServer {
        let mut builder = builder;
        if let Some(max) = config.max_request_bytes {
            builder = builder.max_request_bytes(max);
        }
        if let Some(d) = config.default_lock_timeout {
            builder = builder.default_lock_timeout(d);
        }
        if let Some(d) = config.upload_timeout {
            builder = builder.upload_timeout(d);
        }
        DavServer {
            handler: builder.build(),
            config,
        }
    }

    /// The engine underneath, for direct access.
    pub fn handler(&self) -> &DavHandler {
        &self.handler
    }

    /// Stop background work (the lock-expiry sweeper).
    pub fn close(&self) {
        self.handler.close();
    }

    /// Handle one request: auth, CORS, deadlines, then the engine.
    pub async fn handle<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    {
        let origin = req
            .headers()
            .get("origin")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        // CORS preflights are answered before authentication; they
        // never carry credentials.
        if req.method() == http::Method::OPTIONS
            && origin.is_some()
            && req.headers().contains_key("access-control-request-method")
        {
            if let Some(cors) = &self.config.cors {
                return self.preflight(cors, origin.as_deref().unwrap());
            }
        }

        let principal = match self.authenticate(&req) {
            Ok(p) => p,
            Err(res) => return self.finish(res, origin.as_deref()),
        };

        // uploads get the progressive deadline inside the engine
        // instead of a fixed one around it.
        let is_upload = dav_method(req.method())
            .map(|m| m == DavMethod::Put)
            .unwrap_or(false);

        let fut = self.handler.handle_with(req, None, principal);
        let res = match self.config.request_timeout {
            Some(deadline) if !is_upload => match tokio::time::timeout(deadline, fut).await {
                Ok(res) => res,
                Err(_) => {
                    debug!("request deadline of {deadline:?} passed");
                    let mut res = Response::new(Body::empty());
                    *res.status_mut() = StatusCode::REQUEST_TIMEOUT;
                    res
                }
            },
            _ => fut.await,
        };
        self.finish(res, origin.as_deref())
    }

    // basic auth against the credential map. Ok(principal) passes.
    fn authenticate<B>(&self, req: &Request<B>) -> Result<Option<String>, Response<Body>> {
        let Some(auth) = &self.config.auth else {
            return Ok(None);
        };
        if let Some(Authorization(basic)) = req.headers().typed_get::<Authorization<Basic>>() {
            if auth.users.get(basic.username()).map(|p| p.as_str()) == Some(basic.password()) {
                return Ok(Some(basic.username().to_string()));
            }
        }
        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::UNAUTHORIZED;
        res.headers_mut().insert(
            "WWW-Authenticate",
            format!("Basic realm=\"{}\"", auth.realm).parse().unwrap(),
        );
        Err(res)
    }

    fn preflight(&self, cors: &CorsConfig, origin: &str) -> Response<Body> {
        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        let h = res.headers_mut();
        if let Some(allowed) = allow_origin(cors, origin) {
            h.insert("Access-Control-Allow-Origin", allowed.parse().unwrap());
            if !cors.methods.is_empty() {
                h.insert(
                    "Access-Control-Allow-Methods",
                    cors.methods.join(", ").parse().unwrap(),
                );
            }
            if !cors.headers.is_empty() {
                h.insert(
                    "Access-Control-Allow-Headers",
                    cors.headers.join(", ").parse().unwrap(),
                );
            }
            if cors.credentials {
                h.insert("Access-Control-Allow-Credentials", "true".parse().unwrap());
            }
        }
        res
    }

    // stamp CORS + custom headers onto an outgoing response.
    fn finish(&self, mut res: Response<Body>, origin: Option<&str>) -> Response<Body> {
        if let (Some(cors), Some(origin)) = (&self.config.cors, origin) {
            if let Some(allowed) = allow_origin(cors, origin) {
                res.headers_mut()
                    .insert("Access-Control-Allow-Origin", allowed.parse().unwrap());
                if cors.credentials {
                    res.headers_mut()
                        .insert("Access-Control-Allow-Credentials", "true".parse().unwrap());
                }
            }
        }
        for (name, value) in &self.config.custom_headers {
            res.headers_mut().insert(name.clone(), value.clone());
        }
        res
    }
}

fn allow_origin(cors: &CorsConfig, origin: &str) -> Option<String> {
    if cors.origins.iter().any(|o| o == "*") {
        // with credentials the wildcard must be echoed back literally.
        if cors.credentials {
            return Some(origin.to_string());
        }
        return Some("*".to_string());
    }
    cors.origins
        .iter()
        .find(|o| o.as_str() == origin)
        .map(|o| o.clone())
}
