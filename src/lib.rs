//! ## Embeddable async Webdav server
//!
//! Webdav (RFC4918) is defined as HTTP (GET/HEAD/PUT/DELETE) plus a
//! bunch of extension methods (PROPFIND, etc). These extension methods
//! are used to manage collections (like unix directories), get
//! information on collections (like unix `ls` or `readdir`), rename and
//! copy items, lock/unlock items, etc.
//!
//! This library is a `handler`: it takes a `http::Request`, processes
//! it, and generates a `http::Response`. It can be mounted inside any
//! host HTTP application at an arbitrary url prefix, as long as the host
//! can hand over requests with the standard types from the `http` and
//! `http_body` crates (hyper does, and most frameworks can convert).
//!
//! ## Backend interfaces.
//!
//! - the library contains a [HTTP handler][DavHandler] implementing
//!   Webdav class 1 and 2: OPTIONS, GET, HEAD, PUT, DELETE, MKCOL,
//!   COPY, MOVE, PROPFIND, PROPPATCH, LOCK and UNLOCK.
//! - you supply a [filesystem][fs::DavFileSystem] for backend storage.
//!   Included is [`FileSystem::Mem`], an ephemeral in-memory filesystem
//!   that supports DAV properties.
//! - locking is built in: an in-memory locksystem with lease expiry
//!   implements the RFC4918 write-lock model, and a separate stream-lock
//!   table serializes concurrent body I/O on the same resource.
//!
//! The [`DavServer`] in [`embed`] wraps the handler with the usual
//! embedding concerns: basic authentication, CORS, custom response
//! headers and request/upload deadlines.
//!
//! ## Example.
//!
//! Example server using hyper that serves an in-memory filesystem in
//! r/w mode.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use dav_engine::{DavHandler, FileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!
//!     let dav_server = DavHandler::builder(FileSystem::Mem).build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle(req).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     println!("Serving on {}", addr);
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod ls;
mod util;
mod xmltree_ext;

pub mod body;
pub mod davpath;
pub mod embed;
pub mod fs;

use crate::errors::{DavError, DavResult};

pub use crate::davhandler::{DavBuilder, DavHandler, FileSystem};
pub use crate::embed::{BasicAuth, CorsConfig, DavConfig, DavServer};
pub use crate::util::{DavMethod, DavMethodSet};
