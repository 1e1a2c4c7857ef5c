//! Definitions for the Request and Response bodies.

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes};
use futures_util::stream::{BoxStream, Stream};
use http::header::HeaderMap;
use http_body::Body as HttpBody;
use tokio::time::{Instant, Sleep};

use pin_project::pin_project;
use pin_utils::pin_mut;

use crate::fs::BytesStream;

/// Body is returned by the webdav handler, and implements both `Stream`
/// and `http_body::Body`.
pub struct Body {
    pub(crate) inner: BodyType,
}

pub(crate) enum BodyType {
    Bytes(Option<Bytes>),
    Stream(BoxStream<'static, Result<Bytes, io::Error>>),
}

impl Body {
    /// Return an empty body.
    pub fn empty() -> Body {
        Body {
            inner: BodyType::Bytes(None),
        }
    }
    /// Create a body from a stream.
    pub fn stream(stream: impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static) -> Body {
        Body {
            inner: BodyType::Stream(Box::pin(stream)),
        }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match &mut self.inner {
            BodyType::Bytes(bytes) => Poll::Ready(bytes.take().map(Ok)),
            BodyType::Stream(stream) => {
                pin_mut!(stream);
                stream.poll_next(cx)
            }
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        self.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }
}

impl From<String> for Body {
    fn from(t: String) -> Body {
        Body {
            inner: BodyType::Bytes(Some(Bytes::from(t))),
        }
    }
}

impl From<&str> for Body {
    fn from(t: &str) -> Body {
        Body {
            inner: BodyType::Bytes(Some(Bytes::from(t.to_string()))),
        }
    }
}

impl From<Bytes> for Body {
    fn from(t: Bytes) -> Body {
        Body {
            inner: BodyType::Bytes(Some(t)),
        }
    }
}

// A struct that contains a Stream, and implements http_body::Body.
#[pin_project]
pub(crate) struct StreamBody<B> {
    #[pin]
    body: B,
}

impl<ReqBody, ReqData, ReqError> HttpBody for StreamBody<ReqBody>
where
    ReqData: Buf + Send,
    ReqError: StdError + Send + Sync + 'static,
    ReqBody: Stream<Item = Result<ReqData, ReqError>>,
{
    type Data = ReqData;
    type Error = ReqError;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        let this = self.project();
        this.body.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }
}

impl<ReqBody, ReqData, ReqError> StreamBody<ReqBody>
where
    ReqData: Buf + Send,
    ReqError: StdError + Send + Sync + 'static,
    ReqBody: Stream<Item = Result<ReqData, ReqError>>,
{
    pub fn new(body: ReqBody) -> StreamBody<ReqBody> {
        StreamBody { body }
    }
}

/// Turn a request `http_body::Body` into the chunk stream the
/// filesystem consumes. Transport errors surface as `UnexpectedEof`.
pub(crate) fn request_body_stream<ReqBody, ReqData, ReqError>(body: ReqBody) -> BytesStream
where
    ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    ReqData: Buf + Send + 'static,
    ReqError: StdError + Send + Sync + 'static,
{
    Box::pin(async_stream::stream! {
        pin_mut!(body);
        while let Some(res) = body.data().await {
            match res {
                Ok(mut buf) => {
                    while buf.has_remaining() {
                        let chunk = Bytes::copy_from_slice(buf.chunk());
                        buf.advance(chunk.len());
                        yield Ok(chunk);
                    }
                }
                Err(_) => {
                    yield Err(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"));
                    return;
                }
            }
        }
    })
}

/// A chunk stream with a progressive inactivity deadline: the timer is
/// re-armed on every chunk, so a slow but moving upload survives while
/// a stalled one is cut off with `TimedOut`.
#[pin_project]
pub(crate) struct TimeoutStream<S> {
    #[pin]
    stream: S,
    #[pin]
    sleep: Sleep,
    window: Duration,
}

impl<S> TimeoutStream<S> {
    pub(crate) fn new(stream: S, window: Duration) -> TimeoutStream<S> {
        TimeoutStream {
            stream,
            sleep: tokio::time::sleep(window),
            window,
        }
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        match this.stream.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sleep.as_mut().reset(Instant::now() + *this.window);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(other) => Poll::Ready(other),
            Poll::Pending => match this.sleep.poll(cx) {
                Poll::Ready(()) => Poll::Ready(Some(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "upload stalled",
                )))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
