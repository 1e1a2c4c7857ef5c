use std::error::Error as StdError;

use bytes::Buf;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{request_body_stream, Body, TimeoutStream};
use crate::davheaders::etag_header_value;
use crate::errors::DavError;
use crate::fs::{BytesStream, NodeType, WriteRange};
use crate::ls::streamls::StreamMode;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let path = self.path(req);

        let existed = match self.fs.node_type(&path).await? {
            NodeType::Collection => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
            NodeType::File => true,
            NodeType::Absent => false,
        };

        // webdav locks on the path or a deep ancestor.
        self.check_locks(req, &path, false).await?;

        let range = match req.headers().get("content-range") {
            None => None,
            Some(value) => {
                let s = value
                    .to_str()
                    .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
                Some(parse_content_range(s).ok_or(DavError::Status(StatusCode::BAD_REQUEST))?)
            }
        };

        // only one body transfer at a time.
        let _guard = self
            .streams
            .try_acquire(&path, StreamMode::Write)
            .ok_or(DavError::Busy)?;

        let stream: BytesStream = match self.upload_timeout {
            Some(window) => Box::pin(TimeoutStream::new(request_body_stream(body), window)),
            None => request_body_stream(body),
        };
        let meta = self.fs.write_stream(&path, stream, range).await?;

        let mut res = Response::new(Body::empty());
        res.headers_mut()
            .insert("ETag", etag_header_value(&meta.etag));
        *res.status_mut() = if existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        Ok(res)
    }
}

// `Content-Range: bytes start-end/total` with `*` for an unknown total.
fn parse_content_range(hdr: &str) -> Option<WriteRange> {
    let spec = hdr.trim().strip_prefix("bytes ")?.trim();
    let (range, total) = spec.split_once('/')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    let (start, end) = range.trim().split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    if let Some(total) = total {
        if end >= total {
            return None;
        }
    }
    Some(WriteRange { start, end, total })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 10-19/30"),
            Some(WriteRange {
                start: 10,
                end: 19,
                total: Some(30),
            })
        );
        assert_eq!(
            parse_content_range("bytes 0-0/*"),
            Some(WriteRange {
                start: 0,
                end: 0,
                total: None,
            })
        );
        assert_eq!(parse_content_range("bytes 19-10/30"), None);
        assert_eq!(parse_content_range("bytes 10-40/30"), None);
        assert_eq!(parse_content_range("bytes */30"), None);
        assert_eq!(parse_content_range("10-19/30"), None);
    }
}
