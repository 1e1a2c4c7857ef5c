use async_stream::stream;
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use pin_utils::pin_mut;

use crate::body::Body;
use crate::davheaders::etag_header_value;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::{ByteRange, NodeMeta};
use crate::ls::streamls::StreamMode;
use crate::util::systemtime_to_httpdate;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_get(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req);
        let head = req.method() == http::Method::HEAD;

        let meta = self.fs.metadata(&path).await?;
        if meta.is_dir() {
            return self.collection_index(&path, head).await;
        }

        // an exclusive webdav lock blocks reads too, unless the request
        // carries a token for it.
        let tokens =
            crate::conditional::if_match_get_tokens(req, &path, &self.prefix, &self.fs, &self.ls)
                .await?;
        let blocking = self
            .ls
            .discover(&path)
            .into_iter()
            .any(|l| !l.shared && !tokens.contains(&l.token));
        if blocking {
            return Err(StatusCode::LOCKED.into());
        }

        // a write in progress means the content is in flux: back off.
        let guard = self
            .streams
            .try_acquire(&path, StreamMode::Read)
            .ok_or(DavError::Busy)?;

        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();
        h.insert("ETag", etag_header_value(&meta.etag));
        h.insert("Accept-Ranges", "bytes".parse().unwrap());
        h.insert(
            "Last-Modified",
            systemtime_to_httpdate(meta.modified).parse().unwrap(),
        );
        let ctype = mime_guess::from_path(path.file_name()).first_or_octet_stream();
        h.insert("Content-Type", ctype.as_ref().parse().unwrap());

        let range = match req.headers().get("range") {
            None => None,
            Some(value) => {
                let spec = value.to_str().ok().and_then(|s| parse_range(s, meta.len));
                match spec {
                    Some(r) => Some(r),
                    None => {
                        // invalid or unsatisfiable.
                        let h = res.headers_mut();
                        h.insert(
                            "Content-Range",
                            format!("bytes */{}", meta.len).parse().unwrap(),
                        );
                        h.typed_insert(headers::ContentLength(0));
                        *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                        return Ok(res);
                    }
                }
            }
        };

        let len = match range {
            Some(r) => {
                let h = res.headers_mut();
                h.insert(
                    "Content-Range",
                    format!("bytes {}-{}/{}", r.start, r.end, meta.len)
                        .parse()
                        .unwrap(),
                );
                *res.status_mut() = StatusCode::PARTIAL_CONTENT;
                r.end - r.start + 1
            }
            None => meta.len,
        };
        res.headers_mut().typed_insert(headers::ContentLength(len));

        if head {
            return Ok(res);
        }

        let content = self.fs.read_stream(&path, range).await?;
        // the body stream owns the read guard; it is released when the
        // response completes or the connection goes away.
        *res.body_mut() = Body::stream(stream! {
            let _guard = guard;
            pin_mut!(content);
            while let Some(chunk) = content.next().await {
                yield chunk;
            }
        });
        Ok(res)
    }

    // minimal html listing of the children of a collection.
    async fn collection_index(&self, path: &DavPath, head: bool) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());
        res.headers_mut()
            .insert("Content-Type", "text/html; charset=utf-8".parse().unwrap());

        if head {
            return Ok(res);
        }

        let title = htmlescape::encode_minimal(path.as_str());
        let mut page = String::new();
        page.push_str("<html><head><title>Index of ");
        page.push_str(&title);
        page.push_str("</title></head>\n<body><h1>Index of ");
        page.push_str(&title);
        page.push_str("</h1>\n<ul>\n");
        for name in self.fs.members(path).await? {
            let child = path.join(&name);
            let is_dir = self
                .fs
                .metadata(&child)
                .await
                .map(|m: NodeMeta| m.is_dir())
                .unwrap_or(false);
            let slash = if is_dir { "/" } else { "" };
            page.push_str(&format!(
                "<li><a href=\"{}{}\">{}{}</a></li>\n",
                child.as_url_string_with_prefix(),
                slash,
                htmlescape::encode_minimal(&name),
                slash,
            ));
        }
        page.push_str("</ul></body></html>\n");

        res.headers_mut()
            .typed_insert(headers::ContentLength(page.len() as u64));
        *res.body_mut() = Body::from(page);
        Ok(res)
    }
}

// Parse a single-range `Range` header against the current size.
// `None` covers both the malformed and the unsatisfiable case.
fn parse_range(hdr: &str, size: u64) -> Option<ByteRange> {
    let spec = hdr.trim().strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        return None;
    }
    let (a, b) = spec.split_once('-')?;
    let (a, b) = (a.trim(), b.trim());
    let range = match (a.is_empty(), b.is_empty()) {
        // "-n": the final n bytes.
        (true, false) => {
            let n: u64 = b.parse().ok()?;
            if n == 0 {
                return None;
            }
            ByteRange {
                start: size.saturating_sub(n),
                end: size.checked_sub(1)?,
            }
        }
        // "a-": from a to the end.
        (false, true) => {
            let start: u64 = a.parse().ok()?;
            ByteRange {
                start,
                end: size.checked_sub(1)?,
            }
        }
        // "a-b", inclusive, clamped to the end.
        (false, false) => {
            let start: u64 = a.parse().ok()?;
            let end: u64 = b.parse().ok()?;
            if end < start {
                return None;
            }
            ByteRange {
                start,
                end: end.min(size.checked_sub(1)?),
            }
        }
        (true, true) => return None,
    };
    if range.start >= size {
        return None;
    }
    Some(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        let r = |s, size| parse_range(s, size);
        assert_eq!(r("bytes=0-99", 1000), Some(ByteRange { start: 0, end: 99 }));
        assert_eq!(r("bytes=500-", 1000), Some(ByteRange { start: 500, end: 999 }));
        assert_eq!(r("bytes=-100", 1000), Some(ByteRange { start: 900, end: 999 }));
        // suffix longer than the file is the whole file.
        assert_eq!(r("bytes=-2000", 1000), Some(ByteRange { start: 0, end: 999 }));
        // clamped at the end.
        assert_eq!(r("bytes=900-1100", 1000), Some(ByteRange { start: 900, end: 999 }));
        // single byte of a single-byte file.
        assert_eq!(r("bytes=0-0", 1), Some(ByteRange { start: 0, end: 0 }));
    }

    #[test]
    fn test_parse_range_rejects() {
        assert_eq!(parse_range("bytes=-0", 1000), None);
        assert_eq!(parse_range("bytes=1000-", 1000), None);
        assert_eq!(parse_range("bytes=5000-6000", 1000), None);
        assert_eq!(parse_range("bytes=5-2", 1000), None);
        assert_eq!(parse_range("bytes=0-0,5-6", 1000), None);
        assert_eq!(parse_range("bytes=", 1000), None);
        assert_eq!(parse_range("chunks=0-1", 1000), None);
        // nothing is satisfiable on an empty file.
        assert_eq!(parse_range("bytes=0-", 0), None);
    }
}
