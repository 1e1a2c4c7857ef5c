//
// Typed versions of the webdav request/response headers, usable with
// `headers::HeaderMapExt` (typed_get / typed_insert).
//
use std::time::Duration;

use headers::{self, Header};
use http::header::{HeaderName, HeaderValue};

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
}

/// Depth: 0, 1, infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        match value.to_str().map(|s| s.trim().to_lowercase()) {
            Ok(s) if s == "0" => Ok(Depth::Zero),
            Ok(s) if s == "1" => Ok(Depth::One),
            Ok(s) if s == "infinity" => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(Some(HeaderValue::from_static(s)));
    }
}

/// Timeout: `Second-n` or `Infinite`, possibly a preference list.
/// `None` inside means "Infinite" (we will cap it to the default lease).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DavTimeout(pub Option<Duration>);

impl Header for DavTimeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        // first understood alternative wins.
        for alt in s.split(',').map(str::trim) {
            if alt.eq_ignore_ascii_case("infinite") {
                return Ok(DavTimeout(None));
            }
            if let Some(secs) = alt.strip_prefix("Second-") {
                let secs: u64 = secs.parse().map_err(|_| headers::Error::invalid())?;
                return Ok(DavTimeout(Some(Duration::from_secs(secs))));
            }
        }
        Err(headers::Error::invalid())
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = match self.0 {
            None => "Infinite".to_string(),
            Some(d) => format!("Second-{}", d.as_secs()),
        };
        values.extend(Some(HeaderValue::from_str(&s).unwrap()));
    }
}

/// Destination of COPY/MOVE, the raw url from the header.
#[derive(Debug, Clone)]
pub(crate) struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        Ok(Destination(s.trim().to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(v) = HeaderValue::from_str(&self.0) {
            values.extend(Some(v));
        }
    }
}

/// Overwrite: T or F. Defaults to T when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        match value.as_bytes() {
            b"T" | b"t" => Ok(Overwrite(true)),
            b"F" | b"f" => Ok(Overwrite(false)),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = if self.0 { "T" } else { "F" };
        values.extend(Some(HeaderValue::from_static(s)));
    }
}

/// Lock-Token: a Coded-URL, `<opaquelocktoken:...>`. The inner token is
/// stored without the angle brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?.trim();
        let token = s
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .ok_or_else(headers::Error::invalid)?;
        Ok(LockToken(token.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(v) = HeaderValue::from_str(&format!("<{}>", self.0)) {
            values.extend(Some(v));
        }
    }
}

/// Quote an opaque etag for the wire.
pub(crate) fn etag_header_value(etag: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("\"{etag}\"")).unwrap()
}

/// Strip quotes and a weakness marker off a wire etag.
pub(crate) fn trim_etag(s: &str) -> &str {
    let s = s.trim();
    let s = s.strip_prefix("W/").unwrap_or(s);
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use headers::HeaderMapExt;
    use http::HeaderMap;

    fn map(name: &'static str, value: &str) -> HeaderMap {
        let mut m = HeaderMap::new();
        m.insert(name, value.parse().unwrap());
        m
    }

    #[test]
    fn test_depth() {
        assert_eq!(map("depth", "0").typed_get::<Depth>(), Some(Depth::Zero));
        assert_eq!(
            map("depth", "Infinity").typed_get::<Depth>(),
            Some(Depth::Infinity)
        );
        assert_eq!(map("depth", "2").typed_get::<Depth>(), None);
    }

    #[test]
    fn test_timeout() {
        assert_eq!(
            map("timeout", "Second-60").typed_get::<DavTimeout>(),
            Some(DavTimeout(Some(Duration::from_secs(60))))
        );
        assert_eq!(
            map("timeout", "Infinite, Second-600").typed_get::<DavTimeout>(),
            Some(DavTimeout(None))
        );
    }

    #[test]
    fn test_lock_token() {
        assert_eq!(
            map("lock-token", "<opaquelocktoken:abc>").typed_get::<LockToken>(),
            Some(LockToken("opaquelocktoken:abc".to_string()))
        );
        assert_eq!(map("lock-token", "opaquelocktoken:abc").typed_get::<LockToken>(), None);
    }

    #[test]
    fn test_trim_etag() {
        assert_eq!(trim_etag("\"abc\""), "abc");
        assert_eq!(trim_etag("W/\"abc\""), "abc");
        assert_eq!(trim_etag("abc"), "abc");
    }
}
