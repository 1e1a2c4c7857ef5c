//! Normalized paths, the canonical keys of the namespace.
//!
//! Every path that comes in over the wire (request URI, `Destination`
//! header) is percent-decoded and normalized before it touches the
//! filesystem or the lock indexes. Normalization collapses empty and `.`
//! segments, pops `..` segments where possible and silently drops them at
//! the root, and strips the trailing slash except for the root itself.

use std::fmt;

use http::uri::Uri;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::errors::DavError;
use crate::DavResult;

// Characters that need escaping in a path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// A normalized absolute path below the handler prefix.
#[derive(Clone)]
pub struct DavPath {
    path: String,
    prefix: String,
}

// identity is the canonical path; the prefix is presentation only.
impl PartialEq for DavPath {
    fn eq(&self, other: &DavPath) -> bool {
        self.path == other.path
    }
}

impl Eq for DavPath {}

impl std::hash::Hash for DavPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.path)
    }
}

fn normalize(decoded: &str) -> String {
    let mut segs: Vec<&str> = Vec::new();
    for seg in decoded.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                // pop, or drop when already at the root.
                segs.pop();
            }
            s => segs.push(s),
        }
    }
    let mut path = String::with_capacity(decoded.len() + 1);
    path.push('/');
    path.push_str(&segs.join("/"));
    path
}

impl DavPath {
    /// Decode and normalize a raw url path.
    pub(crate) fn new(src: &str) -> DavResult<DavPath> {
        if !src.starts_with('/') {
            return Err(DavError::InvalidPath);
        }
        let decoded = percent_decode_str(src)
            .decode_utf8()
            .map_err(|_| DavError::InvalidPath)?;
        if decoded.contains('\0') {
            return Err(DavError::InvalidPath);
        }
        Ok(DavPath {
            path: normalize(&decoded),
            prefix: String::new(),
        })
    }

    /// From a request URI and the handler prefix. The prefix is stripped
    /// before normalization and re-attached when building hrefs.
    pub(crate) fn from_uri_and_prefix(uri: &Uri, prefix: &str) -> DavResult<DavPath> {
        let path = uri.path();
        if !path.starts_with('/') && path != "*" {
            return Err(DavError::InvalidPath);
        }
        let rest = match path.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            Some(rest) if prefix.ends_with('/') => format!("/{rest}"),
            _ => return Err(DavError::Status(http::StatusCode::NOT_FOUND)),
        };
        let mut p = DavPath::new(&rest)?;
        p.prefix = prefix.trim_end_matches('/').to_string();
        Ok(p)
    }

    /// The canonical decoded path, no trailing slash except for `/`.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Last path segment, `/` for the root.
    pub fn file_name(&self) -> &str {
        match self.path.rfind('/') {
            Some(i) if self.path.len() > 1 => &self.path[i + 1..],
            _ => "/",
        }
    }

    pub fn parent(&self) -> DavPath {
        let parent = match self.path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(i) => self.path[..i].to_string(),
        };
        DavPath {
            path: parent,
            prefix: self.prefix.clone(),
        }
    }

    /// Append one (already decoded) segment.
    pub fn push_segment(&mut self, seg: &str) {
        if !self.path.ends_with('/') {
            self.path.push('/');
        }
        self.path.push_str(seg);
    }

    pub fn join(&self, seg: &str) -> DavPath {
        let mut p = self.clone();
        p.push_segment(seg);
        p
    }

    /// True if `self` is a strict ancestor collection of `other`.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        crate::davpath::is_path_ancestor(&self.path, &other.path)
    }

    /// Percent-encoded url path, without the prefix.
    pub fn as_url_string(&self) -> String {
        if self.is_root() {
            return "/".to_string();
        }
        let mut out = String::new();
        for seg in self.path.split('/').skip(1) {
            out.push('/');
            out.extend(utf8_percent_encode(seg, SEGMENT));
        }
        out
    }

    /// Percent-encoded url path, prefix included. Used for hrefs.
    pub fn as_url_string_with_prefix(&self) -> String {
        let mut p = utf8_percent_encode(&self.prefix, SEGMENT).to_string();
        p.push_str(&self.as_url_string());
        p
    }

}

/// Ancestor test on canonical path strings. `/a` is an ancestor of
/// `/a/b` and `/a/b/c`, not of `/ab` or of itself.
pub(crate) fn is_path_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor == "/" {
        return path != "/";
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> String {
        DavPath::new(s).unwrap().as_str().to_string()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(n("/"), "/");
        assert_eq!(n("/a/./b/../c"), "/a/c");
        assert_eq!(n("/.."), "/");
        assert_eq!(n("/../../x"), "/x");
        assert_eq!(n("/a//b///c/"), "/a/b/c");
        assert_eq!(n("/a/b/"), "/a/b");
    }

    #[test]
    fn test_idempotent() {
        for p in ["/a/./b/../c", "/..", "/a%20b/c", "/x//y/."] {
            let once = n(p);
            assert_eq!(n(&once), once);
        }
    }

    #[test]
    fn test_decode_encode() {
        let p = DavPath::new("/a%20dir/file%25x").unwrap();
        assert_eq!(p.as_str(), "/a dir/file%x");
        assert_eq!(p.as_url_string(), "/a%20dir/file%25x");
    }

    #[test]
    fn test_file_name_and_parent() {
        let p = DavPath::new("/a/b/c").unwrap();
        assert_eq!(p.file_name(), "c");
        assert_eq!(p.parent().as_str(), "/a/b");
        assert_eq!(DavPath::new("/x").unwrap().parent().as_str(), "/");
        assert_eq!(DavPath::new("/").unwrap().file_name(), "/");
    }

    #[test]
    fn test_ancestor() {
        let a = DavPath::new("/a").unwrap();
        let ab = DavPath::new("/a/b").unwrap();
        let abx = DavPath::new("/a/b/x").unwrap();
        let ax = DavPath::new("/ax").unwrap();
        assert!(a.is_ancestor_of(&ab));
        assert!(a.is_ancestor_of(&abx));
        assert!(!a.is_ancestor_of(&ax));
        assert!(!a.is_ancestor_of(&a));
        assert!(DavPath::new("/").unwrap().is_ancestor_of(&a));
    }

    #[test]
    fn test_prefix() {
        let uri: Uri = "/dav/a/b".parse().unwrap();
        let p = DavPath::from_uri_and_prefix(&uri, "/dav").unwrap();
        assert_eq!(p.as_str(), "/a/b");
        assert_eq!(p.as_url_string_with_prefix(), "/dav/a/b");

        // trailing slash on the prefix is tolerated.
        let p = DavPath::from_uri_and_prefix(&uri, "/dav/").unwrap();
        assert_eq!(p.as_str(), "/a/b");

        // the prefix must match on a segment boundary.
        let uri: Uri = "/davXY/a".parse().unwrap();
        assert!(DavPath::from_uri_and_prefix(&uri, "/dav").is_err());

        let uri: Uri = "/dav".parse().unwrap();
        let p = DavPath::from_uri_and_prefix(&uri, "/dav").unwrap();
        assert!(p.is_root());
    }
}
