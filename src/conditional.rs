//! The `If` request header, RFC4918 section 10.4.
//!
//! The full grammar: one or more parenthesized condition lists, each
//! optionally preceded by a `<resource>` tag it applies to. A condition
//! is a state token (`<opaquelocktoken:...>`) or an entity tag
//! (`["..."]`), possibly negated with `Not`. The request may proceed if
//! at least one list holds entirely for its resource; in addition every
//! state token mentioned is "submitted" to the locksystem.

use std::sync::Arc;

use http::uri::Uri;
use http::{Request, StatusCode};

use crate::davheaders::trim_etag;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::DavFileSystem;
use crate::ls::memls::MemLs;
use crate::DavResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IfHeader {
    pub lists: Vec<IfList>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IfList {
    /// Tagged-list resource; `None` means the request target.
    pub resource: Option<String>,
    pub conditions: Vec<IfCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IfCondition {
    pub negate: bool,
    pub item: IfItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IfItem {
    Token(String),
    ETag(String),
}

/// Parse an `If` header value. `None` means a grammar violation; a bare
/// token outside a list is not accepted.
pub(crate) fn parse_if(input: &str) -> Option<IfHeader> {
    let mut lists = Vec::new();
    let mut rest = input.trim();
    let mut tag: Option<String> = None;
    while !rest.is_empty() {
        if let Some(r) = rest.strip_prefix('<') {
            let end = r.find('>')?;
            tag = Some(r[..end].to_string());
            rest = r[end + 1..].trim_start();
            // a resource tag must introduce at least one list.
            if !rest.starts_with('(') {
                return None;
            }
        } else if let Some(r) = rest.strip_prefix('(') {
            let end = r.find(')')?;
            let conditions = parse_conditions(&r[..end])?;
            if conditions.is_empty() {
                return None;
            }
            lists.push(IfList {
                resource: tag.clone(),
                conditions,
            });
            rest = r[end + 1..].trim_start();
        } else {
            return None;
        }
    }
    if lists.is_empty() {
        return None;
    }
    Some(IfHeader { lists })
}

fn parse_conditions(inner: &str) -> Option<Vec<IfCondition>> {
    let mut out = Vec::new();
    let mut rest = inner.trim();
    while !rest.is_empty() {
        let negate = rest.len() >= 3 && rest.as_bytes()[..3].eq_ignore_ascii_case(b"not");
        if negate {
            rest = rest[3..].trim_start();
        }
        if let Some(r) = rest.strip_prefix('<') {
            let end = r.find('>')?;
            out.push(IfCondition {
                negate,
                item: IfItem::Token(r[..end].to_string()),
            });
            rest = r[end + 1..].trim_start();
        } else if let Some(r) = rest.strip_prefix('[') {
            let end = r.find(']')?;
            out.push(IfCondition {
                negate,
                item: IfItem::ETag(trim_etag(&r[..end]).to_string()),
            });
            rest = r[end + 1..].trim_start();
        } else {
            return None;
        }
    }
    Some(out)
}

impl IfHeader {
    /// Every state token mentioned, for submission to the locksystem.
    pub(crate) fn submitted_tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        for list in &self.lists {
            for cond in &list.conditions {
                if let IfItem::Token(t) = &cond.item {
                    if !tokens.contains(t) {
                        tokens.push(t.clone());
                    }
                }
            }
        }
        tokens
    }
}

/// Evaluate the header. True if any list holds for its resource.
pub(crate) async fn eval_if_header(
    hdr: &IfHeader,
    req_path: &DavPath,
    prefix: &str,
    fs: &Arc<dyn DavFileSystem>,
    ls: &MemLs,
) -> bool {
    'list: for list in &hdr.lists {
        let path = match &list.resource {
            None => req_path.clone(),
            Some(tag) => {
                let Ok(uri) = tag.parse::<Uri>() else {
                    continue;
                };
                match DavPath::from_uri_and_prefix(&uri, prefix) {
                    Ok(p) => p,
                    Err(_) => continue,
                }
            }
        };
        let etag = fs.metadata(&path).await.ok().map(|m| m.etag);
        for cond in &list.conditions {
            let holds = match &cond.item {
                IfItem::Token(t) => ls.has_valid_token(&path, t),
                IfItem::ETag(e) => etag.as_deref() == Some(e.as_str()),
            };
            if holds == cond.negate {
                continue 'list;
            }
        }
        return true;
    }
    false
}

/// Common prelude of the mutating methods: harvest lock tokens from the
/// `Lock-Token` and `If` headers, and enforce `If` preconditions
/// (412 when no list holds).
pub(crate) async fn if_match_get_tokens(
    req: &Request<()>,
    path: &DavPath,
    prefix: &str,
    fs: &Arc<dyn DavFileSystem>,
    ls: &MemLs,
) -> DavResult<Vec<String>> {
    use headers::HeaderMapExt;

    let mut tokens = Vec::new();
    if let Some(lt) = req.headers().typed_get::<crate::davheaders::LockToken>() {
        tokens.push(lt.0);
    }

    let mut raw = String::new();
    for value in req.headers().get_all("if") {
        let s = value
            .to_str()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
        if !raw.is_empty() {
            raw.push(' ');
        }
        raw.push_str(s);
    }
    if !raw.is_empty() {
        let hdr = parse_if(&raw).ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        if !eval_if_header(&hdr, path, prefix, fs, ls).await {
            return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
        }
        for t in hdr.submitted_tokens() {
            if !tokens.contains(&t) {
                tokens.push(t);
            }
        }
    }
    Ok(tokens)
}
