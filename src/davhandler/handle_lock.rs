use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xml::common::XmlVersion;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as XmlWEvent};
use xmltree::{Element, XMLNode};

use crate::body::Body;
use crate::davheaders;
use crate::errors::DavError;
use crate::fs::NodeType;
use crate::ls::DavLock;
use crate::util::MemBuffer;
use crate::xmltree_ext::*;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);

        let deep = match req.headers().typed_get::<davheaders::Depth>() {
            Some(davheaders::Depth::Zero) => false,
            Some(davheaders::Depth::Infinity) | None => true,
            // Depth: 1 is not a thing for LOCK.
            Some(davheaders::Depth::One) => {
                return Err(StatusCode::BAD_REQUEST.into());
            }
        };
        let timeout = req
            .headers()
            .typed_get::<davheaders::DavTimeout>()
            .and_then(|t| t.0);

        let root = parse_xml_body(xmldata)?;
        let lock = match root {
            Some(elem) => self.create_lock(&path, &elem, timeout, deep).await?,
            None => self.refresh_lock(req, &path, timeout).await?,
        };

        let created = if self.fs.node_type(&path).await? == NodeType::Absent {
            // RFC4918 9.10.4: LOCK on an unmapped url creates an empty
            // resource.
            let empty = Box::pin(futures_util::stream::empty());
            self.fs.write_stream(&path, empty, None).await?;
            true
        } else {
            false
        };

        let mut res = Response::new(Body::empty());
        res.headers_mut()
            .typed_insert(davheaders::LockToken(lock.token.clone()));
        res.headers_mut().insert(
            "Content-Type",
            "application/xml; charset=utf-8".parse().unwrap(),
        );
        *res.status_mut() = if created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        *res.body_mut() = Body::from(lock_response_body(&lock)?);
        Ok(res)
    }

    async fn create_lock(
        &self,
        path: &crate::davpath::DavPath,
        elem: &Element,
        timeout: Option<std::time::Duration>,
        deep: bool,
    ) -> DavResult<DavLock> {
        if !is_dav(elem, "lockinfo") {
            return Err(StatusCode::CONFLICT.into());
        }
        let shared = {
            let scope = dav_child(elem, "lockscope")
                .and_then(|s| child_elems(s).next())
                .ok_or(DavError::Status(StatusCode::CONFLICT))?;
            match scope.name.as_str() {
                "exclusive" => false,
                "shared" => true,
                _ => return Err(StatusCode::CONFLICT.into()),
            }
        };
        // only write locks exist.
        if let Some(ltype) = dav_child(elem, "locktype") {
            if !child_elems(ltype).any(|e| is_dav(e, "write")) {
                return Err(StatusCode::CONFLICT.into());
            }
        }
        let owner = dav_child(elem, "owner").cloned();

        let timeout = Some(timeout.unwrap_or(self.default_lock_timeout));
        let principal = self.principal.as_ref().map(|s| s.as_str());
        match self.ls.lock(path, principal, owner.as_ref(), timeout, shared, deep) {
            Ok(lock) => Ok(lock),
            Err(_blocking) => Err(StatusCode::LOCKED.into()),
        }
    }

    async fn refresh_lock(
        &self,
        req: &Request<()>,
        path: &crate::davpath::DavPath,
        timeout: Option<std::time::Duration>,
    ) -> DavResult<DavLock> {
        // refresh carries the token in the If header.
        let tokens = crate::conditional::if_match_get_tokens(
            req,
            path,
            &self.prefix,
            &self.fs,
            &self.ls,
        )
        .await?;
        let token = tokens
            .first()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        self.ls
            .refresh(path, token, timeout)
            .map_err(|_| DavError::Status(StatusCode::PRECONDITION_FAILED))
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req);

        let token = req
            .headers()
            .typed_get::<davheaders::LockToken>()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;

        if self.fs.node_type(&path).await? == NodeType::Absent {
            return Err(StatusCode::NOT_FOUND.into());
        }

        match self.ls.unlock(&path, &token.0) {
            Ok(()) => {
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::NO_CONTENT;
                Ok(res)
            }
            Err(()) => Err(StatusCode::CONFLICT.into()),
        }
    }
}

/// The `supportedlock` property: exclusive and shared write locks.
pub(crate) fn list_supportedlock() -> Element {
    let mut sup = new_dav("supportedlock");
    for scope in ["exclusive", "shared"] {
        let mut entry = new_dav("lockentry");
        let mut lockscope = new_dav("lockscope");
        lockscope.children.push(XMLNode::Element(new_dav(scope)));
        let mut locktype = new_dav("locktype");
        locktype.children.push(XMLNode::Element(new_dav("write")));
        entry.children.push(XMLNode::Element(lockscope));
        entry.children.push(XMLNode::Element(locktype));
        sup.children.push(XMLNode::Element(entry));
    }
    sup
}

/// The `lockdiscovery` property for a set of active locks.
pub(crate) fn list_lockdiscovery(locks: &[DavLock]) -> Element {
    let mut disc = new_dav("lockdiscovery");
    for lock in locks {
        disc.children.push(XMLNode::Element(activelock(lock)));
    }
    disc
}

fn activelock(lock: &DavLock) -> Element {
    let mut active = new_dav("activelock");

    let mut locktype = new_dav("locktype");
    locktype.children.push(XMLNode::Element(new_dav("write")));
    active.children.push(XMLNode::Element(locktype));

    let mut lockscope = new_dav("lockscope");
    let scope = if lock.shared { "shared" } else { "exclusive" };
    lockscope.children.push(XMLNode::Element(new_dav(scope)));
    active.children.push(XMLNode::Element(lockscope));

    let depth = if lock.deep { "infinity" } else { "0" };
    active
        .children
        .push(XMLNode::Element(new_dav_text("depth", depth)));

    if let Some(owner) = &lock.owner {
        let mut o = new_dav("owner");
        o.children = owner.children.clone();
        active.children.push(XMLNode::Element(o));
    } else if let Some(principal) = &lock.principal {
        active
            .children
            .push(XMLNode::Element(new_dav_text("owner", principal.clone())));
    }

    active.children.push(XMLNode::Element(new_dav_text(
        "timeout",
        format!("Second-{}", lock.timeout.as_secs()),
    )));

    let mut locktoken = new_dav("locktoken");
    locktoken
        .children
        .push(XMLNode::Element(new_dav_text("href", lock.token.clone())));
    active.children.push(XMLNode::Element(locktoken));

    let mut lockroot = new_dav("lockroot");
    lockroot.children.push(XMLNode::Element(new_dav_text(
        "href",
        lock.path.as_url_string_with_prefix(),
    )));
    active.children.push(XMLNode::Element(lockroot));

    active
}

// <d:prop><d:lockdiscovery>...</d:lockdiscovery></d:prop>
fn lock_response_body(lock: &DavLock) -> DavResult<Bytes> {
    let mut emitter = EventWriter::new_with_config(
        MemBuffer::new(),
        EmitterConfig {
            normalize_empty_elements: false,
            perform_indent: false,
            ..Default::default()
        },
    );
    emitter.write(XmlWEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    emitter.write(XmlWEvent::start_element("d:prop").ns("d", NS_DAV_URI))?;
    write_ev(&list_lockdiscovery(std::slice::from_ref(lock)), &mut emitter)?;
    emitter.write(XmlWEvent::end_element())?;
    Ok(emitter.into_inner().take())
}
