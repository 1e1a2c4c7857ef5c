use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use xml::common::XmlVersion;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as XmlWEvent};
use xmltree::{Element, XMLNode};

use crate::body::Body;
use crate::davhandler::handle_lock::{list_lockdiscovery, list_supportedlock};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::{DavFileSystem, DavProp, NodeMeta};
use crate::ls::memls::MemLs;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339, MemBuffer};
use crate::xmltree_ext::*;
use crate::DavResult;

// live properties, returned by PROPFIND <allprop/> and listed by
// <propname/>.
const LIVE_PROPS: &[&str] = &[
    "creationdate",
    "displayname",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "ishidden",
    "isreadonly",
    "lockdiscovery",
    "resourcetype",
    "supportedlock",
];

lazy_static! {
    static ref ALLPROP: Vec<Element> = LIVE_PROPS.iter().map(|n| new_dav(n)).collect();
}

struct StatusElement {
    status: StatusCode,
    element: Element,
}

// Accumulates one multistatus document.
struct PropWriter {
    emitter: EventWriter<MemBuffer>,
    name: String,
    props: Vec<Element>,
    fs: Arc<dyn DavFileSystem>,
    ls: Arc<MemLs>,
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);
        let meta = self.fs.metadata(&path).await?;

        let depth = req
            .headers()
            .typed_get::<davheaders::Depth>()
            .unwrap_or(davheaders::Depth::Infinity);

        // empty body means allprop.
        let (name, props) = match parse_xml_body(xmldata)? {
            None => ("allprop", Vec::new()),
            Some(root) => {
                if !is_dav(&root, "propfind") {
                    return Err(DavError::XmlParseError);
                }
                if dav_child(&root, "propname").is_some() {
                    ("propname", Vec::new())
                } else if dav_child(&root, "allprop").is_some() {
                    ("allprop", Vec::new())
                } else if let Some(prop) = dav_child(&root, "prop") {
                    ("prop", child_elems(prop).cloned().collect())
                } else {
                    return Err(DavError::XmlParseError);
                }
            }
        };
        debug!("propfind: type request: {}", name);

        let mut pw = PropWriter::new(name, props, self.fs.clone(), self.ls.clone())?;
        pw.write_props(&path, &meta).await?;

        if meta.is_dir() && depth != davheaders::Depth::Zero {
            let descend = depth == davheaders::Depth::Infinity;
            let mut stack = vec![path.clone()];
            while let Some(dir) = stack.pop() {
                let members = match self.fs.members(&dir).await {
                    Ok(m) => m,
                    Err(e) => {
                        // unreadable directory, just skip it.
                        error!("members error on {dir}: {e:?}");
                        continue;
                    }
                };
                for name in members {
                    let child = dir.join(&name);
                    let cmeta = match self.fs.metadata(&child).await {
                        Ok(m) => m,
                        Err(e) => {
                            debug!("metadata error on {child}. Skipping: {e:?}");
                            continue;
                        }
                    };
                    pw.write_props(&child, &cmeta).await?;
                    if descend && cmeta.is_dir() {
                        stack.push(child);
                    }
                }
            }
        }

        Ok(multistatus_response(pw.close()?))
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);
        self.fs.metadata(&path).await?;

        // if locked check if we hold that lock.
        self.check_locks(req, &path, false).await?;

        debug!(target: "xml", "proppatch input:\n{}",
               String::from_utf8_lossy(xmldata));

        let root = parse_xml_body(xmldata)?.ok_or(DavError::XmlParseError)?;
        if !is_dav(&root, "propertyupdate") {
            return Err(DavError::XmlParseError);
        }

        let mut set = Vec::new();
        let mut rem = Vec::new();
        let mut ret = Vec::new();

        // walk the ordered set/remove blocks. Live properties are
        // read-only, touching one fails that property with 403.
        for block in child_elems(&root) {
            let remove = match block.name.as_str() {
                "set" => false,
                "remove" => true,
                _ => continue,
            };
            for prop in child_elems(block)
                .filter(|e| is_dav(e, "prop"))
                .flat_map(child_elems)
            {
                if is_live_prop(prop) {
                    ret.push((StatusCode::FORBIDDEN, element_to_davprop(prop)));
                } else if remove {
                    rem.push(element_to_davprop(prop));
                } else {
                    set.push(element_to_davprop_full(prop)?);
                }
            }
        }

        if ret.iter().any(|(s, _)| *s != StatusCode::OK) {
            // nothing is applied; the untouched updates report 424.
            ret.extend(set.into_iter().chain(rem).map(|mut p| {
                p.xml = None;
                (StatusCode::FAILED_DEPENDENCY, p)
            }));
        } else {
            ret = self.fs.patch_props(&path, set, rem).await?;
        }

        // group by statuscode.
        let mut by_status: HashMap<StatusCode, Vec<Element>> = HashMap::new();
        for (status, prop) in ret {
            by_status
                .entry(status)
                .or_default()
                .push(davprop_to_element(&prop));
        }

        let mut pw = PropWriter::new(
            "propertyupdate",
            Vec::new(),
            self.fs.clone(),
            self.ls.clone(),
        )?;
        pw.write_propresponse(&path, by_status)?;
        Ok(multistatus_response(pw.close()?))
    }
}

fn multistatus_response(body: Bytes) -> Response<Body> {
    let mut res = Response::new(Body::from(body));
    res.headers_mut().insert(
        "Content-Type",
        "application/xml; charset=utf-8".parse().unwrap(),
    );
    *res.status_mut() = StatusCode::MULTI_STATUS;
    res
}

fn is_live_prop(elem: &Element) -> bool {
    matches!(elem.namespace.as_deref(), None | Some(NS_DAV_URI))
        && LIVE_PROPS.contains(&elem.name.as_str())
}

fn element_to_davprop(elem: &Element) -> DavProp {
    DavProp {
        name: elem.name.clone(),
        prefix: elem.prefix.clone(),
        namespace: elem.namespace.clone(),
        xml: None,
    }
}

fn element_to_davprop_full(elem: &Element) -> DavResult<DavProp> {
    let mut prop = element_to_davprop(elem);
    prop.xml = Some(element_to_xml(elem)?);
    Ok(prop)
}

fn davprop_to_element(prop: &DavProp) -> Element {
    if let Some(xml) = &prop.xml {
        if let Ok(e) = element_from_xml(xml) {
            return e;
        }
    }
    let mut elem = Element::new(&prop.name);
    elem.prefix = prop.prefix.clone();
    elem.namespace = prop.namespace.clone();
    elem
}

impl PropWriter {
    fn new(
        name: &str,
        mut props: Vec<Element>,
        fs: Arc<dyn DavFileSystem>,
        ls: Arc<MemLs>,
    ) -> DavResult<PropWriter> {
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
        emitter.write(XmlWEvent::start_element("d:multistatus").ns("d", NS_DAV_URI))?;

        if name == "allprop" || name == "propname" {
            props = ALLPROP.clone();
        }

        Ok(PropWriter {
            emitter,
            name: name.to_string(),
            props,
            fs,
            ls,
        })
    }

    fn build_elem<T>(&self, content: bool, e: &Element, text: T) -> StatusElement
    where
        T: Into<String>,
    {
        let mut elem = new_dav(&e.name);
        if content {
            let t = text.into();
            if !t.is_empty() {
                elem.children.push(XMLNode::Text(t));
            }
        }
        StatusElement {
            status: StatusCode::OK,
            element: elem,
        }
    }

    async fn build_prop(
        &self,
        prop: &Element,
        path: &DavPath,
        meta: &NodeMeta,
        docontent: bool,
    ) -> DavResult<StatusElement> {
        let mut try_deadprop = true;
        if matches!(prop.namespace.as_deref(), None | Some(NS_DAV_URI)) {
            try_deadprop = false;
            match prop.name.as_str() {
                "creationdate" => {
                    let tm = systemtime_to_rfc3339(meta.created);
                    return Ok(self.build_elem(docontent, prop, tm));
                }
                "displayname" => {
                    return Ok(self.build_elem(docontent, prop, path.file_name()));
                }
                "getetag" => {
                    // quoted, same form as the ETag response header.
                    return Ok(self.build_elem(docontent, prop, format!("\"{}\"", meta.etag)));
                }
                "getcontentlength" => {
                    if !meta.is_dir() {
                        return Ok(self.build_elem(docontent, prop, meta.len.to_string()));
                    }
                }
                "getcontenttype" => {
                    let ct = if meta.is_dir() {
                        "httpd/unix-directory".to_string()
                    } else {
                        mime_guess::from_path(path.file_name())
                            .first_or_octet_stream()
                            .to_string()
                    };
                    return Ok(self.build_elem(docontent, prop, ct));
                }
                "getlastmodified" => {
                    let tm = systemtime_to_httpdate(meta.modified);
                    return Ok(self.build_elem(docontent, prop, tm));
                }
                "resourcetype" => {
                    let mut elem = new_dav("resourcetype");
                    if meta.is_dir() && docontent {
                        elem.children.push(XMLNode::Element(new_dav("collection")));
                    }
                    return Ok(StatusElement {
                        status: StatusCode::OK,
                        element: elem,
                    });
                }
                "supportedlock" => {
                    return Ok(StatusElement {
                        status: StatusCode::OK,
                        element: list_supportedlock(),
                    });
                }
                "lockdiscovery" => {
                    return Ok(StatusElement {
                        status: StatusCode::OK,
                        element: list_lockdiscovery(&self.ls.discover(path)),
                    });
                }
                "ishidden" => {
                    return Ok(self.build_elem(docontent, prop, "0"));
                }
                "isreadonly" => {
                    return Ok(self.build_elem(docontent, prop, "0"));
                }
                _ => {}
            }
        }

        if try_deadprop && self.name == "prop" {
            // asking for a specific property.
            let dprop = element_to_davprop(prop);
            if let Ok(xml) = self.fs.get_prop(path, dprop).await {
                if let Ok(e) = element_from_xml(&xml) {
                    return Ok(StatusElement {
                        status: StatusCode::OK,
                        element: e,
                    });
                }
            }
        }
        let mut element = prop.clone();
        element.children.clear();
        Ok(StatusElement {
            status: StatusCode::NOT_FOUND,
            element,
        })
    }

    async fn write_props(&mut self, path: &DavPath, meta: &NodeMeta) -> DavResult<()> {
        // A HashMap<StatusCode, Vec<Element>> for the result.
        let mut props: HashMap<StatusCode, Vec<Element>> = HashMap::new();

        let do_content = self.name != "propname";
        let requested = self.props.clone();
        for p in &requested {
            let res = self.build_prop(p, path, meta, do_content).await?;
            // under allprop/propname, missing properties are simply
            // left out instead of reported as 404.
            if res.status == StatusCode::OK || self.name == "prop" {
                props.entry(res.status).or_default().push(res.element);
            }
        }

        // and list the dead properties as well.
        if self.name == "propname" || self.name == "allprop" {
            if let Ok(v) = self.fs.get_props(path, do_content).await {
                for p in v {
                    props
                        .entry(StatusCode::OK)
                        .or_default()
                        .push(davprop_to_element(&p));
                }
            }
        }

        self.write_propresponse(path, props)
    }

    fn write_propresponse(
        &mut self,
        path: &DavPath,
        props: HashMap<StatusCode, Vec<Element>>,
    ) -> DavResult<()> {
        self.emitter.write(XmlWEvent::start_element("d:response"))?;
        let href = new_dav_text("href", path.as_url_string_with_prefix());
        write_ev(&href, &mut self.emitter)?;

        let mut keys: Vec<_> = props.keys().copied().collect();
        keys.sort();
        for status in keys {
            self.emitter.write(XmlWEvent::start_element("d:propstat"))?;
            self.emitter.write(XmlWEvent::start_element("d:prop"))?;
            for elem in &props[&status] {
                write_ev(elem, &mut self.emitter)?;
            }
            self.emitter.write(XmlWEvent::end_element())?;
            write_ev(
                &new_dav_text("status", format!("HTTP/1.1 {status}")),
                &mut self.emitter,
            )?;
            self.emitter.write(XmlWEvent::end_element())?;
        }

        self.emitter.write(XmlWEvent::end_element())?; // response
        Ok(())
    }

    fn close(mut self) -> DavResult<Bytes> {
        self.emitter.write(XmlWEvent::end_element())?; // multistatus
        Ok(self.emitter.into_inner().take())
    }
}
