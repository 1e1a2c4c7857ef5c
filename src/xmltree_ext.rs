//
// Helpers on top of xmltree::Element: namespace tolerant accessors for
// parsing request bodies, and event-writer emission for responses.
//
// Request parsers accept `D:`, `d:` and unprefixed elements alike; what
// matters is the local name plus the element living in the `DAV:`
// namespace (or in none at all, which sloppy clients produce).
//
use std::io::Write;

use xml::writer::{EmitterConfig, EventWriter, XmlEvent as XmlWEvent};
use xmltree::{Element, XMLNode};

use crate::errors::DavError;
use crate::DavResult;

pub(crate) const NS_DAV_URI: &str = "DAV:";

/// A `d:`-prefixed element for response bodies.
pub(crate) fn new_dav(name: &str) -> Element {
    let mut e = Element::new(name);
    e.prefix = Some("d".to_string());
    e.namespace = Some(NS_DAV_URI.to_string());
    e
}

/// A `d:` element with text content.
pub(crate) fn new_dav_text(name: &str, text: impl Into<String>) -> Element {
    let mut e = new_dav(name);
    e.children.push(XMLNode::Text(text.into()));
    e
}

/// Is this element the DAV: element with the given local name?
pub(crate) fn is_dav(elem: &Element, name: &str) -> bool {
    elem.name == name
        && matches!(elem.namespace.as_deref(), None | Some(NS_DAV_URI))
}

/// Child elements, skipping text and comment nodes.
pub(crate) fn child_elems(elem: &Element) -> impl Iterator<Item = &Element> {
    elem.children.iter().filter_map(|n| match n {
        XMLNode::Element(e) => Some(e),
        _ => None,
    })
}

/// First child in the DAV: namespace with the given local name.
pub(crate) fn dav_child<'a>(elem: &'a Element, name: &str) -> Option<&'a Element> {
    child_elems(elem).find(|e| is_dav(e, name))
}

/// Parse a request body. Empty body is `Ok(None)`; garbage is 400.
pub(crate) fn parse_xml_body(body: &[u8]) -> DavResult<Option<Element>> {
    if body.is_empty() {
        return Ok(None);
    }
    let elem = Element::parse(body).map_err(|_| DavError::XmlParseError)?;
    Ok(Some(elem))
}

/// Write an element tree to an event writer.
///
/// The `DAV:` namespace is assumed to be declared as `d:` on the
/// response root; any other namespace is declared on the element that
/// uses it.
pub(crate) fn write_ev<W: Write>(elem: &Element, w: &mut EventWriter<W>) -> DavResult<()> {
    let qname = match &elem.prefix {
        Some(p) => format!("{}:{}", p, elem.name),
        None => elem.name.clone(),
    };
    let mut ev = XmlWEvent::start_element(qname.as_str());
    if let Some(ns) = &elem.namespace {
        if ns != NS_DAV_URI {
            ev = ev.ns(elem.prefix.as_deref().unwrap_or(""), ns.as_str());
        }
    }
    for (k, v) in &elem.attributes {
        ev = ev.attr(k.as_str(), v);
    }
    w.write(ev)?;
    for node in &elem.children {
        match node {
            XMLNode::Element(e) => write_ev(e, w)?,
            XMLNode::Text(t) | XMLNode::CData(t) => w.write(XmlWEvent::characters(t))?,
            _ => {}
        }
    }
    w.write(XmlWEvent::end_element())?;
    Ok(())
}

/// Serialize a single element to a standalone XML fragment. This is the
/// storage format of dead properties.
pub(crate) fn element_to_xml(elem: &Element) -> DavResult<Vec<u8>> {
    let mut w = EventWriter::new_with_config(
        Vec::new(),
        EmitterConfig {
            write_document_declaration: false,
            perform_indent: false,
            ..Default::default()
        },
    );
    write_fragment(elem, &mut w)?;
    Ok(w.into_inner())
}

// like write_ev, but declares every namespace so the fragment parses on
// its own later.
fn write_fragment<W: Write>(elem: &Element, w: &mut EventWriter<W>) -> DavResult<()> {
    let qname = match &elem.prefix {
        Some(p) => format!("{}:{}", p, elem.name),
        None => elem.name.clone(),
    };
    let mut ev = XmlWEvent::start_element(qname.as_str());
    if let Some(ns) = &elem.namespace {
        ev = ev.ns(elem.prefix.as_deref().unwrap_or(""), ns.as_str());
    }
    for (k, v) in &elem.attributes {
        ev = ev.attr(k.as_str(), v);
    }
    w.write(ev)?;
    for node in &elem.children {
        match node {
            XMLNode::Element(e) => write_fragment(e, w)?,
            XMLNode::Text(t) | XMLNode::CData(t) => w.write(XmlWEvent::characters(t))?,
            _ => {}
        }
    }
    w.write(XmlWEvent::end_element())?;
    Ok(())
}

/// Parse a stored dead-property fragment back into an element.
pub(crate) fn element_from_xml(xml: &[u8]) -> DavResult<Element> {
    Element::parse(xml).map_err(|_| DavError::XmlParseError)
}
