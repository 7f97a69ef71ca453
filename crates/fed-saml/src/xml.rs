//! Minimal XML element tree built with quick-xml.
//!
//! Protocol messages are small, so they are read into an owned tree and the
//! typed parsers walk it by local name. Namespace prefixes are kept but not
//! resolved. Document type declarations are refused outright and every `ID`
//! attribute must be unique within a document, which the signature checks
//! rely on.

use std::collections::HashSet;
use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{SamlError, SamlResult};

/// Upper bound on accepted document size.
pub const MAX_DOCUMENT_SIZE: usize = 1024 * 1024;

/// Maximum element nesting depth.
const MAX_DEPTH: usize = 64;

/// An XML element with its attributes, children and text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written, e.g. `saml:Assertion`.
    pub qname: String,
    /// Attributes in document order, keyed by their qualified name.
    pub attributes: Vec<(String, String)>,
    /// Child elements in document order.
    pub children: Vec<Element>,
    /// Concatenated character data of this element.
    pub text: String,
}

impl Element {
    /// Returns the local part of the element name.
    #[must_use]
    pub fn local_name(&self) -> &str {
        local_part(&self.qname)
    }

    /// Returns an attribute value by qualified or local name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|(key, _)| !key.starts_with("xmlns") && local_part(key) == name)
            })
            .map(|(_, value)| value.as_str())
    }

    /// Returns the `ID` attribute.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.attr("ID")
    }

    /// Returns the first child with the given local name.
    #[must_use]
    pub fn child(&self, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local_name() == local)
    }

    /// Returns all children with the given local name.
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.local_name() == local)
    }

    /// Returns the trimmed text of the first child with the given local name.
    #[must_use]
    pub fn child_text(&self, local: &str) -> Option<&str> {
        self.child(local).map(Element::trimmed_text)
    }

    /// Returns the first descendant (depth-first) with the given local name.
    #[must_use]
    pub fn descendant(&self, local: &str) -> Option<&Element> {
        for child in &self.children {
            if child.local_name() == local {
                return Some(child);
            }
            if let Some(found) = child.descendant(local) {
                return Some(found);
            }
        }
        None
    }

    /// Returns the text content with surrounding whitespace removed.
    #[must_use]
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    /// Returns true if this element has a direct `Signature` child.
    #[must_use]
    pub fn has_signature(&self) -> bool {
        self.child("Signature").is_some()
    }
}

/// Returns the local part of a qualified name.
#[must_use]
pub fn local_part(qname: &str) -> &str {
    qname.rsplit(':').next().unwrap_or(qname)
}

/// Escapes text for inclusion in element content or attribute values.
#[must_use]
pub fn escape(value: &str) -> String {
    quick_xml::escape::escape(value).into_owned()
}

/// Parses a document into its root element.
///
/// # Errors
///
/// Returns [`SamlError::XmlParse`] if the document is not well-formed, is
/// too large or too deep, contains a DTD, has no single root, or repeats an
/// `ID` value.
pub fn parse(xml: &str) -> SamlResult<Element> {
    if xml.len() > MAX_DOCUMENT_SIZE {
        return Err(SamlError::XmlParse(format!(
            "document exceeds {MAX_DOCUMENT_SIZE} bytes"
        )));
    }

    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut ids = HashSet::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if root.is_some() {
                    return Err(SamlError::XmlParse("content after root element".to_string()));
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(SamlError::XmlParse("document nested too deeply".to_string()));
                }
                let element = start_element(&e, &mut ids)?;
                stack.push(element);
            }
            Event::Empty(e) => {
                let element = start_element(&e, &mut ids)?;
                close_element(element, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| SamlError::XmlParse("unbalanced end tag".to_string()))?;
                close_element(element, &mut stack, &mut root)?;
            }
            Event::Text(e) => {
                let text = e.unescape()?;
                match stack.last_mut() {
                    Some(current) => current.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => {
                        return Err(SamlError::XmlParse("text outside root element".to_string()))
                    }
                }
            }
            Event::CData(e) => {
                let raw = e.into_inner();
                let text = std::str::from_utf8(&raw)
                    .map_err(|err| SamlError::XmlParse(format!("invalid UTF-8 in CDATA: {err}")))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(text);
                }
            }
            Event::DocType(_) => {
                return Err(SamlError::XmlParse("DTDs are not allowed".to_string()));
            }
            Event::Eof => break,
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) => {}
        }
    }

    if !stack.is_empty() {
        return Err(SamlError::XmlParse("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| SamlError::XmlParse("document has no root element".to_string()))
}

/// Byte ranges of an element inside its source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// From the opening `<` of the start tag to the closing `>` of the end tag.
    pub outer: Range<usize>,
    /// The element content between its start and end tags.
    pub inner: Range<usize>,
}

/// Finds the first element accepted by `matches` and returns its span.
///
/// The predicate receives the element's local name, its `ID` attribute and
/// its depth (the root is at depth 0).
///
/// # Errors
///
/// Returns [`SamlError::XmlParse`] if the document is not well-formed.
pub fn locate<F>(document: &str, matches: F) -> SamlResult<Option<Span>>
where
    F: Fn(&str, Option<&str>, usize) -> bool,
{
    let mut reader = Reader::from_str(document);
    let mut depth = 0usize;
    let mut open: Option<(usize, usize, usize)> = None;

    loop {
        let event = reader.read_event()?;
        let after = position(&reader)?;
        match event {
            Event::Start(e) => {
                if open.is_none() && start_matches(&e, depth, &matches)? {
                    open = Some((depth, tag_start(document, after)?, after));
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if open.is_none() && start_matches(&e, depth, &matches)? {
                    return Ok(Some(Span {
                        outer: tag_start(document, after)?..after,
                        inner: after..after,
                    }));
                }
            }
            Event::End(_) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SamlError::XmlParse("unbalanced end tag".to_string()))?;
                if let Some((open_depth, start, inner_start)) = open {
                    if open_depth == depth {
                        return Ok(Some(Span {
                            outer: start..after,
                            inner: inner_start..tag_start(document, after)?,
                        }));
                    }
                }
            }
            Event::DocType(_) => {
                return Err(SamlError::XmlParse("DTDs are not allowed".to_string()));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn start_matches<F>(e: &BytesStart<'_>, depth: usize, matches: &F) -> SamlResult<bool>
where
    F: Fn(&str, Option<&str>, usize) -> bool,
{
    let name = e.name();
    let qname = std::str::from_utf8(name.as_ref())
        .map_err(|err| SamlError::XmlParse(format!("invalid element name: {err}")))?;
    let id = e
        .try_get_attribute("ID")
        .map_err(|err| SamlError::XmlParse(err.to_string()))?
        .map(|attr| attr.unescape_value().map(std::borrow::Cow::into_owned))
        .transpose()?;
    Ok(matches(local_part(qname), id.as_deref(), depth))
}

pub(crate) fn position<R>(reader: &Reader<R>) -> SamlResult<usize> {
    usize::try_from(reader.buffer_position())
        .map_err(|_| SamlError::XmlParse("document offset out of range".to_string()))
}

/// Tags cannot contain a raw `<`, so the last one before the end of a tag
/// opens it.
fn tag_start(document: &str, tag_end: usize) -> SamlResult<usize> {
    document
        .get(..tag_end)
        .and_then(|head| head.rfind('<'))
        .ok_or_else(|| SamlError::XmlParse("tag start not found".to_string()))
}

fn start_element(e: &BytesStart<'_>, ids: &mut HashSet<String>) -> SamlResult<Element> {
    let name = e.name();
    let qname = std::str::from_utf8(name.as_ref())
        .map_err(|err| SamlError::XmlParse(format!("invalid element name: {err}")))?
        .to_string();

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SamlError::XmlParse(err.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| SamlError::XmlParse(format!("invalid attribute name: {err}")))?
            .to_string();
        let value = attr.unescape_value()?.into_owned();

        if key == "ID" && !ids.insert(value.clone()) {
            return Err(SamlError::XmlParse(format!("duplicate ID '{value}'")));
        }
        attributes.push((key, value));
    }

    Ok(Element {
        qname,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn close_element(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> SamlResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(SamlError::XmlParse("multiple root elements".to_string())),
    }
    Ok(())
}
