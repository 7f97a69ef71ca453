//! Exclusive XML canonicalization of a subtree.
//!
//! The element is cut out of its document with each namespace declaration
//! moved onto the outermost element that visibly uses it, which is where
//! exclusive canonicalization renders it. Ancestor declarations stay in
//! scope and unused ones disappear. `xml_canonicalization` then produces
//! the canonical serialization of that detached subtree.

use std::collections::BTreeMap;
use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use xml_canonicalization::Canonicalizer;

use crate::error::{SamlError, SamlResult};
use crate::xml::position;

/// Namespace bindings by prefix (`""` is the default namespace).
type Bindings = BTreeMap<String, String>;

/// Canonicalizes the element spanning `element` in `document`, leaving out
/// the bytes in `exclude` (an enveloped signature).
pub(crate) fn canonicalize(
    document: &str,
    element: Range<usize>,
    exclude: Option<Range<usize>>,
) -> SamlResult<String> {
    let subtree = detach(document, &element, exclude.as_ref())?;

    let mut output = Vec::new();
    Canonicalizer::read_from_str(&subtree)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| SamlError::XmlParse(format!("canonicalization failed: {e}")))?;

    String::from_utf8(output)
        .map_err(|e| SamlError::XmlParse(format!("canonical form is not UTF-8: {e}")))
}

fn detach(
    document: &str,
    element: &Range<usize>,
    exclude: Option<&Range<usize>>,
) -> SamlResult<String> {
    let mut reader = Reader::from_str(document);
    let mut in_scope: Vec<Bindings> = vec![Bindings::new()];
    let mut rendered: Vec<Bindings> = Vec::new();
    let mut out = String::with_capacity(element.len());

    loop {
        let start = position(&reader)?;
        let event = reader.read_event()?;
        let end = position(&reader)?;
        if end > element.end || matches!(event, Event::Eof) {
            break;
        }
        let emit = start >= element.start
            && !exclude.is_some_and(|skip| start >= skip.start && end <= skip.end);

        match event {
            Event::Start(e) => {
                let scope = declare(&e, in_scope.last())?;
                if emit {
                    let visible = start_tag(&mut out, &e, &scope, rendered.last(), false)?;
                    rendered.push(visible);
                }
                in_scope.push(scope);
            }
            Event::Empty(e) => {
                if emit {
                    let scope = declare(&e, in_scope.last())?;
                    start_tag(&mut out, &e, &scope, rendered.last(), true)?;
                }
            }
            Event::End(_) => {
                in_scope.pop();
                if emit {
                    rendered.pop();
                    out.push_str(&document[start..end]);
                }
            }
            Event::DocType(_) => {
                return Err(SamlError::XmlParse("DTDs are not allowed".to_string()));
            }
            Event::Decl(_) => {}
            _ => {
                if emit {
                    out.push_str(&document[start..end]);
                }
            }
        }
    }

    if out.is_empty() {
        return Err(SamlError::XmlParse("element to canonicalize not found".to_string()));
    }
    Ok(out)
}

/// Returns the bindings in scope inside `e`.
fn declare(e: &BytesStart<'_>, parent: Option<&Bindings>) -> SamlResult<Bindings> {
    let mut scope = parent.cloned().unwrap_or_default();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SamlError::XmlParse(err.to_string()))?;
        let key = utf8(attr.key.into_inner())?;
        let prefix = if key == "xmlns" {
            Some("")
        } else {
            key.strip_prefix("xmlns:")
        };
        if let Some(prefix) = prefix {
            scope.insert(prefix.to_string(), utf8(&attr.value)?.to_string());
        }
    }
    Ok(scope)
}

/// Writes the start tag of `e` with the declarations exclusive
/// canonicalization renders on it, and returns the bindings rendered so far.
fn start_tag(
    out: &mut String,
    e: &BytesStart<'_>,
    scope: &Bindings,
    parent: Option<&Bindings>,
    empty: bool,
) -> SamlResult<Bindings> {
    let name = e.name();
    let qname = utf8(name.as_ref())?;
    let mut visible = parent.cloned().unwrap_or_default();

    let mut used = vec![prefix_of(qname)];
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SamlError::XmlParse(err.to_string()))?;
        let key = utf8(attr.key.into_inner())?;
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        if let Some((prefix, _)) = key.split_once(':') {
            if prefix != "xml" {
                used.push(prefix);
            }
        }
        attributes.push((key, utf8(&attr.value)?.replace('"', "&quot;")));
    }
    used.sort_unstable();
    used.dedup();

    out.push('<');
    out.push_str(qname);
    for prefix in used {
        let uri = match scope.get(prefix) {
            Some(uri) => uri.as_str(),
            None if prefix.is_empty() => "",
            None => {
                return Err(SamlError::XmlParse(format!(
                    "namespace prefix '{prefix}' is not declared"
                )))
            }
        };
        let current = visible.get(prefix).map_or("", String::as_str);
        if uri == current {
            continue;
        }
        if prefix.is_empty() {
            out.push_str(&format!(r#" xmlns="{uri}""#));
        } else {
            out.push_str(&format!(r#" xmlns:{prefix}="{uri}""#));
        }
        visible.insert(prefix.to_string(), uri.to_string());
    }
    for (key, value) in attributes {
        out.push_str(&format!(r#" {key}="{value}""#));
    }
    out.push_str(if empty { "/>" } else { ">" });
    Ok(visible)
}

fn prefix_of(qname: &str) -> &str {
    qname.split_once(':').map_or("", |(prefix, _)| prefix)
}

fn utf8(bytes: &[u8]) -> SamlResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| SamlError::XmlParse(format!("invalid UTF-8: {e}")))
}
