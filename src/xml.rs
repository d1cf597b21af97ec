//! Minimal owned element tree over quick-xml events.
//!
//! Feed dialects disagree on where things live, so the fetcher and the image
//! resolver query items through a handful of path lookups instead of binding
//! to one schema. Names are kept as written (`media:thumbnail`), text is
//! entity-unescaped and CDATA is taken verbatim. An element's `text` covers
//! its descendants too, in document order, so inline markup inside a title
//! or an XHTML `content` body still reads as text.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{NewsError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Trimmed text content, `None` when blank.
    pub fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    /// All descendants in document order, excluding `self`.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut found = Vec::new();
        let mut stack: Vec<&Element> = self.children.iter().rev().collect();
        while let Some(element) = stack.pop() {
            found.push(element);
            stack.extend(element.children.iter().rev());
        }
        found
    }

    /// First descendant named `name`, in document order.
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.descendants().into_iter().find(|el| el.name == name)
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn open(start: &BytesStart) -> Element {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let attributes = start
        .attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(Cow::into_owned)
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            (key, value)
        })
        .collect();

    Element {
        name,
        attributes,
        ..Default::default()
    }
}

/// Parse a whole document. The returned element is a synthetic root whose
/// children are the document's top-level elements.
pub fn parse_document(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = vec![Element::default()];

    loop {
        let event = reader.read_event().map_err(|e| {
            NewsError::Parse(format!("at byte {}: {}", reader.buffer_position(), e))
        })?;

        match event {
            Event::Start(start) => stack.push(open(&start)),
            Event::Empty(start) => {
                let element = open(&start);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(NewsError::Parse("unbalanced end tag".to_string()));
                }
                if let Some(element) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.text.push_str(&element.text);
                        parent.children.push(element);
                    }
                }
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map(Cow::into_owned)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&value);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(NewsError::Parse(format!(
            "{} unclosed element(s) at end of document",
            stack.len() - 1
        )));
    }

    let root = stack.pop().unwrap_or_default();
    if root.children.is_empty() {
        return Err(NewsError::Parse("document has no root element".to_string()));
    }

    Ok(root)
}

/// Every top-most `item` or `entry` element, whatever its prefix.
pub fn parse_items(xml: &str) -> Result<Vec<Element>> {
    let root = parse_document(xml)?;
    let mut items = Vec::new();
    collect_items(root, &mut items);
    Ok(items)
}

fn collect_items(element: Element, items: &mut Vec<Element>) {
    for child in element.children {
        match local_name(&child.name) {
            "item" | "entry" => items.push(child),
            _ => collect_items(child, items),
        }
    }
}
