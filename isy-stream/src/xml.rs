//! XML helpers for controller event documents.
//!
//! Event bodies are small, loosely structured documents, so lookups are
//! done by tag name anywhere in the tree rather than by fixed paths.

use xmltree::{Element, XMLNode};

use crate::error::XmlError;

/// Parse a document into its root element
pub fn parse(text: &str) -> Result<Element, XmlError> {
    Element::parse(text.as_bytes()).map_err(|e| XmlError::Malformed(e.to_string()))
}

/// First element named `tag`, searching `root` itself and then its
/// descendants depth-first in document order.
pub fn find_element<'a>(root: &'a Element, tag: &str) -> Option<&'a Element> {
    if root.name == tag {
        return Some(root);
    }
    root.children.iter().find_map(|child| match child {
        XMLNode::Element(element) => find_element(element, tag),
        _ => None,
    })
}

/// Every element named `tag`, in document order
pub fn find_all<'a>(root: &'a Element, tag: &str) -> Vec<&'a Element> {
    let mut found = Vec::new();
    collect(root, tag, &mut found);
    found
}

fn collect<'a>(element: &'a Element, tag: &str, found: &mut Vec<&'a Element>) {
    if element.name == tag {
        found.push(element);
    }
    for child in &element.children {
        if let XMLNode::Element(child) = child {
            collect(child, tag, found);
        }
    }
}

/// Text of the first element named `tag`; `None` when absent or empty
pub fn value_from_xml(root: &Element, tag: &str) -> Option<String> {
    find_element(root, tag)?
        .get_text()
        .map(|text| text.into_owned())
        .filter(|text| !text.is_empty())
}

/// Attribute `attr` of the first element named `tag`
pub fn attr_from_xml(root: &Element, tag: &str, attr: &str) -> Option<String> {
    find_element(root, tag)?.attributes.get(attr).cloned()
}

/// Like [`value_from_xml`] but reports which element was missing
pub fn require_value(root: &Element, tag: &str) -> Result<String, XmlError> {
    value_from_xml(root, tag).ok_or_else(|| XmlError::MissingElement(tag.to_string()))
}

/// Like [`attr_from_xml`] but reports which attribute was missing
pub fn require_attr(root: &Element, tag: &str, attr: &str) -> Result<String, XmlError> {
    attr_from_xml(root, tag, attr).ok_or_else(|| XmlError::MissingAttribute {
        element: tag.to_string(),
        attribute: attr.to_string(),
    })
}
