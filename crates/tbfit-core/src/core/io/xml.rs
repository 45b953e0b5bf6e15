use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Malformed XML in '{origin}': {message}")]
    Malformed { origin: String, message: String },
    #[error("Failed to serialize XML document: {0}")]
    Serialize(String),
    #[error("Invalid value '{value}' for <{element} {attribute}=...>")]
    InvalidValue {
        element: String,
        attribute: String,
        value: String,
    },
    #[error("Material '{0}' not found in the parameter database")]
    MaterialNotFound(String),
    #[error("Required field <{0}> is missing from the document")]
    MissingField(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    Comment(String),
    CData(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Overwrites an existing attribute in place, or appends a new one.
    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut XmlElement> {
        self.children.iter_mut().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|el| el.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.elements_mut().find(|el| el.name == name)
    }

    /// Appends `element` after the last child, reusing the indentation of its
    /// siblings when the element is laid out one child per line.
    pub fn push_element(&mut self, element: XmlElement) {
        if !matches!(self.children.last(), Some(node) if is_blank(node)) {
            self.children.push(XmlNode::Element(element));
            return;
        }
        let at = self.children.len() - 1;
        let indent = self.children[..at].iter().rev().find(|node| is_blank(node)).cloned();
        self.children.insert(at, XmlNode::Element(element));
        if let Some(indent) = indent {
            self.children.insert(at, indent);
        }
    }

    /// Drops child elements for which `keep` returns false, together with the
    /// blank text that precedes each of them. Other nodes are kept.
    pub fn retain_elements(&mut self, mut keep: impl FnMut(&XmlElement) -> bool) {
        let mut kept = Vec::with_capacity(self.children.len());
        for node in self.children.drain(..) {
            match node {
                XmlNode::Element(el) if !keep(&el) => {
                    if kept.last().is_some_and(is_blank) {
                        kept.pop();
                    }
                }
                other => kept.push(other),
            }
        }
        self.children = kept;
    }

    /// Text content with surrounding whitespace removed.
    pub fn text(&self) -> String {
        let text: String = self
            .children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(t) | XmlNode::CData(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        text.trim().to_string()
    }

    /// Replaces all text content with `text`, keeping child elements and comments.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children
            .retain(|node| !matches!(node, XmlNode::Text(_) | XmlNode::CData(_)));
        self.children.insert(0, XmlNode::Text(text.into()));
    }
}

fn is_blank(node: &XmlNode) -> bool {
    matches!(node, XmlNode::Text(t) if t.trim().is_empty())
}

/// A parsed document. Text is kept verbatim, including the whitespace between
/// elements, so writing an unmodified document reproduces its layout.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    pub root: XmlElement,
}

impl XmlDocument {
    pub fn new(root: XmlElement) -> Self {
        Self { root }
    }

    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let content = std::fs::read_to_string(path).map_err(|e| DocumentError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse_with_origin(&content, &path.to_string_lossy())
    }

    pub fn parse(source: &str) -> Result<Self, DocumentError> {
        Self::parse_with_origin(source, "<memory>")
    }

    fn parse_with_origin(source: &str, origin: &str) -> Result<Self, DocumentError> {
        let malformed = |message: String| DocumentError::Malformed {
            origin: origin.to_string(),
            message,
        };

        let mut reader = Reader::from_str(source);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| malformed(format!("at byte {}: {e}", reader.buffer_position())))?;

            match event {
                Event::Start(start) => {
                    stack.push(element_from_start(&start).map_err(malformed)?);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start).map_err(malformed)?;
                    attach(element, &mut stack, &mut root).map_err(malformed)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| malformed("unexpected closing tag".to_string()))?;
                    attach(element, &mut stack, &mut root).map_err(malformed)?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(|e| malformed(e.to_string()))?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Text(text.into_owned()));
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(XmlNode::CData(String::from_utf8_lossy(&data).into_owned()));
                    }
                }
                Event::Comment(comment) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Comment(
                            String::from_utf8_lossy(&comment).into_owned(),
                        ));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(malformed(format!("element <{}> is never closed", open.name)));
        }
        root.map(Self::new)
            .ok_or_else(|| malformed("document has no root element".to_string()))
    }

    pub fn to_xml_string(&self) -> Result<String, DocumentError> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(serialize_error)?;
        writer
            .write_event(Event::Text(BytesText::new("\n")))
            .map_err(serialize_error)?;
        write_element(&mut writer, &self.root)?;

        let mut out = String::from_utf8(writer.into_inner())
            .map_err(|e| DocumentError::Serialize(e.to_string()))?;
        out.push('\n');
        Ok(out)
    }

    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        let content = self.to_xml_string()?;
        std::fs::write(path, content).map_err(|e| DocumentError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }
}

fn serialize_error(e: impl std::fmt::Display) -> DocumentError {
    DocumentError::Serialize(e.to_string())
}

fn element_from_start(start: &BytesStart) -> Result<XmlElement, String> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    element: XmlElement,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_element(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(format!("second root element <{}>", element.name)),
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &XmlElement) -> Result<(), DocumentError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(serialize_error);
    }

    writer.write_event(Event::Start(start)).map_err(serialize_error)?;
    for node in &element.children {
        match node {
            XmlNode::Element(child) => write_element(writer, child)?,
            XmlNode::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(serialize_error)?,
            XmlNode::Comment(text) => writer
                .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))
                .map_err(serialize_error)?,
            XmlNode::CData(text) => writer
                .write_event(Event::CData(BytesCData::new(text.as_str())))
                .map_err(serialize_error)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(serialize_error)
}
