//! XML to JSON conversion.
//!
//! The mapping mirrors the usual "XML as nested maps" convention:
//! - the root element name becomes the only top-level key
//! - an element holding only text becomes a string (`<b>1</b>` → `"1"`)
//! - attributes become `-name` keys
//! - text next to attributes or child elements goes under `#text`
//! - repeated sibling elements collapse into an array, in document order
//! - every scalar stays a string; nothing is type-inferred

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

use crate::{Transform, TransformError};

const ATTR_PREFIX: char = '-';
const TEXT_KEY: &str = "#text";

/// Converts an XML document to a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlToJson;

impl XmlToJson {
    /// Parse `input` into the JSON tree without serializing it.
    pub fn to_value(&self, input: &[u8]) -> Result<Value, TransformError> {
        let mut reader = Reader::from_reader(input);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<(String, Value)> = None;

        loop {
            let event = reader.read_event().map_err(|e| malformed(&reader, e))?;
            match event {
                Event::Start(start) => {
                    let element = Element::open(&start, &reader)?;
                    check_single_root(&stack, &root, &element)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = Element::open(&start, &reader)?;
                    check_single_root(&stack, &root, &element)?;
                    close(element, &mut stack, &mut root);
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| TransformError::Malformed {
                        position: reader.buffer_position() as u64,
                        detail: "closing tag without matching opening tag".to_string(),
                    })?;
                    close(element, &mut stack, &mut root);
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(|e| malformed(&reader, e))?;
                    append_text(&mut stack, &text, &reader)?;
                }
                Event::CData(data) => {
                    let text = std::str::from_utf8(&data).map_err(|e| malformed(&reader, e))?;
                    append_text(&mut stack, text, &reader)?;
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions, DOCTYPE.
                _ => {}
            }
        }

        if let Some(open) = stack.pop() {
            return Err(TransformError::Unclosed { name: open.name });
        }
        let (name, value) = root.ok_or(TransformError::NoRoot)?;

        let mut document = Map::new();
        document.insert(name, value);
        Ok(Value::Object(document))
    }
}

impl Transform for XmlToJson {
    fn name(&self) -> &str {
        "xml-to-json"
    }

    fn convert(&self, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        let value = self.to_value(input)?;
        serde_json::to_vec(&value).map_err(|e| TransformError::Encode(e.to_string()))
    }
}

/// An element whose closing tag has not been seen yet.
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Map<String, Value>,
    text: String,
}

impl Element {
    fn open(start: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Self, TransformError> {
        let name = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| malformed(reader, e))?
            .to_string();

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| malformed(reader, e))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| malformed(reader, e))?
                .to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| malformed(reader, e))?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name,
            attributes,
            children: Map::new(),
            text: String::new(),
        })
    }

    fn into_value(self) -> Value {
        if self.attributes.is_empty() && self.children.is_empty() {
            return Value::String(self.text);
        }

        let mut map = self.children;
        for (key, value) in self.attributes {
            map.insert(format!("{ATTR_PREFIX}{key}"), Value::String(value));
        }
        if !self.text.is_empty() {
            map.insert(TEXT_KEY.to_string(), Value::String(self.text));
        }
        Value::Object(map)
    }
}

fn check_single_root(
    stack: &[Element],
    root: &Option<(String, Value)>,
    element: &Element,
) -> Result<(), TransformError> {
    if stack.is_empty() && root.is_some() {
        return Err(TransformError::MultipleRoots {
            name: element.name.clone(),
        });
    }
    Ok(())
}

fn close(element: Element, stack: &mut [Element], root: &mut Option<(String, Value)>) {
    let name = element.name.clone();
    let value = element.into_value();
    match stack.last_mut() {
        Some(parent) => insert_child(&mut parent.children, name, value),
        None => *root = Some((name, value)),
    }
}

/// Add a child, turning repeated names into an array.
fn insert_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            children.insert(name, value);
        }
    }
}

fn append_text(
    stack: &mut [Element],
    text: &str,
    reader: &Reader<&[u8]>,
) -> Result<(), TransformError> {
    match stack.last_mut() {
        Some(top) => {
            if !text.is_empty() {
                // Text split by child elements keeps its segments apart.
                if !top.text.is_empty() {
                    top.text.push(' ');
                }
                top.text.push_str(text);
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(TransformError::TextOutsideRoot {
            position: reader.buffer_position() as u64,
        }),
    }
}

fn malformed(reader: &Reader<&[u8]>, err: impl std::fmt::Display) -> TransformError {
    TransformError::Malformed {
        position: reader.buffer_position() as u64,
        detail: err.to_string(),
    }
}
