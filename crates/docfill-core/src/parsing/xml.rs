//! Owned XML event buffer used to rewrite OOXML parts.
//!
//! A part is read once into a flat list of events with element boundaries
//! precomputed, so callers can address elements as index spans, inspect them,
//! and write the part back with selected spans replaced. Events outside the
//! replaced spans are written exactly as they were read.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

#[derive(Debug, thiserror::Error)]
pub(crate) enum XmlError {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error("unclosed element <{0}>")]
    Unclosed(String),

    #[error("I/O error while writing XML: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) type XmlResult<T> = Result<T, XmlError>;

/// Inclusive event range of one element: its start tag through its end tag,
/// or a single self-closing tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
}

pub(crate) struct XmlDoc {
    events: Vec<Event<'static>>,
    /// For each start tag, the index of its end tag. Identity for all other events.
    closing: Vec<usize>,
}

impl XmlDoc {
    pub fn parse(xml: &[u8]) -> XmlResult<Self> {
        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::new();
        let mut events = Vec::new();
        let mut closing = Vec::new();
        let mut open: Vec<usize> = Vec::new();

        loop {
            let event = reader.read_event_into(&mut buf)?;
            let index = events.len();
            match &event {
                Event::Eof => break,
                Event::Start(_) => open.push(index),
                Event::End(_) => {
                    if let Some(start) = open.pop() {
                        closing[start] = index;
                    }
                }
                _ => {}
            }
            events.push(event.into_owned());
            closing.push(index);
            buf.clear();
        }

        if let Some(&start) = open.last() {
            let name = match &events[start] {
                Event::Start(e) => String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                _ => String::new(),
            };
            return Err(XmlError::Unclosed(name));
        }

        Ok(XmlDoc { events, closing })
    }

    pub fn events(&self, span: Span) -> &[Event<'static>] {
        &self.events[span.start..=span.end]
    }

    /// The document element.
    pub fn root(&self) -> Option<Span> {
        self.events
            .iter()
            .position(|e| matches!(e, Event::Start(_) | Event::Empty(_)))
            .map(|i| self.span_at(i))
    }

    fn span_at(&self, index: usize) -> Span {
        Span {
            start: index,
            end: self.closing[index],
        }
    }

    pub fn tag(&self, span: Span) -> Option<&BytesStart<'static>> {
        match &self.events[span.start] {
            Event::Start(e) | Event::Empty(e) => Some(e),
            _ => None,
        }
    }

    /// Qualified name of the element, e.g. `w:p`.
    pub fn name(&self, span: Span) -> &[u8] {
        self.tag(span).map(|e| e.name().into_inner()).unwrap_or(&[])
    }

    /// Name without its namespace prefix, e.g. `p` for `w:p`.
    pub fn local(&self, span: Span) -> &[u8] {
        local_name(self.name(span))
    }

    pub fn is_empty_element(&self, span: Span) -> bool {
        matches!(self.events[span.start], Event::Empty(_))
    }

    pub fn attr(&self, span: Span, key: &[u8]) -> Option<String> {
        self.tag(span).and_then(|e| attr_value(e, key))
    }

    /// Direct child elements of `span`, in document order.
    pub fn children(&self, span: Span) -> Vec<Span> {
        let mut out = Vec::new();
        if span.start == span.end {
            return out;
        }
        let mut i = span.start + 1;
        while i < span.end {
            match &self.events[i] {
                Event::Start(_) | Event::Empty(_) => {
                    let child = self.span_at(i);
                    out.push(child);
                    i = child.end + 1;
                }
                _ => i += 1,
            }
        }
        out
    }

    /// Direct children matched by local name, ignoring namespace prefixes.
    pub fn children_local(&self, span: Span, local: &[u8]) -> Vec<Span> {
        self.children(span)
            .into_iter()
            .filter(|c| self.local(*c) == local)
            .collect()
    }

    pub fn child_local(&self, span: Span, local: &[u8]) -> Option<Span> {
        self.children(span)
            .into_iter()
            .find(|c| self.local(*c) == local)
    }

    /// Serialize the part, substituting each span in `replacements` with its
    /// events. Overlapping replacements after the first are ignored.
    pub fn write_with(&self, mut replacements: Vec<(Span, Vec<Event<'static>>)>) -> XmlResult<Vec<u8>> {
        replacements.sort_by_key(|(span, _)| span.start);
        let mut writer = Writer::new(Vec::with_capacity(self.events.len() * 16));
        let mut pending = replacements.into_iter().peekable();
        let mut i = 0;

        while i < self.events.len() {
            while pending.peek().is_some_and(|(span, _)| span.start < i) {
                pending.next();
            }
            if let Some((span, events)) = pending.next_if(|(span, _)| span.start == i) {
                for event in events {
                    writer.write_event(event)?;
                }
                i = span.end + 1;
                continue;
            }
            writer.write_event(self.events[i].clone())?;
            i += 1;
        }

        Ok(writer.into_inner())
    }
}

pub(crate) fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().position(|&b| b == b':') {
        Some(i) => &name[i + 1..],
        None => name,
    }
}

pub(crate) fn attr_value(tag: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    tag.attributes()
        .with_checks(false)
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Copy of `tag` with attributes in `set` overriding (or appended after) the
/// originals and attributes in `drop` removed.
pub(crate) fn retag(tag: &BytesStart<'_>, set: &[(&str, &str)], drop: &[&str]) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in tag.attributes().with_checks(false).flatten() {
        let key = attr.key.as_ref();
        if drop.iter().any(|d| d.as_bytes() == key) || set.iter().any(|(k, _)| k.as_bytes() == key) {
            continue;
        }
        out.push_attribute(attr);
    }
    for (k, v) in set {
        out.push_attribute((*k, *v));
    }
    out
}

/// `prefix:local` if the reference name carries a prefix, else `local`.
pub(crate) fn qualify(reference: &[u8], local: &str) -> String {
    match reference.iter().position(|&b| b == b':') {
        Some(i) => format!("{}:{local}", String::from_utf8_lossy(&reference[..i])),
        None => local.to_string(),
    }
}

pub(crate) fn start(name: &str) -> Event<'static> {
    Event::Start(BytesStart::new(name.to_string()))
}

pub(crate) fn start_with(name: &str, attrs: &[(&str, &str)]) -> Event<'static> {
    let mut tag = BytesStart::new(name.to_string());
    for attr in attrs {
        tag.push_attribute(*attr);
    }
    Event::Start(tag)
}

pub(crate) fn empty(name: &str) -> Event<'static> {
    Event::Empty(BytesStart::new(name.to_string()))
}

pub(crate) fn empty_with(name: &str, attrs: &[(&str, &str)]) -> Event<'static> {
    let mut tag = BytesStart::new(name.to_string());
    for attr in attrs {
        tag.push_attribute(*attr);
    }
    Event::Empty(tag)
}

pub(crate) fn end(name: &str) -> Event<'static> {
    Event::End(BytesEnd::new(name.to_string()))
}

pub(crate) fn text(value: &str) -> Event<'static> {
    Event::Text(BytesText::new(value).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0"?><root a="1"><x:item k="v">one</x:item><x:item/><other><x:item>deep</x:item></other></root>"#;

    #[test]
    fn children_are_direct_only() {
        let doc = XmlDoc::parse(XML.as_bytes()).unwrap();
        let root = doc.root().unwrap();
        assert_eq!(doc.name(root), b"root");
        let items = doc.children_local(root, b"item");
        assert_eq!(items.len(), 2);
        assert!(doc.is_empty_element(items[1]));
        assert_eq!(doc.attr(items[0], b"k").as_deref(), Some("v"));
        let other = doc.child_local(root, b"other").unwrap();
        assert_eq!(doc.children_local(other, b"item").len(), 1);
    }

    #[test]
    fn untouched_document_round_trips() {
        let doc = XmlDoc::parse(XML.as_bytes()).unwrap();
        let out = doc.write_with(Vec::new()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), XML);
    }

    #[test]
    fn replaced_span_is_substituted() {
        let doc = XmlDoc::parse(XML.as_bytes()).unwrap();
        let root = doc.root().unwrap();
        let first = doc.children(root)[0];
        let name = qualify(doc.name(first), "item");
        let replacement = vec![start(&name), text("a<b"), end(&name)];
        let out = doc.write_with(vec![(first, replacement)]).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("<x:item>a&lt;b</x:item><x:item/>"));
    }

    #[test]
    fn retag_overrides_and_drops() {
        let doc = XmlDoc::parse(br#"<c r="B3" s="4" t="s"/>"#).unwrap();
        let tag = doc.tag(doc.root().unwrap()).unwrap();
        let new = retag(tag, &[("t", "inlineStr")], &["s"]);
        assert_eq!(attr_value(&new, b"r").as_deref(), Some("B3"));
        assert_eq!(attr_value(&new, b"t").as_deref(), Some("inlineStr"));
        assert_eq!(attr_value(&new, b"s"), None);
    }

    #[test]
    fn unclosed_element_is_an_error() {
        assert!(XmlDoc::parse(b"<a><b></b>").is_err());
    }
}
