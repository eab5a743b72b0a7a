use crate::config::READ_BUFFER_SIZE;
use anyhow::{Context, Result};
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// An element subtree materialized from the dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            attrs.push((key, attr.unescape_value()?.into_owned()));
        }
        Ok(Self {
            tag,
            attrs,
            text: None,
            children: Vec::new(),
        })
    }

    fn push_text(&mut self, chunk: &str) {
        match &mut self.text {
            Some(text) => text.push_str(chunk),
            None => self.text = Some(chunk.to_string()),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    /// Text of the last `tag` child carrying text; later duplicates win.
    pub fn child_text(&self, tag: &str) -> Option<&str> {
        self.children
            .iter()
            .filter(|c| c.tag == tag)
            .filter_map(Element::text)
            .last()
    }

    /// Texts of `container/item` grandchildren, in document order.
    pub fn nested_texts<'a>(&'a self, container: &'a str, item: &'a str) -> Vec<&'a str> {
        self.children_named(container)
            .flat_map(|c| c.children_named(item))
            .filter_map(Element::text)
            .collect()
    }

    /// Number of nodes in this subtree, including itself.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Element::node_count).sum::<usize>()
    }
}

/// Streams the outermost `tag` elements of a dump, one subtree at a time.
///
/// Only the element currently being assembled is held; each finished element
/// is moved out to the caller, so memory stays bounded by one subtree no
/// matter how large the file is. Elements of the same tag nested inside a
/// matched element (e.g. `sublabels/label`) stay part of the outer subtree.
pub struct DumpReader {
    reader: Reader<BufReader<Box<dyn Read>>>,
    buf: Vec<u8>,
    tag: Vec<u8>,
    depth: usize,
    stack: Vec<Element>,
    live_nodes: usize,
    peak_nodes: usize,
    elements: u64,
    done: bool,
}

impl DumpReader {
    /// Opens a dump, decompressing `.gz` and `.bz2` files on the fly.
    pub fn open(path: &Path, tag: &str) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open dump: {}", path.display()))?;
        let source: Box<dyn Read> = match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Box::new(MultiGzDecoder::new(file)),
            Some("bz2") => Box::new(MultiBzDecoder::new(file)),
            _ => Box::new(file),
        };
        Ok(Self::from_reader(source, tag))
    }

    pub fn from_reader(source: Box<dyn Read>, tag: &str) -> Self {
        let mut reader = Reader::from_reader(BufReader::with_capacity(READ_BUFFER_SIZE, source));
        reader.trim_text(true);
        reader.expand_empty_elements(true);
        Self {
            reader,
            buf: Vec::with_capacity(4096),
            tag: tag.as_bytes().to_vec(),
            depth: 0,
            stack: Vec::new(),
            live_nodes: 0,
            peak_nodes: 0,
            elements: 0,
            done: false,
        }
    }

    /// Nodes of the partially built element currently held by the reader.
    pub fn live_nodes(&self) -> usize {
        self.live_nodes
    }

    /// Largest number of nodes held at once so far.
    pub fn peak_nodes(&self) -> usize {
        self.peak_nodes
    }

    /// Matched elements handed out so far.
    pub fn elements(&self) -> u64 {
        self.elements
    }

    fn next_element(&mut self) -> Result<Option<Element>> {
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf).with_context(|| {
                format!(
                    "Malformed XML near byte {}",
                    self.reader.buffer_position()
                )
            })?;
            match event {
                Event::Start(start) => {
                    if start.name().as_ref() == self.tag.as_slice() {
                        self.depth += 1;
                    }
                    if self.depth > 0 {
                        self.stack.push(Element::from_start(&start)?);
                        self.live_nodes += 1;
                        self.peak_nodes = self.peak_nodes.max(self.live_nodes);
                    }
                }
                Event::End(end) => {
                    if self.depth == 0 {
                        continue;
                    }
                    let Some(node) = self.stack.pop() else {
                        continue;
                    };
                    if end.name().as_ref() == self.tag.as_slice() {
                        self.depth -= 1;
                        if self.depth == 0 {
                            self.live_nodes = 0;
                            self.elements += 1;
                            return Ok(Some(node));
                        }
                    }
                    if let Some(parent) = self.stack.last_mut() {
                        parent.children.push(node);
                    }
                }
                Event::Text(text) => {
                    if let Some(top) = self.stack.last_mut() {
                        top.push_text(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(top) = self.stack.last_mut() {
                        top.push_text(&String::from_utf8_lossy(&data));
                    }
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

impl Iterator for DumpReader {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_element() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(xml: &str, tag: &str) -> DumpReader {
        DumpReader::from_reader(Box::new(Cursor::new(xml.as_bytes().to_vec())), tag)
    }

    fn collect(xml: &str, tag: &str) -> Vec<Element> {
        reader(xml, tag).collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn yields_outermost_target_elements() {
        let xml = r#"<labels>
            <label><name>Warp Records</name></label>
            <label><name>Ninja Tune</name></label>
        </labels>"#;
        let labels = collect(xml, "label");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].child_text("name"), Some("Warp Records"));
        assert_eq!(labels[1].child_text("name"), Some("Ninja Tune"));
    }

    #[test]
    fn child_text_outlives_the_tag_argument() {
        let labels = collect("<labels><label><name>A</name><name>B</name></label></labels>", "label");
        let text = {
            let tag = String::from("name");
            labels[0].child_text(&tag)
        };
        assert_eq!(text, Some("B"));
    }

    #[test]
    fn nested_same_tag_stays_inside_outer_element() {
        let xml = r#"<labels>
            <label>
                <name>Cult Hits</name>
                <sublabels>
                    <label id="2">Cult Hits Sub</label>
                    <label id="3">Other Sub</label>
                </sublabels>
            </label>
        </labels>"#;
        let labels = collect(xml, "label");
        assert_eq!(labels.len(), 1);
        assert_eq!(
            labels[0].nested_texts("sublabels", "label"),
            vec!["Cult Hits Sub", "Other Sub"]
        );
    }

    #[test]
    fn missing_tag_yields_nothing() {
        let xml = "<artists><artist><name>A</name></artist></artists>";
        assert!(collect(xml, "label").is_empty());
    }

    #[test]
    fn reads_attributes_and_unescapes_text() {
        let xml = r#"<masters><master id="123"><title>Drum &amp; Bass</title></master></masters>"#;
        let masters = collect(xml, "master");
        assert_eq!(masters[0].attr("id"), Some("123"));
        assert_eq!(masters[0].attr("missing"), None);
        assert_eq!(masters[0].child_text("title"), Some("Drum & Bass"));
    }

    #[test]
    fn empty_elements_are_expanded() {
        let xml = r#"<release id="1"><labels><label name="Warp" catno="WAP1"/></labels></release>"#;
        let releases = collect(xml, "release");
        let labels: Vec<_> = releases[0]
            .children_named("labels")
            .flat_map(|l| l.children_named("label"))
            .filter_map(|l| l.attr("name"))
            .collect();
        assert_eq!(labels, vec!["Warp"]);
    }

    #[test]
    fn blank_text_is_absent() {
        let xml = "<labels><label><name>   </name></label></labels>";
        let labels = collect(xml, "label");
        assert_eq!(labels[0].child_text("name"), None);
    }

    #[test]
    fn cdata_is_kept_as_text() {
        let xml = "<labels><label><name><![CDATA[A <B> C]]></name></label></labels>";
        let labels = collect(xml, "label");
        assert_eq!(labels[0].child_text("name"), Some("A <B> C"));
    }

    #[test]
    fn malformed_xml_yields_error_then_stops() {
        let mut r = reader("<labels><label><name>A</nam></label></labels>", "label");
        assert!(matches!(r.next(), Some(Err(_))));
        assert!(r.next().is_none());
    }

    #[test]
    fn held_nodes_stay_bounded_on_large_input() {
        let mut xml = String::from("<artists>");
        for i in 0..100_000 {
            xml.push_str(&format!(
                "<artist><name>Artist {i}</name><aliases><name>Alias {i}</name></aliases></artist>"
            ));
        }
        xml.push_str("</artists>");

        let mut r = reader(&xml, "artist");
        let mut count = 0u64;
        while let Some(element) = r.next() {
            let element = element.unwrap();
            assert_eq!(element.node_count(), 4);
            assert_eq!(r.live_nodes(), 0);
            count += 1;
        }
        assert_eq!(count, 100_000);
        assert_eq!(r.elements(), 100_000);
        assert_eq!(r.peak_nodes(), 4);
    }
}
