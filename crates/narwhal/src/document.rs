//! Owned, mutable SVG tree.
//!
//! `roxmltree` gives a fast read-only view; export copies need to be edited (attributes patched,
//! shapes injected, labels flattened), so the parsed view is converted into this small owned
//! tree. Namespace declarations are kept as plain `xmlns`/`xmlns:*` attributes on the element
//! that declared them, which keeps serialization a straight walk.

use crate::error::DocumentError;
use indexmap::IndexMap;

pub const SVG_NS: &str = "http://www.w3.org/2000/svg";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    /// Qualified name as written (`svg`, `xlink:href` style prefixes preserved).
    pub name: String,
    pub attrs: IndexMap<String, String>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        self.attrs.shift_remove(name)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Concatenated descendant text.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Visits this element and all descendant elements, parents before children.
    pub fn visit(&self, f: &mut dyn FnMut(&Element)) {
        f(self);
        for child in self.child_elements() {
            child.visit(f);
        }
    }

    /// Mutable pre-order walk. The callback runs on a parent before its (possibly edited)
    /// children are visited.
    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut Element)) {
        f(self);
        for child in &mut self.children {
            if let Node::Element(e) = child {
                e.visit_mut(f);
            }
        }
    }

    /// Removes every descendant element for which `drop` returns true.
    pub fn remove_descendants(&mut self, drop: &dyn Fn(&Element) -> bool) -> usize {
        let before = self.children.len();
        self.children.retain(|c| match c {
            Node::Element(e) => !drop(e),
            Node::Text(_) => true,
        });
        let mut removed = before - self.children.len();
        for child in &mut self.children {
            if let Node::Element(e) = child {
                removed += e.remove_descendants(drop);
            }
        }
        removed
    }

    pub fn count_descendants(&self, pred: &dyn Fn(&Element) -> bool) -> usize {
        let mut n = 0;
        self.visit(&mut |e| {
            if pred(e) {
                n += 1;
            }
        });
        n
    }
}

fn collect_text(el: &Element, out: &mut String) {
    for child in &el.children {
        match child {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => collect_text(e, out),
        }
    }
}

/// A rendered diagram.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDocument {
    root: Element,
}

impl VectorDocument {
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let mut opts = roxmltree::ParsingOptions::default();
        opts.allow_dtd = true;
        let doc = roxmltree::Document::parse_with_options(text, opts)?;
        let root = doc.root_element();
        if root.tag_name().name() != "svg" {
            return Err(DocumentError::NotSvg {
                found: root.tag_name().name().to_string(),
            });
        }
        Ok(Self {
            root: build_element(root),
        })
    }

    pub fn from_root(root: Element) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn into_root(self) -> Element {
        self.root
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.root.attr(name)
    }

    pub fn to_svg_string(&self) -> String {
        let mut out = String::with_capacity(1024);
        write_element(&mut out, &self.root);
        out
    }
}

fn build_element(node: roxmltree::Node<'_, '_>) -> Element {
    let tag = node.tag_name();
    let mut el = Element::new(qualified_name(node, tag.name(), tag.namespace()));

    let inherited: Vec<(Option<String>, String)> = node
        .parent_element()
        .map(|p| {
            p.namespaces()
                .map(|ns| (ns.name().map(str::to_string), ns.uri().to_string()))
                .collect()
        })
        .unwrap_or_default();
    for ns in node.namespaces() {
        if ns.name() == Some("xml") {
            continue;
        }
        let decl = (ns.name().map(str::to_string), ns.uri().to_string());
        if inherited.contains(&decl) {
            continue;
        }
        let key = match ns.name() {
            Some(prefix) => format!("xmlns:{prefix}"),
            None => "xmlns".to_string(),
        };
        el.attrs.insert(key, ns.uri().to_string());
    }

    for a in node.attributes() {
        el.attrs.insert(
            qualified_name(node, a.name(), a.namespace()),
            a.value().to_string(),
        );
    }

    for child in node.children() {
        if child.is_element() {
            el.children.push(Node::Element(build_element(child)));
        } else if child.is_text() {
            if let Some(text) = child.text() {
                el.children.push(Node::Text(text.to_string()));
            }
        }
    }
    el
}

fn qualified_name(node: roxmltree::Node<'_, '_>, local: &str, ns: Option<&str>) -> String {
    let Some(uri) = ns else {
        return local.to_string();
    };
    if uri == XML_NS {
        return format!("xml:{local}");
    }
    match node.lookup_prefix(uri) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_string(),
    }
}

fn write_element(out: &mut String, el: &Element) {
    out.push('<');
    out.push_str(&el.name);
    for (k, v) in &el.attrs {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        escape_into(out, v, true);
        out.push('"');
    }
    if el.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &el.children {
        match child {
            Node::Element(e) => write_element(out, e),
            Node::Text(t) => escape_into(out, t, false),
        }
    }
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}

fn escape_into(out: &mut String, text: &str, attr: bool) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attr => out.push_str("&quot;"),
            '\n' if attr => out.push_str("&#10;"),
            _ => out.push(ch),
        }
    }
}
