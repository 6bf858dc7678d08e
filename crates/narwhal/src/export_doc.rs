//! Self-contained export copies of a rendered document.

use crate::config::ExportConfig;
use crate::document::{Element, Node, SVG_NS, VectorDocument, XLINK_NS};
use crate::geometry::{Bounds, fmt_num, is_positive, parse_view_box};
use crate::size::ResolvedSize;
use regex::Regex;
use std::sync::OnceLock;

/// Attribute tagging the injected background shape.
pub const BACKGROUND_MARKER: &str = "data-export-background";
/// Attribute tagging the injected font style.
pub const FONT_STYLE_MARKER: &str = "data-export-font";

const LABEL_FONT_SIZE: f64 = 16.0;
const LABEL_LINE_HEIGHT: f64 = 1.2;

/// A sanitized copy of a [`VectorDocument`], ready for rasterization.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportDocument {
    doc: VectorDocument,
    size: ResolvedSize,
}

impl ExportDocument {
    pub fn document(&self) -> &VectorDocument {
        &self.doc
    }

    pub fn size(&self) -> &ResolvedSize {
        &self.size
    }

    pub fn to_svg_string(&self) -> String {
        self.doc.to_svg_string()
    }

    /// Number of export background shapes anywhere in the tree.
    pub fn background_count(&self) -> usize {
        self.doc
            .root()
            .count_descendants(&|e| e.has_attr(BACKGROUND_MARKER))
    }
}

pub fn build_export_document(
    doc: &VectorDocument,
    size: &ResolvedSize,
    config: &ExportConfig,
) -> ExportDocument {
    let mut copy = doc.clone();
    let root = copy.root_mut();

    root.set_attr("xmlns", SVG_NS);
    root.set_attr("xmlns:xlink", XLINK_NS);
    root.set_attr("width", fmt_num(size.width));
    root.set_attr("height", fmt_num(size.height));
    let viewport = match parse_view_box(&size.viewport) {
        Some(vb) => vb,
        None => Bounds::new(0.0, 0.0, size.width, size.height),
    };
    root.set_attr("viewBox", viewport.to_viewport());

    strip_external_references(root);
    flatten_foreign_object_labels(root);

    // Style first, then the background, then the original content.
    root.remove_descendants(&|e| e.has_attr(BACKGROUND_MARKER) || e.has_attr(FONT_STYLE_MARKER));
    let background = background_rect(viewport, &config.background);
    root.children.insert(0, Node::Element(background));
    root.children
        .insert(0, Node::Element(font_style(&config.font_family)));

    ExportDocument {
        doc: copy,
        size: size.clone(),
    }
}

fn background_rect(area: Bounds, fill: &str) -> Element {
    Element::new("rect")
        .with_attr(BACKGROUND_MARKER, "true")
        .with_attr("x", fmt_num(area.x))
        .with_attr("y", fmt_num(area.y))
        .with_attr("width", fmt_num(area.width))
        .with_attr("height", fmt_num(area.height))
        .with_attr("fill", fill)
        .with_attr("stroke", "none")
}

fn font_style(font_family: &str) -> Element {
    let css = format!(
        "text, tspan, foreignObject, foreignObject * {{ font-family: {font_family} !important; }}"
    );
    Element::new("style")
        .with_attr(FONT_STYLE_MARKER, "true")
        .with_attr("type", "text/css")
        .with_child(Node::Text(css))
}

fn import_rule_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@import[^;]*;?").expect("valid regex"))
}

fn css_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)]*))\s*\)"#).expect("valid regex")
    })
}

fn is_self_contained_ref(value: &str) -> bool {
    let v = value.trim_start();
    v.starts_with('#') || v.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:"))
}

/// Replaces every `url(...)` pointing outside the document with `none`.
fn neutralize_css_urls(text: &str) -> Option<String> {
    if !text.to_ascii_lowercase().contains("url(") {
        return None;
    }
    let mut changed = false;
    let out = css_url_regex().replace_all(text, |caps: &regex::Captures<'_>| {
        let target = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map_or("", |m| m.as_str());
        if is_self_contained_ref(target) {
            caps[0].to_string()
        } else {
            changed = true;
            "none".to_string()
        }
    });
    changed.then(|| out.into_owned())
}

fn is_href(name: &str) -> bool {
    name.rsplit(':').next() == Some("href")
}

/// Drops scripts, non-local references and stylesheet imports.
fn strip_external_references(root: &mut Element) {
    root.remove_descendants(&|e| e.local_name() == "script");
    root.visit_mut(&mut |e| {
        let before = e.attrs.len();
        e.attrs
            .retain(|name, value| !is_href(name) || is_self_contained_ref(value));
        let mut dropped = before - e.attrs.len();
        for value in e.attrs.values_mut() {
            if let Some(clean) = neutralize_css_urls(value) {
                *value = clean;
                dropped += 1;
            }
        }
        if e.local_name() == "style" {
            for child in &mut e.children {
                let Node::Text(css) = child else {
                    continue;
                };
                let mut text = import_rule_regex().replace_all(css, "").into_owned();
                if let Some(clean) = neutralize_css_urls(&text) {
                    text = clean;
                }
                if text != *css {
                    *css = text;
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            tracing::debug!(element = %e.name, dropped, "dropping external references from export copy");
        }
    });
}

/// Replaces HTML labels in `<foreignObject>` with plain `<text>`; rasterizers draw nothing for
/// embedded HTML.
fn flatten_foreign_object_labels(el: &mut Element) {
    for child in &mut el.children {
        let Node::Element(e) = child else {
            continue;
        };
        if e.local_name() == "foreignObject" {
            if let Some(text) = label_text_element(e) {
                *child = Node::Element(text);
            }
            continue;
        }
        flatten_foreign_object_labels(e);
    }
}

fn label_text_element(fo: &Element) -> Option<Element> {
    let num = |name: &str| fo.attr(name).and_then(|v| v.trim().parse::<f64>().ok());
    let width = num("width").filter(|v| is_positive(*v))?;
    let height = num("height").filter(|v| is_positive(*v))?;
    let x = num("x").unwrap_or(0.0);
    let y = num("y").unwrap_or(0.0);

    let mut raw = String::new();
    collect_label_lines(fo, &mut raw);
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }

    let cx = fmt_num(x + width / 2.0);
    let step = LABEL_FONT_SIZE * LABEL_LINE_HEIGHT;
    let first_dy = -step * (lines.len() as f64 - 1.0) / 2.0;
    let mut text = Element::new("text")
        .with_attr("x", cx.clone())
        .with_attr("y", fmt_num(y + height / 2.0))
        .with_attr("text-anchor", "middle")
        .with_attr("dominant-baseline", "central")
        .with_attr("font-size", fmt_num(LABEL_FONT_SIZE))
        .with_attr("fill", "#333");
    for (i, line) in lines.iter().enumerate() {
        let dy = if i == 0 { first_dy } else { step };
        text.children.push(Node::Element(
            Element::new("tspan")
                .with_attr("x", cx.clone())
                .with_attr("dy", fmt_num(dy))
                .with_child(Node::Text((*line).to_string())),
        ));
    }
    Some(text)
}

fn collect_label_lines(el: &Element, out: &mut String) {
    for child in &el.children {
        match child {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => match e.local_name() {
                "br" => out.push('\n'),
                "div" | "p" | "li" => {
                    out.push('\n');
                    collect_label_lines(e, out);
                    out.push('\n');
                }
                _ => collect_label_lines(e, out),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> VectorDocument {
        VectorDocument::parse(
            r##"<svg id="d1" width="100%" style="max-width: 300px;" viewBox="0 0 300 150" xmlns="http://www.w3.org/2000/svg">
<style>@import url("https://fonts.example.com/x.css"); #d1 { fill: #333; }</style>
<script>alert(1)</script>
<g class="node"><rect width="80" height="40"/>
<foreignObject x="0" y="0" width="80" height="40"><div xmlns="http://www.w3.org/1999/xhtml"><span>Start<br/>here</span></div></foreignObject>
</g>
<image href="https://example.com/logo.png" width="10" height="10"/>
<use href="#marker"/>
</svg>"##,
        )
        .unwrap()
    }

    fn first_child(doc: &ExportDocument, i: usize) -> &Element {
        doc.document().root().child_elements().nth(i).unwrap()
    }

    #[test]
    fn injects_font_style_then_single_background_before_content() {
        let size = ResolvedSize::new(300.0, 150.0);
        let out = build_export_document(&source(), &size, &ExportConfig::default());

        let style = first_child(&out, 0);
        assert_eq!(style.name, "style");
        assert!(style.has_attr(FONT_STYLE_MARKER));
        assert!(style.text_content().contains("Noto Sans SC"));

        let bg = first_child(&out, 1);
        assert_eq!(bg.name, "rect");
        assert!(bg.has_attr(BACKGROUND_MARKER));
        assert_eq!(bg.attr("width"), Some("300"));
        assert_eq!(bg.attr("height"), Some("150"));
        assert_eq!(bg.attr("fill"), Some("#ffffff"));
        assert_eq!(out.background_count(), 1);
    }

    #[test]
    fn rebuilding_from_an_export_copy_keeps_exactly_one_background() {
        let size = ResolvedSize::new(300.0, 150.0);
        let once = build_export_document(&source(), &size, &ExportConfig::default());
        let twice = build_export_document(once.document(), &size, &ExportConfig::default());
        assert_eq!(twice.background_count(), 1);
        assert_eq!(
            twice
                .document()
                .root()
                .count_descendants(&|e| e.has_attr(FONT_STYLE_MARKER)),
            1
        );
    }

    #[test]
    fn sets_explicit_size_and_namespaces_without_touching_source() {
        let src = source();
        let before = src.clone();
        let size = ResolvedSize::new(640.0, 320.0);
        let out = build_export_document(&src, &size, &ExportConfig::default());
        let root = out.document().root();
        assert_eq!(root.attr("width"), Some("640"));
        assert_eq!(root.attr("height"), Some("320"));
        assert_eq!(root.attr("viewBox"), Some("0 0 640 320"));
        assert_eq!(root.attr("xmlns"), Some(SVG_NS));
        assert_eq!(root.attr("xmlns:xlink"), Some(XLINK_NS));
        assert_eq!(src, before);
    }

    #[test]
    fn removes_external_references() {
        let out = build_export_document(
            &source(),
            &ResolvedSize::new(300.0, 150.0),
            &ExportConfig::default(),
        );
        let text = out.to_svg_string();
        assert!(!text.contains("<script"));
        assert!(!text.contains("https://"));
        assert!(!text.contains("@import"));
        assert!(text.contains(r##"href="#marker""##));
    }

    #[test]
    fn neutralizes_remote_css_urls_in_styles_and_attributes() {
        let doc = VectorDocument::parse(
            r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xl="http://www.w3.org/1999/xlink" viewBox="0 0 10 10">
<defs><linearGradient id="g"/></defs>
<style>@font-face { font-family: X; src: url("https://fonts.example.com/x.woff2") format("woff2"); } .a { fill: url(#g); }</style>
<rect style="fill: url(https://evil.example.com/p.svg#g)" filter="URL('http://x.example.com/f.svg#f')" width="4" height="4"/>
<rect clip-path="url(#g)" mask="url(data:image/svg+xml;base64,PHN2Zy8+)" width="4" height="4"/>
<use xl:href="https://example.com/sprite.svg#icon"/>
<use xl:href="#g"/>
</svg>"##,
        )
        .unwrap();
        let out = build_export_document(
            &doc,
            &ResolvedSize::new(10.0, 10.0),
            &ExportConfig::default(),
        );
        let text = out.to_svg_string();
        assert!(!text.contains("example.com"), "{text}");
        assert!(text.contains("fill: url(#g)"));
        assert!(text.contains(r##"clip-path="url(#g)""##));
        assert!(text.contains("url(data:image/svg+xml;base64,PHN2Zy8+)"));
        assert!(text.contains(r##"xl:href="#g""##));

        let rect = out
            .document()
            .root()
            .child_elements()
            .find(|e| e.attr("style").is_some())
            .unwrap();
        assert_eq!(rect.attr("style"), Some("fill: none"));
        assert_eq!(rect.attr("filter"), Some("none"));
    }

    #[test]
    fn flattens_foreign_object_labels_into_text_lines() {
        let out = build_export_document(
            &source(),
            &ResolvedSize::new(300.0, 150.0),
            &ExportConfig::default(),
        );
        let root = out.document().root();
        assert_eq!(
            root.count_descendants(&|e| e.local_name() == "foreignObject"),
            0
        );
        let mut lines = Vec::new();
        root.visit(&mut |e| {
            if e.name == "tspan" {
                lines.push(e.text_content());
            }
        });
        assert_eq!(lines, vec!["Start".to_string(), "here".to_string()]);
    }

    #[test]
    fn export_copy_is_parseable_markup() {
        let out = build_export_document(
            &source(),
            &ResolvedSize::new(300.0, 150.0),
            &ExportConfig::default(),
        );
        let reparsed = VectorDocument::parse(&out.to_svg_string()).unwrap();
        assert_eq!(&reparsed, out.document());
    }
}
