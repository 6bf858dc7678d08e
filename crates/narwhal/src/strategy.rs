//! Rasterization strategies.
//!
//! Each strategy is an independent way of getting from the live document to PNG pixels. They
//! share no state: everything is re-derived from the [`ExportContext`] on every attempt.

use crate::blob::BlobStore;
use crate::config::ExportConfig;
use crate::document::{SVG_NS, VectorDocument};
use crate::error::RasterError;
use crate::export_doc::build_export_document;
use crate::geometry::{GeometryProbe, fmt_num};
use crate::raster::{ImageLoader, RasterResult, Rasterizer, svg_data_url};
use crate::size::{self, DefaultSize, ResolvedSize};

/// Everything a strategy may read.
#[derive(Clone, Copy)]
pub struct ExportContext<'a> {
    pub live: &'a VectorDocument,
    /// Markup as the layout engine produced it, captured at render time.
    pub original_markup: Option<&'a str>,
    pub probe: &'a dyn GeometryProbe,
    pub blobs: &'a BlobStore,
    pub loader: &'a dyn ImageLoader,
    pub config: &'a ExportConfig,
}

impl<'a> ExportContext<'a> {
    pub fn resolve_size(&self) -> ResolvedSize {
        size::resolve(
            self.live,
            self.probe,
            DefaultSize {
                width: self.config.default_width,
                height: self.config.default_height,
            },
        )
    }

    pub fn rasterizer(&self) -> Rasterizer<'a> {
        Rasterizer::new(self.blobs, self.loader, self.config)
    }
}

pub trait ExportStrategy {
    /// Short human-readable name, used in status messages.
    fn name(&self) -> &'static str;

    fn attempt(&self, ctx: &ExportContext<'_>) -> Result<RasterResult, RasterError>;
}

/// Export copy of the live tree: highest fidelity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClonedNode;

impl ExportStrategy for ClonedNode {
    fn name(&self) -> &'static str {
        "cloned document"
    }

    fn attempt(&self, ctx: &ExportContext<'_>) -> Result<RasterResult, RasterError> {
        let size = ctx.resolve_size();
        let doc = build_export_document(ctx.live, &size, ctx.config);
        ctx.rasterizer()
            .rasterize(&doc, &size, ctx.config.scale, ctx.config.margin)
    }
}

/// Render-time markup patched as text; survives live trees that no longer clone cleanly.
#[derive(Debug, Clone, Copy, Default)]
pub struct OriginalMarkup;

impl ExportStrategy for OriginalMarkup {
    fn name(&self) -> &'static str {
        "original markup"
    }

    fn attempt(&self, ctx: &ExportContext<'_>) -> Result<RasterResult, RasterError> {
        let markup = ctx.original_markup.ok_or(RasterError::MissingMarkup)?;
        let size = ctx.resolve_size();
        let patched = patch_root_attributes(markup, &sizing_attributes(&size));
        ctx.rasterizer()
            .rasterize_markup(patched, &size, ctx.config.scale, ctx.config.margin)
    }
}

/// Like [`OriginalMarkup`], but carried as an inline `data:` URL instead of a blob locator.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedPayload;

impl ExportStrategy for EmbeddedPayload {
    fn name(&self) -> &'static str {
        "embedded payload"
    }

    fn attempt(&self, ctx: &ExportContext<'_>) -> Result<RasterResult, RasterError> {
        let markup = ctx.original_markup.ok_or(RasterError::MissingMarkup)?;
        let size = ctx.resolve_size();
        let patched = patch_root_attributes(markup, &sizing_attributes(&size));
        let url = svg_data_url(&patched);
        let limit = ctx.config.max_inline_payload_bytes;
        if url.len() > limit {
            return Err(RasterError::PayloadTooLarge {
                size: url.len(),
                limit,
            });
        }
        ctx.rasterizer()
            .rasterize_inline(&url, &size, ctx.config.scale, ctx.config.margin)
    }
}

/// Last resort: the live tree as-is, drawn at whatever size it reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectSurface;

impl ExportStrategy for DirectSurface {
    fn name(&self) -> &'static str {
        "direct surface"
    }

    fn attempt(&self, ctx: &ExportContext<'_>) -> Result<RasterResult, RasterError> {
        let markup = patch_root_attributes(
            &ctx.live.to_svg_string(),
            &[("xmlns", SVG_NS.to_string())],
        );
        ctx.rasterizer().rasterize_natural(markup, ctx.config.scale)
    }
}

/// The built-in strategies, highest fidelity first.
pub fn standard_strategies() -> Vec<Box<dyn ExportStrategy>> {
    vec![
        Box::new(ClonedNode),
        Box::new(OriginalMarkup),
        Box::new(EmbeddedPayload),
        Box::new(DirectSurface),
    ]
}

fn sizing_attributes(size: &ResolvedSize) -> [(&'static str, String); 4] {
    [
        ("xmlns", SVG_NS.to_string()),
        ("width", fmt_num(size.width)),
        ("height", fmt_num(size.height)),
        ("viewBox", size.viewport.clone()),
    ]
}

/// Inserts each attribute into the root `<svg>` start tag unless the tag already names it.
pub fn patch_root_attributes(markup: &str, attrs: &[(&str, String)]) -> String {
    let Some((start, end)) = root_start_tag(markup) else {
        return markup.to_string();
    };
    let tag = &markup[start..end];
    let mut insert = String::new();
    for (name, value) in attrs {
        if !tag_has_attribute(tag, name) {
            insert.push_str(&format!(" {name}=\"{value}\""));
        }
    }
    let name_end = start + "<svg".len();
    let mut out = String::with_capacity(markup.len() + insert.len());
    out.push_str(&markup[..name_end]);
    out.push_str(&insert);
    out.push_str(&markup[name_end..]);
    out
}

/// Byte range of the root `<svg ...>` start tag, quote-aware.
fn root_start_tag(markup: &str) -> Option<(usize, usize)> {
    let mut from = 0;
    let start = loop {
        let i = from + markup[from..].find("<svg")?;
        let next = markup[i + 4..].chars().next()?;
        if next.is_whitespace() || next == '>' || next == '/' {
            break i;
        }
        from = i + 4;
    };
    let mut quote: Option<char> = None;
    for (off, ch) in markup[start..].char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '>') => return Some((start, start + off + 1)),
            (None, _) => {}
        }
    }
    None
}

fn tag_has_attribute(tag: &str, name: &str) -> bool {
    let mut rest = tag;
    while let Some(i) = rest.find(name) {
        let before = rest[..i].chars().next_back();
        let after = rest[i + name.len()..].trim_start().chars().next();
        if before.is_some_and(char::is_whitespace) && after == Some('=') {
            return true;
        }
        rest = &rest[i + name.len()..];
    }
    false
}
