//! Recovers authoritative geometry for a rendered document.
//!
//! Declared attributes are frequently missing, zero or percentage-relative (diagram engines like
//! `width="100%"` with a `max-width` style), so resolution walks a fixed ladder of sources and
//! only fills what is still unknown at each rung. The document is never written to.

use crate::document::VectorDocument;
use crate::geometry::{
    Bounds, DeclaredLength, GeometryProbe, fmt_num, parse_length, parse_view_box,
};
use serde::Serialize;

/// Which rung of the ladder supplied a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SizeSource {
    Declared,
    ViewBox,
    LayoutBox,
    ContentBox,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSize {
    pub width: f64,
    pub height: f64,
    pub viewport: String,
    #[serde(skip)]
    pub sources: SizeSources,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSources {
    pub width: SizeSource,
    pub height: SizeSource,
    pub viewport: SizeSource,
}

impl ResolvedSize {
    /// A size with a synthesized `0 0 w h` viewport.
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            viewport: format!("0 0 {} {}", fmt_num(width), fmt_num(height)),
            sources: SizeSources {
                width: SizeSource::Declared,
                height: SizeSource::Declared,
                viewport: SizeSource::Default,
            },
        }
    }

    /// True when anything past the viewBox rung was needed.
    pub fn used_fallback(&self) -> bool {
        let late = |s: SizeSource| !matches!(s, SizeSource::Declared | SizeSource::ViewBox);
        late(self.sources.width) || late(self.sources.height) || late(self.sources.viewport)
    }

    /// Parsed viewport; falls back to `0 0 width height`.
    pub fn viewport_bounds(&self) -> Bounds {
        parse_view_box(&self.viewport)
            .unwrap_or_else(|| Bounds::new(0.0, 0.0, self.width, self.height))
    }
}

/// Size used when no source yields a usable dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultSize {
    pub width: f64,
    pub height: f64,
}

impl Default for DefaultSize {
    fn default() -> Self {
        Self {
            width: 1024.0,
            height: 768.0,
        }
    }
}

pub fn resolve(
    doc: &VectorDocument,
    probe: &dyn GeometryProbe,
    defaults: DefaultSize,
) -> ResolvedSize {
    // 1. Declared attributes; percentages say nothing about raster size.
    let declared = |name: &str| match doc.attr(name).and_then(parse_length) {
        Some(DeclaredLength::Absolute(px)) => Some((px, SizeSource::Declared)),
        Some(DeclaredLength::Percent(_)) | None => None,
    };
    let mut width = declared("width");
    let mut height = declared("height");
    let mut viewport: Option<(String, SizeSource)> = None;

    // 2. viewBox.
    if let Some(vb) = doc.attr("viewBox").and_then(parse_view_box) {
        width = width.or(Some((vb.width, SizeSource::ViewBox)));
        height = height.or(Some((vb.height, SizeSource::ViewBox)));
        viewport = Some((vb.to_viewport(), SizeSource::ViewBox));
    }

    // 3. Live layout box.
    if width.is_none() || height.is_none() {
        if let Some(b) = probe.layout_box(doc).filter(Bounds::has_area) {
            width = width.or(Some((b.width, SizeSource::LayoutBox)));
            height = height.or(Some((b.height, SizeSource::LayoutBox)));
        }
    }

    // 4. Tight content box.
    if width.is_none() || height.is_none() || viewport.is_none() {
        if let Some(b) = probe.content_box(doc).filter(Bounds::has_area) {
            width = width.or(Some((b.width, SizeSource::ContentBox)));
            height = height.or(Some((b.height, SizeSource::ContentBox)));
            viewport = viewport.or_else(|| Some((b.to_viewport(), SizeSource::ContentBox)));
        }
    }

    // 5. Defaults.
    let (width, width_src) = width.unwrap_or((defaults.width, SizeSource::Default));
    let (height, height_src) = height.unwrap_or((defaults.height, SizeSource::Default));
    let (viewport, viewport_src) = viewport.unwrap_or_else(|| {
        (
            format!("0 0 {} {}", fmt_num(width), fmt_num(height)),
            SizeSource::Default,
        )
    });

    let size = ResolvedSize {
        width,
        height,
        viewport,
        sources: SizeSources {
            width: width_src,
            height: height_src,
            viewport: viewport_src,
        },
    };
    if size.used_fallback() {
        tracing::debug!(
            width = size.width,
            height = size.height,
            viewport = %size.viewport,
            sources = ?size.sources,
            "size resolution fallback used"
        );
    }
    size
}
