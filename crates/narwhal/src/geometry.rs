//! Geometry primitives and probes.
//!
//! A probe answers the two questions a browser would answer from live layout: how large the
//! document is as laid out on screen, and how large its drawn content actually is.

use crate::document::{Element, VectorDocument};
use crate::export_doc::BACKGROUND_MARKER;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn has_area(&self) -> bool {
        is_positive(self.width)
            && is_positive(self.height)
            && self.x.is_finite()
            && self.y.is_finite()
    }

    pub fn to_viewport(&self) -> String {
        format!(
            "{} {} {} {}",
            fmt_num(self.x),
            fmt_num(self.y),
            fmt_num(self.width),
            fmt_num(self.height)
        )
    }
}

pub fn is_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Formats a number without a trailing `.0` and with noise digits rounded away.
pub fn fmt_num(v: f64) -> String {
    let r = (v * 1000.0).round() / 1000.0;
    let r = if r == 0.0 { 0.0 } else { r };
    format!("{r}")
}

/// Parses a viewBox attribute; `None` unless it is four finite numbers with positive size.
pub fn parse_view_box(raw: &str) -> Option<Bounds> {
    let vb = svgtypes::ViewBox::from_str(raw.trim()).ok()?;
    let b = Bounds::new(vb.x, vb.y, vb.w, vb.h);
    b.has_area().then_some(b)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeclaredLength {
    Absolute(f64),
    Percent(f64),
}

/// Parses a `width`/`height` attribute. Unparseable and non-positive values are `None`.
pub fn parse_length(raw: &str) -> Option<DeclaredLength> {
    use svgtypes::LengthUnit;

    let len = svgtypes::Length::from_str(raw.trim()).ok()?;
    let n = len.number;
    let px = match len.unit {
        LengthUnit::Percent => {
            return is_positive(n).then_some(DeclaredLength::Percent(n));
        }
        LengthUnit::None | LengthUnit::Px => n,
        LengthUnit::In => n * 96.0,
        LengthUnit::Cm => n * 96.0 / 2.54,
        LengthUnit::Mm => n * 96.0 / 25.4,
        LengthUnit::Pt => n * 4.0 / 3.0,
        LengthUnit::Pc => n * 16.0,
        LengthUnit::Em => n * 16.0,
        LengthUnit::Ex => n * 8.0,
    };
    is_positive(px).then_some(DeclaredLength::Absolute(px))
}

/// Live-layout queries for a vector document.
pub trait GeometryProbe {
    /// Post-layout rendered size of the document on its host surface.
    fn layout_box(&self, doc: &VectorDocument) -> Option<Bounds>;
    /// Tight bounding box of the drawn geometry, in user units.
    fn content_box(&self, doc: &VectorDocument) -> Option<Bounds>;
}

impl<P: GeometryProbe + ?Sized> GeometryProbe for Arc<P> {
    fn layout_box(&self, doc: &VectorDocument) -> Option<Bounds> {
        (**self).layout_box(doc)
    }

    fn content_box(&self, doc: &VectorDocument) -> Option<Bounds> {
        (**self).content_box(doc)
    }
}

/// Probe that lays the document out headlessly with `usvg`.
///
/// The layout box resolves declared lengths against the host container (percentages included);
/// without a container, only absolute declared lengths produce a layout box. The content box
/// ignores injected export backgrounds so export copies measure like their source.
#[derive(Clone)]
pub struct UsvgGeometryProbe {
    container: Option<(f64, f64)>,
    fontdb: Arc<usvg::fontdb::Database>,
}

impl Default for UsvgGeometryProbe {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for UsvgGeometryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsvgGeometryProbe")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl UsvgGeometryProbe {
    pub fn new(container: Option<(f64, f64)>) -> Self {
        Self {
            container,
            fontdb: Arc::new(usvg::fontdb::Database::new()),
        }
    }

    /// Shares an already loaded font database (text bounds depend on it).
    pub fn with_fontdb(mut self, fontdb: Arc<usvg::fontdb::Database>) -> Self {
        self.fontdb = fontdb;
        self
    }

    fn resolve_axis(&self, raw: Option<&str>, container: Option<f64>) -> Option<f64> {
        match parse_length(raw?)? {
            DeclaredLength::Absolute(px) => Some(px),
            DeclaredLength::Percent(pct) => container
                .map(|c| c * pct / 100.0)
                .filter(|v| is_positive(*v)),
        }
    }
}

impl GeometryProbe for UsvgGeometryProbe {
    fn layout_box(&self, doc: &VectorDocument) -> Option<Bounds> {
        let (cw, ch) = match self.container {
            Some((w, h)) => (Some(w), Some(h)),
            None => (None, None),
        };
        let w = self.resolve_axis(doc.attr("width"), cw)?;
        let h = self.resolve_axis(doc.attr("height"), ch)?;
        Some(Bounds::new(0.0, 0.0, w, h))
    }

    fn content_box(&self, doc: &VectorDocument) -> Option<Bounds> {
        // Measure in raw user units: drop the viewBox so the root transform is identity, and pin
        // a nominal size so usvg accepts documents that declare none.
        let mut probe_doc = doc.clone();
        let root = probe_doc.root_mut();
        root.remove_attr("viewBox");
        root.set_attr("width", "1");
        root.set_attr("height", "1");
        root.remove_descendants(&is_export_background);

        let mut opt = usvg::Options::default();
        opt.fontdb = self.fontdb.clone();
        let tree = usvg::Tree::from_str(&probe_doc.to_svg_string(), &opt).ok()?;
        let bbox = tree.root().abs_stroke_bounding_box();
        let b = Bounds::new(
            bbox.x() as f64,
            bbox.y() as f64,
            bbox.width() as f64,
            bbox.height() as f64,
        );
        b.has_area().then_some(b)
    }
}

fn is_export_background(e: &Element) -> bool {
    e.has_attr(BACKGROUND_MARKER)
}
