use crate::blob::{BlobStore, BlobUrl};
use crate::config::{ExportConfig, RASTER_MIME, VECTOR_MIME, clamp_scale};
use crate::error::{RasterError, Result};
use crate::export_doc::ExportDocument;
use crate::size::ResolvedSize;
use base64::Engine as _;
use std::sync::Arc;

/// Encoded PNG bytes held in a [`BlobStore`], plus their pixel size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterResult {
    pub locator: BlobUrl,
    pub width: u32,
    pub height: u32,
}

/// Where the loader finds the serialized document.
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
    Blob(&'a BlobUrl),
    /// A self-describing `data:` URL.
    Inline(&'a str),
}

/// A decoded, drawable image.
pub struct LoadedImage {
    tree: usvg::Tree,
}

impl LoadedImage {
    pub fn from_tree(tree: usvg::Tree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &usvg::Tree {
        &self.tree
    }

    pub fn natural_size(&self) -> (f64, f64) {
        let size = self.tree.size();
        (size.width() as f64, size.height() as f64)
    }
}

impl std::fmt::Debug for LoadedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedImage")
            .field("natural_size", &self.natural_size())
            .finish()
    }
}

/// Decodes a serialized vector document into something drawable.
pub trait ImageLoader {
    fn load(&self, source: ImageSource<'_>, blobs: &BlobStore) -> Result<LoadedImage>;
}

/// `usvg`-backed loader sharing a single font database across loads.
#[derive(Clone)]
pub struct SvgImageLoader {
    fontdb: Arc<usvg::fontdb::Database>,
    font_family: String,
}

impl Default for SvgImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SvgImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvgImageLoader")
            .field("faces", &self.fontdb.len())
            .field("font_family", &self.font_family)
            .finish()
    }
}

impl SvgImageLoader {
    /// Loader with system fonts.
    pub fn new() -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        Self::with_fontdb(Arc::new(db))
    }

    pub fn with_fontdb(fontdb: Arc<usvg::fontdb::Database>) -> Self {
        Self {
            fontdb,
            // Diagram engines assume a sans-serif stack; system selection may vary.
            font_family: "Arial".to_string(),
        }
    }

    pub fn fontdb(&self) -> Arc<usvg::fontdb::Database> {
        self.fontdb.clone()
    }

    fn decode(&self, data: &[u8]) -> Result<LoadedImage> {
        let mut opt = usvg::Options::default();
        opt.fontdb = self.fontdb.clone();
        opt.font_family = self.font_family.clone();
        let tree = usvg::Tree::from_data(data, &opt).map_err(|err| RasterError::RasterLoad {
            message: err.to_string(),
        })?;
        let image = LoadedImage::from_tree(tree);
        let (w, h) = image.natural_size();
        if !(w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0) {
            return Err(RasterError::RasterLoad {
                message: format!("image has no intrinsic size ({w}x{h})"),
            });
        }
        Ok(image)
    }
}

impl ImageLoader for SvgImageLoader {
    fn load(&self, source: ImageSource<'_>, blobs: &BlobStore) -> Result<LoadedImage> {
        match source {
            ImageSource::Blob(url) => {
                let blob = blobs.read(url).map_err(|err| RasterError::RasterLoad {
                    message: err.to_string(),
                })?;
                if blob.mime != VECTOR_MIME {
                    return Err(RasterError::RasterLoad {
                        message: format!("unsupported image type {}", blob.mime),
                    });
                }
                self.decode(&blob.bytes)
            }
            ImageSource::Inline(url) => self.decode(&decode_data_url(url)?),
        }
    }
}

/// Wraps markup as a base64 `data:` URL.
pub fn svg_data_url(markup: &str) -> String {
    format!(
        "data:{VECTOR_MIME};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(markup)
    )
}

fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let bad = |message: &str| RasterError::RasterLoad {
        message: message.to_string(),
    };
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| bad("not a data URL"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| bad("data URL has no payload"))?;
    if !meta.starts_with(VECTOR_MIME) {
        return Err(bad("data URL is not SVG"));
    }
    if meta.ends_with(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|err| RasterError::RasterLoad {
                message: format!("invalid base64 payload: {err}"),
            })
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

/// Pixel size of the surface for a `width x height` diagram with `margin` on every side.
pub fn surface_size(width: f64, height: f64, margin: f64, scale: f64) -> (u64, u64) {
    let s = clamp_scale(scale);
    let px = |v: f64| {
        let n = ((v + 2.0 * margin) * s).ceil();
        if n.is_finite() && n > 0.0 { n as u64 } else { 0 }
    };
    (px(width), px(height))
}

/// Draws export documents onto an opaque surface and encodes PNG.
pub struct Rasterizer<'a> {
    blobs: &'a BlobStore,
    loader: &'a dyn ImageLoader,
    background: tiny_skia::Color,
    max_side: u32,
}

impl<'a> Rasterizer<'a> {
    pub fn new(blobs: &'a BlobStore, loader: &'a dyn ImageLoader, config: &ExportConfig) -> Self {
        Self {
            blobs,
            loader,
            background: parse_color(&config.background)
                .filter(|c| c.is_opaque())
                .unwrap_or_else(|| tiny_skia::Color::from_rgba8(255, 255, 255, 255)),
            max_side: config.max_surface_side,
        }
    }

    pub fn rasterize(
        &self,
        doc: &ExportDocument,
        size: &ResolvedSize,
        scale: f64,
        margin: f64,
    ) -> Result<RasterResult> {
        self.rasterize_markup(doc.to_svg_string(), size, scale, margin)
    }

    /// Rasterizes already serialized markup through a transient blob locator.
    pub fn rasterize_markup(
        &self,
        markup: String,
        size: &ResolvedSize,
        scale: f64,
        margin: f64,
    ) -> Result<RasterResult> {
        let guard = self.blobs.acquire(markup.into_bytes(), VECTOR_MIME);
        let mut surface = self.surface(surface_size(size.width, size.height, margin, scale))?;
        let loaded = self.loader.load(ImageSource::Blob(guard.url()), self.blobs);
        guard.release();
        let image = loaded?;
        self.draw_logical(&mut surface, &image, size, scale, margin);
        self.finish(surface)
    }

    /// Rasterizes a `data:` URL; no locator is involved.
    pub fn rasterize_inline(
        &self,
        data_url: &str,
        size: &ResolvedSize,
        scale: f64,
        margin: f64,
    ) -> Result<RasterResult> {
        let mut surface = self.surface(surface_size(size.width, size.height, margin, scale))?;
        let image = self.loader.load(ImageSource::Inline(data_url), self.blobs)?;
        self.draw_logical(&mut surface, &image, size, scale, margin);
        self.finish(surface)
    }

    /// Draws markup at whatever size it reports for itself, without margin.
    pub fn rasterize_natural(&self, markup: String, scale: f64) -> Result<RasterResult> {
        let s = clamp_scale(scale);
        let guard = self.blobs.acquire(markup.into_bytes(), VECTOR_MIME);
        let loaded = self.loader.load(ImageSource::Blob(guard.url()), self.blobs);
        guard.release();
        let image = loaded?;
        let (w, h) = image.natural_size();
        let mut surface = self.surface(surface_size(w, h, 0.0, s))?;
        resvg::render(
            image.tree(),
            tiny_skia::Transform::from_scale(s as f32, s as f32),
            &mut surface.as_mut(),
        );
        self.finish(surface)
    }

    fn surface(&self, (width, height): (u64, u64)) -> Result<tiny_skia::Pixmap> {
        let unavailable = RasterError::CanvasUnavailable { width, height };
        let max = u64::from(self.max_side);
        if width == 0 || height == 0 || width > max || height > max {
            return Err(unavailable);
        }
        let mut pixmap = tiny_skia::Pixmap::new(width as u32, height as u32).ok_or(unavailable)?;
        pixmap.fill(self.background);
        Ok(pixmap)
    }

    /// Draws at `(margin, margin)` with the logical size under a uniform `scale`.
    fn draw_logical(
        &self,
        surface: &mut tiny_skia::Pixmap,
        image: &LoadedImage,
        size: &ResolvedSize,
        scale: f64,
        margin: f64,
    ) {
        let s = clamp_scale(scale) as f32;
        let (nw, nh) = image.natural_size();
        let transform = tiny_skia::Transform::from_scale(s, s)
            .pre_translate(margin as f32, margin as f32)
            .pre_scale((size.width / nw) as f32, (size.height / nh) as f32);
        resvg::render(image.tree(), transform, &mut surface.as_mut());
    }

    fn finish(&self, surface: tiny_skia::Pixmap) -> Result<RasterResult> {
        let (width, height) = (surface.width(), surface.height());
        let png = surface
            .encode_png()
            .map_err(|err| RasterError::PngEncode {
                message: err.to_string(),
            })?;
        let locator = self.blobs.create(png, RASTER_MIME);
        Ok(RasterResult {
            locator,
            width,
            height,
        })
    }
}

/// Parses any CSS color form (hex, `rgb()`/`rgba()`, named colors, `transparent`).
pub fn parse_color(text: &str) -> Option<tiny_skia::Color> {
    let c = text.trim().parse::<svgtypes::Color>().ok()?;
    Some(tiny_skia::Color::from_rgba8(c.red, c.green, c.blue, c.alpha))
}
