#![forbid(unsafe_code)]

//! `narwhal` turns rendered SVG diagrams into PNG files, headlessly.
//!
//! The pipeline:
//! - [`size::resolve`] recovers a usable width, height and viewport for a document whose declared
//!   sizing is missing or relative;
//! - [`export_doc::build_export_document`] produces a self-contained copy with explicit sizing, an
//!   opaque background and a forced font stack;
//! - [`raster::Rasterizer`] draws it onto a scaled surface with a margin and encodes PNG;
//! - [`chain::FallbackChain`] tries the [`strategy`] variants in order until one succeeds;
//! - [`controller::DeliveryController`] ties a diagram instance's slots to all of the above.

pub mod blob;
pub mod chain;
pub mod config;
pub mod controller;
pub mod document;
pub mod engine;
pub mod error;
pub mod export_doc;
pub mod geometry;
pub mod raster;
pub mod runtime;
pub mod size;
pub mod slots;
pub mod strategy;

pub use blob::{BlobStore, BlobUrl};
pub use chain::{ExportAttempt, ExportProgress, FallbackChain};
pub use config::ExportConfig;
pub use controller::{DeliveryController, ExportOutcome};
pub use document::VectorDocument;
pub use engine::{LayoutEngine, SvgMarkupEngine};
pub use error::{ConfigError, DocumentError, ExportError, RasterError, RenderError, SaveError};
pub use export_doc::{ExportDocument, build_export_document};
pub use geometry::{Bounds, GeometryProbe, UsvgGeometryProbe};
pub use raster::{ImageLoader, RasterResult, Rasterizer, SvgImageLoader};
pub use runtime::{EngineCell, EngineSettings};
pub use size::{DefaultSize, ResolvedSize};
pub use slots::{FileSaver, Status, StatusAction, StatusKind, StatusSink};
pub use strategy::{ExportContext, ExportStrategy};
