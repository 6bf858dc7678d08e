//! Per-diagram export sessions.
//!
//! A [`DeliveryController`] owns everything one diagram instance needs: the render target, the
//! trigger control, the status sink, the file saver and the export machinery. Rendering failures
//! are returned to the caller; export failures never escape and always end in a non-progress
//! status.

use crate::blob::{BlobStore, BlobUrl};
use crate::chain::FallbackChain;
use crate::config::{ExportConfig, RASTER_EXTENSION, RASTER_MIME, VECTOR_EXTENSION, VECTOR_MIME};
use crate::document::VectorDocument;
use crate::engine::{LayoutEngine, clean_description};
use crate::error::{ConfigError, ExportError, RenderError};
use crate::export_doc::build_export_document;
use crate::geometry::{GeometryProbe, UsvgGeometryProbe};
use crate::raster::{ImageLoader, RasterResult, SvgImageLoader};
use crate::runtime::{self, EngineCell};
use crate::slots::{
    FileSaver, RenderTarget, Status, StatusAction, StatusSink, TriggerControl,
    file_stem_for_title,
};
use crate::strategy::ExportContext;
use std::sync::Arc;

/// How a trigger ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Saved {
        file_name: String,
        location: String,
        width: u32,
        height: u32,
    },
    /// Every rasterization method failed; the status line offers the vector download.
    VectorFallbackOffered { message: String },
    /// A bitmap was produced but could not be handed to the saver.
    SaveFailed { message: String },
    NothingToExport,
    /// Trigger was disabled; nothing happened.
    Busy,
}

pub struct DeliveryController {
    diagram_id: String,
    title: String,
    engine: Box<dyn LayoutEngine>,
    engine_cell: &'static EngineCell,
    target: RenderTarget,
    trigger: TriggerControl,
    status: Box<dyn StatusSink>,
    saver: Box<dyn FileSaver>,
    blobs: Arc<BlobStore>,
    loader: Box<dyn ImageLoader>,
    probe: Box<dyn GeometryProbe>,
    chain: FallbackChain,
    config: ExportConfig,
    /// Saved PNG locators waiting for their delayed release; revoked early on drop.
    scheduled: Vec<BlobUrl>,
}

impl std::fmt::Debug for DeliveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryController")
            .field("diagram_id", &self.diagram_id)
            .field("title", &self.title)
            .field("target", &self.target)
            .field("trigger", &self.trigger)
            .field("chain", &self.chain)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeliveryController {
    /// A controller with the usvg-backed loader and probe, sharing one system font database.
    pub fn new(
        diagram_id: impl Into<String>,
        engine: impl LayoutEngine + 'static,
        status: impl StatusSink + 'static,
        saver: impl FileSaver + 'static,
    ) -> Self {
        let loader = SvgImageLoader::new();
        let probe = UsvgGeometryProbe::default().with_fontdb(loader.fontdb());
        Self {
            diagram_id: diagram_id.into(),
            title: String::new(),
            engine: Box::new(engine),
            engine_cell: runtime::global(),
            target: RenderTarget::default(),
            trigger: TriggerControl::default(),
            status: Box::new(status),
            saver: Box::new(saver),
            blobs: Arc::new(BlobStore::new()),
            loader: Box::new(loader),
            probe: Box::new(probe),
            chain: FallbackChain::default(),
            config: ExportConfig::default(),
            scheduled: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Installs `config` once it passes [`ExportConfig::validate`].
    pub fn try_with_config(mut self, config: ExportConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn with_engine_cell(mut self, cell: &'static EngineCell) -> Self {
        self.engine_cell = cell;
        self
    }

    pub fn with_loader(mut self, loader: impl ImageLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_probe(mut self, probe: impl GeometryProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_chain(mut self, chain: FallbackChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_blob_store(mut self, blobs: Arc<BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn diagram_id(&self) -> &str {
        &self.diagram_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn trigger(&self) -> &TriggerControl {
        &self.trigger
    }

    pub fn trigger_mut(&mut self) -> &mut TriggerControl {
        &mut self.trigger
    }

    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    /// Renders `description` into the target, replacing whatever was there.
    pub fn on_render(&mut self, description: &str) -> Result<(), RenderError> {
        match self.render_document(description) {
            Ok((doc, markup)) => {
                self.target.install(doc, markup);
                self.status.clear(&self.diagram_id);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(diagram = %self.diagram_id, error = %err, "diagram render failed");
                self.target.clear();
                self.status
                    .update(&self.diagram_id, Status::error(err.to_string()));
                Err(err)
            }
        }
    }

    fn render_document(&self, description: &str) -> Result<(VectorDocument, String), RenderError> {
        let description = clean_description(description);
        if description.is_empty() {
            return Err(RenderError::EmptyDescription);
        }
        let settings = self.engine_cell.settings()?;
        let markup = self
            .engine
            .render(&self.diagram_id, &self.title, description, settings)?;
        let doc = VectorDocument::parse(&markup)?;
        Ok((doc, markup))
    }

    /// Runs one PNG export session. Ignored while the trigger is disabled.
    pub fn on_trigger_export(&mut self) -> ExportOutcome {
        if !self.trigger.is_enabled() {
            tracing::debug!(diagram = %self.diagram_id, "export already in progress");
            return ExportOutcome::Busy;
        }
        self.trigger.disable();
        let outcome = self.export_session();
        self.trigger.enable();
        outcome
    }

    fn export_session(&mut self) -> ExportOutcome {
        self.blobs.sweep_expired();
        let id = self.diagram_id.as_str();
        self.status.update(id, Status::progress("Preparing PNG export..."));

        let Some(live) = self.target.document() else {
            self.status
                .update(id, Status::error(ExportError::NoDocument.to_string()));
            return ExportOutcome::NothingToExport;
        };

        let ctx = ExportContext {
            live,
            original_markup: self.target.markup(),
            probe: self.probe.as_ref(),
            blobs: &self.blobs,
            loader: self.loader.as_ref(),
            config: &self.config,
        };
        let size = ctx.resolve_size();
        tracing::debug!(
            diagram = id,
            width = size.width,
            height = size.height,
            viewport = %size.viewport,
            fallback = size.used_fallback(),
            "resolved export size"
        );

        let status = &mut self.status;
        let result = self.chain.export_to_raster(&ctx, &mut |p| {
            status.update(
                id,
                Status::progress(format!(
                    "Exporting PNG (method {}/{}: {})...",
                    p.index + 1,
                    p.total,
                    p.strategy
                )),
            );
        });

        match result {
            Ok(raster) => self.deliver_raster(raster),
            Err(err) => {
                tracing::warn!(diagram = %self.diagram_id, error = %err, "PNG export failed");
                self.status.update(
                    &self.diagram_id,
                    Status::error(format!(
                        "PNG export failed: {err}. You can download the SVG instead."
                    ))
                    .with_action(StatusAction::DownloadVector),
                );
                ExportOutcome::VectorFallbackOffered {
                    message: err.to_string(),
                }
            }
        }
    }

    fn deliver_raster(&mut self, raster: RasterResult) -> ExportOutcome {
        let id = self.diagram_id.as_str();
        let file_name = format!("{}.{RASTER_EXTENSION}", self.file_stem());
        let saved = self
            .blobs
            .read(&raster.locator)
            .map_err(ExportError::from)
            .and_then(|blob| {
                self.saver
                    .save(&file_name, RASTER_MIME, &blob.bytes)
                    .map_err(|err| ExportError::Save {
                        file_name: file_name.clone(),
                        message: err.to_string(),
                    })
            });
        match saved {
            Ok(location) => {
                self.blobs
                    .revoke_after(&raster.locator, self.config.release_delay());
                self.scheduled.retain(|url| self.blobs.is_live(url));
                if self.blobs.is_live(&raster.locator) {
                    self.scheduled.push(raster.locator.clone());
                }
                self.status.update(
                    id,
                    Status::success(format!(
                        "Exported {file_name} ({}x{} px)",
                        raster.width, raster.height
                    )),
                );
                ExportOutcome::Saved {
                    file_name,
                    location,
                    width: raster.width,
                    height: raster.height,
                }
            }
            Err(err) => {
                self.blobs.revoke(&raster.locator);
                tracing::warn!(diagram = id, error = %err, "saving PNG failed");
                self.status.update(
                    id,
                    Status::error(err.to_string()).with_action(StatusAction::DownloadVector),
                );
                ExportOutcome::SaveFailed {
                    message: err.to_string(),
                }
            }
        }
    }

    /// Saves the export copy of the live document as SVG. Handler for
    /// [`StatusAction::DownloadVector`].
    pub fn on_secondary_export(&mut self) -> Result<String, ExportError> {
        let result = self.save_vector();
        match &result {
            Ok(location) => self
                .status
                .update(&self.diagram_id, Status::success(format!("Saved {location}"))),
            Err(err) => self
                .status
                .update(&self.diagram_id, Status::error(err.to_string())),
        }
        result
    }

    fn save_vector(&mut self) -> Result<String, ExportError> {
        let live = self.target.document().ok_or(ExportError::NoDocument)?;
        let ctx = ExportContext {
            live,
            original_markup: self.target.markup(),
            probe: self.probe.as_ref(),
            blobs: &self.blobs,
            loader: self.loader.as_ref(),
            config: &self.config,
        };
        let size = ctx.resolve_size();
        let markup = build_export_document(live, &size, &self.config).to_svg_string();
        let file_name = format!("{}.{VECTOR_EXTENSION}", self.file_stem());
        self.saver
            .save(&file_name, VECTOR_MIME, markup.as_bytes())
            .map_err(|err| ExportError::Save {
                file_name,
                message: err.to_string(),
            })
    }

    fn file_stem(&self) -> String {
        file_stem_for_title(&self.title, &self.config.fallback_file_stem)
    }

    /// Async form of [`Self::on_render`] for executor-driven hosts.
    pub async fn render(&mut self, description: &str) -> Result<(), RenderError> {
        self.on_render(description)
    }

    /// Async form of [`Self::on_trigger_export`].
    pub async fn trigger_export(&mut self) -> ExportOutcome {
        self.on_trigger_export()
    }
}

impl Drop for DeliveryController {
    fn drop(&mut self) {
        for url in self.scheduled.drain(..) {
            self.blobs.revoke(&url);
        }
    }
}
