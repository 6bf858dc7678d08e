use narwhal::blob::BlobStore;
use narwhal::config::ExportConfig;
use narwhal::controller::{DeliveryController, ExportOutcome};
use narwhal::document::VectorDocument;
use narwhal::engine::LayoutEngine;
use narwhal::error::{ConfigError, ExportError, RasterError, RenderError, SaveError};
use narwhal::geometry::{Bounds, GeometryProbe, UsvgGeometryProbe};
use narwhal::raster::{ImageLoader, ImageSource, LoadedImage, SvgImageLoader};
use narwhal::runtime::{EngineCell, EngineSettings};
use narwhal::slots::{
    FileSaver, MemorySaver, RecordingStatusSink, StatusAction, StatusKind,
};
use std::sync::Arc;
use std::time::Duration;

static ENGINE: EngineCell = EngineCell::new();
static UNINITIALIZED: EngineCell = EngineCell::new();

fn engine_cell() -> &'static EngineCell {
    ENGINE.get_or_initialize(EngineSettings::default());
    &ENGINE
}

/// Lays out "flowchart" descriptions as two boxes and an edge, with no sizing attributes at all.
struct FlowEngine;

impl LayoutEngine for FlowEngine {
    fn render(
        &self,
        diagram_id: &str,
        _title: &str,
        description: &str,
        settings: &EngineSettings,
    ) -> Result<String, RenderError> {
        if !description.starts_with("flowchart") {
            return Err(RenderError::Engine {
                message: format!("unknown diagram type in {description:?}"),
            });
        }
        assert_eq!(settings.theme, "neutral");
        Ok(format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" id="{diagram_id}"><g class="nodes"><rect x="20" y="20" width="80" height="40" fill="#eee" stroke="#333"/><rect x="200" y="90" width="80" height="40" fill="#eee" stroke="#333"/></g><path d="M100 40 L200 110" stroke="#333" fill="none"/></svg>"##
        ))
    }
}

/// Reports a fixed post-layout box, as a browser would for the mounted diagram.
struct LayoutBox(f64, f64);

impl GeometryProbe for LayoutBox {
    fn layout_box(&self, _doc: &VectorDocument) -> Option<Bounds> {
        Some(Bounds::new(0.0, 0.0, self.0, self.1))
    }

    fn content_box(&self, _doc: &VectorDocument) -> Option<Bounds> {
        None
    }
}

struct FailingLoader;

impl ImageLoader for FailingLoader {
    fn load(
        &self,
        _source: ImageSource<'_>,
        _blobs: &BlobStore,
    ) -> Result<LoadedImage, RasterError> {
        Err(RasterError::RasterLoad {
            message: "image decode failed".to_string(),
        })
    }
}

struct FullDisk;

impl FileSaver for FullDisk {
    fn save(&mut self, _file_name: &str, _mime: &str, _bytes: &[u8]) -> Result<String, SaveError> {
        Err(SaveError::Io(std::io::Error::other("disk full")))
    }
}

fn controller(status: &RecordingStatusSink, saver: &MemorySaver) -> DeliveryController {
    DeliveryController::new("diagram-1", FlowEngine, status.clone(), saver.clone())
        .with_engine_cell(engine_cell())
        .with_loader(SvgImageLoader::with_fontdb(Arc::new(
            usvg::fontdb::Database::new(),
        )))
        .with_probe(LayoutBox(300.0, 150.0))
}

fn assert_close(a: Bounds, b: Bounds) {
    let close = |x: f64, y: f64| (x - y).abs() < 1e-3;
    assert!(
        close(a.x, b.x) && close(a.y, b.y) && close(a.width, b.width) && close(a.height, b.height),
        "{a:?} != {b:?}"
    );
}

#[test]
fn exports_png_sized_from_the_layout_box() {
    let status = RecordingStatusSink::new();
    let saver = MemorySaver::new();
    let mut c = controller(&status, &saver).with_title("Login flow");

    c.on_render("```mermaid\nflowchart A --> B\n```").unwrap();
    assert_eq!(status.current(), None);

    let scale = c.config().effective_scale();
    let width = ((300.0 + 32.0) * scale).ceil() as u32;
    let height = ((150.0 + 32.0) * scale).ceil() as u32;
    assert_eq!(
        c.on_trigger_export(),
        ExportOutcome::Saved {
            file_name: "Login flow.png".to_string(),
            location: "memory:Login flow.png".to_string(),
            width,
            height,
        }
    );

    let files = saver.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].mime, "image/png");
    let pixmap = tiny_skia::Pixmap::decode_png(&files[0].bytes).unwrap();
    assert_eq!((pixmap.width(), pixmap.height()), (width, height));
    let corner = pixmap.pixel(0, 0).unwrap();
    assert_eq!(
        (corner.red(), corner.green(), corner.blue(), corner.alpha()),
        (255, 255, 255, 255)
    );

    let updates = status.updates();
    assert_eq!(updates[0].kind, StatusKind::Progress);
    assert!(updates.iter().any(|s| s.message.contains("method 1/4")));
    let done = status.current().unwrap();
    assert_eq!(done.kind, StatusKind::Success);
    assert!(done.message.contains(&format!("{width}x{height}")));
    assert!(c.trigger().is_enabled());

    // The PNG locator waits for its delayed release; nothing else is live.
    let stats = c.blobs().stats();
    assert_eq!((stats.live, stats.pending), (1, 1));
}

#[test]
fn png_locator_is_released_after_the_delay() {
    let status = RecordingStatusSink::new();
    let saver = MemorySaver::new();
    let mut c = controller(&status, &saver).try_with_config(ExportConfig {
        release_delay_ms: 10,
        ..Default::default()
    })
    .unwrap();
    c.on_render("flowchart A --> B").unwrap();
    assert!(matches!(c.on_trigger_export(), ExportOutcome::Saved { .. }));
    assert_eq!(c.blobs().stats().live, 1);

    // No further session or store call: the release happens on its own.
    let blobs = Arc::clone(c.blobs());
    std::thread::sleep(Duration::from_millis(100));
    let stats = blobs.stats();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.created, stats.revoked);
}

#[test]
fn dropping_the_controller_releases_scheduled_locators() {
    let status = RecordingStatusSink::new();
    let saver = MemorySaver::new();
    let blobs = Arc::new(BlobStore::new());
    let mut c = controller(&status, &saver)
        .with_blob_store(Arc::clone(&blobs))
        .try_with_config(ExportConfig {
            release_delay_ms: 60_000,
            ..Default::default()
        })
        .unwrap();
    c.on_render("flowchart A --> B").unwrap();
    assert!(matches!(c.on_trigger_export(), ExportOutcome::Saved { .. }));
    assert_eq!(blobs.stats().pending, 1);

    drop(c);
    let stats = blobs.stats();
    assert_eq!((stats.live, stats.pending), (0, 0));
    assert_eq!(stats.created, stats.revoked);
}

#[test]
fn translucent_background_config_is_rejected() {
    let status = RecordingStatusSink::new();
    let saver = MemorySaver::new();
    for background in ["transparent", "rgba(255, 255, 255, 0.5)", "#fff0"] {
        let err = controller(&status, &saver)
            .try_with_config(ExportConfig {
                background: background.to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{background}");
    }

    let c = controller(&status, &saver)
        .try_with_config(ExportConfig {
            background: "rgb(250, 250, 250)".to_string(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(c.config().background, "rgb(250, 250, 250)");
}

#[test]
fn exhausted_export_offers_the_vector_download() {
    let status = RecordingStatusSink::new();
    let saver = MemorySaver::new();
    let mut c = controller(&status, &saver).with_loader(FailingLoader);
    c.on_render("flowchart A --> B").unwrap();

    let outcome = c.on_trigger_export();
    let ExportOutcome::VectorFallbackOffered { message } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert!(message.contains("all 4 export methods failed"));
    assert!(message.contains("last error: failed to load SVG as image: image decode failed"));

    let shown = status.current().unwrap();
    assert_eq!(shown.kind, StatusKind::Error);
    assert_eq!(shown.action, Some(StatusAction::DownloadVector));
    assert!(shown.message.contains("last error"));
    assert!(c.trigger().is_enabled());
    assert!(saver.files().is_empty());
    assert_eq!(c.blobs().stats().live, 0);

    let location = c.on_secondary_export().unwrap();
    assert_eq!(location, "memory:diagram.svg");
    let files = saver.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name, "diagram.svg");
    assert_eq!(files[0].mime, "image/svg+xml");

    let saved = VectorDocument::parse(std::str::from_utf8(&files[0].bytes).unwrap()).unwrap();
    assert_eq!(saved.attr("width"), Some("300"));
    assert_eq!(saved.attr("height"), Some("150"));
    assert_eq!(saved.attr("viewBox"), Some("0 0 300 150"));

    let probe = UsvgGeometryProbe::default();
    let live = c.target().document().unwrap();
    let before = probe.content_box(live).unwrap();
    let after = probe.content_box(&saved).unwrap();
    assert_close(before, after);
    assert_eq!(status.current().unwrap().kind, StatusKind::Success);
}

#[test]
fn render_failure_clears_the_target() {
    let status = RecordingStatusSink::new();
    let saver = MemorySaver::new();
    let mut c = controller(&status, &saver);
    c.on_render("flowchart A --> B").unwrap();
    assert!(!c.target().is_empty());

    let err = c.on_render("sequenceDiagram").unwrap_err();
    assert!(matches!(err, RenderError::Engine { .. }));
    assert!(c.target().is_empty());
    let shown = status.current().unwrap();
    assert_eq!(shown.kind, StatusKind::Error);
    assert!(shown.message.starts_with("diagram render error"));

    assert_eq!(c.on_trigger_export(), ExportOutcome::NothingToExport);
    assert_eq!(status.current().unwrap().kind, StatusKind::Error);
    assert!(matches!(c.on_secondary_export(), Err(ExportError::NoDocument)));
}

#[test]
fn render_requires_initialized_engine_and_a_description() {
    let status = RecordingStatusSink::new();
    let saver = MemorySaver::new();
    let mut c = controller(&status, &saver).with_engine_cell(&UNINITIALIZED);
    assert!(matches!(
        c.on_render("flowchart A --> B"),
        Err(RenderError::NotInitialized)
    ));

    let mut c = controller(&status, &saver);
    assert!(matches!(
        c.on_render("```mermaid\n```"),
        Err(RenderError::EmptyDescription)
    ));
}

#[test]
fn disabled_trigger_is_ignored() {
    let status = RecordingStatusSink::new();
    let saver = MemorySaver::new();
    let mut c = controller(&status, &saver);
    c.on_render("flowchart A --> B").unwrap();
    let events_before = status.events().len();

    c.trigger_mut().disable();
    assert_eq!(c.on_trigger_export(), ExportOutcome::Busy);
    assert_eq!(status.events().len(), events_before);
    assert!(saver.files().is_empty());
}

#[test]
fn save_failure_is_reported_and_releases_the_png() {
    let status = RecordingStatusSink::new();
    let mut c = DeliveryController::new("diagram-1", FlowEngine, status.clone(), FullDisk)
        .with_engine_cell(engine_cell())
        .with_loader(SvgImageLoader::with_fontdb(Arc::new(
            usvg::fontdb::Database::new(),
        )))
        .with_probe(LayoutBox(300.0, 150.0));
    c.on_render("flowchart A --> B").unwrap();

    let outcome = c.on_trigger_export();
    let ExportOutcome::SaveFailed { message } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert!(message.contains("disk full"));
    assert_eq!(status.current().unwrap().kind, StatusKind::Error);
    assert_eq!(c.blobs().stats().live, 0);
}

#[test]
fn async_wrappers_drive_the_same_session() {
    let status = RecordingStatusSink::new();
    let saver = MemorySaver::new();
    let mut c = controller(&status, &saver).try_with_config(ExportConfig {
        scale: 1.0,
        margin: 0.0,
        ..Default::default()
    })
    .unwrap();
    let outcome = futures::executor::block_on(async {
        c.render("flowchart A --> B").await.unwrap();
        c.trigger_export().await
    });
    assert!(matches!(
        outcome,
        ExportOutcome::Saved {
            width: 300,
            height: 150,
            ..
        }
    ));
}
