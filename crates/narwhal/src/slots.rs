//! Host-facing slots of one diagram instance: where the rendered document lives, the export
//! trigger, the status line, and the save-file primitive.

use crate::document::VectorDocument;
use crate::error::SaveError;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Holds the live document and the markup it was parsed from. Replaced wholesale on each render.
#[derive(Debug, Clone, Default)]
pub struct RenderTarget {
    document: Option<VectorDocument>,
    markup: Option<String>,
}

impl RenderTarget {
    pub fn install(&mut self, document: VectorDocument, markup: String) {
        self.document = Some(document);
        self.markup = Some(markup);
    }

    pub fn clear(&mut self) {
        self.document = None;
        self.markup = None;
    }

    pub fn document(&self) -> Option<&VectorDocument> {
        self.document.as_ref()
    }

    /// Markup captured at render time.
    pub fn markup(&self) -> Option<&str> {
        self.markup.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_none()
    }
}

/// The export button. Disabled while an export session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerControl {
    enabled: bool,
}

impl Default for TriggerControl {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl TriggerControl {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Progress,
    Success,
    Error,
}

/// Follow-up the user can take from a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusAction {
    /// Save the vector document instead of a bitmap.
    DownloadVector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<StatusAction>,
}

impl Status {
    pub fn progress(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Progress,
            message: message.into(),
            action: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Success,
            message: message.into(),
            action: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Error,
            message: message.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: StatusAction) -> Self {
        self.action = Some(action);
        self
    }
}

pub trait StatusSink {
    fn update(&mut self, diagram_id: &str, status: Status);
    fn clear(&mut self, diagram_id: &str);
}

impl<S: StatusSink + ?Sized> StatusSink for Box<S> {
    fn update(&mut self, diagram_id: &str, status: Status) {
        (**self).update(diagram_id, status);
    }

    fn clear(&mut self, diagram_id: &str) {
        (**self).clear(diagram_id);
    }
}

/// Emits status changes as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn update(&mut self, diagram_id: &str, status: Status) {
        match status.kind {
            StatusKind::Progress => tracing::info!(diagram = diagram_id, "{}", status.message),
            StatusKind::Success => tracing::info!(diagram = diagram_id, "{}", status.message),
            StatusKind::Error => tracing::error!(
                diagram = diagram_id,
                action = ?status.action,
                "{}",
                status.message
            ),
        }
    }

    fn clear(&mut self, diagram_id: &str) {
        tracing::trace!(diagram = diagram_id, "status cleared");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Update(Status),
    Clear,
}

/// Keeps every status change. Clones share the same history.
#[derive(Debug, Clone, Default)]
pub struct RecordingStatusSink {
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    /// Status currently shown, `None` when cleared or never set.
    pub fn current(&self) -> Option<Status> {
        match self.events.lock().last() {
            Some(StatusEvent::Update(status)) => Some(status.clone()),
            _ => None,
        }
    }

    pub fn updates(&self) -> Vec<Status> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Update(s) => Some(s.clone()),
                StatusEvent::Clear => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingStatusSink {
    fn update(&mut self, _diagram_id: &str, status: Status) {
        self.events.lock().push(StatusEvent::Update(status));
    }

    fn clear(&mut self, _diagram_id: &str) {
        self.events.lock().push(StatusEvent::Clear);
    }
}

/// Host save-file primitive. Returns where the file ended up.
pub trait FileSaver {
    fn save(&mut self, file_name: &str, mime: &str, bytes: &[u8]) -> Result<String, SaveError>;
}

impl<S: FileSaver + ?Sized> FileSaver for Box<S> {
    fn save(&mut self, file_name: &str, mime: &str, bytes: &[u8]) -> Result<String, SaveError> {
        (**self).save(file_name, mime, bytes)
    }
}

/// Writes files into one directory.
#[derive(Debug, Clone)]
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileSaver for DirectorySaver {
    fn save(&mut self, file_name: &str, mime: &str, bytes: &[u8]) -> Result<String, SaveError> {
        if file_name.is_empty()
            || file_name == "."
            || file_name == ".."
            || file_name.contains(['/', '\\'])
        {
            return Err(SaveError::InvalidName {
                name: file_name.to_string(),
            });
        }
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        std::fs::write(&path, bytes)?;
        tracing::info!(path = %path.display(), mime, bytes = bytes.len(), "saved file");
        Ok(path.display().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Keeps saved files in memory. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct MemorySaver {
    files: Arc<Mutex<Vec<SavedFile>>>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> Vec<SavedFile> {
        self.files.lock().clone()
    }
}

impl FileSaver for MemorySaver {
    fn save(&mut self, file_name: &str, mime: &str, bytes: &[u8]) -> Result<String, SaveError> {
        self.files.lock().push(SavedFile {
            file_name: file_name.to_string(),
            mime: mime.to_string(),
            bytes: bytes.to_vec(),
        });
        Ok(format!("memory:{file_name}"))
    }
}

/// File stem derived from a diagram title: letters, digits, spaces and underscores only,
/// trailing spaces dropped; `fallback` when nothing is left.
pub fn file_stem_for_title(title: &str, fallback: &str) -> String {
    let stem: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    let stem = stem.trim_end();
    if stem.trim().is_empty() {
        fallback.to_string()
    } else {
        stem.to_string()
    }
}
