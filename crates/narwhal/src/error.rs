use crate::chain::ExportAttempt;

pub type Result<T> = std::result::Result<T, RasterError>;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("invalid SVG markup: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("expected an <svg> root element, found <{found}>")]
    NotSvg { found: String },
}

/// Failures while turning a diagram description into an installed vector document.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("layout engine is not initialized")]
    NotInitialized,
    #[error("diagram description is empty")]
    EmptyDescription,
    #[error("diagram render error: {message}")]
    Engine { message: String },
    #[error("layout engine produced an invalid document: {message}")]
    InvalidDocument { message: String },
}

impl From<DocumentError> for RenderError {
    fn from(value: DocumentError) -> Self {
        Self::InvalidDocument {
            message: value.to_string(),
        }
    }
}

/// Per-strategy rasterization failures. The fallback chain recovers from all of them by moving on
/// to the next strategy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RasterError {
    #[error("failed to load SVG as image: {message}")]
    RasterLoad { message: String },
    #[error("drawing surface unavailable for {width}x{height} pixels")]
    CanvasUnavailable { width: u64, height: u64 },
    #[error("failed to encode PNG: {message}")]
    PngEncode { message: String },
    #[error("inline payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("no render-time markup was captured")]
    MissingMarkup,
    #[error("unknown or revoked blob locator: {url}")]
    UnknownLocator { url: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("{}", exhausted_message(.attempts))]
    AllStrategiesExhausted { attempts: Vec<ExportAttempt> },
    #[error("no rendered diagram to export")]
    NoDocument,
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("failed to save {file_name}: {message}")]
    Save { file_name: String, message: String },
}

impl ExportError {
    /// Error text of the last strategy that failed, if this is an exhausted chain.
    pub fn last_cause(&self) -> Option<&RasterError> {
        match self {
            Self::AllStrategiesExhausted { attempts } => {
                attempts.iter().rev().find_map(|a| a.error.as_ref())
            }
            _ => None,
        }
    }
}

fn exhausted_message(attempts: &[ExportAttempt]) -> String {
    let mut out = format!("all {} export methods failed", attempts.len());
    for attempt in attempts {
        if let Some(err) = &attempt.error {
            out.push_str(&format!(
                "; method {} ({}): {err}",
                attempt.strategy_index + 1,
                attempt.strategy
            ));
        }
    }
    if let Some(last) = attempts.iter().rev().find_map(|a| a.error.as_ref()) {
        out.push_str(&format!("; last error: {last}"));
    }
    out
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid export config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid export config: {message}")]
    Invalid { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid file name: {name:?}")]
    InvalidName { name: String },
}
