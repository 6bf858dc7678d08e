use crate::error::{ExportError, RasterError};
use crate::raster::RasterResult;
use crate::strategy::{ExportContext, ExportStrategy, standard_strategies};

/// One strategy tried by the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportAttempt {
    /// Zero-based position in the chain.
    pub strategy_index: usize,
    pub strategy: &'static str,
    pub error: Option<RasterError>,
}

/// Reported before each strategy runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportProgress {
    pub index: usize,
    pub total: usize,
    pub strategy: &'static str,
}

/// Ordered rasterization strategies, tried one at a time until one succeeds.
pub struct FallbackChain {
    strategies: Vec<Box<dyn ExportStrategy>>,
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new(standard_strategies())
    }
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.strategy_names()).finish()
    }
}

impl FallbackChain {
    pub fn new(strategies: Vec<Box<dyn ExportStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn export_to_raster(
        &self,
        ctx: &ExportContext<'_>,
        progress: &mut dyn FnMut(ExportProgress),
    ) -> Result<RasterResult, ExportError> {
        let total = self.strategies.len();
        let mut attempts = Vec::with_capacity(total);
        for (index, strategy) in self.strategies.iter().enumerate() {
            progress(ExportProgress {
                index,
                total,
                strategy: strategy.name(),
            });
            tracing::debug!(index, strategy = strategy.name(), "attempting raster export");
            match strategy.attempt(ctx) {
                Ok(result) => {
                    tracing::debug!(
                        index,
                        width = result.width,
                        height = result.height,
                        "raster export succeeded"
                    );
                    return Ok(result);
                }
                Err(err) => {
                    tracing::warn!(index, strategy = strategy.name(), error = %err, "raster export method failed");
                    attempts.push(ExportAttempt {
                        strategy_index: index,
                        strategy: strategy.name(),
                        error: Some(err),
                    });
                }
            }
        }
        Err(ExportError::AllStrategiesExhausted { attempts })
    }
}
