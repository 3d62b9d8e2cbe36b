use crate::models::{ImageProductSet, ImageStatistics, PbLimits, Threshold};
use crate::services::summary::{PassSummary, SummaryError};
use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Inputs for the residual statistics of one pass.
#[derive(Debug, Clone)]
pub struct StatisticsRequest {
    pub iteration: u32,
    pub products: ImageProductSet,
    /// Mask used for the pass; `None` for the dirty image.
    pub mask: Option<String>,
    pub threshold: Option<Threshold>,
    pub pblimits: PbLimits,
    pub continuum_ranges: Option<String>,
}

#[derive(Error, Debug)]
pub enum StatisticsError {
    #[error("Statistics for iteration {iteration} unavailable: {source}")]
    Unavailable {
        iteration: u32,
        #[source]
        source: SummaryError,
    },

    #[error("Statistics for iteration {iteration} are not finite")]
    NotFinite { iteration: u32 },
}

/// Computes residual/model/image statistics for a completed pass.
///
/// Implementations are pure with respect to the engine inputs: they read the
/// products and never modify them.
#[cfg_attr(test, mockall::automock)]
pub trait StatisticsProvider: Send + Sync {
    fn compute_residual_stats(
        &self,
        request: &StatisticsRequest,
    ) -> Result<ImageStatistics, StatisticsError>;
}

/// Statistics read from the `<iter_root>.summary.yaml` file the engine writes
/// next to its products.
pub struct SummaryStatistics {
    working_dir: Utf8PathBuf,
}

impl SummaryStatistics {
    pub fn new(working_dir: impl AsRef<Utf8Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
        }
    }
}

impl StatisticsProvider for SummaryStatistics {
    fn compute_residual_stats(
        &self,
        request: &StatisticsRequest,
    ) -> Result<ImageStatistics, StatisticsError> {
        let path = self
            .working_dir
            .join(PassSummary::path_for(&request.products.residual));
        let summary = PassSummary::load(&path).map_err(|source| StatisticsError::Unavailable {
            iteration: request.iteration,
            source,
        })?;

        let stats = summary.statistics;
        if !(stats.residual_max.is_finite() && stats.residual_robust_rms.is_finite()) {
            return Err(StatisticsError::NotFinite {
                iteration: request.iteration,
            });
        }

        tracing::debug!(
            "Iteration {} statistics from {}: residual max {}, robust rms {}",
            request.iteration,
            path,
            stats.residual_max,
            stats.residual_robust_rms
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn request(iteration: u32) -> StatisticsRequest {
        StatisticsRequest {
            iteration,
            products: ImageProductSet::named("img.iter1", iteration, false, true),
            mask: Some("img.iter1.cleanmask".to_string()),
            threshold: None,
            pblimits: PbLimits::default(),
            continuum_ranges: None,
        }
    }

    #[test]
    fn test_reads_summary_next_to_residual() {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        fs::write(
            dir.join("img.iter1.summary.yaml"),
            "model_sum: 0.5\nresidual_cleanmask_rms: 0.001\nresidual_non_cleanmask_rms: 0.001\n\
             residual_min: -0.002\nresidual_max: 0.5\n\
             nonpbcor_image_non_cleanmask_rms_min: 0.0009\n\
             nonpbcor_image_non_cleanmask_rms_max: 0.0011\n\
             nonpbcor_image_non_cleanmask_rms: 0.001\n\
             pbcor_image_min: -0.003\npbcor_image_max: 0.6\nresidual_robust_rms: 0.125\n",
        )
        .unwrap();

        let provider = SummaryStatistics::new(&dir);
        let stats = provider.compute_residual_stats(&request(1)).unwrap();
        assert_eq!(stats.model_sum, 0.5);
        assert_eq!(stats.residual_max, 0.5);
        assert_eq!(stats.peak_to_rms(), 4.0);
    }

    #[test]
    fn test_missing_summary_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();

        let provider = SummaryStatistics::new(&dir);
        let err = provider.compute_residual_stats(&request(3)).unwrap_err();
        assert!(matches!(err, StatisticsError::Unavailable { iteration: 3, .. }));
    }
}
