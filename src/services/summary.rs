use crate::models::ImageStatistics;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("Summary file not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("Failed to read summary file {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse summary file {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },
}

/// Per-pass summary the engine writes as `<iter_root>.summary.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassSummary {
    #[serde(flatten)]
    pub statistics: ImageStatistics,

    /// Primary beam response along the central column, from the image edge
    /// towards the centre. Masked pixels are written as zero.
    #[serde(default)]
    pub pb_column: Vec<f64>,
}

impl PassSummary {
    /// Summary file belonging to a product: `x.iter1.residual` -> `x.iter1.summary.yaml`.
    pub fn path_for(product: &Utf8Path) -> Utf8PathBuf {
        let name = product.as_str();
        let name = name.strip_suffix(".tt0").unwrap_or(name);
        let mut path = Utf8PathBuf::from(name);
        path.set_extension("summary.yaml");
        path
    }

    pub fn load(path: &Utf8Path) -> Result<Self, SummaryError> {
        if !path.exists() {
            return Err(SummaryError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| SummaryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml_ng::from_str(&content).map_err(|source| SummaryError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
