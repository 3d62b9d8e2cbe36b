use crate::models::quantity::Threshold;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stop code reported by the imaging engine at the end of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopCode {
    #[default]
    Unknown,
    IterationLimit,
    ThresholdReached,
    ForceStop,
    NoChangeInPeak,
    PeakIncreased,
    PeakIncreasedFromMinimum,
    /// The automasking algorithm produced an empty mask.
    ZeroMask,
    NsigmaReached,
    Other(i32),
}

impl StopCode {
    /// Reserved code meaning "automask found nothing to clean".
    pub const NO_MASK_FOUND: i32 = 7;

    pub fn code(self) -> i32 {
        match self {
            StopCode::Unknown => 0,
            StopCode::IterationLimit => 1,
            StopCode::ThresholdReached => 2,
            StopCode::ForceStop => 3,
            StopCode::NoChangeInPeak => 4,
            StopCode::PeakIncreased => 5,
            StopCode::PeakIncreasedFromMinimum => 6,
            StopCode::ZeroMask => Self::NO_MASK_FOUND,
            StopCode::NsigmaReached => 8,
            StopCode::Other(code) => code,
        }
    }

    pub fn is_no_mask_found(self) -> bool {
        self == StopCode::ZeroMask
    }

    /// The engine judged the residual inside the mask to be at or below the threshold.
    pub fn reached_threshold(self) -> bool {
        matches!(self, StopCode::ThresholdReached | StopCode::NsigmaReached)
    }
}

impl From<i32> for StopCode {
    fn from(code: i32) -> Self {
        match code {
            0 => StopCode::Unknown,
            1 => StopCode::IterationLimit,
            2 => StopCode::ThresholdReached,
            3 => StopCode::ForceStop,
            4 => StopCode::NoChangeInPeak,
            5 => StopCode::PeakIncreased,
            6 => StopCode::PeakIncreasedFromMinimum,
            Self::NO_MASK_FOUND => StopCode::ZeroMask,
            8 => StopCode::NsigmaReached,
            other => StopCode::Other(other),
        }
    }
}

impl fmt::Display for StopCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for StopCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for StopCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(StopCode::from(i32::deserialize(deserializer)?))
    }
}

/// Linear spectral axis of a cube product.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralAxis {
    pub start_hz: f64,
    pub width_hz: f64,
    pub nchan: u32,
}

impl SpectralAxis {
    /// Channel index containing `freq_hz`, or `None` outside the axis.
    pub fn channel_of(&self, freq_hz: f64) -> Option<u32> {
        if self.width_hz == 0.0 || self.nchan == 0 {
            return None;
        }
        let index = ((freq_hz - self.start_hz) / self.width_hz).round();
        if index < 0.0 || index >= f64::from(self.nchan) {
            None
        } else {
            Some(index as u32)
        }
    }
}

/// Products of one engine pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageProductSet {
    pub iteration: u32,
    pub psf: Utf8PathBuf,
    pub model: Utf8PathBuf,
    pub residual: Utf8PathBuf,
    /// Restored image (primary beam corrected when the engine produces one).
    pub image: Utf8PathBuf,
    /// Primary beam response.
    pub flux: Utf8PathBuf,
    pub multiterm: bool,
    pub stop_code: StopCode,
    #[serde(default)]
    pub spectral_axis: Option<SpectralAxis>,
}

impl ImageProductSet {
    /// Product set following the `<iter_root>.<kind>` naming of the engine.
    pub fn named(iter_root: &str, iteration: u32, multiterm: bool, pbcor: bool) -> Self {
        let image = if pbcor {
            format!("{}.image.pbcor", iter_root)
        } else {
            format!("{}.image", iter_root)
        };
        Self {
            iteration,
            psf: Utf8PathBuf::from(format!("{}.psf", iter_root)),
            model: Utf8PathBuf::from(format!("{}.model", iter_root)),
            residual: Utf8PathBuf::from(format!("{}.residual", iter_root)),
            image: Utf8PathBuf::from(image),
            flux: Utf8PathBuf::from(format!("{}.pb", iter_root)),
            multiterm,
            stop_code: StopCode::Unknown,
            spectral_axis: None,
        }
    }

    /// Naming root shared by every pass: the residual name without its
    /// `.residual` and `.iter<N>` extensions.
    pub fn root_name(&self) -> String {
        let residual = self.residual.as_str();
        let without_kind = residual.rsplit_once('.').map_or(residual, |(head, _)| head);
        without_kind
            .rsplit_once('.')
            .map_or(without_kind, |(head, _)| head)
            .to_string()
    }

    /// Flux image to derive primary beam limits from (`.tt0` term for multiterm).
    pub fn pb_source(&self) -> Utf8PathBuf {
        with_term(&self.flux, self.multiterm)
    }

    /// Restored image without the primary beam correction suffix.
    pub fn nonpbcor_image(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.image.as_str().replace(".pbcor", ""))
    }
}

/// Append the zeroth Taylor term extension for multiterm products.
pub fn with_term(path: &Utf8Path, multiterm: bool) -> Utf8PathBuf {
    if multiterm {
        Utf8PathBuf::from(format!("{}.tt0", path))
    } else {
        path.to_path_buf()
    }
}

/// Residual/model/image statistics of a completed pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageStatistics {
    pub model_sum: f64,
    pub residual_cleanmask_rms: f64,
    pub residual_non_cleanmask_rms: f64,
    pub residual_min: f64,
    pub residual_max: f64,
    pub nonpbcor_image_non_cleanmask_rms_min: f64,
    pub nonpbcor_image_non_cleanmask_rms_max: f64,
    pub nonpbcor_image_non_cleanmask_rms: f64,
    pub pbcor_image_min: f64,
    pub pbcor_image_max: f64,
    /// Scaled MAD of the residual.
    pub residual_robust_rms: f64,
}

impl ImageStatistics {
    /// Residual peak over robust rms; zero when the rms is not positive.
    pub fn peak_to_rms(&self) -> f64 {
        if self.residual_robust_rms > 0.0 {
            self.residual_max / self.residual_robust_rms
        } else {
            0.0
        }
    }
}

/// Primary beam levels bounding the image and the clean mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PbLimits {
    pub image: f64,
    pub cleanmask: f64,
}

impl Default for PbLimits {
    fn default() -> Self {
        Self {
            image: 0.2,
            cleanmask: 0.3,
        }
    }
}

/// Control parameters of one pass. Fixed once the pass has been issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationState {
    pub iteration: u32,
    pub mask: String,
    pub threshold: Threshold,
    pub niter: u32,
    /// Jy.
    pub sensitivity: f64,
    pub stop_code: Option<StopCode>,
}
