use crate::models::products::{ImageProductSet, ImageStatistics, IterationState};
use crate::models::target::{MaskingMode, TargetContext};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything recorded about one engine pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub state: IterationState,
    pub products: ImageProductSet,
    pub statistics: ImageStatistics,
}

/// Diagnostic scalars kept for reporting; never read back by the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub image_min: Option<f64>,
    pub image_max: Option<f64>,
    pub image_rms: Option<f64>,
    pub image_rms_min: Option<f64>,
    pub image_rms_max: Option<f64>,
    pub dirty_dynamic_range: Option<f64>,
    pub dr_correction_factor: Option<f64>,
    pub max_edr_used: Option<bool>,
    pub dr_corrected_sensitivity: Option<f64>,
}

/// Moment map produced after the cleaning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentProduct {
    pub iteration: u32,
    pub moment: u8,
    pub path: Utf8PathBuf,
}

/// Spectral parameters handed to the engine for cubes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralSetup {
    pub start: Option<String>,
    pub width: Option<String>,
    pub nchan: Option<u32>,
    pub nbin: Option<u32>,
}

/// Outcome of a completed run for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagingResult {
    pub context: TargetContext,
    pub sensitivity: f64,
    pub spectral_setup: SpectralSetup,
    pub iterations: BTreeMap<u32, IterationRecord>,
    pub diagnostics: Diagnostics,
    pub initial_masking: MaskingMode,
    pub final_masking: MaskingMode,
    pub masking_fallback: bool,
    pub mom0_fc: Option<MomentProduct>,
    pub mom8_fc: Option<MomentProduct>,
}

impl ImagingResult {
    pub fn new(context: TargetContext, sensitivity: f64, masking: MaskingMode) -> Self {
        Self {
            context,
            sensitivity,
            spectral_setup: SpectralSetup::default(),
            iterations: BTreeMap::new(),
            diagnostics: Diagnostics::default(),
            initial_masking: masking,
            final_masking: masking,
            masking_fallback: false,
            mom0_fc: None,
            mom8_fc: None,
        }
    }

    pub fn record(&mut self, record: IterationRecord) {
        self.iterations.insert(record.state.iteration, record);
    }

    pub fn max_iteration(&self) -> Option<u32> {
        self.iterations.keys().next_back().copied()
    }

    /// Products of the last pass performed.
    pub fn final_products(&self) -> Option<&ImageProductSet> {
        self.iterations.values().next_back().map(|r| &r.products)
    }

    /// Number of cleaning passes, excluding the dirty image.
    pub fn cleaning_passes(&self) -> usize {
        self.iterations.keys().filter(|&&i| i > 0).count()
    }

    pub fn moment_maps(&self) -> impl Iterator<Item = &MomentProduct> {
        self.mom0_fc.iter().chain(self.mom8_fc.iter())
    }
}

/// Terminal failure of a target, in the shape downstream reporting expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub context: TargetContext,
    pub error: String,
}
