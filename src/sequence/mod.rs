//! Sequence managers: the per-target policy that decides mask, threshold and
//! niter of the next pass and when to stop cleaning.
//!
//! The set of policies is closed ([`SequenceKind`]); each kind has one
//! implementation of [`SequenceManager`] and [`build_sequence`] picks it once
//! when a run starts. The controller owns the boxed manager for the whole run.
//!
//! A manager's [`SequenceState`] changes only through the explicit setters.
//! [`SequenceManager::iteration_result`] records what a pass measured and
//! [`SequenceManager::iteration`] turns that history into a decision.

mod iterative;
mod threshold;

pub use iterative::{IterativeSequence, IterativeSequence2};
pub use threshold::{
    AutoMaskThresholdSequence, ImageCentreThresholdSequence, ManualMaskThresholdSequence,
    NoMaskThresholdSequence,
};

use crate::models::{ImageStatistics, MaskingMode, PbLimits, StopCode, Threshold};
use crate::services::{StatisticsError, StatisticsProvider, StatisticsRequest};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative model flux change below which the model is considered stable.
pub const FLUX_CHANGE_LIMIT: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequenceKind {
    ImageCentre,
    AutoMask,
    ManualMask,
    NoMask,
    Iterative,
    Iterative2,
}

impl From<MaskingMode> for SequenceKind {
    fn from(mode: MaskingMode) -> Self {
        match mode {
            MaskingMode::CentralRegion => SequenceKind::ImageCentre,
            MaskingMode::Auto => SequenceKind::AutoMask,
            MaskingMode::Manual => SequenceKind::ManualMask,
            MaskingMode::None => SequenceKind::NoMask,
            MaskingMode::PsfIter => SequenceKind::Iterative,
            MaskingMode::PsfIter2 => SequenceKind::Iterative2,
        }
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SequenceKind::ImageCentre => "ImageCentreThresholdSequence",
            SequenceKind::AutoMask => "AutoMaskThresholdSequence",
            SequenceKind::ManualMask => "ManualMaskThresholdSequence",
            SequenceKind::NoMask => "NoMaskThresholdSequence",
            SequenceKind::Iterative => "IterativeSequence",
            SequenceKind::Iterative2 => "IterativeSequence2",
        };
        f.write_str(name)
    }
}

/// Run-long state of a sequence manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceState {
    pub threshold: Threshold,
    /// Jy.
    pub sensitivity: f64,
    pub niter: u32,
    /// `sensitivity * dr_correction_factor`, fixed after the dirty image.
    pub dr_corrected_sensitivity: f64,
}

/// What one pass measured, as remembered by the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct PassRecord {
    pub iteration: u32,
    pub stop_code: StopCode,
    pub statistics: ImageStatistics,
}

/// Continuum selection of a cube spw, handed to the policy unless the
/// continuum ranges are cleaned too.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSelection {
    pub spw: String,
    pub spwsel_lsrk: IndexMap<String, String>,
}

impl ChannelSelection {
    /// Selection of this spw without the frame suffix, if any.
    pub fn continuum(&self) -> Option<String> {
        let selection = self.spwsel_lsrk.get(&format!("spw{}", self.spw))?;
        if matches!(selection.trim(), "" | "NONE" | "ALL") {
            return None;
        }
        selection.split_whitespace().next().map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IterationRequest {
    pub next_mask: String,
    pub pblimits: PbLimits,
    pub channel_selection: Option<ChannelSelection>,
    /// Force one more pass regardless of convergence (after the automask fallback).
    pub keep_iterating: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDecision {
    pub iterating: bool,
    pub mask: String,
    pub threshold: Threshold,
    pub niter: u32,
    pub excluded_channels: Option<String>,
    /// PB level of the central mask region; only the image-centre policy sets it.
    pub mask_pblimit: Option<f64>,
}

/// State and pass history shared by every policy.
#[derive(Debug, Clone)]
pub struct SequenceCore {
    pub state: SequenceState,
    history: Vec<PassRecord>,
    max_passes: u32,
}

impl SequenceCore {
    pub fn new(state: SequenceState, max_passes: u32) -> Self {
        Self {
            state,
            history: Vec::new(),
            max_passes,
        }
    }

    pub fn record(&mut self, record: PassRecord) {
        self.history.push(record);
    }

    pub fn history(&self) -> &[PassRecord] {
        &self.history
    }

    pub fn last(&self) -> Option<&PassRecord> {
        self.history.last()
    }

    /// The two most recent records, oldest first.
    pub fn last_two(&self) -> Option<(&PassRecord, &PassRecord)> {
        match self.history.as_slice() {
            [.., previous, last] => Some((previous, last)),
            _ => None,
        }
    }

    /// Records of passes that cleaned, i.e. everything but the dirty image.
    pub fn cleaning_passes(&self) -> usize {
        self.history.iter().filter(|r| r.iteration > 0).count()
    }

    pub fn max_passes(&self) -> u32 {
        self.max_passes
    }

    pub fn cap_reached(&self) -> bool {
        self.cleaning_passes() >= self.max_passes as usize
    }

    /// Model flux of the last two cleaning passes changed by less than 1%.
    pub fn model_flux_stable(&self) -> bool {
        match self.last_two() {
            Some((previous, last)) if previous.iteration > 0 => {
                let before = previous.statistics.model_sum;
                let after = last.statistics.model_sum;
                before != 0.0 && ((after - before) / before).abs() < FLUX_CHANGE_LIMIT
            }
            _ => false,
        }
    }
}

/// Masking/convergence policy for one target run.
///
/// Implementors supply the core accessors and their convergence rule; the
/// decision protocol itself is shared.
pub trait SequenceManager: Send {
    fn kind(&self) -> SequenceKind;

    fn core(&self) -> &SequenceCore;

    fn core_mut(&mut self) -> &mut SequenceCore;

    /// Whether the recorded passes show the policy's stopping condition.
    fn converged(&self) -> bool;

    fn state(&self) -> &SequenceState {
        &self.core().state
    }

    fn threshold(&self) -> &Threshold {
        &self.core().state.threshold
    }

    fn sensitivity(&self) -> f64 {
        self.core().state.sensitivity
    }

    fn niter(&self) -> u32 {
        self.core().state.niter
    }

    fn dr_corrected_sensitivity(&self) -> f64 {
        self.core().state.dr_corrected_sensitivity
    }

    fn set_threshold(&mut self, threshold: Threshold) {
        self.core_mut().state.threshold = threshold;
    }

    fn set_niter(&mut self, niter: u32) {
        self.core_mut().state.niter = niter;
    }

    fn set_dr_corrected_sensitivity(&mut self, sensitivity: f64) {
        self.core_mut().state.dr_corrected_sensitivity = sensitivity;
    }

    /// Mask handed to the engine for the next pass.
    fn pass_mask(&self, next_mask: &str) -> String {
        next_mask.to_string()
    }

    /// Threshold handed to the engine for the next pass.
    fn pass_threshold(&self) -> Threshold {
        self.threshold().clone()
    }

    fn mask_pblimit(&self, _request: &IterationRequest) -> Option<f64> {
        None
    }

    fn excluded_channels(&self, request: &IterationRequest) -> Option<String> {
        request
            .channel_selection
            .as_ref()
            .and_then(ChannelSelection::continuum)
    }

    /// Statistics of a completed pass, recorded in the pass history.
    ///
    /// Never changes threshold, sensitivity or niter.
    fn iteration_result(
        &mut self,
        provider: &dyn StatisticsProvider,
        request: &StatisticsRequest,
    ) -> Result<ImageStatistics, StatisticsError> {
        let statistics = provider.compute_residual_stats(request)?;
        self.core_mut().record(PassRecord {
            iteration: request.iteration,
            stop_code: request.products.stop_code,
            statistics: statistics.clone(),
        });
        Ok(statistics)
    }

    /// Decide whether to run another pass, and with which parameters.
    fn iteration(&self, request: &IterationRequest) -> SequenceDecision {
        let core = self.core();
        let iterating = if core.cap_reached() {
            tracing::info!(
                "{}: reached the maximum of {} cleaning passes",
                self.kind(),
                core.max_passes()
            );
            false
        } else if request.keep_iterating {
            true
        } else {
            !self.converged()
        };

        SequenceDecision {
            iterating,
            mask: self.pass_mask(&request.next_mask),
            threshold: self.pass_threshold(),
            niter: self.niter(),
            excluded_channels: self.excluded_channels(request),
            mask_pblimit: self.mask_pblimit(request),
        }
    }
}

/// Parameters fixed when a run's sequence manager is created.
#[derive(Debug, Clone)]
pub struct SequenceParams {
    pub kind: SequenceKind,
    pub threshold: Threshold,
    pub sensitivity: f64,
    pub niter: u32,
    /// Cap on cleaning passes (`maxncleans`).
    pub max_passes: u32,
}

pub fn build_sequence(params: SequenceParams) -> Box<dyn SequenceManager> {
    let core = SequenceCore::new(
        SequenceState {
            threshold: params.threshold,
            sensitivity: params.sensitivity,
            niter: params.niter,
            dr_corrected_sensitivity: params.sensitivity,
        },
        params.max_passes,
    );

    match params.kind {
        SequenceKind::ImageCentre => Box::new(ImageCentreThresholdSequence::new(core)),
        SequenceKind::AutoMask => Box::new(AutoMaskThresholdSequence::new(core)),
        SequenceKind::ManualMask => Box::new(ManualMaskThresholdSequence::new(core)),
        SequenceKind::NoMask => Box::new(NoMaskThresholdSequence::new(core)),
        SequenceKind::Iterative => Box::new(IterativeSequence::new(core)),
        SequenceKind::Iterative2 => Box::new(IterativeSequence2::new(core)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ImageProductSet;
    use crate::services::statistics::MockStatisticsProvider;

    pub(crate) fn stats(residual_max: f64, robust_rms: f64, model_sum: f64) -> ImageStatistics {
        ImageStatistics {
            residual_max,
            residual_robust_rms: robust_rms,
            model_sum,
            ..Default::default()
        }
    }

    pub(crate) fn record(iteration: u32, code: StopCode, statistics: ImageStatistics) -> PassRecord {
        PassRecord {
            iteration,
            stop_code: code,
            statistics,
        }
    }

    pub(crate) fn params(kind: SequenceKind, threshold: &str) -> SequenceParams {
        SequenceParams {
            kind,
            threshold: Threshold::parse(threshold).unwrap(),
            sensitivity: 0.0005,
            niter: 1000,
            max_passes: 3,
        }
    }

    pub(crate) fn request() -> IterationRequest {
        IterationRequest {
            next_mask: "img.iter1.cleanmask".to_string(),
            pblimits: PbLimits::default(),
            channel_selection: None,
            keep_iterating: false,
        }
    }

    #[test]
    fn test_kind_from_masking_mode() {
        assert_eq!(SequenceKind::from(MaskingMode::Auto), SequenceKind::AutoMask);
        assert_eq!(SequenceKind::from(MaskingMode::PsfIter2), SequenceKind::Iterative2);
        assert_eq!(
            build_sequence(params(SequenceKind::NoMask, "1mJy")).kind(),
            SequenceKind::NoMask
        );
    }

    #[test]
    fn test_iteration_result_records_without_touching_state() {
        let mut provider = MockStatisticsProvider::new();
        provider
            .expect_compute_residual_stats()
            .times(1)
            .returning(|_| Ok(stats(0.01, 0.001, 0.2)));

        let mut sequence = build_sequence(params(SequenceKind::ImageCentre, "1mJy"));
        let before = sequence.state().clone();

        let mut products = ImageProductSet::named("img.iter1", 1, false, true);
        products.stop_code = StopCode::IterationLimit;
        let request = StatisticsRequest {
            iteration: 1,
            products,
            mask: Some("img.iter1.cleanmask".to_string()),
            threshold: Some(Threshold::parse("1mJy").unwrap()),
            pblimits: PbLimits::default(),
            continuum_ranges: None,
        };

        let result = sequence.iteration_result(&provider, &request).unwrap();
        assert_eq!(result.residual_max, 0.01);
        assert_eq!(sequence.state(), &before);
        assert_eq!(
            sequence.core().last().map(|r| r.stop_code),
            Some(StopCode::IterationLimit)
        );
    }

    #[test]
    fn test_cap_stops_even_when_forced() {
        let mut sequence = build_sequence(params(SequenceKind::NoMask, "1mJy"));
        for i in 0..=3 {
            sequence
                .core_mut()
                .record(record(i, StopCode::IterationLimit, stats(1.0, 0.01, i as f64)));
        }
        let mut forced = request();
        forced.keep_iterating = true;
        assert!(!sequence.iteration(&forced).iterating);
    }

    #[test]
    fn test_keep_iterating_overrides_convergence() {
        let mut sequence = build_sequence(params(SequenceKind::AutoMask, "1mJy"));
        sequence.core_mut().record(record(0, StopCode::Unknown, stats(1.0, 0.01, 0.0)));
        sequence.core_mut().record(record(1, StopCode::ZeroMask, stats(1.0, 0.01, 0.0)));
        assert!(!sequence.iteration(&request()).iterating);

        let mut forced = request();
        forced.keep_iterating = true;
        assert!(sequence.iteration(&forced).iterating);
    }

    #[test]
    fn test_channel_selection_becomes_excluded_channels() {
        let mut spwsel = IndexMap::new();
        spwsel.insert("spw17".to_string(), "230.1~230.5GHz LSRK".to_string());
        let mut req = request();
        req.channel_selection = Some(ChannelSelection {
            spw: "17".to_string(),
            spwsel_lsrk: spwsel,
        });

        let mut sequence = build_sequence(params(SequenceKind::ImageCentre, "1mJy"));
        let decision = sequence.iteration(&req);
        assert_eq!(decision.excluded_channels.as_deref(), Some("230.1~230.5GHz"));
    }

    #[test]
    fn test_model_flux_stability_needs_two_cleaning_passes() {
        let mut core = SequenceCore::new(
            SequenceState {
                threshold: Threshold::zero(),
                sensitivity: 0.001,
                niter: 10,
                dr_corrected_sensitivity: 0.001,
            },
            5,
        );
        core.record(record(0, StopCode::Unknown, stats(1.0, 0.01, 1.0)));
        core.record(record(1, StopCode::IterationLimit, stats(0.5, 0.01, 1.0)));
        assert!(!core.model_flux_stable());

        core.record(record(2, StopCode::IterationLimit, stats(0.4, 0.01, 1.005)));
        assert!(core.model_flux_stable());
    }
}
