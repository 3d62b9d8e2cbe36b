use super::{SequenceCore, SequenceKind, SequenceManager};
use crate::models::Threshold;

/// Residual peak over robust rms below which `psfiter2` stops.
const PEAK_TO_RMS_LIMIT: f64 = 5.0;

/// PSF-derived masking with a per-pass threshold that steps down from the
/// residual peak towards twice the sensitivity.
///
/// Each pass cleans to `max(2 * sensitivity, 0.2 * peak)`, never below the
/// run threshold. Stops when the residual peak is within twice the
/// sensitivity or the model flux no longer changes.
pub struct IterativeSequence {
    core: SequenceCore,
}

impl IterativeSequence {
    pub fn new(core: SequenceCore) -> Self {
        Self { core }
    }
}

impl SequenceManager for IterativeSequence {
    fn kind(&self) -> SequenceKind {
        SequenceKind::Iterative
    }

    fn core(&self) -> &SequenceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SequenceCore {
        &mut self.core
    }

    fn converged(&self) -> bool {
        let Some(last) = self.core.last() else {
            return false;
        };
        last.statistics.residual_max <= 2.0 * self.core.state.sensitivity
            || self.core.model_flux_stable()
    }

    fn pass_threshold(&self) -> Threshold {
        let floor = self.core.state.threshold.clone();
        let Some(last) = self.core.last() else {
            return floor;
        };
        let target = (2.0 * self.core.state.sensitivity).max(0.2 * last.statistics.residual_max);
        floor.max(Threshold::from_jy(target))
    }

    fn excluded_channels(&self, _request: &super::IterationRequest) -> Option<String> {
        None
    }
}

/// PSF-derived masking judged on the residual signal to noise.
///
/// Each pass cleans to `max(3 * robust_rms, 0.5 * peak)`, never below the run
/// threshold. Stops when the peak is within five robust rms or when it stops
/// decreasing between passes.
pub struct IterativeSequence2 {
    core: SequenceCore,
}

impl IterativeSequence2 {
    pub fn new(core: SequenceCore) -> Self {
        Self { core }
    }
}

impl SequenceManager for IterativeSequence2 {
    fn kind(&self) -> SequenceKind {
        SequenceKind::Iterative2
    }

    fn core(&self) -> &SequenceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SequenceCore {
        &mut self.core
    }

    fn converged(&self) -> bool {
        let Some(last) = self.core.last() else {
            return false;
        };
        if last.statistics.residual_robust_rms > 0.0
            && last.statistics.peak_to_rms() < PEAK_TO_RMS_LIMIT
        {
            return true;
        }
        match self.core.last_two() {
            Some((previous, last)) => last.statistics.residual_max >= previous.statistics.residual_max,
            None => false,
        }
    }

    fn pass_threshold(&self) -> Threshold {
        let floor = self.core.state.threshold.clone();
        let Some(last) = self.core.last() else {
            return floor;
        };
        let target =
            (3.0 * last.statistics.residual_robust_rms).max(0.5 * last.statistics.residual_max);
        floor.max(Threshold::from_jy(target))
    }

    fn excluded_channels(&self, _request: &super::IterationRequest) -> Option<String> {
        None
    }
}
