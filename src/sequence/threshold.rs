use super::{IterationRequest, SequenceCore, SequenceKind, SequenceManager};
use crate::models::StopCode;

/// Cleans inside the central primary beam region until the residual peak
/// reaches the threshold or a pass runs out of iterations.
pub struct ImageCentreThresholdSequence {
    core: SequenceCore,
}

impl ImageCentreThresholdSequence {
    pub fn new(core: SequenceCore) -> Self {
        Self { core }
    }
}

impl SequenceManager for ImageCentreThresholdSequence {
    fn kind(&self) -> SequenceKind {
        SequenceKind::ImageCentre
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
        if last.statistics.residual_max <= self.core.state.threshold.jy() {
            return true;
        }
        last.iteration > 0
            && (last.stop_code.reached_threshold() || last.stop_code == StopCode::IterationLimit)
    }

    fn mask_pblimit(&self, request: &IterationRequest) -> Option<f64> {
        Some(request.pblimits.cleanmask)
    }
}

/// Lets the engine grow the mask each pass. Stops when the engine finds
/// nothing to mask or the mask has stabilised.
pub struct AutoMaskThresholdSequence {
    core: SequenceCore,
}

impl AutoMaskThresholdSequence {
    pub fn new(core: SequenceCore) -> Self {
        Self { core }
    }
}

impl SequenceManager for AutoMaskThresholdSequence {
    fn kind(&self) -> SequenceKind {
        SequenceKind::AutoMask
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
        if last.iteration == 0 {
            return false;
        }
        if last.stop_code.is_no_mask_found() {
            tracing::info!("Automasking found no mask in iteration {}", last.iteration);
            return true;
        }
        last.stop_code.reached_threshold() || self.core.model_flux_stable()
    }
}

/// Cleans inside a user supplied mask until the threshold is reached.
pub struct ManualMaskThresholdSequence {
    core: SequenceCore,
}

impl ManualMaskThresholdSequence {
    pub fn new(core: SequenceCore) -> Self {
        Self { core }
    }
}

impl SequenceManager for ManualMaskThresholdSequence {
    fn kind(&self) -> SequenceKind {
        SequenceKind::ManualMask
    }

    fn core(&self) -> &SequenceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SequenceCore {
        &mut self.core
    }

    fn converged(&self) -> bool {
        threshold_reached(&self.core)
    }
}

/// Cleans the full image without a mask until the threshold is reached.
pub struct NoMaskThresholdSequence {
    core: SequenceCore,
}

impl NoMaskThresholdSequence {
    pub fn new(core: SequenceCore) -> Self {
        Self { core }
    }
}

impl SequenceManager for NoMaskThresholdSequence {
    fn kind(&self) -> SequenceKind {
        SequenceKind::NoMask
    }

    fn core(&self) -> &SequenceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SequenceCore {
        &mut self.core
    }

    fn converged(&self) -> bool {
        threshold_reached(&self.core)
    }

    fn pass_mask(&self, _next_mask: &str) -> String {
        String::new()
    }
}

/// The engine reported the threshold, or the residual peak is already below it.
/// An iteration limit alone means "keep going".
fn threshold_reached(core: &SequenceCore) -> bool {
    let Some(last) = core.last() else {
        return false;
    };
    (last.iteration > 0 && last.stop_code.reached_threshold())
        || last.statistics.residual_max <= core.state.threshold.jy()
}

#[cfg(test)]
mod tests {
    use crate::models::{PbLimits, StopCode};
    use crate::sequence::tests::{params, record, request, stats};
    use crate::sequence::{SequenceKind, build_sequence};

    #[test]
    fn test_image_centre_stops_on_dirty_peak_below_threshold() {
        let mut sequence = build_sequence(params(SequenceKind::ImageCentre, "2mJy"));
        sequence
            .core_mut()
            .record(record(0, StopCode::Unknown, stats(0.0015, 0.0005, 0.0)));
        assert!(!sequence.iteration(&request()).iterating);
    }

    #[test]
    fn test_image_centre_stops_on_iteration_limit() {
        let mut sequence = build_sequence(params(SequenceKind::ImageCentre, "2mJy"));
        sequence
            .core_mut()
            .record(record(0, StopCode::Unknown, stats(0.1, 0.001, 0.0)));
        assert!(sequence.iteration(&request()).iterating);

        sequence
            .core_mut()
            .record(record(1, StopCode::IterationLimit, stats(0.05, 0.001, 0.3)));
        let decision = sequence.iteration(&request());
        assert!(!decision.iterating);
        assert_eq!(decision.mask, "img.iter1.cleanmask");
    }

    #[test]
    fn test_only_image_centre_bounds_mask_by_pb() {
        let mut req = request();
        req.pblimits = PbLimits {
            image: 0.55,
            cleanmask: 0.6,
        };

        let centre = build_sequence(params(SequenceKind::ImageCentre, "1mJy"));
        assert_eq!(centre.iteration(&req).mask_pblimit, Some(0.6));

        for kind in [SequenceKind::AutoMask, SequenceKind::ManualMask, SequenceKind::NoMask] {
            let sequence = build_sequence(params(kind, "1mJy"));
            assert_eq!(sequence.iteration(&req).mask_pblimit, None, "{}", kind);
        }
    }

    #[test]
    fn test_auto_mask_continues_until_mask_stabilises() {
        let mut sequence = build_sequence(params(SequenceKind::AutoMask, "1mJy"));
        let core = sequence.core_mut();
        core.record(record(0, StopCode::Unknown, stats(0.1, 0.001, 0.0)));
        core.record(record(1, StopCode::IterationLimit, stats(0.05, 0.001, 0.5)));
        assert!(sequence.iteration(&request()).iterating);

        sequence
            .core_mut()
            .record(record(2, StopCode::IterationLimit, stats(0.04, 0.001, 0.502)));
        assert!(!sequence.iteration(&request()).iterating);
    }

    #[test]
    fn test_auto_mask_stops_on_zero_mask() {
        let mut sequence = build_sequence(params(SequenceKind::AutoMask, "1mJy"));
        sequence
            .core_mut()
            .record(record(1, StopCode::ZeroMask, stats(0.05, 0.001, 0.0)));
        assert!(!sequence.iteration(&request()).iterating);
    }

    #[test]
    fn test_manual_mask_continues_on_iteration_limit() {
        let mut sequence = build_sequence(params(SequenceKind::ManualMask, "2.0mJy"));
        sequence
            .core_mut()
            .record(record(1, StopCode::IterationLimit, stats(0.01, 0.001, 0.2)));
        let decision = sequence.iteration(&request());
        assert!(decision.iterating);
        assert_eq!(decision.threshold.as_str(), "2.0mJy");

        sequence
            .core_mut()
            .record(record(2, StopCode::ThresholdReached, stats(0.0021, 0.001, 0.3)));
        assert!(!sequence.iteration(&request()).iterating);
    }

    #[test]
    fn test_no_mask_requests_empty_mask() {
        let mut sequence = build_sequence(params(SequenceKind::NoMask, "1mJy"));
        sequence
            .core_mut()
            .record(record(0, StopCode::Unknown, stats(0.1, 0.001, 0.0)));
        let decision = sequence.iteration(&request());
        assert!(decision.iterating);
        assert_eq!(decision.mask, "");
        assert_eq!(decision.niter, 1000);
    }
}
