//! What to do when automasking reports that it found nothing to mask.

use crate::models::{Intent, MaskingMode, SpecMode, StopCode, TargetContext};

/// Residual peak over scaled MAD above which the missing mask is suspicious.
pub const SIGNIFICANT_PEAK_TO_RMS: f64 = 10.0;

/// Dirty dynamic range up to which a continuum target is not switched.
pub const LOW_DYNAMIC_RANGE: f64 = 30.0;

/// Threshold multiple of the DR-corrected sensitivity after a switch.
pub const FALLBACK_TLIMIT: f64 = 4.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackDecision {
    /// Switch to the primary beam based mask and force another pass.
    pub switch: bool,
    pub warning: Option<String>,
}

impl FallbackDecision {
    fn none() -> Self {
        Self {
            switch: false,
            warning: None,
        }
    }
}

/// Decide the fallback after a pass.
///
/// Only a pass run with automasking that ended with the zero-mask stop code
/// triggers anything. Calibrators always switch. Science targets switch only
/// for a high dynamic range continuum image with a significant residual peak.
pub fn evaluate(
    masking: MaskingMode,
    stop_code: StopCode,
    context: &TargetContext,
    peak_to_rms: f64,
    dirty_dynamic_range: f64,
) -> FallbackDecision {
    if masking != MaskingMode::Auto || !stop_code.is_no_mask_found() {
        return FallbackDecision::none();
    }

    let location = format!(
        "Field {} Intent {} SPW {}",
        context.field, context.intent, context.spw
    );
    let significant = peak_to_rms > SIGNIFICANT_PEAK_TO_RMS;

    match context.intent {
        Intent::Bandpass | Intent::Phase => {
            let warning = if significant {
                format!(
                    "No automatic clean mask was found despite clean residual peak / scaled MAD > 10, switched to pb-based mask and tlimit=4. {}",
                    location
                )
            } else {
                format!(
                    "No automatic clean mask was found, switched to pb-based mask and tlimit=4. {}",
                    location
                )
            };
            FallbackDecision {
                switch: true,
                warning: Some(warning),
            }
        }
        Intent::Check | Intent::Target if significant => {
            if context.specmode == SpecMode::Cube || dirty_dynamic_range <= LOW_DYNAMIC_RANGE {
                FallbackDecision {
                    switch: false,
                    warning: Some(format!(
                        "No automatic clean mask was found despite clean residual peak / scaled MAD > 10, check the results. {}",
                        location
                    )),
                }
            } else {
                FallbackDecision {
                    switch: true,
                    warning: Some(format!(
                        "No automatic clean mask was found despite clean residual peak / scaled MAD > 10, switched to pb-based mask and tlimit=4. {}",
                        location
                    )),
                }
            }
        }
        Intent::Check | Intent::Target => FallbackDecision {
            switch: false,
            warning: Some(format!("No automatic clean mask was found. {}", location)),
        },
        _ => FallbackDecision::none(),
    }
}
