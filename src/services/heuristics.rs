use crate::models::quantity::parse_angle_arcsec;
use crate::models::{
    FrequencyIntersection, HeuristicsSettings, Intent, PbLimits, TargetSpec, Threshold,
};
use crate::services::summary::PassSummary;
use camino::{Utf8Path, Utf8PathBuf};
use std::f64::consts::PI;

/// Outcome of the dynamic-range correction of the cleaning threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct DrCorrection {
    pub threshold: Threshold,
    /// `new / old` threshold ratio; scales the nominal sensitivity.
    pub factor: f64,
    pub max_edr_used: bool,
}

impl DrCorrection {
    pub fn unchanged(threshold: &Threshold) -> Self {
        Self {
            threshold: threshold.clone(),
            factor: 1.0,
            max_edr_used: false,
        }
    }
}

/// Threshold, niter and primary beam heuristics consulted by the controller.
pub trait HeuristicsProvider: Send + Sync {
    fn dr_correction(
        &self,
        threshold: &Threshold,
        dirty_dynamic_range: f64,
        residual_max: f64,
        intent: Intent,
        tlimit: f64,
    ) -> DrCorrection;

    fn niter_correction(
        &self,
        niter: u32,
        cell: Option<&str>,
        imsize: &[u32],
        residual_max: f64,
        threshold: &Threshold,
    ) -> u32;

    /// `nsigma * robust_rms` when an nsigma is configured.
    fn rms_threshold(&self, robust_rms: f64, nsigma: Option<f64>) -> Option<Threshold>;

    fn pblimits(&self, flux: &Utf8Path) -> PbLimits;

    fn freq_intersection(&self, target: &TargetSpec) -> Option<FrequencyIntersection>;

    /// Theoretical sensitivity in Jy.
    fn sensitivity(&self, target: &TargetSpec) -> Option<f64>;
}

const LOOP_GAIN: f64 = 0.1;
const KAPPA: f64 = 5.0;
const MASK_RADIUS_FRACTION: f64 = 0.45;
const MAX_DR_FACTOR: f64 = 2.5;

/// Dynamic-range limits of one array type.
struct DrTable {
    max_edr: f64,
    max_cal_edr: f64,
    /// `(dynamic range above which, factor)`, highest first.
    steps: [(f64, f64); 3],
}

const TABLE_12M: DrTable = DrTable {
    max_edr: 150.0,
    max_cal_edr: 1000.0,
    steps: [(100.0, 2.5), (50.0, 2.0), (20.0, 1.5)],
};

const TABLE_7M: DrTable = DrTable {
    max_edr: 30.0,
    max_cal_edr: 200.0,
    steps: [(20.0, 2.5), (10.0, 2.0), (4.0, 1.5)],
};

/// Table-driven heuristics for 12 m and 7 m arrays.
///
/// Primary beam limits are read from the `pb_column` the engine records in the
/// pass summary; sensitivity and frequency coverage come from the target
/// description, which carries the upstream estimates.
pub struct StandardHeuristics {
    settings: HeuristicsSettings,
    working_dir: Utf8PathBuf,
}

impl StandardHeuristics {
    pub fn new(settings: HeuristicsSettings, working_dir: impl AsRef<Utf8Path>) -> Self {
        Self {
            settings,
            working_dir: working_dir.as_ref().to_path_buf(),
        }
    }

    fn table(&self) -> &'static DrTable {
        if self.settings.antenna_diameter_m < 12.0 {
            &TABLE_7M
        } else {
            &TABLE_12M
        }
    }

    fn default_pblimits(&self) -> PbLimits {
        PbLimits {
            image: self.settings.pblimit_image,
            cleanmask: self.settings.pblimit_cleanmask,
        }
    }
}

impl HeuristicsProvider for StandardHeuristics {
    fn dr_correction(
        &self,
        threshold: &Threshold,
        dirty_dynamic_range: f64,
        residual_max: f64,
        intent: Intent,
        tlimit: f64,
    ) -> DrCorrection {
        let table = self.table();
        let old = threshold.jy();
        if old <= 0.0 {
            return DrCorrection::unchanged(threshold);
        }

        let (new, max_edr_used) = if intent.is_science() {
            if dirty_dynamic_range > table.max_edr {
                let new = (MAX_DR_FACTOR * old).max(residual_max / table.max_edr * tlimit);
                (new, true)
            } else {
                let n_dr = table
                    .steps
                    .iter()
                    .find(|(limit, _)| dirty_dynamic_range > *limit)
                    .map_or(1.0, |(_, factor)| *factor);
                (old * n_dr, false)
            }
        } else {
            let new = old.max(residual_max / table.max_cal_edr * tlimit);
            (new, new > old)
        };

        if new == old {
            return DrCorrection {
                threshold: threshold.clone(),
                factor: 1.0,
                max_edr_used,
            };
        }

        let corrected = Threshold::from_jy(new);
        tracing::info!(
            "DR heuristic: modified threshold from {} to {} (dirty DR {:.1}, maxEDR used: {})",
            threshold,
            corrected,
            dirty_dynamic_range,
            max_edr_used
        );
        DrCorrection {
            threshold: corrected,
            factor: new / old,
            max_edr_used,
        }
    }

    fn niter_correction(
        &self,
        niter: u32,
        cell: Option<&str>,
        imsize: &[u32],
        residual_max: f64,
        threshold: &Threshold,
    ) -> u32 {
        let Some(cell_arcsec) = cell.and_then(|c| parse_angle_arcsec(c).ok()) else {
            return niter;
        };
        let Some(&size) = imsize.iter().max() else {
            return niter;
        };
        let thr = threshold.jy();
        if thr <= 0.0 || residual_max <= thr {
            return niter;
        }

        let beam = self.settings.beam_arcsec.unwrap_or(5.0 * cell_arcsec);
        let r_mask = MASK_RADIUS_FRACTION * f64::from(size) * cell_arcsec;
        let nbeam = PI * r_mask * r_mask / (1.1331 * beam * beam);
        let estimate = KAPPA / LOOP_GAIN * nbeam * (residual_max / thr).ln();
        if !estimate.is_finite() || estimate < 1.0 {
            return niter;
        }

        // one significant digit
        let magnitude = 10f64.powi(estimate.log10().floor() as i32);
        let rounded = ((estimate / magnitude).round() * magnitude)
            .min(f64::from(self.settings.max_niter));
        let new_niter = rounded as u32;

        if new_niter != niter {
            tracing::info!(
                "niter heuristic: modified niter from {} to {} based on mask vs. image size",
                niter,
                new_niter
            );
        }
        new_niter
    }

    fn rms_threshold(&self, robust_rms: f64, nsigma: Option<f64>) -> Option<Threshold> {
        let nsigma = nsigma.filter(|n| *n > 0.0)?;
        if robust_rms > 0.0 && robust_rms.is_finite() {
            Some(Threshold::from_jy(nsigma * robust_rms))
        } else {
            None
        }
    }

    fn pblimits(&self, flux: &Utf8Path) -> PbLimits {
        let path = self.working_dir.join(PassSummary::path_for(flux));
        match PassSummary::load(&path) {
            Ok(summary) => pblimits_from_profile(&summary.pb_column, self.default_pblimits()),
            Err(e) => {
                tracing::warn!("Could not analyze PB: {}. Using default pblimit values.", e);
                self.default_pblimits()
            }
        }
    }

    fn freq_intersection(&self, target: &TargetSpec) -> Option<FrequencyIntersection> {
        target
            .frequency_intersection
            .filter(|fi| fi.f_high_hz > fi.f_low_hz && fi.channel_width_hz > 0.0)
    }

    fn sensitivity(&self, target: &TargetSpec) -> Option<f64> {
        target.estimated_sensitivity.filter(|s| *s > 0.0 && s.is_finite())
    }
}

/// Primary beam limits from the central PB column (image edge towards centre).
///
/// When the PB at the image edge is above the 0.2 default, the image limit is
/// moved inwards to at least 5% of the image height and the clean mask limit
/// another 5% further in.
pub fn pblimits_from_profile(column: &[f64], defaults: PbLimits) -> PbLimits {
    let Some(edge) = column.iter().position(|v| *v != 0.0) else {
        return defaults;
    };
    if column[edge] <= 0.2 {
        return defaults;
    }

    let ny = 2 * column.len();
    let step = (0.05 * ny as f64) as usize;
    let i_image = edge.max(step);
    let i_cleanmask = i_image + step;

    match (column.get(i_image), column.get(i_cleanmask)) {
        (Some(&image), Some(&cleanmask)) => PbLimits { image, cleanmask },
        _ => defaults,
    }
}
