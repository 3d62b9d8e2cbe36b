//! Validation and derivation done before the first engine pass.
//!
//! Any error here is terminal for the target: no engine call is made.

use crate::models::quantity::{QuantityError, parse_frequency_hz};
use crate::models::{CleaningMode, SpecMode, SpectralSetup, TargetSpec, Threshold};
use crate::services::HeuristicsProvider;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreflightError {
    #[error("no frequency intersection among selected data")]
    NoFrequencyIntersection,

    #[error("f_start < f_low_native")]
    StartBelowNative,

    #[error("width and nbin are mutually exclusive")]
    WidthAndNbin,

    #[error("user channel width too small")]
    WidthTooSmall,

    #[error("f_stop > f_high")]
    StopAboveNative,

    #[error("no sensitivity")]
    NoSensitivity,

    #[error("manual cleaning requires a threshold")]
    ManualWithoutThreshold,

    #[error("cleaning mode '{0}' is not supported")]
    UnsupportedCleaning(CleaningMode),

    #[error("{0}")]
    Quantity(#[from] QuantityError),
}

/// Everything the run needs that is derived from the target description.
#[derive(Debug, Clone, PartialEq)]
pub struct Preflight {
    pub spectral: SpectralSetup,
    /// Jy.
    pub sensitivity: f64,
    pub threshold: Threshold,
    /// Threshold given in the target description, if any.
    pub user_threshold: Option<Threshold>,
    /// Continuum selection of the spw (cubes only).
    pub continuum_ranges: Option<String>,
}

pub fn check(
    target: &TargetSpec,
    heuristics: &dyn HeuristicsProvider,
) -> Result<Preflight, PreflightError> {
    let spectral = if target.specmode == SpecMode::Cube {
        cube_setup(target, heuristics)?
    } else {
        SpectralSetup {
            start: target.start.clone(),
            width: target.width.clone(),
            nchan: target.nchan,
            nbin: target.nbin,
        }
    };

    let sensitivity = match &target.sensitivity {
        Some(text) => Some(Threshold::parse(text)?.jy()),
        None => heuristics.sensitivity(target),
    }
    .filter(|s| *s > 0.0 && s.is_finite())
    .ok_or(PreflightError::NoSensitivity)?;

    let user_threshold = target
        .threshold
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Threshold::parse)
        .transpose()?;
    let threshold = initial_threshold(target, user_threshold.clone(), sensitivity)?;

    Ok(Preflight {
        spectral,
        sensitivity,
        threshold,
        user_threshold,
        continuum_ranges: target.continuum_ranges(),
    })
}

/// Spectral setup of a cube restricted to the native frequency intersection.
///
/// The checks run in a fixed order and the first failure wins. Without a
/// user start the first channel centre is placed 1.5 channels inside the
/// intersection, and without a user nchan one channel is dropped at each edge.
fn cube_setup(
    target: &TargetSpec,
    heuristics: &dyn HeuristicsProvider,
) -> Result<SpectralSetup, PreflightError> {
    let native = heuristics
        .freq_intersection(target)
        .ok_or(PreflightError::NoFrequencyIntersection)?;

    let mut f_low = native.f_low_hz;
    let mut f_high = native.f_high_hz;
    let mut channel_width = native.channel_width_hz;
    let mut nbin = target.nbin;

    if let Some(start) = &target.start {
        f_low = parse_frequency_hz(start)?;
        if f_low < native.f_low_hz {
            tracing::error!(
                "Supplied start frequency {} < f_low for Field {} SPW {}",
                start,
                target.field,
                target.spw
            );
            return Err(PreflightError::StartBelowNative);
        }
        tracing::info!("Using supplied start frequency {}", start);
    }

    if target.width.is_some() && target.nbin.is_some() {
        tracing::error!(
            "Field {} SPW {}: width and nbin are mutually exclusive",
            target.field,
            target.spw
        );
        return Err(PreflightError::WidthAndNbin);
    }

    if let Some(width) = &target.width {
        let manual = parse_frequency_hz(width)?;
        if manual < native.channel_width_hz {
            tracing::error!(
                "User supplied channel width smaller than native value of {} Hz for Field {} SPW {}",
                native.channel_width_hz,
                target.field,
                target.spw
            );
            return Err(PreflightError::WidthTooSmall);
        }
        tracing::info!("Using supplied width {}", width);
        channel_width = manual;
        if channel_width > native.channel_width_hz {
            nbin = Some((channel_width / native.channel_width_hz).round() as u32);
        }
    } else if let Some(factor) = target.nbin {
        tracing::info!("Applying binning factor {}", factor);
        channel_width *= f64::from(factor);
    }

    if let Some(nchan) = target.nchan {
        f_high = f_low + channel_width * f64::from(nchan);
        if f_high > native.f_high_hz {
            tracing::error!(
                "Calculated stop frequency {} Hz > f_high_native for Field {} SPW {}",
                f_high,
                target.field,
                target.spw
            );
            return Err(PreflightError::StopAboveNative);
        }
        tracing::info!("Using supplied nchan {}", nchan);
    }

    let start = match &target.start {
        Some(start) => start.clone(),
        None => format!("{}GHz", (f_low + 1.5 * channel_width) / 1e9),
    };
    let nchan = target
        .nchan
        .unwrap_or_else(|| ((f_high - f_low) / channel_width - 2.0).round().max(0.0) as u32);

    Ok(SpectralSetup {
        start: Some(start),
        width: Some(format!("{}MHz", channel_width / 1e6)),
        nchan: Some(nchan),
        nbin,
    })
}

fn initial_threshold(
    target: &TargetSpec,
    user: Option<Threshold>,
    sensitivity: f64,
) -> Result<Threshold, PreflightError> {
    match target.cleaning {
        CleaningMode::Manual => user.ok_or(PreflightError::ManualWithoutThreshold),
        CleaningMode::Rms => {
            Ok(user.unwrap_or_else(|| Threshold::from_jy(target.tlimit * sensitivity)))
        }
        CleaningMode::Sensitivity => Err(PreflightError::UnsupportedCleaning(target.cleaning)),
    }
}
