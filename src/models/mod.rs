//! Data models for the convergence controller.
//!
//! This module contains the core data structures passed between the controller,
//! the sequence managers and the external collaborators:
//! - [`Threshold`]: flux density thresholds that keep their `value+unit` text
//! - [`TargetSpec`]: one imaging target (selection, masking, spectral setup) from `targets.yaml`
//! - [`ImageProductSet`] / [`ImageStatistics`]: what one engine pass produces and what it measured
//! - [`ImagingResult`]: per-iteration records, diagnostics and moment maps of a run
//! - [`ImagingConfig`]: engine, heuristics and logging settings from `imaging.yaml`

pub mod config;
pub mod products;
pub mod quantity;
pub mod result;
pub mod target;

pub use config::{EngineSettings, HeuristicsSettings, ImagingConfig, LoggingSettings, TargetList};
pub use products::{
    ImageProductSet, ImageStatistics, IterationState, PbLimits, SpectralAxis, StopCode,
};
pub use quantity::{QuantityError, Threshold};
pub use result::{
    Diagnostics, ErrorResult, ImagingResult, IterationRecord, MomentProduct, SpectralSetup,
};
pub use target::{
    CleaningMode, FrequencyIntersection, Intent, MaskingMode, SpecMode, TargetContext, TargetSpec,
};
