//! Services module - the external collaborators of the convergence controller.
//!
//! The controller never touches pixel data or files directly. Everything it
//! needs from the outside world goes through one of these seams, each a trait
//! with one production implementation:
//!
//! - [`ImagingEngine`] / [`ProcessImagingEngine`]: runs one deconvolution pass (or a
//!   moment map) as a subprocess with a timeout and parses the engine log for
//!   the stop code, `SEVERE` errors and the spectral axis
//! - [`StatisticsProvider`] / [`SummaryStatistics`]: residual statistics of a pass,
//!   read from the `<iter_root>.summary.yaml` file the engine writes
//! - [`HeuristicsProvider`] / [`StandardHeuristics`]: dynamic-range threshold
//!   correction, niter correction, rms threshold and primary beam limits
//! - [`ProductStore`] / [`FsProductStore`]: copy, glob delete and rename of
//!   image products in the working directory
//!
//! [`channels`] converts continuum selections into channel ranges for the
//! moment maps.
//!
//! # Engine integration
//!
//! A pass is one invocation of the configured program:
//! 1. The previous `<iter_root>.engine.log` is removed
//! 2. `<program> <args...> clean --imagename <iter_root> --mask ... --threshold ...` runs
//!    in the working directory
//! 3. A non-zero exit status or a `SEVERE` log line fails the pass
//! 4. The stop code and spectral axis are taken from the log

pub mod channels;
pub mod engine;
pub mod heuristics;
pub mod statistics;
pub mod store;
pub mod summary;

pub use channels::{ChannelError, continuum_channel_ranges, format_channel_ranges};
pub use engine::{CleanRequest, EngineError, ImagingEngine, MomentRequest, ProcessImagingEngine};
pub use heuristics::{DrCorrection, HeuristicsProvider, StandardHeuristics, pblimits_from_profile};
pub use statistics::{StatisticsError, StatisticsProvider, StatisticsRequest, SummaryStatistics};
pub use store::{DeleteReport, FsProductStore, ProductStore, StoreError};
pub use summary::{PassSummary, SummaryError};
