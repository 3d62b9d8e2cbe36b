// cleanctl - convergence control for iterative deconvolution imaging
//
// This is the library crate containing the controller, the sequence managers and
// the seams to the external imaging engine. The binary crate (main.rs) provides
// the command line entry point.

pub mod config;
pub mod controller;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod sequence;
pub mod services;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use controller::{ControllerOptions, ConvergenceController, ImagingError};
pub use events::{EventBus, ImagingEvent, RunProgress};
pub use metrics::RunMetrics;
pub use models::{ImagingConfig, ImagingResult, MaskingMode, TargetSpec};
pub use sequence::{SequenceKind, SequenceManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
