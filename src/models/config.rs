use crate::models::target::TargetSpec;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Run-wide settings from `imaging.yaml`.
///
/// Every section has serde defaults, so a missing file or a partial file
/// still yields a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagingConfig {
    /// Observatory product family, e.g. `ALMA` or `VLASS-SE-CONT`.
    #[serde(default = "default_imaging_mode")]
    pub imaging_mode: String,

    /// Directory the engine runs in and where products live.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub heuristics: HeuristicsSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            imaging_mode: default_imaging_mode(),
            working_dir: default_working_dir(),
            engine: EngineSettings::default(),
            heuristics: HeuristicsSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

fn default_imaging_mode() -> String {
    "ALMA".to_string()
}

fn default_working_dir() -> String {
    ".".to_string()
}

/// How to launch the external imaging engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the sub-command (`clean` / `moments`).
    #[serde(default = "default_program_args")]
    pub args: Vec<String>,

    /// Per-pass timeout in seconds.
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,

    /// Whether restored images are primary beam corrected (`.image.pbcor`).
    #[serde(default = "default_true")]
    pub pbcor: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_program_args(),
            timeout_secs: default_engine_timeout(),
            pbcor: true,
        }
    }
}

fn default_program() -> String {
    "casa".to_string()
}

fn default_program_args() -> Vec<String> {
    vec![
        "--nologger".to_string(),
        "--nogui".to_string(),
        "-c".to_string(),
        "tclean_pass.py".to_string(),
    ]
}

fn default_engine_timeout() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

/// Parameters of the standard threshold/niter/PB heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicsSettings {
    /// Antenna diameter in metres; selects the 12 m or 7 m dynamic-range table.
    #[serde(default = "default_antenna_diameter")]
    pub antenna_diameter_m: f64,

    #[serde(default = "default_pblimit_image")]
    pub pblimit_image: f64,

    #[serde(default = "default_pblimit_cleanmask")]
    pub pblimit_cleanmask: f64,

    /// Synthesized beam FWHM in arcsec; when unset the beam is taken as five cells.
    #[serde(default)]
    pub beam_arcsec: Option<f64>,

    #[serde(default = "default_max_niter")]
    pub max_niter: u32,
}

impl Default for HeuristicsSettings {
    fn default() -> Self {
        Self {
            antenna_diameter_m: default_antenna_diameter(),
            pblimit_image: default_pblimit_image(),
            pblimit_cleanmask: default_pblimit_cleanmask(),
            beam_arcsec: None,
            max_niter: default_max_niter(),
        }
    }
}

fn default_antenna_diameter() -> f64 {
    12.0
}

fn default_pblimit_image() -> f64 {
    0.2
}

fn default_pblimit_cleanmask() -> f64 {
    0.3
}

fn default_max_niter() -> u32 {
    2_000_000
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub console: bool,

    /// Write the file log as JSON lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            prefix: default_log_prefix(),
            debug: false,
            console: false,
            json: false,
        }
    }
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_prefix() -> String {
    "cleanctl".to_string()
}

/// Imaging targets from `targets.yaml`, in file order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetList {
    #[serde(default)]
    pub targets: IndexMap<String, TargetSpec>,
}

impl TargetList {
    /// Targets to run: all of them, or only the named ones (in file order).
    pub fn select<'a>(&'a self, names: &'a [String]) -> impl Iterator<Item = (&'a String, &'a TargetSpec)> {
        self.targets
            .iter()
            .filter(move |(name, _)| names.is_empty() || names.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::target::{Intent, SpecMode};

    #[test]
    fn test_imaging_config_defaults() {
        let config = ImagingConfig::default();
        assert_eq!(config.imaging_mode, "ALMA");
        assert_eq!(config.engine.timeout_secs, 86_400);
        assert_eq!(config.heuristics.pblimit_image, 0.2);
        assert_eq!(config.heuristics.pblimit_cleanmask, 0.3);
        assert!(!config.logging.debug);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: ImagingConfig =
            serde_yaml_ng::from_str("imaging_mode: VLASS-SE-CONT\nengine:\n  timeout_secs: 60\n").unwrap();
        assert_eq!(config.imaging_mode, "VLASS-SE-CONT");
        assert_eq!(config.engine.timeout_secs, 60);
        assert_eq!(config.engine.program, "casa");
    }

    #[test]
    fn test_target_selection_keeps_file_order() {
        let mut list = TargetList::default();
        for name in ["b", "a", "c"] {
            list.targets.insert(
                name.to_string(),
                TargetSpec::new(name, Intent::Target, "0", SpecMode::Mfs),
            );
        }

        let all: Vec<_> = list.select(&[]).map(|(n, _)| n.as_str()).collect();
        assert_eq!(all, vec!["b", "a", "c"]);

        let wanted = vec!["c".to_string(), "b".to_string()];
        let some: Vec<_> = list.select(&wanted).map(|(n, _)| n.as_str()).collect();
        assert_eq!(some, vec!["b", "c"]);
    }
}
