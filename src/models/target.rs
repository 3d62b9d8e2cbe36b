use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calibration intent of the imaging target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Bandpass,
    Phase,
    Check,
    Target,
    Amplitude,
    Polarization,
    Flux,
}

impl Intent {
    /// Calibrator intents are imaged dynamic-range limited rather than noise limited.
    pub fn is_science(self) -> bool {
        matches!(self, Intent::Target | Intent::Check)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Intent::Bandpass => "BANDPASS",
            Intent::Phase => "PHASE",
            Intent::Check => "CHECK",
            Intent::Target => "TARGET",
            Intent::Amplitude => "AMPLITUDE",
            Intent::Polarization => "POLARIZATION",
            Intent::Flux => "FLUX",
        };
        f.write_str(name)
    }
}

/// Spectral mode of the image product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecMode {
    Mfs,
    Cont,
    #[serde(alias = "repBW")]
    Cube,
}

impl fmt::Display for SpecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpecMode::Mfs => "mfs",
            SpecMode::Cont => "cont",
            SpecMode::Cube => "cube",
        };
        f.write_str(name)
    }
}

/// Masking policy for the cleaning passes.
///
/// Selected once when a run starts; the only change allowed afterwards is the
/// automask fallback `Auto -> CentralRegion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskingMode {
    #[default]
    CentralRegion,
    Auto,
    Manual,
    None,
    PsfIter,
    PsfIter2,
}

impl fmt::Display for MaskingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MaskingMode::CentralRegion => "centralregion",
            MaskingMode::Auto => "auto",
            MaskingMode::Manual => "manual",
            MaskingMode::None => "none",
            MaskingMode::PsfIter => "psfiter",
            MaskingMode::PsfIter2 => "psfiter2",
        };
        f.write_str(name)
    }
}

/// How the initial threshold is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleaningMode {
    /// User threshold if given, otherwise `tlimit * sensitivity`.
    #[default]
    Rms,
    /// User threshold only.
    Manual,
    /// Sensitivity-driven threshold (not available).
    Sensitivity,
}

impl fmt::Display for CleaningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CleaningMode::Rms => "rms",
            CleaningMode::Manual => "manual",
            CleaningMode::Sensitivity => "sensitivity",
        };
        f.write_str(name)
    }
}

/// Native frequency coverage shared by all selected measurement sets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyIntersection {
    pub f_low_hz: f64,
    pub f_high_hz: f64,
    pub channel_width_hz: f64,
}

/// One imaging target as described in `targets.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub vis: Vec<String>,
    pub field: String,
    pub intent: Intent,
    pub spw: String,
    pub specmode: SpecMode,

    #[serde(default)]
    pub imagename: String,

    #[serde(default)]
    pub masking: MaskingMode,

    #[serde(default)]
    pub cleaning: CleaningMode,

    /// User mask for `manual` masking.
    #[serde(default)]
    pub mask: Option<String>,

    #[serde(default)]
    pub threshold: Option<String>,

    /// Multiplier of the robust rms for the rms-scaled threshold.
    #[serde(default)]
    pub nsigma: Option<f64>,

    #[serde(default = "default_tlimit")]
    pub tlimit: f64,

    #[serde(default = "default_niter")]
    pub niter: u32,

    #[serde(default = "default_maxncleans")]
    pub maxncleans: u32,

    /// Also clean the continuum channel ranges of a cube.
    #[serde(default)]
    pub cleancontranges: bool,

    #[serde(default)]
    pub deconvolver: Option<String>,

    #[serde(default)]
    pub cell: Option<String>,

    #[serde(default)]
    pub imsize: Vec<u32>,

    #[serde(default)]
    pub start: Option<String>,

    #[serde(default)]
    pub width: Option<String>,

    #[serde(default)]
    pub nbin: Option<u32>,

    #[serde(default)]
    pub nchan: Option<u32>,

    /// Manual sensitivity override, e.g. `0.1mJy`.
    #[serde(default)]
    pub sensitivity: Option<String>,

    /// Sensitivity estimate (Jy) produced upstream by the sensitivity calculator.
    #[serde(default)]
    pub estimated_sensitivity: Option<f64>,

    /// Native frequency intersection of the selected data (cubes only).
    #[serde(default)]
    pub frequency_intersection: Option<FrequencyIntersection>,

    /// LSRK continuum selections keyed by `spw<id>`, e.g. `"230.1~230.5GHz LSRK"`.
    #[serde(default)]
    pub spwsel_lsrk: IndexMap<String, String>,
}

fn default_tlimit() -> f64 {
    2.0
}

fn default_niter() -> u32 {
    5000
}

fn default_maxncleans() -> u32 {
    10
}

impl TargetSpec {
    /// Minimal target with defaults for everything optional.
    pub fn new(field: &str, intent: Intent, spw: &str, specmode: SpecMode) -> Self {
        Self {
            vis: Vec::new(),
            field: field.to_string(),
            intent,
            spw: spw.to_string(),
            specmode,
            imagename: String::new(),
            masking: MaskingMode::default(),
            cleaning: CleaningMode::default(),
            mask: None,
            threshold: None,
            nsigma: None,
            tlimit: default_tlimit(),
            niter: default_niter(),
            maxncleans: default_maxncleans(),
            cleancontranges: false,
            deconvolver: None,
            cell: None,
            imsize: Vec::new(),
            start: None,
            width: None,
            nbin: None,
            nchan: None,
            sensitivity: None,
            estimated_sensitivity: None,
            frequency_intersection: None,
            spwsel_lsrk: IndexMap::new(),
        }
    }

    pub fn context(&self) -> TargetContext {
        TargetContext {
            vis: self.vis.clone(),
            field: self.field.clone(),
            intent: self.intent,
            spw: self.spw.clone(),
            specmode: self.specmode,
        }
    }

    pub fn is_multiterm(&self) -> bool {
        self.deconvolver.as_deref() == Some("mtmfs")
    }

    /// Image name, generated from field/intent/spw/specmode when not configured.
    pub fn image_name(&self) -> String {
        if !self.imagename.is_empty() {
            return self.imagename.clone();
        }
        let field: String = self
            .field
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '+' { c } else { '_' })
            .collect();
        format!(
            "{}_{}.spw{}.{}.I",
            field,
            self.intent.to_string().to_lowercase(),
            self.spw.replace(',', "_"),
            self.specmode
        )
    }

    /// Continuum frequency selection of this spw, used for the moment maps.
    ///
    /// Only cubes carry one; `NONE`, `ALL` and empty selections count as absent.
    pub fn continuum_ranges(&self) -> Option<String> {
        if self.specmode != SpecMode::Cube {
            return None;
        }
        let selection = self.spwsel_lsrk.get(&format!("spw{}", self.spw))?;
        if matches!(selection.trim(), "" | "NONE" | "ALL") {
            return None;
        }
        selection.split_whitespace().next().map(str::to_string)
    }
}

/// Identity of a target, carried by results and terminal errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetContext {
    pub vis: Vec<String>,
    pub field: String,
    pub intent: Intent,
    pub spw: String,
    pub specmode: SpecMode,
}

impl fmt::Display for TargetContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/spw{}", self.field, self.intent, self.spw)
    }
}
