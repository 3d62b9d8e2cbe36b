//! Hand-written collaborators shared by the integration tests.
//!
//! The engine, statistics and store fakes record every call so tests can
//! assert on what the controller asked for and in which order.

#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cleanctl::models::{
    FrequencyIntersection, ImageProductSet, ImageStatistics, Intent, PbLimits, SpecMode,
    StopCode, TargetSpec, Threshold,
};
use cleanctl::services::{
    CleanRequest, DeleteReport, DrCorrection, EngineError, HeuristicsProvider, ImagingEngine,
    MomentRequest, ProductStore, StatisticsError, StatisticsProvider, StatisticsRequest,
    StoreError,
};
use std::sync::Mutex;

/// Engine returning one scripted stop code per pass.
///
/// Passes past the end of the script report `StopCode::Unknown`. With
/// `fail_on` set, that pass fails with a `SEVERE` error.
pub struct ScriptedEngine {
    stop_codes: Vec<StopCode>,
    fail_on: Option<usize>,
    cleans: Mutex<Vec<CleanRequest>>,
    moments: Mutex<Vec<MomentRequest>>,
}

impl ScriptedEngine {
    pub fn new(stop_codes: Vec<StopCode>) -> Self {
        Self {
            stop_codes,
            fail_on: None,
            cleans: Mutex::new(Vec::new()),
            moments: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, pass: usize) -> Self {
        self.fail_on = Some(pass);
        self
    }

    pub fn passes(&self) -> Vec<CleanRequest> {
        self.cleans.lock().unwrap().clone()
    }

    pub fn moments(&self) -> Vec<MomentRequest> {
        self.moments.lock().unwrap().clone()
    }
}

impl ImagingEngine for ScriptedEngine {
    async fn execute(&self, request: &CleanRequest) -> Result<ImageProductSet, EngineError> {
        let index = {
            let mut cleans = self.cleans.lock().unwrap();
            cleans.push(request.clone());
            cleans.len() - 1
        };
        if self.fail_on == Some(index) {
            return Err(EngineError::Severe(
                "SEVERE tclean::::casa Task tclean raised an exception".to_string(),
            ));
        }

        let mut products = ImageProductSet::named(&request.iter_root, request.iteration, false, true);
        products.stop_code = self.stop_codes.get(index).copied().unwrap_or_default();
        Ok(products)
    }

    async fn make_moment(&self, request: &MomentRequest) -> Result<Utf8PathBuf, EngineError> {
        self.moments.lock().unwrap().push(request.clone());
        Ok(request.outfile.clone())
    }
}

type StatsFn = Box<dyn Fn(&StatisticsRequest) -> ImageStatistics + Send + Sync>;

/// Statistics computed by a closure of the request.
pub struct ScriptedStatistics {
    script: StatsFn,
    calls: Mutex<Vec<u32>>,
}

impl ScriptedStatistics {
    pub fn new(script: impl Fn(&StatisticsRequest) -> ImageStatistics + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Iterations the controller asked statistics for, in order.
    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

impl StatisticsProvider for ScriptedStatistics {
    fn compute_residual_stats(
        &self,
        request: &StatisticsRequest,
    ) -> Result<ImageStatistics, StatisticsError> {
        self.calls.lock().unwrap().push(request.iteration);
        Ok((self.script)(request))
    }
}

/// Store that succeeds and logs every operation as `op:arg[:arg]`.
#[derive(Default)]
pub struct RecordingStore {
    fail_copy: bool,
    log: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_copy() -> Self {
        Self {
            fail_copy: true,
            ..Self::default()
        }
    }

    pub fn operations(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| op.strip_prefix("delete:").map(str::to_string))
            .collect()
    }
}

impl ProductStore for RecordingStore {
    fn copy(&self, old_root: &str, new_root: &str) -> Result<usize, StoreError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("copy:{}:{}", old_root, new_root));
        if self.fail_copy {
            return Err(StoreError::NotFound(Utf8PathBuf::from(old_root)));
        }
        Ok(6)
    }

    fn delete(&self, pattern: &str, _ignore_errors: bool) -> Result<DeleteReport, StoreError> {
        self.log.lock().unwrap().push(format!("delete:{}", pattern));
        Ok(DeleteReport::default())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        self.log.lock().unwrap().push(format!("rename:{}:{}", from, to));
        Ok(())
    }
}

/// Heuristics that leave threshold and niter untouched and read sensitivity
/// and frequency coverage from the target.
pub struct FixedHeuristics;

impl HeuristicsProvider for FixedHeuristics {
    fn dr_correction(
        &self,
        threshold: &Threshold,
        _dirty_dynamic_range: f64,
        _residual_max: f64,
        _intent: Intent,
        _tlimit: f64,
    ) -> DrCorrection {
        DrCorrection::unchanged(threshold)
    }

    fn niter_correction(
        &self,
        niter: u32,
        _cell: Option<&str>,
        _imsize: &[u32],
        _residual_max: f64,
        _threshold: &Threshold,
    ) -> u32 {
        niter
    }

    fn rms_threshold(&self, robust_rms: f64, nsigma: Option<f64>) -> Option<Threshold> {
        nsigma.map(|n| Threshold::from_jy(n * robust_rms))
    }

    fn pblimits(&self, _flux: &Utf8Path) -> PbLimits {
        PbLimits::default()
    }

    fn freq_intersection(&self, target: &TargetSpec) -> Option<FrequencyIntersection> {
        target.frequency_intersection
    }

    fn sensitivity(&self, target: &TargetSpec) -> Option<f64> {
        target.estimated_sensitivity
    }
}

pub fn stats(residual_max: f64, robust_rms: f64, model_sum: f64) -> ImageStatistics {
    ImageStatistics {
        residual_max,
        residual_robust_rms: robust_rms,
        model_sum,
        ..Default::default()
    }
}

/// Continuum target named `img` with a 1 mJy sensitivity.
pub fn mfs_target(intent: Intent) -> TargetSpec {
    let mut target = TargetSpec::new("J1234-5678", intent, "17", SpecMode::Mfs);
    target.vis = vec!["uid___A002_X1.ms".to_string()];
    target.imagename = "img".to_string();
    target.estimated_sensitivity = Some(0.001);
    target.niter = 1000;
    target
}

/// Cube target covering 230.0 to 230.5 GHz in 1 MHz channels.
pub fn cube_target() -> TargetSpec {
    let mut target = mfs_target(Intent::Target);
    target.specmode = SpecMode::Cube;
    target.frequency_intersection = Some(FrequencyIntersection {
        f_low_hz: 230.0e9,
        f_high_hz: 230.5e9,
        channel_width_hz: 1.0e6,
    });
    target
}
