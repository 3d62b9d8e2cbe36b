use crate::models::{
    EngineSettings, ImageProductSet, MaskingMode, SpectralAxis, SpectralSetup, StopCode,
    TargetContext, Threshold,
};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fs;
use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// One deconvolution pass as handed to the engine.
#[derive(Debug, Clone)]
pub struct CleanRequest {
    pub context: TargetContext,
    pub iteration: u32,
    /// Product naming root of this pass, `<imagename>.iter<N>`.
    pub iter_root: String,
    pub mask: String,
    pub masking: MaskingMode,
    pub threshold: Threshold,
    pub niter: u32,
    /// Jy.
    pub sensitivity: f64,
    pub pblimit: f64,
    pub deconvolver: Option<String>,
    pub cell: Option<String>,
    pub imsize: Vec<u32>,
    pub spectral: SpectralSetup,
    /// Channels left out of the clean mask (continuum selection of a cube).
    pub excluded_channels: Option<String>,
    /// PB level bounding the central clean mask region, when the pass uses one.
    pub mask_pblimit: Option<f64>,
    /// Products the pass resumes from; `None` for the dirty image.
    pub prior: Option<ImageProductSet>,
}

/// Integrated-intensity image over a channel selection.
#[derive(Debug, Clone)]
pub struct MomentRequest {
    pub imagename: Utf8PathBuf,
    pub moment: u8,
    pub outfile: Utf8PathBuf,
    /// `a~b;c~d` channel ranges.
    pub chans: String,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Process error: {0}")]
    Process(#[from] std::io::Error),

    #[error("Engine exited with code {code} for {iter_root}")]
    ExitStatus { code: i32, iter_root: String },

    #[error("Engine reported a severe error: {0}")]
    Severe(String),

    #[error("Engine log not found: {0}")]
    LogFileNotFound(Utf8PathBuf),

    #[error("Expected product was not created: {0}")]
    MissingProduct(Utf8PathBuf),
}

/// The external imaging/deconvolution engine.
///
/// Each call blocks (asynchronously) until the pass is complete; callers never
/// overlap passes for one target.
pub trait ImagingEngine: Send + Sync {
    fn execute(
        &self,
        request: &CleanRequest,
    ) -> impl Future<Output = Result<ImageProductSet, EngineError>> + Send;

    fn make_moment(
        &self,
        request: &MomentRequest,
    ) -> impl Future<Output = Result<Utf8PathBuf, EngineError>> + Send;
}

/// What the engine reported in its log for one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineLog {
    pub stop_code: Option<StopCode>,
    pub severe: Vec<String>,
    pub spectral_axis: Option<SpectralAxis>,
}

/// Runs the engine as a subprocess, one invocation per pass.
///
/// The command line is `<program> <args...> clean|moments --flag value ...`,
/// executed in the working directory. The engine writes
/// `<iter_root>.engine.log`, which is cleared before and parsed after each pass.
pub struct ProcessImagingEngine {
    settings: EngineSettings,
    working_dir: Utf8PathBuf,

    /// `stopcode = 7` / `Stop code: 2`
    stop_code_pattern: Regex,

    /// `SEVERE  tclean::::  message`
    severe_pattern: Regex,

    /// `spectral axis: start=2.3e11Hz width=1e6Hz nchan=100`
    spectral_axis_pattern: Regex,
}

impl ProcessImagingEngine {
    pub fn new(settings: EngineSettings, working_dir: impl AsRef<Utf8Path>) -> Self {
        Self {
            settings,
            working_dir: working_dir.as_ref().to_path_buf(),
            stop_code_pattern: Regex::new(r"(?i)stop\s*code\s*[=:]\s*(-?\d+)")
                .expect("Invalid stop code regex"),
            severe_pattern: Regex::new(r"\bSEVERE\b\s*(.*)").expect("Invalid SEVERE regex"),
            spectral_axis_pattern: Regex::new(
                r"(?i)spectral axis:\s*start\s*=\s*([0-9.eE+-]+)\s*Hz\s+width\s*=\s*([0-9.eE+-]+)\s*Hz\s+nchan\s*=\s*(\d+)",
            )
            .expect("Invalid spectral axis regex"),
        }
    }

    pub fn log_path(&self, iter_root: &str) -> Utf8PathBuf {
        self.working_dir.join(format!("{}.engine.log", iter_root))
    }

    /// Arguments after the configured program arguments for a clean pass.
    pub fn build_clean_args(&self, request: &CleanRequest) -> Vec<String> {
        let mut args = self.settings.args.clone();
        args.push("clean".to_string());

        let mut flag = |name: &str, value: String| {
            args.push(format!("--{}", name));
            args.push(value);
        };

        flag("imagename", request.iter_root.clone());
        flag("vis", request.context.vis.join(","));
        flag("field", request.context.field.clone());
        flag("intent", request.context.intent.to_string());
        flag("spw", request.context.spw.clone());
        flag("specmode", request.context.specmode.to_string());
        flag("mask", request.mask.clone());
        flag("masking", request.masking.to_string());
        flag("threshold", request.threshold.to_string());
        flag("niter", request.niter.to_string());
        flag("sensitivity", format!("{}", request.sensitivity));
        flag("pblimit", format!("{}", request.pblimit));

        if let Some(deconvolver) = &request.deconvolver {
            flag("deconvolver", deconvolver.clone());
        }
        if let Some(cell) = &request.cell {
            flag("cell", cell.clone());
        }
        if !request.imsize.is_empty() {
            let imsize: Vec<String> = request.imsize.iter().map(u32::to_string).collect();
            flag("imsize", imsize.join(","));
        }
        if let Some(start) = &request.spectral.start {
            flag("start", start.clone());
        }
        if let Some(width) = &request.spectral.width {
            flag("width", width.clone());
        }
        if let Some(nchan) = request.spectral.nchan {
            flag("nchan", nchan.to_string());
        }
        if let Some(nbin) = request.spectral.nbin {
            flag("nbin", nbin.to_string());
        }
        if let Some(excluded) = &request.excluded_channels {
            flag("excluded-channels", excluded.clone());
        }
        if let Some(level) = request.mask_pblimit {
            flag("mask-pblimit", format!("{}", level));
        }
        if let Some(prior) = &request.prior {
            flag("prior", format!("{}.iter{}", prior.root_name(), prior.iteration));
        }
        args
    }

    pub fn build_moment_args(&self, request: &MomentRequest) -> Vec<String> {
        let mut args = self.settings.args.clone();
        args.extend([
            "moments".to_string(),
            "--imagename".to_string(),
            request.imagename.to_string(),
            "--moments".to_string(),
            request.moment.to_string(),
            "--outfile".to_string(),
            request.outfile.to_string(),
            "--chans".to_string(),
            request.chans.clone(),
        ]);
        args
    }

    fn clear_log(&self, log: &Utf8Path) {
        if log.exists() {
            match fs::remove_file(log) {
                Ok(()) => tracing::debug!("Cleared engine log: {}", log),
                Err(e) => tracing::warn!("Failed to remove engine log {}: {}", log, e),
            }
        }
    }

    /// Extract stop code, severe errors and the spectral axis from an engine log.
    pub fn parse_log(&self, content: &str) -> EngineLog {
        let mut log = EngineLog::default();

        for line in content.lines() {
            if let Some(caps) = self.severe_pattern.captures(line) {
                log.severe.push(caps[1].trim().to_string());
            } else if let Some(caps) = self.stop_code_pattern.captures(line) {
                if let Ok(code) = caps[1].parse::<i32>() {
                    log.stop_code = Some(StopCode::from(code));
                }
            } else if let Some(caps) = self.spectral_axis_pattern.captures(line) {
                let start = caps[1].parse::<f64>();
                let width = caps[2].parse::<f64>();
                let nchan = caps[3].parse::<u32>();
                if let (Ok(start_hz), Ok(width_hz), Ok(nchan)) = (start, width, nchan) {
                    log.spectral_axis = Some(SpectralAxis {
                        start_hz,
                        width_hz,
                        nchan,
                    });
                }
            }
        }

        tracing::debug!(
            "Parsed engine log - stop code: {:?}, severe: {}, spectral axis: {:?}",
            log.stop_code,
            log.severe.len(),
            log.spectral_axis
        );
        log
    }

    async fn run(&self, args: &[String], label: &str) -> Result<i32, EngineError> {
        tracing::info!("Executing: {} {}", self.settings.program, args.join(" "));

        let start = Instant::now();
        let timeout_duration = Duration::from_secs(self.settings.timeout_secs);

        let child = Command::new(&self.settings.program)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = timeout(timeout_duration, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::warn!("Engine {} timed out after {:?}", label, timeout_duration);
                EngineError::Timeout(timeout_duration)
            })??;

        let exit_code = output.status.code().unwrap_or(-1);
        tracing::info!(
            "Engine {} completed in {:.2}s with exit code {}",
            label,
            start.elapsed().as_secs_f32(),
            exit_code
        );
        if exit_code != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!("Engine stderr: {}", stderr.trim_end());
        }
        Ok(exit_code)
    }
}

impl ImagingEngine for ProcessImagingEngine {
    async fn execute(&self, request: &CleanRequest) -> Result<ImageProductSet, EngineError> {
        let log_path = self.log_path(&request.iter_root);
        self.clear_log(&log_path);

        let args = self.build_clean_args(request);
        let exit_code = self.run(&args, &request.iter_root).await?;
        if exit_code != 0 {
            return Err(EngineError::ExitStatus {
                code: exit_code,
                iter_root: request.iter_root.clone(),
            });
        }

        if !log_path.exists() {
            return Err(EngineError::LogFileNotFound(log_path));
        }
        let content = fs::read_to_string(&log_path)?;
        let log = self.parse_log(&content);
        if let Some(message) = log.severe.first() {
            return Err(EngineError::Severe(message.clone()));
        }

        let multiterm = request.deconvolver.as_deref() == Some("mtmfs");
        let mut products = ImageProductSet::named(
            &request.iter_root,
            request.iteration,
            multiterm,
            self.settings.pbcor,
        );
        products.stop_code = log.stop_code.unwrap_or_default();
        products.spectral_axis = log.spectral_axis;
        Ok(products)
    }

    async fn make_moment(&self, request: &MomentRequest) -> Result<Utf8PathBuf, EngineError> {
        let args = self.build_moment_args(request);
        let exit_code = self.run(&args, request.outfile.as_str()).await?;
        if exit_code != 0 {
            return Err(EngineError::ExitStatus {
                code: exit_code,
                iter_root: request.outfile.to_string(),
            });
        }

        if !self.working_dir.join(&request.outfile).exists() {
            return Err(EngineError::MissingProduct(request.outfile.clone()));
        }
        Ok(request.outfile.clone())
    }
}
