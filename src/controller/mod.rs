//! The convergence controller: drives the imaging engine pass by pass until the
//! sequence manager stops the loop.
//!
//! # Run protocol
//!
//! 1. Stale `<imagename>*.iter*` products are removed (best effort)
//! 2. [`preflight::check`] validates the cube setup and resolves sensitivity and
//!    the initial threshold; a failure ends the run before any engine call
//! 3. Pass zero makes the dirty image (`niter=0`, threshold `0.0mJy`, no mask)
//! 4. The dirty image fixes the dynamic-range corrected threshold and niter
//! 5. Cleaning passes run until [`SequenceManager::iteration`] says stop; each
//!    pass resumes from a copy of the previous pass's products
//! 6. VLASS single epoch imaging gets one final pass without a mask when only
//!    one cleaning pass ran
//! 7. Cubes get moment 0 and moment 8 images over their continuum channels
//!
//! The masking mode is a local of [`ConvergenceController::run`]; the only
//! change it ever sees is the automask fallback (see [`fallback`]).

pub mod fallback;
pub mod moments;
pub mod naming;
pub mod preflight;

pub use fallback::FallbackDecision;
pub use preflight::{Preflight, PreflightError};

use crate::events::{EventBus, ImagingEvent};
use crate::metrics::RunMetrics;
use crate::models::{
    Diagnostics, ErrorResult, ImageProductSet, ImageStatistics, ImagingResult, IterationRecord,
    IterationState, MaskingMode, PbLimits, SpecMode, TargetContext, TargetSpec, Threshold,
};
use crate::sequence::{
    ChannelSelection, IterationRequest, SequenceDecision, SequenceManager, SequenceParams,
    build_sequence,
};
use crate::services::{
    CleanRequest, DrCorrection, EngineError, HeuristicsProvider, ImagingEngine, ProductStore,
    StatisticsError, StatisticsProvider, StatisticsRequest, StoreError,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Why a run ended without an imaging result.
#[derive(Error, Debug)]
pub enum ImagingError {
    /// Rejected before the first engine pass.
    #[error("{context} clean error: {reason}")]
    Terminal {
        context: TargetContext,
        reason: PreflightError,
    },

    #[error("{context} engine failure: {source}")]
    Engine {
        context: TargetContext,
        #[source]
        source: EngineError,
    },

    #[error("{context} statistics failure: {source}")]
    Statistics {
        context: TargetContext,
        #[source]
        source: StatisticsError,
    },

    #[error("{context} product store failure: {source}")]
    Store {
        context: TargetContext,
        #[source]
        source: StoreError,
    },
}

impl ImagingError {
    pub fn context(&self) -> &TargetContext {
        match self {
            ImagingError::Terminal { context, .. }
            | ImagingError::Engine { context, .. }
            | ImagingError::Statistics { context, .. }
            | ImagingError::Store { context, .. } => context,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImagingError::Terminal { .. })
    }

    /// Structured form written next to the products for downstream reporting.
    pub fn error_result(&self) -> ErrorResult {
        ErrorResult {
            context: self.context().clone(),
            error: self.to_string(),
        }
    }
}

/// Run-wide settings of the controller.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Product family; `VLASS-SE` modes get a final pass without a mask.
    pub imaging_mode: String,
    /// Primary beam level handed to every engine pass.
    pub pblimit: f64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            imaging_mode: "ALMA".to_string(),
            pblimit: PbLimits::default().image,
        }
    }
}

/// Drives one target at a time through the dirty image, the cleaning loop and
/// the post-loop products.
///
/// Engine passes are strictly sequential: each pass is awaited before the
/// next is issued.
pub struct ConvergenceController<E, H, S, P> {
    engine: E,
    heuristics: H,
    statistics: S,
    store: P,
    options: ControllerOptions,
    events: EventBus,
    metrics: Arc<RunMetrics>,
}

/// Per-run values fixed by the dirty image.
struct Bootstrap {
    dirty_dynamic_range: f64,
    correction: DrCorrection,
    pblimits: PbLimits,
}

impl<E, H, S, P> ConvergenceController<E, H, S, P>
where
    E: ImagingEngine,
    H: HeuristicsProvider,
    S: StatisticsProvider,
    P: ProductStore,
{
    pub fn new(engine: E, heuristics: H, statistics: S, store: P, options: ControllerOptions) -> Self {
        Self {
            engine,
            heuristics,
            statistics,
            store,
            options,
            events: EventBus::new(),
            metrics: Arc::new(RunMetrics::new()),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RunMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &Arc<RunMetrics> {
        &self.metrics
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn statistics(&self) -> &S {
        &self.statistics
    }

    /// Image one target.
    ///
    /// `max_iterations` caps the number of cleaning passes; the dirty image
    /// and the VLASS final pass do not count against it.
    pub async fn run(
        &self,
        target: &TargetSpec,
        masking: MaskingMode,
        max_iterations: u32,
    ) -> Result<ImagingResult, ImagingError> {
        let outcome = self.run_target(target, masking, max_iterations).await;
        match &outcome {
            Ok(result) => {
                self.metrics.record_target_imaged();
                tracing::info!(
                    "{}: finished after {} cleaning passes",
                    result.context,
                    result.cleaning_passes()
                );
            }
            Err(e) => {
                self.metrics.record_target_failed();
                tracing::error!("{}", e);
                self.events.emit(ImagingEvent::RunFailed {
                    context: e.context().clone(),
                    error: e.to_string(),
                });
            }
        }
        self.events.finish();
        outcome
    }

    async fn run_target(
        &self,
        target: &TargetSpec,
        initial_masking: MaskingMode,
        max_iterations: u32,
    ) -> Result<ImagingResult, ImagingError> {
        let context = target.context();
        let imagename = target.image_name();
        tracing::info!(
            "Cleaning for intent \"{}\", field {}, spw {}",
            context.intent,
            context.field,
            context.spw
        );

        tracing::info!("Deleting {}", naming::all_iterations_pattern(&imagename));
        self.delete_best_effort(&naming::all_iterations_pattern(&imagename));

        let preflight = preflight::check(target, &self.heuristics).map_err(|reason| {
            ImagingError::Terminal {
                context: context.clone(),
                reason,
            }
        })?;

        let mut masking = initial_masking;
        let mut sequence = build_sequence(SequenceParams {
            kind: masking.into(),
            threshold: preflight.threshold.clone(),
            sensitivity: preflight.sensitivity,
            niter: target.niter,
            max_passes: max_iterations,
        });
        tracing::info!(
            "{}: {} with threshold {}, sensitivity {} Jy, niter {}",
            context,
            sequence.kind(),
            sequence.threshold(),
            sequence.sensitivity(),
            sequence.niter()
        );

        let mut result = ImagingResult::new(context.clone(), preflight.sensitivity, masking);
        result.spectral_setup = preflight.spectral.clone();
        self.events.emit(ImagingEvent::RunStarted {
            context: context.clone(),
            masking,
        });

        // Dirty image
        tracing::info!("Compute the dirty image");
        let dirty_state = IterationState {
            iteration: 0,
            mask: String::new(),
            threshold: Threshold::zero(),
            niter: 0,
            sensitivity: sequence.sensitivity(),
            stop_code: None,
        };
        let mut products = self
            .clean(target, &preflight, &dirty_state, masking, None, None)
            .await?;
        let pblimits = self.heuristics.pblimits(&products.pb_source());
        let mut statistics = self.pass_statistics(
            sequence.as_mut(),
            &context,
            &preflight,
            &dirty_state,
            &products,
            pblimits,
        )?;
        tracing::info!("Dirty image stats");
        tracing::info!("    Residual rms: {}", statistics.residual_non_cleanmask_rms);
        tracing::info!("    Residual max: {}", statistics.residual_max);
        tracing::info!("    Residual min: {}", statistics.residual_min);
        tracing::info!("    Residual scaled MAD: {}", statistics.residual_robust_rms);
        result.record(IterationRecord {
            state: completed(dirty_state, &products),
            products: products.clone(),
            statistics: statistics.clone(),
        });

        let bootstrap = self.bootstrap(sequence.as_mut(), target, &statistics, pblimits);

        let mut keep_iterating = false;
        let mut last_threshold = sequence.threshold().clone();
        let mut iteration: u32 = 1;
        loop {
            let root = products.root_name();
            self.delete_best_effort(&naming::iteration_pattern(&root, iteration));

            let next_mask = naming::mask_name(&root, iteration, masking, target.mask.as_deref());
            self.reconcile_threshold(
                sequence.as_mut(),
                target,
                preflight.user_threshold.as_ref(),
                statistics.residual_robust_rms,
            );

            let channel_selection = (target.specmode == SpecMode::Cube && !target.cleancontranges)
                .then(|| ChannelSelection {
                    spw: target.spw.clone(),
                    spwsel_lsrk: target.spwsel_lsrk.clone(),
                });
            let decision = sequence.iteration(&IterationRequest {
                next_mask,
                pblimits: bootstrap.pblimits,
                channel_selection,
                keep_iterating,
            });
            if !decision.iterating {
                break;
            }
            last_threshold = decision.threshold.clone();

            let previous = naming::iter_root(&root, iteration - 1);
            let current = naming::iter_root(&root, iteration);
            self.copy_products(&context, &previous, &current)?;
            if keep_iterating {
                // The engine-grown mask must not seed the PB-based mask
                self.delete_best_effort(&format!("{}.mask", current));
                keep_iterating = false;
            }

            tracing::info!("Iteration {}: Clean control parameters", iteration);
            tracing::info!("    Mask {}", decision.mask);
            tracing::info!("    Threshold {}", decision.threshold);
            tracing::info!("    Niter {}", decision.niter);

            let state = IterationState {
                iteration,
                mask: decision.mask.clone(),
                threshold: decision.threshold.clone(),
                niter: decision.niter,
                sensitivity: sequence.sensitivity(),
                stop_code: None,
            };
            products = self
                .clean(target, &preflight, &state, masking, Some(&decision), Some(products))
                .await?;
            statistics = self.pass_statistics(
                sequence.as_mut(),
                &context,
                &preflight,
                &state,
                &products,
                bootstrap.pblimits,
            )?;

            let outcome = fallback::evaluate(
                masking,
                products.stop_code,
                &context,
                statistics.peak_to_rms(),
                bootstrap.dirty_dynamic_range,
            );
            if let Some(warning) = &outcome.warning {
                tracing::warn!("{}", warning);
            }
            if outcome.switch {
                let from = masking;
                masking = MaskingMode::CentralRegion;
                keep_iterating = true;
                let raised = sequence.threshold().clone().max(Threshold::from_jy(
                    fallback::FALLBACK_TLIMIT * sequence.dr_corrected_sensitivity(),
                ));
                sequence.set_threshold(raised);
                result.final_masking = masking;
                result.masking_fallback = true;
                self.metrics.record_fallback();
                self.events.emit(ImagingEvent::MaskingFallback {
                    iteration,
                    from,
                    to: masking,
                });
            }

            result.diagnostics = diagnostics(&statistics, &bootstrap, sequence.as_ref());
            tracing::info!("Clean image iter {} stats", iteration);
            tracing::info!(
                "    Clean image annulus area rms: {}",
                statistics.nonpbcor_image_non_cleanmask_rms
            );
            tracing::info!("    Clean image min: {}", statistics.pbcor_image_min);
            tracing::info!("    Clean image max: {}", statistics.pbcor_image_max);
            tracing::info!(
                "    Residual annulus area rms: {}",
                statistics.residual_non_cleanmask_rms
            );
            tracing::info!(
                "    Residual cleanmask area rms: {}",
                statistics.residual_cleanmask_rms
            );
            tracing::info!("    Residual max: {}", statistics.residual_max);
            tracing::info!("    Residual min: {}", statistics.residual_min);
            result.record(IterationRecord {
                state: completed(state, &products),
                products: products.clone(),
                statistics: statistics.clone(),
            });

            self.archive_summary_plot(&root, iteration);
            iteration += 1;
        }
        self.events.emit(ImagingEvent::Converged {
            iterations: iteration - 1,
        });

        if iteration == 2 && self.options.imaging_mode.contains("VLASS-SE") {
            let root = products.root_name();
            self.copy_products(
                &context,
                &naming::iter_root(&root, iteration - 1),
                &naming::iter_root(&root, iteration),
            )?;
            self.reconcile_threshold(
                sequence.as_mut(),
                target,
                preflight.user_threshold.as_ref(),
                statistics.residual_robust_rms,
            );
            let niter = self.heuristics.niter_correction(
                target.niter,
                target.cell.as_deref(),
                &target.imsize,
                statistics.residual_max,
                &bootstrap.correction.threshold,
            );
            sequence.set_niter(niter);

            // The reconciled threshold is bookkeeping only; the pass repeats
            // the threshold of the last cleaning pass.
            tracing::info!("Final VLASS single epoch tclean call with no mask");
            let state = IterationState {
                iteration,
                mask: String::new(),
                threshold: last_threshold,
                niter,
                sensitivity: sequence.sensitivity(),
                stop_code: None,
            };
            products = self
                .clean(target, &preflight, &state, masking, None, Some(products))
                .await?;
            statistics = self.pass_statistics(
                sequence.as_mut(),
                &context,
                &preflight,
                &state,
                &products,
                bootstrap.pblimits,
            )?;
            result.record(IterationRecord {
                state: completed(state, &products),
                products: products.clone(),
                statistics,
            });
        }

        if target.specmode == SpecMode::Cube {
            let created = moments::create_moment_maps(
                &self.engine,
                &mut result,
                preflight.continuum_ranges.as_deref(),
            )
            .await
            .map_err(|source| ImagingError::Engine {
                context: context.clone(),
                source,
            })?;
            if created {
                self.metrics.record_moment_maps(2);
                if let Some(iteration) = result.max_iteration() {
                    self.events.emit(ImagingEvent::MomentMapsCreated { iteration });
                }
            }
        }

        Ok(result)
    }

    /// Threshold and niter from the dirty image statistics.
    fn bootstrap(
        &self,
        sequence: &mut dyn SequenceManager,
        target: &TargetSpec,
        dirty: &ImageStatistics,
        pblimits: PbLimits,
    ) -> Bootstrap {
        let dirty_dynamic_range = dirty.residual_max / sequence.sensitivity();
        let correction = self.heuristics.dr_correction(
            sequence.threshold(),
            dirty_dynamic_range,
            dirty.residual_max,
            target.intent,
            target.tlimit,
        );
        sequence.set_threshold(correction.threshold.clone());
        sequence.set_dr_corrected_sensitivity(sequence.sensitivity() * correction.factor);

        let niter = self.heuristics.niter_correction(
            sequence.niter(),
            target.cell.as_deref(),
            &target.imsize,
            dirty.residual_max,
            &correction.threshold,
        );
        sequence.set_niter(niter);

        tracing::debug!(
            "Dirty dynamic range {:.1}: threshold {}, DR correction factor {}, maxEDR used {}, niter {}",
            dirty_dynamic_range,
            correction.threshold,
            correction.factor,
            correction.max_edr_used,
            niter
        );

        Bootstrap {
            dirty_dynamic_range,
            correction,
            pblimits,
        }
    }

    /// Combine the rms-scaled threshold with the user threshold, if any.
    fn reconcile_threshold(
        &self,
        sequence: &mut dyn SequenceManager,
        target: &TargetSpec,
        user_threshold: Option<&Threshold>,
        robust_rms: f64,
    ) {
        let Some(rms_threshold) = self.heuristics.rms_threshold(robust_rms, target.nsigma) else {
            return;
        };

        match user_threshold {
            Some(user) => {
                let chosen = user.clone().max(rms_threshold.clone());
                tracing::warn!("Both the 'threshold' and 'threshold_nsigma' were specified.");
                tracing::warn!(
                    "Setting new threshold to max of input threshold and scaled MAD * nsigma."
                );
                tracing::info!("    Input 'threshold' = {}", user);
                tracing::info!("    Input 'threshold_nsigma' = {:?}", target.nsigma);
                tracing::info!("    Scaled MAD * 'threshold_nsigma' = {}", rms_threshold);
                tracing::info!("    max(threshold, scaled MAD * nsigma)= {}", chosen);
                sequence.set_threshold(chosen);
            }
            None => sequence.set_threshold(rms_threshold),
        }
    }

    async fn clean(
        &self,
        target: &TargetSpec,
        preflight: &Preflight,
        state: &IterationState,
        masking: MaskingMode,
        decision: Option<&SequenceDecision>,
        prior: Option<ImageProductSet>,
    ) -> Result<ImageProductSet, ImagingError> {
        let context = target.context();
        let request = CleanRequest {
            context: context.clone(),
            iteration: state.iteration,
            iter_root: naming::iter_root(&target.image_name(), state.iteration),
            mask: state.mask.clone(),
            masking,
            threshold: state.threshold.clone(),
            niter: state.niter,
            sensitivity: state.sensitivity,
            pblimit: self.options.pblimit,
            deconvolver: target.deconvolver.clone(),
            cell: target.cell.clone(),
            imsize: target.imsize.clone(),
            spectral: preflight.spectral.clone(),
            excluded_channels: decision.and_then(|d| d.excluded_channels.clone()),
            mask_pblimit: decision.and_then(|d| d.mask_pblimit),
            prior,
        };

        self.events.emit(ImagingEvent::PassStarted {
            iteration: state.iteration,
            mask: state.mask.clone(),
            threshold: state.threshold.to_string(),
            niter: state.niter,
        });

        let started = Instant::now();
        let outcome = self.engine.execute(&request).await;
        self.metrics.record_pass(started.elapsed());
        outcome.map_err(|source| ImagingError::Engine { context, source })
    }

    fn pass_statistics(
        &self,
        sequence: &mut dyn SequenceManager,
        context: &TargetContext,
        preflight: &Preflight,
        state: &IterationState,
        products: &ImageProductSet,
        pblimits: PbLimits,
    ) -> Result<ImageStatistics, ImagingError> {
        let request = StatisticsRequest {
            iteration: state.iteration,
            products: products.clone(),
            mask: (state.iteration > 0).then(|| state.mask.clone()),
            threshold: (state.iteration > 0).then(|| state.threshold.clone()),
            pblimits,
            continuum_ranges: preflight.continuum_ranges.clone(),
        };
        let statistics = sequence
            .iteration_result(&self.statistics, &request)
            .map_err(|source| ImagingError::Statistics {
                context: context.clone(),
                source,
            })?;

        self.events.emit(ImagingEvent::PassCompleted {
            iteration: state.iteration,
            stop_code: products.stop_code.code(),
            residual_max: statistics.residual_max,
            residual_robust_rms: statistics.residual_robust_rms,
        });
        Ok(statistics)
    }

    fn copy_products(
        &self,
        context: &TargetContext,
        old_root: &str,
        new_root: &str,
    ) -> Result<(), ImagingError> {
        let copied = self
            .store
            .copy(old_root, new_root)
            .map_err(|source| ImagingError::Store {
                context: context.clone(),
                source,
            })?;
        tracing::debug!("Copied {} products from {} to {}", copied, old_root, new_root);
        Ok(())
    }

    fn delete_best_effort(&self, pattern: &str) {
        match self.store.delete(pattern, true) {
            Ok(report) if report.failed > 0 => {
                tracing::warn!("Could not delete {} of the files matching {}", report.failed, pattern);
                self.metrics.record_cleanup_failures(report.failed);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Exception while deleting {}: {}", pattern, e);
                self.metrics.record_cleanup_failures(1);
            }
        }
    }

    fn archive_summary_plot(&self, root: &str, iteration: u32) {
        let target = naming::summary_plot_name(root, iteration);
        if let Err(e) = self.store.rename(naming::ENGINE_SUMMARY_PLOT, &target) {
            tracing::debug!("Summary plot not archived: {}", e);
            tracing::info!("Could not save tclean summary plot.");
        }
    }
}

fn completed(mut state: IterationState, products: &ImageProductSet) -> IterationState {
    state.stop_code = Some(products.stop_code);
    state
}

fn diagnostics(
    statistics: &ImageStatistics,
    bootstrap: &Bootstrap,
    sequence: &dyn SequenceManager,
) -> Diagnostics {
    Diagnostics {
        image_min: Some(statistics.pbcor_image_min),
        image_max: Some(statistics.pbcor_image_max),
        image_rms: Some(statistics.nonpbcor_image_non_cleanmask_rms),
        image_rms_min: Some(statistics.nonpbcor_image_non_cleanmask_rms_min),
        image_rms_max: Some(statistics.nonpbcor_image_non_cleanmask_rms_max),
        dirty_dynamic_range: Some(bootstrap.dirty_dynamic_range),
        dr_correction_factor: Some(bootstrap.correction.factor),
        max_edr_used: Some(bootstrap.correction.max_edr_used),
        dr_corrected_sensitivity: Some(sequence.dr_corrected_sensitivity()),
    }
}
