// Event module
//
// The EventBus broadcasts controller progress as ImagingEvent values and keeps a
// small snapshot of the run in progress for callers that poll instead of
// subscribing.

use crate::models::{MaskingMode, TargetContext};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Progress events emitted by the convergence controller.
#[derive(Clone, Debug, PartialEq)]
pub enum ImagingEvent {
    /// Pre-flight passed; the dirty image is next
    RunStarted {
        context: TargetContext,
        masking: MaskingMode,
    },

    /// An engine pass is about to be issued
    PassStarted {
        iteration: u32,
        mask: String,
        threshold: String,
        niter: u32,
    },

    /// An engine pass finished and its statistics are known
    PassCompleted {
        iteration: u32,
        stop_code: i32,
        residual_max: f64,
        residual_robust_rms: f64,
    },

    /// Automasking found nothing and the run switched masking mode
    MaskingFallback {
        iteration: u32,
        from: MaskingMode,
        to: MaskingMode,
    },

    /// The sequence manager stopped the cleaning loop
    Converged {
        iterations: u32,
    },

    MomentMapsCreated {
        iteration: u32,
    },

    /// The run ended with an error
    RunFailed {
        context: TargetContext,
        error: String,
    },
}

/// Snapshot of the run in progress.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunProgress {
    pub target: Option<String>,
    pub masking: Option<MaskingMode>,
    pub iteration: u32,
    pub passes_completed: u32,
    pub running: bool,
    pub last_error: Option<String>,
}

/// Broadcast of [`ImagingEvent`]s with a shared [`RunProgress`] snapshot.
///
/// Sending never fails: events emitted while nobody subscribes are dropped.
/// Cloning shares both the channel and the snapshot.
pub struct EventBus {
    progress: Arc<RwLock<RunProgress>>,

    /// Broadcast channel with a buffer of 100 events
    event_tx: broadcast::Sender<ImagingEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            progress: Arc::new(RwLock::new(RunProgress::default())),
            event_tx,
        }
    }

    /// Update the snapshot from `event` and broadcast it.
    pub fn emit(&self, event: ImagingEvent) {
        self.apply(&event);
        // Ignore send errors - it's OK if no one is listening
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImagingEvent> {
        self.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> RunProgress {
        match self.progress.read() {
            Ok(progress) => progress.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn apply(&self, event: &ImagingEvent) {
        let mut progress = match self.progress.write() {
            Ok(progress) => progress,
            Err(poisoned) => poisoned.into_inner(),
        };

        match event {
            ImagingEvent::RunStarted { context, masking } => {
                *progress = RunProgress {
                    target: Some(context.to_string()),
                    masking: Some(*masking),
                    running: true,
                    ..RunProgress::default()
                };
            }
            ImagingEvent::PassStarted { iteration, .. } => {
                progress.iteration = *iteration;
            }
            ImagingEvent::PassCompleted { .. } => {
                progress.passes_completed += 1;
            }
            ImagingEvent::MaskingFallback { to, .. } => {
                progress.masking = Some(*to);
            }
            ImagingEvent::Converged { .. } | ImagingEvent::MomentMapsCreated { .. } => {}
            ImagingEvent::RunFailed { context, error } => {
                progress.target = Some(context.to_string());
                progress.running = false;
                progress.last_error = Some(error.clone());
            }
        }
    }

    /// Mark the current run as finished.
    pub fn finish(&self) {
        let mut progress = match self.progress.write() {
            Ok(progress) => progress,
            Err(poisoned) => poisoned.into_inner(),
        };
        progress.running = false;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            progress: Arc::clone(&self.progress),
            event_tx: self.event_tx.clone(),
        }
    }
}
