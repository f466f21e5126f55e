use crate::generator::RequestGenerator;
use crate::holder::ModelHolder;
use crate::interaction_log::InteractionLog;
use crate::types::{
    validate_rate, Interaction, InteractionRecord, Outcome, Result, SchedulerSettings,
    SimulationConfig, SimulatorError,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Scheduling,
    Generating,
    AwaitingPrediction,
    Recording,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks_completed: u64,
    pub ticks_skipped: u64,
    pub prediction_failures: u64,
    pub append_failures: u64,
    pub timers_armed: u64,
    pub timers_fired: u64,
    pub timers_cancelled: u64,
    pub pending_timers: usize,
    /// Highest number of timers ever pending at once.
    pub max_pending_timers: usize,
}

#[derive(Default)]
struct Counters {
    ticks_completed: AtomicU64,
    ticks_skipped: AtomicU64,
    prediction_failures: AtomicU64,
    append_failures: AtomicU64,
    timers_armed: AtomicU64,
    timers_fired: AtomicU64,
    timers_cancelled: AtomicU64,
    pending_timers: AtomicUsize,
    max_pending_timers: AtomicUsize,
}

impl Counters {
    fn arm_timer(&self) {
        self.timers_armed.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending_timers.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_pending_timers.fetch_max(pending, Ordering::SeqCst);
    }

    fn timer_fired(&self) {
        self.timers_fired.fetch_add(1, Ordering::Relaxed);
        self.pending_timers.fetch_sub(1, Ordering::SeqCst);
    }

    fn timer_cancelled(&self) {
        self.timers_cancelled.fetch_add(1, Ordering::Relaxed);
        self.pending_timers.fetch_sub(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            prediction_failures: self.prediction_failures.load(Ordering::Relaxed),
            append_failures: self.append_failures.load(Ordering::Relaxed),
            timers_armed: self.timers_armed.load(Ordering::Relaxed),
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            timers_cancelled: self.timers_cancelled.load(Ordering::Relaxed),
            pending_timers: self.pending_timers.load(Ordering::SeqCst),
            max_pending_timers: self.max_pending_timers.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ControlState {
    settings: SchedulerSettings,
    shutdown: bool,
}

/// Clears the in-flight flag when the request finishes, even by panic.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything one request needs on its way from generator to log.
struct RequestPipeline {
    generator: Mutex<RequestGenerator>,
    holder: Arc<ModelHolder>,
    log: Arc<InteractionLog>,
    fallback_outcome: Outcome,
    think_delay: Duration,
    processing: AtomicBool,
    phase: watch::Sender<SchedulerPhase>,
    counters: Counters,
}

impl RequestPipeline {
    fn set_phase(&self, phase: SchedulerPhase) {
        self.phase.send_replace(phase);
    }

    async fn pause(&self, settings: &SchedulerSettings) {
        if !settings.accelerated_mode && !self.think_delay.is_zero() {
            tokio::time::sleep(self.think_delay).await;
        }
    }

    /// Serve one request under `settings`; `None` if another request is in flight
    /// or the log rejected the result.
    async fn process_request(&self, settings: SchedulerSettings) -> Option<InteractionRecord> {
        let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
            self.counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            debug!("Skipping tick, a request is already in flight");
            return None;
        };

        self.set_phase(SchedulerPhase::Generating);
        let request = self
            .generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate();
        self.pause(&settings).await;

        self.set_phase(SchedulerPhase::AwaitingPrediction);
        let model = self.holder.get_active();
        let started = Instant::now();
        let outcome = AssertUnwindSafe(model.predict(&request.items))
            .catch_unwind()
            .await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let predicted_outcome = match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                self.counters.prediction_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Prediction by {} failed, recording fallback {}: {}",
                    model.model_name(),
                    self.fallback_outcome,
                    e
                );
                self.fallback_outcome.clone()
            }
            Err(_) => {
                self.counters.prediction_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Prediction by {} panicked, recording fallback {}",
                    model.model_name(),
                    self.fallback_outcome
                );
                self.fallback_outcome.clone()
            }
        };
        self.pause(&settings).await;

        self.set_phase(SchedulerPhase::Recording);
        let interaction = Interaction {
            timestamp: request.timestamp,
            items: request.items,
            desired_outcome: request.desired_outcome,
            predicted_outcome,
            latency_ms,
        };
        let record = match self.log.append(interaction).await {
            Ok(record) => Some(record),
            Err(e) => {
                self.counters.append_failures.fetch_add(1, Ordering::Relaxed);
                error!("Failed to record interaction: {}", e);
                None
            }
        };
        self.pause(&settings).await;

        self.counters.ticks_completed.fetch_add(1, Ordering::Relaxed);
        record
    }
}

/// Self-pacing request loop: at most one request in flight and at most one pending timer.
pub struct Scheduler {
    pipeline: Arc<RequestPipeline>,
    control: watch::Sender<ControlState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the worker task. It idles until [`Scheduler::start`] unless
    /// `settings.operating` is already set.
    pub fn spawn(
        config: &SimulationConfig,
        holder: Arc<ModelHolder>,
        log: Arc<InteractionLog>,
        settings: SchedulerSettings,
    ) -> Result<Self> {
        validate_rate(settings.target_rate_per_second)?;

        let generator = RequestGenerator::new(
            config.item_catalog.clone(),
            config.outcome_catalog.clone(),
            config.max_items_per_request,
            config.seed,
        )?;

        let (phase, _) = watch::channel(SchedulerPhase::Idle);
        let pipeline = Arc::new(RequestPipeline {
            generator: Mutex::new(generator),
            holder,
            log,
            fallback_outcome: config.fallback_outcome.clone(),
            think_delay: Duration::from_millis(config.think_delay_ms),
            processing: AtomicBool::new(false),
            phase,
            counters: Counters::default(),
        });

        let (control, control_rx) = watch::channel(ControlState {
            settings,
            shutdown: false,
        });
        let min_delay = Duration::from_millis(config.min_delay_ms);
        let worker = tokio::spawn(run_worker(pipeline.clone(), control_rx, min_delay));

        info!(
            "Scheduler ready (rate {}/s, accelerated {})",
            settings.target_rate_per_second, settings.accelerated_mode
        );

        Ok(Self {
            pipeline,
            control,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn start(&self) -> Result<()> {
        self.modify_settings(|s| s.operating = true)
    }

    pub fn stop(&self) -> Result<()> {
        self.modify_settings(|s| s.operating = false)
    }

    pub fn set_target_rate(&self, rate: f64) -> Result<()> {
        let rate = validate_rate(rate)?;
        self.modify_settings(|s| s.target_rate_per_second = rate)
    }

    pub fn set_accelerated(&self, accelerated: bool) -> Result<()> {
        self.modify_settings(|s| s.accelerated_mode = accelerated)
    }

    /// Replace every setting at once.
    pub fn configure(&self, settings: SchedulerSettings) -> Result<()> {
        validate_rate(settings.target_rate_per_second)?;
        self.modify_settings(|s| *s = settings)
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.control.borrow().settings
    }

    pub fn is_operating(&self) -> bool {
        self.settings().operating
    }

    /// Serve one request right now under the current settings.
    ///
    /// Returns `None` when a request is already in flight.
    pub async fn tick(&self) -> Option<InteractionRecord> {
        let settings = self.settings();
        self.pipeline.process_request(settings).await
    }

    pub fn is_processing(&self) -> bool {
        self.pipeline.processing.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.pipeline.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SchedulerPhase> {
        self.pipeline.phase.subscribe()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.pipeline.counters.snapshot()
    }

    /// Stop the worker for good; an in-flight request is allowed to finish.
    pub async fn shutdown(&self) {
        self.control.send_modify(|c| c.shutdown = true);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Scheduler worker ended abnormally: {}", e);
            }
        }
        info!("Scheduler shut down");
    }

    /// Notify the worker only when something actually changed.
    fn modify_settings<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut SchedulerSettings),
    {
        if self.control.borrow().shutdown {
            return Err(SimulatorError::SchedulerStopped);
        }
        let changed = self.control.send_if_modified(|c| {
            let before = c.settings;
            f(&mut c.settings);
            c.settings != before
        });
        if changed {
            debug!("Scheduler settings now {:?}", self.settings());
        }
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.control.send_modify(|c| c.shutdown = true);
    }
}

async fn run_worker(
    pipeline: Arc<RequestPipeline>,
    mut control: watch::Receiver<ControlState>,
    min_delay: Duration,
) {
    loop {
        let state = *control.borrow_and_update();
        if state.shutdown {
            break;
        }

        if !state.settings.operating {
            pipeline.set_phase(SchedulerPhase::Idle);
            if control.changed().await.is_err() {
                break;
            }
            continue;
        }

        pipeline.set_phase(SchedulerPhase::Scheduling);
        let delay = state.settings.inter_tick_delay(min_delay);
        pipeline.counters.arm_timer();

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                pipeline.counters.timer_fired();
                // Changes landing mid-request are picked up by the next iteration.
                pipeline.process_request(state.settings).await;
            }
            changed = control.changed() => {
                pipeline.counters.timer_cancelled();
                if changed.is_err() {
                    break;
                }
                debug!("Pending tick cancelled by a settings change");
            }
        }
    }

    pipeline.set_phase(SchedulerPhase::Idle);
    debug!("Scheduler worker exiting");
}
