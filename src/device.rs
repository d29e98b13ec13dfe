//! Per-device controller.
//!
//! One worker thread is the single logical owner of one device: it holds
//! the pipeline, the stream throttler, and the transition engine, and
//! drains a bounded command channel. Presentation surfaces only enqueue
//! commands and read the published snapshot; they never perform I/O and
//! never block on it. Different devices get different controllers and
//! proceed independently.
//!
//! The worker waits with `recv_timeout` against the earliest scheduler
//! deadline, so throttled dispatches and transition frames fire on time
//! even when no commands arrive.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use derive_more::{Display, Error};
use log::{debug, info, warn};

use crate::DeviceTransport;
use crate::color::{ColorStop, Gradient};
use crate::intent::{ColorIntent, DeviceId, build_intent};
use crate::optimistic::OptimisticStateCoordinator;
use crate::pipeline::{ColorPipeline, FALLBACK_FRAME_LEN, PipelineError};
use crate::preset::{Preset, PresetPayload};
use crate::store::{self, KvStore};
use crate::throttle::{EditPhase, EditScope, StreamThrottler};
use crate::transition::{TransitionEngine, TransitionFrame, TransitionSpec};
use crate::wire::DeviceCapabilities;

const COMMAND_QUEUE_DEPTH: usize = 32;

/// Wait used when no scheduler deadline is pending.
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Store key for a device's last-seen gradient.
fn gradient_key(device: &DeviceId) -> String {
    format!("device/{device}/gradient")
}

/// Store key for a device's last transition duration.
fn duration_key(device: &DeviceId) -> String {
    format!("device/{device}/transition_duration")
}

/// Published per-device state. Surfaces read it; only the worker writes.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub power: Option<bool>,
    pub brightness: Option<u8>,
    /// Last gradient the user applied, for repopulating edit surfaces.
    pub gradient: Option<Gradient>,
    pub transition_duration: Option<Duration>,
    /// `None` until the device has been read at least once.
    pub capabilities: Option<DeviceCapabilities>,
    /// Most recent dispatch failure, cleared by the next success.
    pub last_error: Option<String>,
}

/// Enqueue failure. The caller may surface a transient notice or simply
/// let the next interaction resend current state.
#[derive(Debug, Display, Error)]
pub enum ControllerError {
    #[display("device command queue is full")]
    Busy,
    #[display("device worker has stopped")]
    Stopped,
}

enum Command {
    GradientEdit {
        control: String,
        scope: EditScope,
        phase: EditPhase,
        segment_id: u8,
        gradient: Gradient,
        temperatures: Option<Vec<f64>>,
    },
    Dispatch(ColorIntent),
    ApplyPreset(Preset),
    StartTransition(TransitionSpec),
    CancelTransition,
    Refresh,
}

/// Handle to one device's worker. Cloneable reads come from
/// [`snapshot`]; all mutation goes through the command channel.
///
/// [`snapshot`]: DeviceController::snapshot
pub struct DeviceController {
    device_id: DeviceId,
    commands: Option<SyncSender<Command>>,
    snapshot: Arc<Mutex<DeviceSnapshot>>,
    optimistic: Arc<Mutex<OptimisticStateCoordinator<bool>>>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceController {
    /// Start the worker for one device.
    pub fn spawn<T>(device_id: DeviceId, transport: T, store: Arc<dyn KvStore>) -> Self
    where
        T: DeviceTransport + Send + 'static,
    {
        let snapshot = Arc::new(Mutex::new(DeviceSnapshot::default()));
        let optimistic = Arc::new(Mutex::new(OptimisticStateCoordinator::new()));
        let (tx, rx) = mpsc::sync_channel(COMMAND_QUEUE_DEPTH);

        let worker = {
            let worker = Worker {
                pipeline: ColorPipeline::new(device_id.clone(), transport),
                throttler: StreamThrottler::new(),
                transition: TransitionEngine::new(FALLBACK_FRAME_LEN),
                snapshot: Arc::clone(&snapshot),
                optimistic: Arc::clone(&optimistic),
                store,
                device_id: device_id.clone(),
            };
            thread::Builder::new()
                .name(format!("device-{device_id}"))
                .spawn(move || worker.run(&rx))
                .ok()
        };
        if worker.is_none() {
            warn!("[{device_id}] worker thread could not start");
        }

        Self {
            device_id,
            commands: Some(tx),
            snapshot,
            optimistic,
            worker,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Throttled interactive gradient edit.
    ///
    /// `Changed` events replace any pending dispatch for the same control;
    /// the `Ended` event bypasses the window and always reaches the wire.
    pub fn apply_gradient(
        &self,
        stops: Vec<ColorStop>,
        segment_id: u8,
        temperatures: Option<Vec<f64>>,
        scope: EditScope,
        phase: EditPhase,
    ) -> Result<(), ControllerError> {
        let Some(gradient) = Gradient::new(stops) else {
            debug!("[{}] empty stop list ignored", self.device_id);
            return Ok(());
        };
        self.send(
            Command::GradientEdit {
                control: format!("gradient/{segment_id}"),
                scope,
                phase,
                segment_id,
                gradient,
                temperatures,
            },
            phase == EditPhase::Changed,
        )
    }

    /// Dispatch a prebuilt intent immediately (no throttling).
    pub fn apply_intent(&self, intent: ColorIntent) -> Result<(), ControllerError> {
        self.send(Command::Dispatch(intent), false)
    }

    /// Assert power optimistically and dispatch the toggle.
    pub fn set_power(&self, on: bool) -> Result<(), ControllerError> {
        self.lock_optimistic()
            .register(&self.device_id, on, Instant::now());
        self.send(
            Command::Dispatch(ColorIntent::power(self.device_id.clone(), on)),
            false,
        )
    }

    pub fn set_brightness(&self, brightness: u8) -> Result<(), ControllerError> {
        self.send(
            Command::Dispatch(ColorIntent::brightness(self.device_id.clone(), brightness)),
            false,
        )
    }

    /// Apply a saved preset to the device.
    pub fn apply_preset(&self, preset: Preset) -> Result<(), ControllerError> {
        self.send(Command::ApplyPreset(preset), false)
    }

    /// Start a transition, cancelling (and reverting) any in-flight one.
    pub fn start_transition(&self, spec: TransitionSpec) -> Result<(), ControllerError> {
        self.send(Command::StartTransition(spec), false)
    }

    /// Cancel the running transition; the worker reverts to A before
    /// anything else happens on this device.
    pub fn cancel_transition(&self) -> Result<(), ControllerError> {
        self.send(Command::CancelTransition, false)
    }

    /// Trigger a confirmed device read and reconciliation.
    pub fn refresh(&self) -> Result<(), ControllerError> {
        self.send(Command::Refresh, false)
    }

    /// Current power state: the optimistic assertion while one is held,
    /// otherwise the last confirmed value.
    pub fn power_state(&self) -> Option<bool> {
        if let Some(&intended) = self.lock_optimistic().intended(&self.device_id) {
            return Some(intended);
        }
        self.lock_snapshot().power
    }

    /// Published state for presentation surfaces.
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.lock_snapshot().clone()
    }

    fn send(&self, command: Command, droppable: bool) -> Result<(), ControllerError> {
        let Some(commands) = &self.commands else {
            return Err(ControllerError::Stopped);
        };
        match commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                if droppable {
                    // A fresher Changed event is coming; dropping keeps
                    // the stream current instead of queueing stale edits.
                    debug!("[{}] queue full, interactive edit dropped", self.device_id);
                    Ok(())
                } else {
                    warn!("[{}] command queue full", self.device_id);
                    Err(ControllerError::Busy)
                }
            }
            Err(TrySendError::Disconnected(_)) => Err(ControllerError::Stopped),
        }
    }

    fn lock_snapshot(&self) -> std::sync::MutexGuard<'_, DeviceSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_optimistic(
        &self,
    ) -> std::sync::MutexGuard<'_, OptimisticStateCoordinator<bool>> {
        self.optimistic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DeviceController {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Worker<T: DeviceTransport> {
    pipeline: ColorPipeline<T>,
    throttler: StreamThrottler,
    transition: TransitionEngine,
    snapshot: Arc<Mutex<DeviceSnapshot>>,
    optimistic: Arc<Mutex<OptimisticStateCoordinator<bool>>>,
    store: Arc<dyn KvStore>,
    device_id: DeviceId,
}

impl<T: DeviceTransport> Worker<T> {
    fn run(mut self, rx: &Receiver<Command>) {
        self.bootstrap();

        loop {
            match rx.recv_timeout(self.next_wait()) {
                Ok(command) => self.handle(command),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            for intent in self.throttler.poll(now) {
                self.dispatch(&intent);
            }
            if let Some(frame) = self.transition.poll(now) {
                self.dispatch_frame(&frame);
            }
        }

        // Never leave the device mid-interpolation on shutdown.
        if let Some(revert) = self.transition.cancel() {
            self.dispatch_frame(&revert);
        }
        debug!("[{}] worker stopped", self.device_id);
    }

    /// Probe the device and restore per-device caches.
    fn bootstrap(&mut self) {
        self.refresh();

        let mut snapshot = self.lock_snapshot();
        match store::read_json::<Gradient>(self.store.as_ref(), &gradient_key(&self.device_id)) {
            Ok(gradient) => snapshot.gradient = gradient,
            Err(err) => warn!("[{}] gradient cache unreadable: {err}", self.device_id),
        }
        match store::read_json::<Duration>(self.store.as_ref(), &duration_key(&self.device_id)) {
            Ok(duration) => snapshot.transition_duration = duration,
            Err(err) => warn!("[{}] duration cache unreadable: {err}", self.device_id),
        }
    }

    fn next_wait(&self) -> Duration {
        let deadline = [
            self.throttler.next_deadline(),
            self.transition.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min();
        match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => IDLE_WAIT,
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::GradientEdit {
                control,
                scope,
                phase,
                segment_id,
                gradient,
                temperatures,
            } => {
                let led_count = self
                    .pipeline
                    .segment_led_count(segment_id)
                    .unwrap_or(FALLBACK_FRAME_LEN);
                let intent = build_intent(
                    self.pipeline.device_id(),
                    segment_id,
                    led_count,
                    &gradient,
                    temperatures.as_deref(),
                );
                self.lock_snapshot().gradient = Some(gradient.clone());

                let now = Instant::now();
                if let Some(immediate) =
                    self.throttler.submit(&control, scope, phase, intent, now)
                {
                    self.dispatch(&immediate);
                    // The release payload is the one worth remembering.
                    self.persist_gradient(&gradient);
                }
            }
            Command::Dispatch(intent) => self.dispatch(&intent),
            Command::ApplyPreset(preset) => self.apply_preset(&preset),
            Command::StartTransition(spec) => self.start_transition(spec),
            Command::CancelTransition => self.cancel_transition(),
            Command::Refresh => self.refresh(),
        }
    }

    fn start_transition(&mut self, spec: TransitionSpec) {
        // One running transition per device: replace-by-cancel, with the
        // mandatory revert write in between.
        if let Some(revert) = self.transition.cancel() {
            self.dispatch_frame(&revert);
        }
        self.transition.reset();

        let duration = spec.clamped_duration();
        let now = Instant::now();
        if let Some(first) = self.transition.start_with(spec, now) {
            self.dispatch_frame(&first);
        }

        let mut snapshot = self.lock_snapshot();
        snapshot.transition_duration = Some(duration);
        drop(snapshot);
        if let Err(err) = store::write_json(
            self.store.as_ref(),
            &duration_key(&self.device_id),
            &duration,
        ) {
            warn!("[{}] duration cache not persisted: {err}", self.device_id);
        }
    }

    fn cancel_transition(&mut self) {
        if let Some(revert) = self.transition.cancel() {
            self.dispatch_frame(&revert);
        }
        self.transition.reset();
    }

    fn apply_preset(&mut self, preset: &Preset) {
        info!("[{}] applying preset {}", self.device_id, preset.local_id);
        match &preset.payload {
            PresetPayload::Color {
                gradient,
                cct,
                brightness,
            } => {
                let state = self.pipeline.color_state(gradient, *cct, *brightness);
                if let Err(err) = self.pipeline.send_state(&state) {
                    self.note_error("preset apply", &err);
                } else {
                    self.lock_snapshot().gradient = Some(gradient.clone());
                    self.persist_gradient(gradient);
                }
            }
            PresetPayload::Effect {
                effect_id,
                params,
                brightness,
            } => {
                let state = self.pipeline.effect_state(*effect_id, params, *brightness);
                if let Err(err) = self.pipeline.send_state(&state) {
                    self.note_error("preset apply", &err);
                }
            }
            PresetPayload::Transition {
                gradient_a,
                brightness_a,
                gradient_b,
                brightness_b,
                duration_secs,
                frame_rate,
            } => {
                self.start_transition(TransitionSpec::new(
                    gradient_a.clone(),
                    *brightness_a,
                    gradient_b.clone(),
                    *brightness_b,
                    Duration::from_secs_f32(duration_secs.max(0.0)),
                    *frame_rate,
                ));
            }
        }
    }

    /// Confirmed read, merged against the optimistic assertion.
    fn refresh(&mut self) {
        match self.pipeline.refresh() {
            Ok(view) => {
                let led_count = view
                    .segments
                    .first()
                    .map_or(FALLBACK_FRAME_LEN, |s| s.led_count);
                let (capabilities, confirmed_power, brightness) =
                    (view.capabilities, view.power, view.brightness);
                self.transition.set_led_count(led_count);

                let power = confirmed_power.map(|confirmed| {
                    self.optimistic
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .merge(&self.device_id, confirmed, Instant::now())
                });

                let mut snapshot = self.lock_snapshot();
                snapshot.capabilities = Some(capabilities);
                snapshot.brightness = brightness;
                if power.is_some() {
                    snapshot.power = power;
                }
                snapshot.last_error = None;
            }
            Err(err @ PipelineError::Protocol(_)) => {
                // Unsupported firmware response shapes gate features off
                // instead of failing hard.
                warn!("[{}] unsupported device response: {err}", self.device_id);
                self.lock_snapshot().capabilities = Some(DeviceCapabilities::default());
            }
            Err(err) => self.note_error("device read", &err),
        }
    }

    fn dispatch(&mut self, intent: &ColorIntent) {
        match self.pipeline.send(intent) {
            Ok(()) => self.lock_snapshot().last_error = None,
            Err(err) => self.note_error("dispatch", &err),
        }
    }

    fn dispatch_frame(&mut self, frame: &TransitionFrame) {
        let intent = ColorIntent::per_led(
            self.device_id.clone(),
            self.pipeline.main_segment_id(),
            frame.colors.clone(),
        )
        .with_brightness(frame.brightness);
        self.dispatch(&intent);
    }

    fn persist_gradient(&self, gradient: &Gradient) {
        if let Err(err) = store::write_json(
            self.store.as_ref(),
            &gradient_key(&self.device_id),
            gradient,
        ) {
            warn!("[{}] gradient cache not persisted: {err}", self.device_id);
        }
    }

    /// Failed writes are returned to the caller as snapshot state, never
    /// retried; the next interaction naturally resends current state.
    fn note_error(&self, what: &str, err: &PipelineError) {
        warn!("[{}] {what} failed: {err}", self.device_id);
        self.lock_snapshot().last_error = Some(err.to_string());
    }

    fn lock_snapshot(&self) -> std::sync::MutexGuard<'_, DeviceSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
