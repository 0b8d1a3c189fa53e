//! Acquirer/Recorder Pipeline
//!
//! Lock order is control, then store. The recorder only ever takes the store
//! lock; the persisting flag it consults there is updated together with the
//! session state, so a state change is observed by the next frame at the
//! latest.

use crate::exchange::FrameExchange;
use crate::link::LinkTransport;
use crate::sink::DataSink;
use crate::state::SessionState;
use crate::{Frame, PipelineError};
use recording_arena::{Arena, ArenaError};
use session_store::{SavedRecording, SessionWriter, StorageError, TagEntry, TagLedger};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Width of one sample inside a frame
pub const BYTES_PER_SAMPLE: usize = 4;

/// Arena, tag ledger and time base of the current recording
pub struct RecordingStore {
    /// Recorded frames
    arena: Arena,
    /// Tags of the current session
    ledger: TagLedger,
    /// Output name of the current session
    name: String,
    /// Controller sampling period
    timer_period: Duration,
    /// Recorded time since the session began or the last save
    elapsed: Duration,
    /// Mirror of the session state, read by the recorder
    persisting: bool,
}

impl RecordingStore {
    /// Create a store around an allocated arena
    pub fn new(arena: Arena, timer_period: Duration, name: impl Into<String>) -> Self {
        Self {
            arena,
            ledger: TagLedger::new(),
            name: name.into(),
            timer_period,
            elapsed: Duration::ZERO,
            persisting: false,
        }
    }

    /// Reset the ledger, the arena and the time base for a new session
    pub fn begin(&mut self, name: &str) {
        if !self.arena.recorded().is_empty() {
            warn!(
                "Discarding {} unsaved bytes of session '{}'",
                self.arena.offset(),
                self.name
            );
        }
        self.arena.reset();
        self.ledger.clear();
        self.elapsed = Duration::ZERO;
        self.name = name.to_string();
    }

    /// Copy a frame into the arena and advance the time base
    pub fn persist(&mut self, frame: &Frame) -> Result<(), ArenaError> {
        self.arena.write(frame.as_bytes())?;
        self.elapsed += self.frame_period();
        Ok(())
    }

    /// Append a tag at the current recorded time
    pub fn tag(&mut self, label: &str) -> TagEntry {
        self.ledger.append(self.elapsed, label).clone()
    }

    /// Write the recorded bytes and the ledger, then rewind the arena
    ///
    /// The recorded time restarts with the arena, so later tags are timed
    /// from the start of the data they will be saved with. On failure the
    /// arena is left untouched so the save can be retried.
    pub fn save(&mut self, writer: &SessionWriter) -> Result<SavedRecording, StorageError> {
        let saved = writer.save(&self.name, self.arena.recorded(), &self.ledger)?;
        self.arena.reset();
        self.elapsed = Duration::ZERO;
        Ok(saved)
    }

    /// Duration covered by one frame
    pub fn frame_period(&self) -> Duration {
        self.timer_period
            .mul_f64(self.arena.frame_size() as f64 / BYTES_PER_SAMPLE as f64)
    }

    /// Controller sampling period
    pub fn timer_period(&self) -> Duration {
        self.timer_period
    }

    /// Set the controller sampling period used for the time base
    pub fn set_timer_period(&mut self, period: Duration) {
        self.timer_period = period;
    }

    /// Recorded time since the session began or the last save
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Output name of the current session
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recorded frames
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Tags of the current session
    pub fn ledger(&self) -> &TagLedger {
        &self.ledger
    }

    /// Whether the recorder currently persists frames
    pub fn is_persisting(&self) -> bool {
        self.persisting
    }
}

struct Control {
    session: SessionState,
    running: bool,
}

struct Shared {
    control: Mutex<Control>,
    /// Signalled on every session change and on shutdown
    state_changed: Condvar,
    exchange: FrameExchange,
    store: Mutex<RecordingStore>,
    /// Acquisition cycles since the last stop
    cycles: AtomicU64,
}

impl Shared {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_store(&self) -> MutexGuard<'_, RecordingStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until acquisition is on; false once shutdown was requested
    fn wait_until_acquiring(&self) -> bool {
        let mut control = self.lock_control();
        while control.running && !control.session.is_acquiring() {
            control = self
                .state_changed
                .wait(control)
                .unwrap_or_else(PoisonError::into_inner);
        }
        control.running
    }

    /// Number the frame just transferred
    ///
    /// Taken under the control lock so a stop, which resets the counter,
    /// is never followed by a late increment. `None` when acquisition was
    /// stopped during the transfer.
    fn next_cycle(&self) -> Option<u64> {
        let control = self.lock_control();
        if !control.session.is_acquiring() {
            return None;
        }
        Some(self.cycles.fetch_add(1, Ordering::Relaxed))
    }
}

/// Owned access to the recording store, for use off the control thread
#[derive(Clone)]
pub struct StoreHandle {
    shared: Arc<Shared>,
}

impl StoreHandle {
    /// Run `f` with exclusive access to the recording store
    pub fn with_store<R>(&self, f: impl FnOnce(&mut RecordingStore) -> R) -> R {
        f(&mut self.shared.lock_store())
    }
}

/// Running acquirer and recorder threads
pub struct Pipeline {
    shared: Arc<Shared>,
    acquirer: Option<JoinHandle<()>>,
    recorder: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Start the acquirer and recorder threads
    ///
    /// Both threads idle until the session leaves [`SessionState::Idle`].
    pub fn spawn<L, S>(link: L, sink: S, store: RecordingStore) -> Result<Self, PipelineError>
    where
        L: LinkTransport,
        S: DataSink,
    {
        let (exchange, first_slot) = FrameExchange::new(store.arena().frame_size());
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                session: SessionState::Idle,
                running: true,
            }),
            state_changed: Condvar::new(),
            exchange,
            store: Mutex::new(store),
            cycles: AtomicU64::new(0),
        });

        let mut pipeline = Self {
            shared: Arc::clone(&shared),
            acquirer: None,
            recorder: None,
        };

        info!("Starting acquisition and recording threads");
        let acquirer_shared = Arc::clone(&shared);
        pipeline.acquirer = Some(
            thread::Builder::new()
                .name("daq-acquirer".to_string())
                .spawn(move || run_acquirer(&acquirer_shared, link, first_slot))
                .map_err(|source| PipelineError::Spawn {
                    name: "acquirer",
                    source,
                })?,
        );

        let recorder_shared = Arc::clone(&shared);
        pipeline.recorder = Some(
            thread::Builder::new()
                .name("daq-recorder".to_string())
                .spawn(move || run_recorder(&recorder_shared, sink))
                .map_err(|source| PipelineError::Spawn {
                    name: "recorder",
                    source,
                })?,
        );

        Ok(pipeline)
    }

    /// Current session state
    pub fn session(&self) -> SessionState {
        self.shared.lock_control().session
    }

    /// Apply a state transition
    ///
    /// `f` receives the current state and the recording store and returns
    /// the next state, or `None` when the transition does not apply. It must
    /// leave the store untouched when returning `None`. Returns the previous
    /// state when the transition was applied.
    ///
    /// Entering [`SessionState::Idle`] resets the cycle counter.
    pub fn transition<F>(&self, f: F) -> Option<SessionState>
    where
        F: FnOnce(SessionState, &mut RecordingStore) -> Option<SessionState>,
    {
        let mut control = self.shared.lock_control();
        let mut store = self.shared.lock_store();

        let previous = control.session;
        let next = f(previous, &mut store)?;
        control.session = next;
        store.persisting = next.is_persisting();
        if !next.is_acquiring() {
            self.shared.cycles.store(0, Ordering::Relaxed);
        }
        drop(store);
        drop(control);

        self.shared.state_changed.notify_all();
        info!("Session {} -> {}", previous, next);
        Some(previous)
    }

    /// Run `f` with exclusive access to the recording store
    pub fn with_store<R>(&self, f: impl FnOnce(&mut RecordingStore) -> R) -> R {
        f(&mut self.shared.lock_store())
    }

    /// Run `f` with the current state and the store, without changing state
    pub fn with_session<R>(&self, f: impl FnOnce(SessionState, &mut RecordingStore) -> R) -> R {
        let control = self.shared.lock_control();
        let mut store = self.shared.lock_store();
        f(control.session, &mut store)
    }

    /// Acquisition cycles since the last stop
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    /// Store access that can be moved to another thread
    pub fn store_handle(&self) -> StoreHandle {
        StoreHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether shutdown has not been requested yet
    pub fn is_running(&self) -> bool {
        self.shared.lock_control().running
    }

    /// Stop both loops and join the threads
    ///
    /// The recorder is always joined. The acquirer is joined only if it
    /// already left its loop: a thread blocked in the hardware wait cannot
    /// be interrupted and is detached instead.
    pub fn shutdown(&mut self) {
        {
            let mut control = self.shared.lock_control();
            if !control.running && self.recorder.is_none() && self.acquirer.is_none() {
                return;
            }
            control.running = false;
        }
        info!("Stopping acquisition and recording threads");
        self.shared.state_changed.notify_all();
        self.shared.exchange.close();

        if let Some(recorder) = self.recorder.take() {
            if recorder.join().is_err() {
                error!("Recorder thread panicked");
            }
        }
        if let Some(acquirer) = self.acquirer.take() {
            if acquirer.is_finished() {
                if acquirer.join().is_err() {
                    error!("Acquirer thread panicked");
                }
            } else {
                warn!("Acquirer is blocked on the link, detaching it");
            }
        }
        info!("Threads stopped");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_acquirer<L: LinkTransport>(shared: &Shared, mut link: L, mut slot: Frame) {
    debug!("Acquirer started");
    loop {
        if let Err(e) = link.await_ready() {
            warn!("Link stopped signalling frames: {}", e);
            break;
        }
        if !shared.wait_until_acquiring() {
            break;
        }
        if let Err(e) = link.transfer(slot.as_mut_bytes()) {
            error!("Frame transfer failed: {}", e);
            break;
        }

        let Some(cycle) = shared.next_cycle() else {
            debug!("Acquisition stopped during transfer, frame dropped");
            continue;
        };
        slot.set_sequence(cycle);
        trace!("Acquired frame {}", cycle);

        match shared.exchange.publish(slot) {
            Some(next) => slot = next,
            None => break,
        }
    }
    debug!("Acquirer stopped");
}

fn run_recorder<S: DataSink>(shared: &Shared, mut sink: S) {
    debug!("Recorder started");
    while let Some(frame) = shared.exchange.take() {
        {
            let mut store = shared.lock_store();
            if store.persisting {
                if let Err(e) = store.persist(&frame) {
                    error!("Frame {} not recorded: {}", frame.sequence(), e);
                }
            }
        }
        sink.forward(&frame);
        shared.exchange.release(frame);
    }
    debug!("Recorder stopped");
}
