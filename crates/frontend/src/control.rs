//! Session Control
//!
//! Operator requests that touch the controller (start, stop, start of a
//! recording from idle, parameter changes) are serialized by the command
//! channel lock, so a precondition checked before talking to the controller
//! still holds when the state changes afterwards.

use crate::config::FrontendConfig;
use crate::{FrontendError, Transition};
use acquisition::{
    DataSink, LinkTransport, NullSink, Pipeline, RecordingStore, SessionState, UdpSink,
};
use controller_protocol::{Command, CommandChannel, Parameter, TimingLock};
use recording_arena::{Arena, ArenaStats};
use session_store::{SavedRecording, SessionWriter, TagEntry};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const NO_RECORDING: &str = "no recording in progress";

/// Acquisition front end
pub struct Frontend {
    pipeline: Pipeline,
    commands: Mutex<CommandChannel>,
    writer: SessionWriter,
    default_name: String,
}

impl Frontend {
    /// Create the data folder, allocate the arena and start the pipeline
    ///
    /// Any failure here is fatal: no thread is left running.
    pub fn new<L, S>(
        config: &FrontendConfig,
        link: L,
        sink: S,
        commands: CommandChannel,
    ) -> Result<Self, FrontendError>
    where
        L: LinkTransport,
        S: DataSink,
    {
        config.validate()?;
        let writer = SessionWriter::new(&config.data_folder)?;
        let arena = Arena::allocate(config.arena_capacity, config.frame_size)?;
        let store = RecordingStore::new(
            arena,
            config.timer_period(),
            config.default_recording_name.as_str(),
        );
        let pipeline = Pipeline::spawn(link, sink, store)?;

        info!(
            "Front end ready: {} byte frames, {} byte arena, saving to {}",
            config.frame_size,
            config.arena_capacity,
            writer.data_folder().display()
        );

        Ok(Self {
            pipeline,
            commands: Mutex::new(commands),
            writer,
            default_name: config.default_recording_name.clone(),
        })
    }

    /// Open the configured serial command link and data sink
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open<L: LinkTransport>(config: &FrontendConfig, link: L) -> Result<Self, FrontendError> {
        let commands = CommandChannel::open_serial(
            &config.command.device,
            config.command.baud_rate,
            config.ack_timeout(),
        )?;
        let sink: Box<dyn DataSink> = match config.sink.address {
            Some(address) => Box::new(UdpSink::bind(address).map_err(FrontendError::Sink)?),
            None => {
                warn!("No sink address configured, frames are not forwarded");
                Box::new(NullSink::default())
            }
        };
        Self::new(config, link, sink, commands)
    }

    /// Start acquiring and engage the controller timing lock
    pub async fn start(&self) -> Transition {
        let mut commands = self.commands.lock().await;
        if self.pipeline.session().is_acquiring() {
            return rejected("Start", "acquisition already running");
        }

        send_timing_lock(&mut commands, TimingLock::Engaged).await;
        match self.pipeline.transition(|session, _| session.start()) {
            Some(_) => Transition::Applied(()),
            None => rejected("Start", "acquisition already running"),
        }
    }

    /// Stop acquiring and release the timing lock
    ///
    /// A recording in progress is saved and ended. The write runs on the
    /// blocking pool after persistence is switched off. If that save fails
    /// the session still stops, the arena keeps its data and the error is
    /// returned so the save can be retried.
    pub async fn stop(&self) -> Result<Transition<Option<SavedRecording>>, FrontendError> {
        let mut commands = self.commands.lock().await;
        if !self.pipeline.session().is_acquiring() {
            return Ok(rejected("Stop", "acquisition not running"));
        }

        send_timing_lock(&mut commands, TimingLock::Released).await;

        let previous = match self.pipeline.transition(|session, _| session.stop()) {
            Some(previous) => previous,
            None => return Ok(rejected("Stop", "acquisition not running")),
        };
        if !previous.is_recording() {
            return Ok(Transition::Applied(None));
        }

        // Still holding the command lock: no new recording can rewind the
        // arena before it is written out
        let store = self.pipeline.store_handle();
        let writer = self.writer.clone();
        let saved = tokio::task::spawn_blocking(move || store.with_store(|s| s.save(&writer)))
            .await??;
        drop(commands);

        Ok(Transition::Applied(Some(saved)))
    }

    /// Begin a new recording session, starting acquisition if needed
    ///
    /// The tag ledger, the arena and the recorded time are reset.
    pub async fn start_recording(&self, name: Option<&str>) -> Transition {
        let mut commands = self.commands.lock().await;
        let session = self.pipeline.session();
        if session.is_recording() {
            return rejected("Start recording", "recording already in progress");
        }
        if !session.is_acquiring() {
            send_timing_lock(&mut commands, TimingLock::Engaged).await;
        }

        let name = self.recording_name(name);
        let applied = self.pipeline.transition(|session, store| {
            let next = session.start_recording()?;
            store.begin(&name);
            Some(next)
        });
        match applied {
            Some(_) => {
                info!("Recording '{}'", name);
                Transition::Applied(())
            }
            None => rejected("Start recording", "recording already in progress"),
        }
    }

    /// Suspend persistence; frames are still forwarded
    pub fn pause_recording(&self) -> Transition {
        match self.pipeline.transition(|session, _| session.pause()) {
            Some(_) => Transition::Applied(()),
            None if self.pipeline.session().is_paused() => {
                rejected("Pause", "recording already paused")
            }
            None => rejected("Pause", NO_RECORDING),
        }
    }

    /// Resume persistence after a pause
    pub fn resume_recording(&self) -> Transition {
        match self.pipeline.transition(|session, _| session.resume()) {
            Some(_) => Transition::Applied(()),
            None if self.pipeline.session().is_recording() => {
                rejected("Resume", "recording not paused")
            }
            None => rejected("Resume", NO_RECORDING),
        }
    }

    /// End the recording session and save it; acquisition keeps running
    pub fn stop_recording(&self) -> Result<Transition<SavedRecording>, FrontendError> {
        let mut saved = None;
        let previous = self.pipeline.transition(|session, store| {
            let next = session.stop_recording()?;
            saved = Some(store.save(&self.writer));
            Some(next)
        });
        match (previous, saved) {
            (Some(_), Some(saved)) => Ok(Transition::Applied(saved?)),
            _ => Ok(rejected("Stop recording", NO_RECORDING)),
        }
    }

    /// Write the recorded bytes and the tags, then rewind the arena
    ///
    /// Allowed in any state. On failure the arena is kept for a retry.
    pub fn save(&self) -> Result<SavedRecording, FrontendError> {
        Ok(self.pipeline.with_store(|store| store.save(&self.writer))?)
    }

    /// Annotate the current recording
    pub fn tag(&self, label: &str) -> Transition<TagEntry> {
        let entry = self.pipeline.with_session(|session, store| {
            session.is_recording().then(|| store.tag(label))
        });
        match entry {
            Some(entry) => {
                info!("Tagged recording at {:.6}s: {}", entry.elapsed_seconds, entry.label);
                Transition::Applied(entry)
            }
            None => rejected("Tag", NO_RECORDING),
        }
    }

    /// Send a parameter to the controller
    ///
    /// On acknowledgement the change is recorded in the tag ledger and, for
    /// the timer period, the time base follows. A rejected value or a
    /// missing acknowledgement leaves everything unchanged.
    pub async fn set_parameter(
        &self,
        parameter: Parameter,
        value: f64,
        channel: u8,
    ) -> Result<TagEntry, FrontendError> {
        let command = Command::set_parameter(parameter, value, channel)?;

        let mut commands = self.commands.lock().await;
        commands.send(&command).await?;
        drop(commands);

        info!("Controller {} set to {:.2} (channel {})", parameter.name(), value, channel);

        let label = parameter.audit_label(value, channel);
        let entry = self.pipeline.with_store(|store| {
            if parameter == Parameter::TimerPeriod {
                store.set_timer_period(Duration::from_secs_f64(value / 1e6));
            }
            store.tag(&label)
        });
        Ok(entry)
    }

    /// Current session state
    pub fn session(&self) -> SessionState {
        self.pipeline.session()
    }

    /// Acquisition cycles since the last stop
    pub fn cycles(&self) -> u64 {
        self.pipeline.cycles()
    }

    /// Arena cursor and counters
    pub fn arena_stats(&self) -> ArenaStats {
        self.pipeline.with_store(|store| store.arena().stats())
    }

    /// Snapshot of the tag ledger
    pub fn tags(&self) -> Vec<TagEntry> {
        self.pipeline
            .with_store(|store| store.ledger().entries().to_vec())
    }

    /// Folder receiving saved recordings
    pub fn data_folder(&self) -> &Path {
        self.writer.data_folder()
    }

    /// Stop the pipeline threads
    pub fn shutdown(mut self) {
        self.pipeline.shutdown();
    }

    fn recording_name(&self, name: Option<&str>) -> String {
        let name = name.map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return self.default_name.clone();
        }
        name.chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect()
    }
}

fn rejected<T>(operation: &str, reason: &'static str) -> Transition<T> {
    warn!("{} ignored: {}", operation, reason);
    Transition::Unchanged(reason)
}

/// Send the timing lock; a missing acknowledgement is logged only
async fn send_timing_lock(commands: &mut CommandChannel, lock: TimingLock) {
    if let Err(e) = commands.send(&Command::timing_lock(lock)).await {
        warn!("Timing lock {:?} not confirmed: {}", lock, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrontendError;
    use acquisition::{ChannelSink, Frame, ScriptedFeed, ScriptedLink};
    use controller_protocol::ProtocolError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    const FRAME: usize = 32;

    struct Bench {
        frontend: Frontend,
        feed: ScriptedFeed,
        frames: mpsc::Receiver<Frame>,
        sent: mpsc::UnboundedReceiver<Vec<u8>>,
        _dir: tempfile::TempDir,
    }

    /// Controller double: records every command and echoes its identifier
    /// when `acknowledge` is set
    fn controller(acknowledge: bool) -> (CommandChannel, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (host, device) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(device);
            let mut buf = [0u8; 16];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let _ = tx.send(buf[..n].to_vec());
                if acknowledge && writer.write_all(&buf[..1]).await.is_err() {
                    break;
                }
            }
        });
        (CommandChannel::new(host, Duration::from_millis(50)), rx)
    }

    fn bench(capacity: usize, acknowledge: bool) -> Bench {
        let dir = tempfile::tempdir().unwrap();
        let config = FrontendConfig {
            data_folder: dir.path().join("data"),
            frame_size: FRAME,
            arena_capacity: capacity,
            ..FrontendConfig::default()
        };
        let (link, feed) = ScriptedLink::new();
        let (sink, frames) = ChannelSink::new(64);
        let (commands, sent) = controller(acknowledge);
        let frontend = Frontend::new(&config, link, sink, commands).unwrap();
        Bench {
            frontend,
            feed,
            frames,
            sent,
            _dir: dir,
        }
    }

    impl Bench {
        async fn acquire(&mut self, fill: u8) -> Frame {
            self.feed.push(vec![fill; FRAME]);
            tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
                .await
                .expect("frame not forwarded")
                .unwrap()
        }

        fn finish(self) {
            drop(self.feed);
            self.frontend.shutdown();
        }
    }

    #[tokio::test]
    async fn test_start_stop_drive_timing_lock() {
        let mut bench = bench(1024, true);

        assert!(bench.frontend.start().await.is_applied());
        assert_eq!(bench.frontend.session(), SessionState::Acquiring);
        assert_eq!(bench.sent.recv().await.unwrap(), vec![b'P', 0]);
        assert!(!bench.frontend.start().await.is_applied());

        bench.acquire(1).await;
        assert_eq!(bench.frontend.cycles(), 1);

        let stopped = bench.frontend.stop().await.unwrap();
        assert_eq!(stopped, Transition::Applied(None));
        assert_eq!(bench.sent.recv().await.unwrap(), vec![b'P', 1]);
        assert_eq!(bench.frontend.session(), SessionState::Idle);
        assert_eq!(bench.frontend.cycles(), 0);

        assert_eq!(
            bench.frontend.stop().await.unwrap(),
            Transition::Unchanged("acquisition not running")
        );
        bench.finish();
    }

    #[tokio::test]
    async fn test_unacknowledged_timing_lock_still_starts() {
        let bench = bench(1024, false);
        assert!(bench.frontend.start().await.is_applied());
        assert!(bench.frontend.session().is_acquiring());
        bench.finish();
    }

    #[tokio::test]
    async fn test_stop_recording_saves_recorded_frames() {
        let mut bench = bench(1024, true);

        assert!(bench.frontend.start_recording(Some("run1")).await.is_applied());
        assert_eq!(bench.frontend.session(), SessionState::Recording);
        for i in 0..3 {
            bench.acquire(i).await;
        }
        bench.frontend.tag("first").applied().unwrap();
        bench.frontend.tag("second").applied().unwrap();

        let saved = bench.frontend.stop_recording().unwrap().applied().unwrap();
        assert_eq!(bench.frontend.session(), SessionState::Acquiring);

        let data = std::fs::read(&saved.data_path).unwrap();
        assert_eq!(data.len(), 3 * FRAME);
        let file_name = saved.data_path.file_name().unwrap().to_string_lossy();
        assert!(file_name.starts_with("run1_"));

        let tags = std::fs::read_to_string(&saved.tags_path).unwrap();
        let lines: Vec<&str> = tags.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "time,tag");
        assert!(lines[1].ends_with(",first"));
        assert!(lines[2].ends_with(",second"));

        assert_eq!(bench.frontend.arena_stats().offset, 0);
        bench.finish();
    }

    #[tokio::test]
    async fn test_restart_recording_starts_fresh() {
        let mut bench = bench(1024, true);

        assert!(bench.frontend.start_recording(Some("run1")).await.is_applied());
        bench.acquire(1).await;
        bench.frontend.tag("old").applied().unwrap();
        bench.frontend.stop_recording().unwrap().applied().unwrap();

        assert!(bench.frontend.start_recording(Some("run1")).await.is_applied());
        assert_eq!(bench.frontend.arena_stats().offset, 0);
        assert!(bench.frontend.tags().is_empty());

        let entry = bench.frontend.tag("new").applied().unwrap();
        assert_eq!(entry.elapsed_seconds, 0.0);
        bench.finish();
    }

    #[tokio::test]
    async fn test_pause_keeps_forwarding() {
        let mut bench = bench(1024, true);

        assert!(bench.frontend.start_recording(None).await.is_applied());
        bench.acquire(1).await;
        assert!(bench.frontend.pause_recording().is_applied());
        assert_eq!(
            bench.frontend.pause_recording(),
            Transition::Unchanged("recording already paused")
        );

        let forwarded = bench.acquire(2).await;
        assert_eq!(forwarded.as_bytes(), &[2u8; FRAME][..]);
        assert_eq!(bench.frontend.arena_stats().offset, FRAME);

        assert!(bench.frontend.resume_recording().is_applied());
        bench.acquire(3).await;
        assert_eq!(bench.frontend.arena_stats().offset, 2 * FRAME);
        bench.finish();
    }

    #[tokio::test]
    async fn test_operator_misuse_is_unchanged() {
        let bench = bench(1024, true);

        assert_eq!(bench.frontend.pause_recording(), Transition::Unchanged(NO_RECORDING));
        assert_eq!(bench.frontend.resume_recording(), Transition::Unchanged(NO_RECORDING));
        assert_eq!(bench.frontend.tag("nothing"), Transition::Unchanged(NO_RECORDING));
        assert_eq!(
            bench.frontend.stop_recording().unwrap(),
            Transition::Unchanged(NO_RECORDING)
        );
        assert_eq!(bench.frontend.session(), SessionState::Idle);

        assert!(bench.frontend.start_recording(None).await.is_applied());
        assert_eq!(
            bench.frontend.start_recording(Some("again")).await,
            Transition::Unchanged("recording already in progress")
        );
        assert_eq!(
            bench.frontend.resume_recording(),
            Transition::Unchanged("recording not paused")
        );
        bench.finish();
    }

    #[tokio::test]
    async fn test_stop_while_recording_saves() {
        let mut bench = bench(1024, true);

        assert!(bench.frontend.start_recording(Some("stopped")).await.is_applied());
        bench.acquire(7).await;
        bench.acquire(8).await;

        let saved = bench.frontend.stop().await.unwrap().applied().unwrap().unwrap();
        assert_eq!(std::fs::read(&saved.data_path).unwrap().len(), 2 * FRAME);
        assert_eq!(bench.frontend.session(), SessionState::Idle);
        bench.finish();
    }

    #[tokio::test]
    async fn test_failed_save_on_stop_keeps_arena() {
        let mut bench = bench(1024, true);

        assert!(bench.frontend.start_recording(Some("kept")).await.is_applied());
        bench.acquire(1).await;
        bench.acquire(2).await;
        std::fs::remove_dir_all(bench.frontend.data_folder()).unwrap();

        let result = bench.frontend.stop().await;
        assert!(matches!(result, Err(FrontendError::Storage(_))));
        assert_eq!(bench.frontend.session(), SessionState::Idle);
        assert_eq!(bench.frontend.arena_stats().offset, 2 * FRAME);

        std::fs::create_dir_all(bench.frontend.data_folder()).unwrap();
        let saved = bench.frontend.save().unwrap();
        assert_eq!(std::fs::read(&saved.data_path).unwrap().len(), 2 * FRAME);
        bench.finish();
    }

    #[tokio::test]
    async fn test_save_right_after_stop_recording_keeps_recording() {
        let mut bench = bench(1024, true);

        assert!(bench.frontend.start_recording(Some("run1")).await.is_applied());
        for i in 0..3 {
            bench.acquire(i).await;
        }
        let recorded = bench.frontend.stop_recording().unwrap().applied().unwrap();
        let empty = bench.frontend.save().unwrap();

        assert_ne!(recorded.data_path, empty.data_path);
        assert_ne!(recorded.tags_path, empty.tags_path);
        assert_eq!(std::fs::read(&recorded.data_path).unwrap().len(), 3 * FRAME);
        assert!(std::fs::read(&empty.data_path).unwrap().is_empty());
        bench.finish();
    }

    #[tokio::test]
    async fn test_unacknowledged_parameter_is_not_tagged() {
        let bench = bench(1024, false);
        assert!(bench.frontend.start_recording(None).await.is_applied());

        let result = bench
            .frontend
            .set_parameter(Parameter::GateVoltage, 1.50, 1)
            .await;
        assert!(matches!(
            result,
            Err(FrontendError::Protocol(ProtocolError::Timeout { id: 'A', .. }))
        ));
        assert!(bench.frontend.tags().is_empty());
        bench.finish();
    }

    #[tokio::test]
    async fn test_acknowledged_parameter_is_tagged() {
        let mut bench = bench(1024, true);
        assert!(bench.frontend.start_recording(None).await.is_applied());
        assert_eq!(bench.sent.recv().await.unwrap(), vec![b'P', 0]);

        let entry = bench
            .frontend
            .set_parameter(Parameter::GateVoltage, 1.5, 1)
            .await
            .unwrap();
        assert_eq!(entry.label, "$V_{g_{1}}=-1.50\\text{ V}$");
        assert_eq!(bench.sent.recv().await.unwrap(), vec![b'A', 0x00, 0x96]);
        assert_eq!(bench.frontend.tags(), vec![entry]);
        bench.finish();
    }

    #[tokio::test]
    async fn test_timer_period_moves_time_base() {
        let mut bench = bench(1024, true);
        assert!(bench.frontend.start_recording(None).await.is_applied());

        bench
            .frontend
            .set_parameter(Parameter::TimerPeriod, 100.0, 0)
            .await
            .unwrap();
        bench.acquire(1).await;

        // 32 byte frames hold 8 samples of 100us
        let entry = bench.frontend.tag("after").applied().unwrap();
        assert!((entry.elapsed_seconds - 8.0 * 100e-6).abs() < 1e-9);
        bench.finish();
    }

    #[tokio::test]
    async fn test_invalid_channel_is_rejected_before_sending() {
        let mut bench = bench(1024, true);
        let result = bench
            .frontend
            .set_parameter(Parameter::CurrentSetpoint, 3.0, 3)
            .await;
        assert!(matches!(
            result,
            Err(FrontendError::Protocol(ProtocolError::InvalidChannel(3)))
        ));
        assert!(bench.sent.try_recv().is_err());
        bench.finish();
    }

    #[tokio::test]
    async fn test_startup_fails_on_bad_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let config = FrontendConfig {
            data_folder: dir.path().to_path_buf(),
            frame_size: 32,
            arena_capacity: 16,
            ..FrontendConfig::default()
        };
        let (link, _feed) = ScriptedLink::new();
        let (commands, _sent) = controller(true);
        let result = Frontend::new(&config, link, NullSink::default(), commands);
        assert!(matches!(result, Err(FrontendError::InvalidConfig(_))));
    }

    #[test]
    fn test_recording_name_sanitized() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let bench = bench(1024, true);

        assert_eq!(bench.frontend.recording_name(None), "recording");
        assert_eq!(bench.frontend.recording_name(Some("  ")), "recording");
        assert_eq!(bench.frontend.recording_name(Some("a/b\\c")), "a_b_c");
        bench.finish();
    }
}
