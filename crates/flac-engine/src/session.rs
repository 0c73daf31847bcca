//! Playback session state machine.
//!
//! A [`PlaybackSession`] is a handle to a controller thread that owns every piece of mutable
//! session state: the frame source, the sink, the double buffer and the running pipeline.
//! Calls are sent as commands and answered over a reply channel. The controller also receives
//! sink events and worker reports, so all transitions happen on one thread.
//!
//! Listener callbacks run on a separate notifier thread and may call back into the session.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};

use crate::config::SessionConfig;
use crate::double_buffer::DoubleBuffer;
use crate::error::{PlayerError, Result};
use crate::gain::GainControl;
use crate::pipeline::{Pipeline, PipelineParams, PlaybackCounters, WorkerReport, lock_buffer};
use crate::sink::{AudioOutput, AudioSink, ChannelMask, Encoding, SinkEvent, SinkFormat};
use crate::source::{FrameSource, SourceOpener, StreamInfo, ms_to_samples, samples_to_ms};
use crate::status::{BufferInfo, SessionStatus};

/// Where the session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    /// No source.
    Idle,
    /// Source loaded, workers not running.
    Ready,
    /// Decode and feed workers running; audio may not be audible yet.
    Decoding,
    Paused,
}

type Reply<T> = Sender<Result<T>>;

enum Command {
    SetSource(PathBuf, Reply<()>),
    Play(Reply<()>),
    Pause(Reply<()>),
    Stop(Reply<()>),
    SeekTo(u64, Reply<()>),
    Reset(Reply<()>),
    SetVolume(f32),
    SetDucking(bool),
    SetDuckingFactor(f32),
    Status(Sender<SessionStatus>),
    Release,
}

enum Notification {
    Completed,
    Error(PlayerError),
}

type CompletionListener = Box<dyn FnMut() + Send>;
type ErrorListener = Box<dyn FnMut(&PlayerError) + Send>;

#[derive(Default)]
struct Listeners {
    completion: Mutex<Option<CompletionListener>>,
    error: Mutex<Option<ErrorListener>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Listeners {
    // Callbacks are taken out of their slot while running so they can replace themselves.
    fn fire_completion(&self) {
        let taken = lock(&self.completion).take();
        if let Some(mut callback) = taken {
            callback();
            let mut slot = lock(&self.completion);
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }

    fn fire_error(&self, error: &PlayerError) {
        let taken = lock(&self.error).take();
        if let Some(mut callback) = taken {
            callback(error);
            let mut slot = lock(&self.error);
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }
}

/// Handle to a streaming playback session.
///
/// Dropping the handle stops playback and releases the source and sink.
pub struct PlaybackSession {
    commands: Sender<Command>,
    listeners: Arc<Listeners>,
    controller: Option<JoinHandle<()>>,
    notifier: Option<JoinHandle<()>>,
    notifier_id: ThreadId,
}

impl PlaybackSession {
    /// Start a session reading through `opener` and playing through `output`.
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        output: Arc<dyn AudioOutput>,
        config: SessionConfig,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = unbounded();
        let (note_tx, note_rx) = unbounded::<Notification>();
        let listeners = Arc::new(Listeners::default());

        let notifier_listeners = listeners.clone();
        let notifier = thread::Builder::new()
            .name("flac-notify".into())
            .spawn(move || {
                for note in note_rx {
                    match note {
                        Notification::Completed => notifier_listeners.fire_completion(),
                        Notification::Error(error) => notifier_listeners.fire_error(&error),
                    }
                }
            })
            .map_err(|source| PlayerError::Spawn {
                name: "flac-notify",
                source,
            })?;
        let notifier_id = notifier.thread().id();

        let controller = Controller::new(opener, output, config, note_tx);
        let controller = thread::Builder::new()
            .name("flac-session".into())
            .spawn(move || controller.run(cmd_rx))
            .map_err(|source| PlayerError::Spawn {
                name: "flac-session",
                source,
            })?;

        Ok(Self {
            commands: cmd_tx,
            listeners,
            controller: Some(controller),
            notifier: Some(notifier),
            notifier_id,
        })
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = bounded(1);
        self.commands
            .send(make(tx))
            .map_err(|_| PlayerError::Released)?;
        rx.recv().map_err(|_| PlayerError::Released)?
    }

    fn send(&self, command: Command) {
        let _ = self.commands.send(command);
    }

    /// Open `path`, read its stream header and configure a sink for it.
    ///
    /// Any current playback is stopped first. On failure the session is left `Idle`.
    pub fn set_source(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        self.request(|reply| Command::SetSource(path, reply))
    }

    /// Start or resume playback from the current position.
    pub fn play(&self) -> Result<()> {
        self.request(Command::Play)
    }

    /// Pause playback, keeping the position.
    pub fn pause(&self) -> Result<()> {
        self.request(Command::Pause)
    }

    /// Stop playback and rewind to the start.
    pub fn stop(&self) -> Result<()> {
        self.request(Command::Stop)
    }

    /// Move to `position_ms`, clamped to the stream length.
    pub fn seek_to(&self, position_ms: u64) -> Result<()> {
        self.request(|reply| Command::SeekTo(position_ms, reply))
    }

    /// Stop playback and drop the source and sink.
    pub fn reset(&self) -> Result<()> {
        self.request(Command::Reset)
    }

    /// Replay-gain volume in `0.0..=1.0`; `NaN` disables replay gain.
    pub fn set_volume(&self, gain: f32) {
        self.send(Command::SetVolume(gain));
    }

    pub fn set_ducking(&self, ducking: bool) {
        self.send(Command::SetDucking(ducking));
    }

    /// Volume factor while ducking; `NaN` disables ducking.
    pub fn set_ducking_factor(&self, factor: f32) {
        self.send(Command::SetDuckingFactor(factor));
    }

    pub fn status(&self) -> Result<SessionStatus> {
        let (tx, rx) = bounded(1);
        self.commands
            .send(Command::Status(tx))
            .map_err(|_| PlayerError::Released)?;
        rx.recv().map_err(|_| PlayerError::Released)
    }

    fn snapshot(&self) -> SessionStatus {
        self.status().unwrap_or_default()
    }

    pub fn state(&self) -> PlaybackState {
        self.snapshot().state
    }

    /// Playback position in milliseconds.
    pub fn current_position(&self) -> u64 {
        self.snapshot().position_ms
    }

    /// Stream length in milliseconds; `0` when unknown.
    pub fn duration(&self) -> u64 {
        self.snapshot().duration_ms
    }

    pub fn bits_per_sample(&self) -> &'static str {
        self.snapshot().bits_per_sample
    }

    pub fn playback_bits_per_sample(&self) -> &'static str {
        self.snapshot().playback_bits_per_sample
    }

    pub fn sample_rate(&self) -> u32 {
        self.snapshot().sample_rate
    }

    pub fn playback_rate(&self) -> u32 {
        self.snapshot().playback_rate
    }

    pub fn data_source(&self) -> Option<PathBuf> {
        self.snapshot().data_source
    }

    /// Human-readable buffer health, e.g. `Buffered ahead: 850ms, underruns: 0`.
    pub fn buffer_info(&self) -> String {
        self.snapshot().buffer.to_string()
    }

    pub fn is_playing(&self) -> bool {
        self.snapshot().is_playing
    }

    /// Called once each time playback reaches the end of the stream.
    pub fn set_on_completion_listener(&self, listener: impl FnMut() + Send + 'static) {
        *lock(&self.listeners.completion) = Some(Box::new(listener));
    }

    /// Called once for each error that halted playback.
    pub fn set_on_error_listener(&self, listener: impl FnMut(&PlayerError) + Send + 'static) {
        *lock(&self.listeners.error) = Some(Box::new(listener));
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.send(Command::Release);
        if thread::current().id() == self.notifier_id {
            // Dropped from inside a listener; both threads wind down without being joined.
            return;
        }
        if let Some(controller) = self.controller.take() {
            let _ = controller.join();
        }
        if let Some(notifier) = self.notifier.take() {
            let _ = notifier.join();
        }
    }
}

/// The stream currently set on the session.
struct Loaded {
    path: PathBuf,
    info: StreamInfo,
    sink: Arc<dyn AudioSink>,
    /// `None` while a run owns it, or after it was lost to a failed run.
    source: Option<Box<dyn FrameSource>>,
}

struct Controller {
    opener: Arc<dyn SourceOpener>,
    output: Arc<dyn AudioOutput>,
    config: SessionConfig,
    state: PlaybackState,
    loaded: Option<Loaded>,
    buffer: Arc<Mutex<DoubleBuffer>>,
    counters: Arc<PlaybackCounters>,
    pipeline: Option<Pipeline>,
    run_id: u64,
    /// Last known head while not decoding, in samples.
    playback_head_position: u64,
    /// End marker from the stream header.
    end_marker: Option<u64>,
    /// Marker currently armed on the sink.
    completion_at: Option<u64>,
    gain: GainControl,
    sink_tx: Sender<SinkEvent>,
    sink_rx: Receiver<SinkEvent>,
    report_tx: Sender<WorkerReport>,
    report_rx: Receiver<WorkerReport>,
    notify: Sender<Notification>,
}

impl Controller {
    fn new(
        opener: Arc<dyn SourceOpener>,
        output: Arc<dyn AudioOutput>,
        config: SessionConfig,
        notify: Sender<Notification>,
    ) -> Self {
        let (sink_tx, sink_rx) = unbounded();
        let (report_tx, report_rx) = unbounded();
        let buffer = Arc::new(Mutex::new(DoubleBuffer::new(config.buffer_capacity)));
        Self {
            opener,
            output,
            config,
            state: PlaybackState::Idle,
            loaded: None,
            buffer,
            counters: Arc::new(PlaybackCounters::default()),
            pipeline: None,
            run_id: 0,
            playback_head_position: 0,
            end_marker: None,
            completion_at: None,
            gain: GainControl::default(),
            sink_tx,
            sink_rx,
            report_tx,
            report_rx,
            notify,
        }
    }

    fn run(mut self, commands: Receiver<Command>) {
        let sink_rx = self.sink_rx.clone();
        let report_rx = self.report_rx.clone();
        loop {
            select! {
                recv(commands) -> cmd => match cmd {
                    Ok(Command::Release) | Err(_) => break,
                    Ok(cmd) => self.handle(cmd),
                },
                recv(sink_rx) -> event => {
                    if let Ok(event) = event {
                        self.on_sink_event(event);
                    }
                }
                recv(report_rx) -> report => {
                    if let Ok(report) = report {
                        self.on_report(report);
                    }
                }
            }
        }
        self.unload();
        tracing::debug!("session released");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::SetSource(path, reply) => {
                let _ = reply.send(self.set_source(path));
            }
            Command::Play(reply) => {
                let _ = reply.send(self.play());
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.pause());
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            Command::SeekTo(ms, reply) => {
                let _ = reply.send(self.seek_to(ms));
            }
            Command::Reset(reply) => {
                self.unload();
                let _ = reply.send(Ok(()));
            }
            Command::SetVolume(gain) => {
                self.gain.set_replay_gain(gain);
                self.apply_volume();
            }
            Command::SetDucking(ducking) => {
                self.gain.set_ducking(ducking);
                self.apply_volume();
            }
            Command::SetDuckingFactor(factor) => {
                self.gain.set_ducking_factor(factor);
                self.apply_volume();
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Release => {}
        }
    }

    fn set_source(&mut self, path: PathBuf) -> Result<()> {
        self.unload();

        let source = self.opener.open(&path)?;
        let info = source.stream_info();
        let channels = ChannelMask::from_count(info.channels).ok_or_else(|| {
            PlayerError::UnsupportedFormat(format!("{} channels", info.channels))
        })?;
        let encoding = Encoding::for_bits(info.bits_per_sample);
        let min = self
            .output
            .min_buffer_size(info.sample_rate, channels, encoding);
        let format = SinkFormat {
            sample_rate: info.sample_rate,
            channels,
            encoding,
            buffer_size_bytes: min * self.config.sink_buffer_multiplier.max(1),
        };
        let sink = self.output.configure(format, self.sink_tx.clone())?;
        sink.set_volume(self.gain.effective());

        tracing::info!(
            path = ?path,
            sample_rate = info.sample_rate,
            channels = info.channels,
            bits = info.bits_per_sample,
            encoding = encoding.label(),
            duration_ms = info.duration_ms(),
            "source set"
        );

        self.end_marker = (info.total_samples > 0).then_some(info.total_samples);
        self.loaded = Some(Loaded {
            path,
            info,
            sink,
            source: Some(source),
        });
        self.rewind();
        self.state = PlaybackState::Ready;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Idle => Err(PlayerError::InvalidState("no source set")),
            PlaybackState::Decoding => Ok(()),
            PlaybackState::Ready | PlaybackState::Paused => {
                let info = self.info()?;
                if !info.bit_depth().is_playable() {
                    return Err(PlayerError::UnsupportedFormat(format!(
                        "{} bits per sample",
                        info.bits_per_sample
                    )));
                }
                self.start_pipeline(self.playback_head_position)?;
                tracing::info!(
                    position_ms = samples_to_ms(self.playback_head_position, info.sample_rate),
                    "playback started"
                );
                Ok(())
            }
        }
    }

    fn pause(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Idle => Err(PlayerError::InvalidState("no source set")),
            PlaybackState::Ready | PlaybackState::Paused => Ok(()),
            PlaybackState::Decoding => {
                let sink = self.sink()?;
                sink.pause();
                let head = sink.head_position();
                self.halt_pipeline();
                self.playback_head_position = head;
                self.counters.reposition(head);
                self.state = PlaybackState::Paused;
                tracing::info!(head, "playback paused");
                Ok(())
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.state == PlaybackState::Idle {
            return Ok(());
        }
        self.halt_pipeline();
        if let Some(loaded) = &self.loaded {
            loaded.sink.stop();
            loaded.sink.flush();
        }
        self.rewind();
        self.state = PlaybackState::Ready;
        tracing::info!("playback stopped");
        Ok(())
    }

    fn seek_to(&mut self, ms: u64) -> Result<()> {
        let info = self.info()?;
        let mut target = ms_to_samples(ms, info.sample_rate);
        if info.total_samples > 0 {
            target = target.min(info.total_samples);
        }

        match self.state {
            PlaybackState::Idle => Err(PlayerError::InvalidState("no source set")),
            PlaybackState::Decoding => {
                self.halt_pipeline();
                self.playback_head_position = target;
                self.state = PlaybackState::Paused;
                self.start_pipeline(target)?;
                tracing::info!(position_ms = ms, target, "seek restarted decoding");
                Ok(())
            }
            PlaybackState::Ready | PlaybackState::Paused => {
                self.playback_head_position = target;
                self.counters.reposition(target);
                self.sink()?.set_head_position(target);
                tracing::debug!(position_ms = ms, target, "seek");
                Ok(())
            }
        }
    }

    /// Stop playback and forget the source.
    fn unload(&mut self) {
        self.halt_pipeline();
        if let Some(loaded) = self.loaded.take() {
            loaded.sink.stop();
            loaded.sink.flush();
            tracing::debug!(path = ?loaded.path, "source released");
        }
        self.end_marker = None;
        self.rewind();
        self.state = PlaybackState::Idle;
    }

    fn info(&self) -> Result<StreamInfo> {
        self.loaded
            .as_ref()
            .map(|l| l.info)
            .ok_or(PlayerError::InvalidState("no source set"))
    }

    fn sink(&self) -> Result<Arc<dyn AudioSink>> {
        self.loaded
            .as_ref()
            .map(|l| l.sink.clone())
            .ok_or(PlayerError::InvalidState("no source set"))
    }

    /// Reset position bookkeeping to the start of the stream.
    fn rewind(&mut self) {
        self.playback_head_position = 0;
        self.counters.restart(0);
        lock_buffer(&self.buffer).reset();
        if let Some(loaded) = &self.loaded {
            loaded.sink.set_head_position(0);
        }
        self.arm_marker();
    }

    fn arm_marker(&mut self) {
        self.completion_at = self.end_marker;
        if let Some(loaded) = &self.loaded {
            loaded
                .sink
                .set_marker_position(self.end_marker.unwrap_or(u64::MAX));
        }
    }

    fn apply_volume(&self) {
        let gain = self.gain.effective();
        tracing::debug!(gain, ducking = self.gain.is_ducking(), "volume");
        if let Some(loaded) = &self.loaded {
            loaded.sink.set_volume(gain);
        }
    }

    /// Position the source at `start` and launch a decode/feed run.
    fn start_pipeline(&mut self, start: u64) -> Result<()> {
        let loaded = self
            .loaded
            .as_mut()
            .ok_or(PlayerError::InvalidState("no source set"))?;
        let mut source = match loaded.source.take() {
            Some(source) => source,
            None => {
                tracing::debug!(path = ?loaded.path, "reopening source");
                self.opener.open(&loaded.path)?
            }
        };
        let actual = match source.seek(start) {
            Ok(actual) => actual,
            Err(e) => {
                loaded.source = Some(source);
                return Err(e);
            }
        };

        let sink = loaded.sink.clone();
        sink.flush();
        sink.set_head_position(actual);
        self.playback_head_position = actual;
        self.counters.restart(actual);
        lock_buffer(&self.buffer).reset();
        self.arm_marker();

        self.run_id += 1;
        let pipeline = Pipeline::start(PipelineParams {
            run_id: self.run_id,
            source,
            buffer: self.buffer.clone(),
            sink,
            counters: self.counters.clone(),
            wait_floor: self.config.feed_wait_floor,
            reports: self.report_tx.clone(),
        })?;
        self.pipeline = Some(pipeline);
        self.state = PlaybackState::Decoding;
        Ok(())
    }

    /// Stop and join the running pipeline, taking the source back.
    fn halt_pipeline(&mut self) {
        let Some(pipeline) = self.pipeline.take() else {
            return;
        };
        match pipeline.join(self.config.join_timeout) {
            Some(source) => {
                if let Some(loaded) = &mut self.loaded {
                    loaded.source = Some(source);
                }
            }
            None => {
                // Detached workers may still touch the old buffer and counters.
                self.buffer = Arc::new(Mutex::new(DoubleBuffer::new(self.config.buffer_capacity)));
                self.counters = Arc::new(PlaybackCounters::default());
                tracing::warn!("source lost with detached workers; it will be reopened");
            }
        }
    }

    fn on_sink_event(&mut self, event: SinkEvent) {
        match event {
            SinkEvent::MarkerReached => self.check_completion(),
        }
    }

    fn on_report(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::Drained {
                run_id,
                end_position,
            } => {
                if run_id != self.run_id || self.state != PlaybackState::Decoding {
                    return;
                }
                let at = self
                    .completion_at
                    .map_or(end_position, |m| m.min(end_position));
                self.completion_at = Some(at);
                if let Some(loaded) = &self.loaded {
                    loaded.sink.set_marker_position(at);
                }
                self.check_completion();
            }
            WorkerReport::Failed { run_id, error } => {
                if run_id != self.run_id || self.state != PlaybackState::Decoding {
                    tracing::debug!(run_id, "ignoring report from a finished run");
                    return;
                }
                self.fail(error);
            }
        }
    }

    fn check_completion(&mut self) {
        if self.state != PlaybackState::Decoding {
            return;
        }
        let (Some(loaded), Some(at)) = (&self.loaded, self.completion_at) else {
            return;
        };
        if loaded.sink.head_position() >= at {
            tracing::info!(position = at, "playback completed");
            let _ = self.stop();
            let _ = self.notify.send(Notification::Completed);
        }
    }

    fn fail(&mut self, error: PlayerError) {
        tracing::error!(kind = ?error.kind(), "playback halted: {error}");
        let _ = self.stop();
        if let Some(loaded) = &mut self.loaded {
            // The decoder state after a failed read is unknown; start from a fresh open.
            loaded.source = None;
        }
        let _ = self.notify.send(Notification::Error(error));
    }

    fn status(&self) -> SessionStatus {
        let mut status = SessionStatus {
            state: self.state,
            volume: self.gain.effective(),
            ..SessionStatus::default()
        };
        let Some(loaded) = &self.loaded else {
            return status;
        };

        let info = loaded.info;
        let format = loaded.sink.format();
        let head = if self.state == PlaybackState::Decoding {
            loaded.sink.head_position()
        } else {
            self.playback_head_position
        };

        status.data_source = Some(loaded.path.clone());
        status.position_ms = samples_to_ms(head, info.sample_rate);
        status.duration_ms = info.duration_ms();
        status.sample_rate = info.sample_rate;
        status.playback_rate = format.sample_rate;
        status.channels = info.channels;
        status.bits_per_sample = info.bit_depth().label();
        status.playback_bits_per_sample = format.encoding.label();
        status.is_playing = loaded.sink.is_playing();
        status.buffer = BufferInfo {
            buffered_ahead_ms: if self.state == PlaybackState::Decoding {
                self.counters.buffered_ahead_ms(head, info.sample_rate)
            } else {
                0
            },
            underruns: self.counters.underruns(),
        };
        status
    }
}
