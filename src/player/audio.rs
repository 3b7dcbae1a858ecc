// ==========================================
// RODIO AUDIO HANDLE
// ==========================================
// The process-wide audio output, built on rodio.
//
// Rodio gives us a `Sink`: a queue of decoded sources with play/pause,
// volume and speed controls. It doesn't know about positions, durations or
// "this track finished", so this module keeps that bookkeeping itself:
//
// position
//   - `base` seconds at the moment playback last (re)started
//   - plus wall time since then, scaled by the playback rate
//
// loading
//   - audio bytes are fetched on a background thread (local file or http)
//   - every load bumps a generation counter, so a slow download for an old
//     episode can never replace the current one
//
// events
//   - a ticker thread polls the sink every 250ms while something plays and
//     reports time updates, and the end of the track once the sink runs dry
//
// Seeking rebuilds the source: the sink is cleared and the decoder is
// appended again, skipped forward to the new position.

use rodio::{Decoder, OutputStream, Sink, Source};
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use super::handle::{AudioEvent, AudioHandle, AudioListener, PlayAttempt};
use crate::error::PlaybackError;

const TICK: Duration = Duration::from_millis(250);

type PlaySender = oneshot::Sender<Result<(), PlaybackError>>;

// ==========================================
// SHARED STATE
// ==========================================
// Everything the handle, the loader thread and the ticker thread agree on.
#[derive(Default)]
struct Shared {
    source: Option<String>,
    generation: u64,
    bytes: Option<Arc<[u8]>>,
    error: Option<PlaybackError>,
    duration: f64,
    base: f64,
    started_at: Option<Instant>,
    playing: bool,
    // A decoder for the current bytes sits in the sink
    appended: bool,
    ended: bool,
    rate: f64,
    listener: Option<AudioListener>,
    pending_play: Option<PlaySender>,
}

impl Shared {
    fn position(&self) -> f64 {
        let elapsed = self
            .started_at
            .map(|at| at.elapsed().as_secs_f64() * self.rate)
            .unwrap_or(0.0);
        let position = self.base + elapsed;
        if self.duration > 0.0 {
            position.min(self.duration)
        } else {
            position
        }
    }

    // Freezes the clock at the current position
    fn freeze(&mut self) {
        self.base = self.position();
        self.started_at = None;
    }

    fn notify(&self, event: AudioEvent) {
        if let Some(listener) = &self.listener {
            listener.notify(event);
        }
    }

    fn resolve_play(&mut self, result: Result<(), PlaybackError>) {
        if let Some(tx) = self.pending_play.take() {
            let _ = tx.send(result);
        }
    }
}

struct Inner {
    // None when no output device could be opened
    sink: Option<Sink>,
    shared: Mutex<Shared>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Puts a fresh decoder in the sink, starting at `shared.base`
    fn append_from_base(&self, shared: &mut Shared) -> Result<(), PlaybackError> {
        let (Some(sink), Some(bytes)) = (&self.sink, &shared.bytes) else {
            return Err(PlaybackError::NoSource);
        };
        let decoder = Decoder::new(Cursor::new(Arc::clone(bytes)))
            .map_err(|e| PlaybackError::Decode(e.to_string()))?;
        sink.stop();
        sink.append(decoder.skip_duration(Duration::from_secs_f64(shared.base.max(0.0))));
        shared.appended = true;
        shared.ended = false;
        Ok(())
    }

    fn start(&self, shared: &mut Shared) -> Result<(), PlaybackError> {
        if !shared.appended || shared.ended {
            if shared.ended {
                shared.base = 0.0;
            }
            self.append_from_base(shared)?;
        }
        if let Some(sink) = &self.sink {
            sink.play();
        }
        shared.started_at = Some(Instant::now());
        Ok(())
    }
}

// ==========================================
// RODIO HANDLE
// ==========================================
pub struct RodioHandle {
    inner: Arc<Inner>,
}

impl RodioHandle {
    pub fn new() -> Self {
        // Try to open the default output device
        let sink = match OutputStream::try_default() {
            Ok((stream, handle)) => match Sink::try_new(&handle) {
                Ok(sink) => {
                    // The stream must outlive the sink. Leaking it keeps the
                    // device open for the rest of the process.
                    std::mem::forget(stream);
                    Some(sink)
                }
                Err(e) => {
                    tracing::error!(error = %e, "could not create audio sink");
                    None
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "no audio output device");
                None
            }
        };
        if let Some(sink) = &sink {
            sink.pause();
        }

        let inner = Arc::new(Inner {
            sink,
            shared: Mutex::new(Shared {
                rate: 1.0,
                ..Shared::default()
            }),
        });
        spawn_ticker(Arc::downgrade(&inner));
        RodioHandle { inner }
    }

    pub fn has_device(&self) -> bool {
        self.inner.sink.is_some()
    }
}

impl Default for RodioHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RodioHandle {
    fn drop(&mut self) {
        if let Some(sink) = &self.inner.sink {
            sink.stop();
        }
    }
}

impl AudioHandle for RodioHandle {
    fn source(&self) -> Option<String> {
        self.inner.lock().source.clone()
    }

    fn set_source(&mut self, source: &str) {
        let mut shared = self.inner.lock();
        shared.source = Some(source.to_string());
    }

    fn clear_source(&mut self) {
        let mut shared = self.inner.lock();
        shared.generation += 1;
        if let Some(sink) = &self.inner.sink {
            sink.stop();
            sink.pause();
        }
        let listener = shared.listener.take();
        let rate = shared.rate;
        *shared = Shared {
            generation: shared.generation,
            rate,
            listener,
            ..Shared::default()
        };
    }

    fn load(&mut self) {
        let mut shared = self.inner.lock();
        shared.generation += 1;
        let generation = shared.generation;
        if let Some(sink) = &self.inner.sink {
            sink.stop();
            sink.pause();
        }
        shared.bytes = None;
        shared.error = None;
        shared.duration = 0.0;
        shared.base = 0.0;
        shared.started_at = None;
        shared.appended = false;
        shared.ended = false;
        // Waiting callers belong to the previous source
        shared.pending_play = None;

        let Some(source) = shared.source.clone() else {
            return;
        };
        drop(shared);

        let inner = Arc::downgrade(&self.inner);
        std::thread::spawn(move || load_source(inner, generation, source));
    }

    fn play(&mut self) -> PlayAttempt {
        if self.inner.sink.is_none() {
            return PlayAttempt::Rejected(PlaybackError::NoDevice);
        }
        let mut shared = self.inner.lock();
        if shared.source.is_none() {
            return PlayAttempt::Rejected(PlaybackError::NoSource);
        }
        if let Some(err) = shared.error.clone() {
            return PlayAttempt::Rejected(err);
        }
        shared.playing = true;
        if shared.bytes.is_some() {
            return match self.inner.start(&mut shared) {
                Ok(()) => PlayAttempt::Started,
                Err(err) => {
                    shared.playing = false;
                    PlayAttempt::Rejected(err)
                }
            };
        }
        // Still downloading; the loader starts playback when it's done
        let (tx, rx) = oneshot::channel();
        shared.pending_play = Some(tx);
        PlayAttempt::Pending(rx)
    }

    fn pause(&mut self) {
        let mut shared = self.inner.lock();
        shared.freeze();
        shared.playing = false;
        if let Some(sink) = &self.inner.sink {
            sink.pause();
        }
    }

    fn current_time(&self) -> f64 {
        self.inner.lock().position()
    }

    fn set_current_time(&mut self, seconds: f64) {
        let mut shared = self.inner.lock();
        let mut target = seconds.max(0.0);
        if shared.duration > 0.0 {
            target = target.min(shared.duration);
        }
        shared.base = target;
        shared.started_at = None;
        if shared.bytes.is_none() {
            return;
        }
        if let Err(err) = self.inner.append_from_base(&mut shared) {
            tracing::warn!(error = %err, "seek failed");
            return;
        }
        if shared.playing {
            if let Some(sink) = &self.inner.sink {
                sink.play();
            }
            shared.started_at = Some(Instant::now());
        } else if let Some(sink) = &self.inner.sink {
            sink.pause();
        }
    }

    fn duration(&self) -> f64 {
        self.inner.lock().duration
    }

    fn set_volume(&mut self, volume: f64) {
        if let Some(sink) = &self.inner.sink {
            sink.set_volume(volume.clamp(0.0, 1.0) as f32);
        }
    }

    fn set_playback_rate(&mut self, rate: f64) {
        let mut shared = self.inner.lock();
        // Re-anchor so time already played keeps the old rate
        let was_running = shared.started_at.is_some();
        shared.freeze();
        shared.rate = rate;
        if was_running {
            shared.started_at = Some(Instant::now());
        }
        if let Some(sink) = &self.inner.sink {
            sink.set_speed(rate as f32);
        }
    }

    fn listen(&mut self, listener: AudioListener) {
        self.inner.lock().listener = Some(listener);
    }

    fn unlisten(&mut self) {
        self.inner.lock().listener = None;
    }
}

// ==========================================
// LOADER THREAD
// ==========================================
fn load_source(inner: Weak<Inner>, generation: u64, source: String) {
    let loaded = fetch_bytes(&source).and_then(|bytes| {
        let bytes: Arc<[u8]> = Arc::from(bytes);
        let duration = measure_duration(&bytes)?;
        Ok((bytes, duration))
    });

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut shared = inner.lock();
    if shared.generation != generation {
        tracing::debug!(%source, "discarding audio for a replaced source");
        return;
    }

    match loaded {
        Ok((bytes, duration)) => {
            tracing::debug!(%source, duration, "audio loaded");
            shared.bytes = Some(bytes);
            shared.duration = duration;
            shared.notify(AudioEvent::MetadataLoaded { duration });
            if shared.playing {
                let started = inner.start(&mut shared);
                if started.is_err() {
                    shared.playing = false;
                }
                shared.resolve_play(started);
            }
        }
        Err(err) => {
            tracing::warn!(%source, error = %err, "failed to load audio");
            shared.error = Some(err.clone());
            shared.playing = false;
            shared.resolve_play(Err(err));
        }
    }
}

fn fetch_bytes(source: &str) -> Result<Vec<u8>, PlaybackError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = reqwest::blocking::get(source)
            .and_then(|r| r.error_for_status())
            .map_err(|e| PlaybackError::Load(e.to_string()))?;
        let bytes = response
            .bytes()
            .map_err(|e| PlaybackError::Load(e.to_string()))?;
        return Ok(bytes.to_vec());
    }
    let path = source.strip_prefix("file://").unwrap_or(source);
    std::fs::read(path).map_err(|e| PlaybackError::Load(format!("{path}: {e}")))
}

// Containers without a length header (most mp3s) have to be decoded
// once to find out how long they are.
fn measure_duration(bytes: &Arc<[u8]>) -> Result<f64, PlaybackError> {
    let decoder = Decoder::new(Cursor::new(Arc::clone(bytes)))
        .map_err(|e| PlaybackError::Decode(e.to_string()))?;
    if let Some(total) = decoder.total_duration() {
        return Ok(total.as_secs_f64());
    }
    let frame = decoder.channels() as f64 * decoder.sample_rate() as f64;
    if frame <= 0.0 {
        return Ok(0.0);
    }
    Ok(decoder.count() as f64 / frame)
}

// ==========================================
// TICKER THREAD
// ==========================================
// Exits on its own once the handle is dropped.
fn spawn_ticker(inner: Weak<Inner>) {
    std::thread::spawn(move || loop {
        std::thread::sleep(TICK);
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let Some(sink) = &inner.sink else {
            return;
        };
        let mut shared = inner.lock();
        if !shared.playing || !shared.appended || shared.ended {
            continue;
        }
        if sink.empty() {
            shared.ended = true;
            shared.playing = false;
            shared.started_at = None;
            shared.base = shared.duration;
            sink.pause();
            shared.notify(AudioEvent::Ended);
        } else {
            let current_time = shared.position();
            shared.notify(AudioEvent::TimeUpdate { current_time });
        }
    });
}
