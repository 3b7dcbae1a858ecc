// The audio output seen by the controller.
//
// One handle exists for the whole process and is reused for every episode.
// It has a single listener slot: attaching a listener replaces the previous
// one, and every notification is tagged with the listener id it was sent
// to, so the controller can drop anything addressed to an older episode.

use tokio::sync::{mpsc, oneshot};

use crate::error::PlaybackError;

pub type ListenerId = u64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioEvent {
    MetadataLoaded { duration: f64 },
    TimeUpdate { current_time: f64 },
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSignal {
    pub listener: ListenerId,
    pub event: AudioEvent,
}

#[derive(Debug, Clone)]
pub struct AudioListener {
    pub id: ListenerId,
    pub events: mpsc::UnboundedSender<AudioSignal>,
}

impl AudioListener {
    // Returns false once the controller is gone
    pub fn notify(&self, event: AudioEvent) -> bool {
        self.events
            .send(AudioSignal {
                listener: self.id,
                event,
            })
            .is_ok()
    }
}

/// Outcome of asking the output to start playing.
#[derive(Debug)]
pub enum PlayAttempt {
    Started,
    Rejected(PlaybackError),
    // Audio is still loading; resolves when it starts or fails
    Pending(oneshot::Receiver<Result<(), PlaybackError>>),
}

pub trait AudioHandle: Send + 'static {
    fn source(&self) -> Option<String>;
    fn set_source(&mut self, source: &str);
    fn clear_source(&mut self);
    fn load(&mut self);

    fn play(&mut self) -> PlayAttempt;
    fn pause(&mut self);

    fn current_time(&self) -> f64;
    fn set_current_time(&mut self, seconds: f64);
    // 0 until metadata has loaded
    fn duration(&self) -> f64;

    fn set_volume(&mut self, volume: f64);
    fn set_playback_rate(&mut self, rate: f64);

    fn listen(&mut self, listener: AudioListener);
    fn unlisten(&mut self);
}
