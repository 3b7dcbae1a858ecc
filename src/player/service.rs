// ==========================================
// PLAYER SERVICE
// ==========================================
// The controller runs inside a single task that owns it outright. Everything
// else talks to it through a cloneable `PlayerHandle`:
//
//   UI ──Command──▶ ┌───────────────┐ ──persist/fetch──▶ backend (spawned)
//   audio ─signal─▶ │ PlayerService │ ◀──results──────── backend
//   timers ───────▶ └───────────────┘ ──watch──▶ PlaybackState snapshots
//
// Nothing in here decides anything. The loop waits for the next input,
// hands it to the controller, runs whatever effects came out and publishes
// the new state.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::controller::{Controller, Effect};
use super::handle::{AudioHandle, AudioSignal};
use super::progress::ProgressSave;
use super::state::PlaybackState;
use crate::catalog::{Episode, EpisodeId};
use crate::config::PlayerSettings;
use crate::error::PlaybackError;

/// Persistence and lookups the player needs from the outside world.
///
/// Both calls are best effort: failures are logged by the implementation
/// and never reach the player.
pub trait PlayerBackend: Send + Sync + 'static {
    fn persist_progress(&self, save: ProgressSave) -> impl Future<Output = ()> + Send;
    /// Episodes of the given area, used for the theme sequence and queue seeding.
    fn fetch_related(&self, area: &str) -> impl Future<Output = Vec<Episode>> + Send;
}

#[derive(Debug)]
pub enum Command {
    Play(Arc<Episode>),
    Pause,
    Resume,
    TogglePlay,
    Stop,
    Seek(f64),
    // By the configured skip length
    SkipForward,
    SkipBackward,
    SetVolume(f64),
    ToggleMute,
    SetPlaybackRate(f64),
    ShowMiniPlayer,
    CloseMiniPlayer,
    AddToQueue(Arc<Episode>),
    RemoveFromQueue(EpisodeId),
    ClearQueue,
    PlayNext,
    PlayPrevious,
    Shutdown(oneshot::Sender<()>),
}

// Results of spawned work, fed back into the loop
#[derive(Debug)]
enum Completion {
    Related {
        episode_id: EpisodeId,
        episodes: Vec<Episode>,
    },
    PlayResult {
        episode_id: EpisodeId,
        result: Result<(), PlaybackError>,
    },
}

/// Cloneable handle for sending commands to the player task.
#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PlaybackState>,
}

impl PlayerHandle {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("player task is gone, command dropped");
        }
    }

    pub fn play(&self, episode: Arc<Episode>) {
        self.send(Command::Play(episode));
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    pub fn toggle_play(&self) {
        self.send(Command::TogglePlay);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn seek(&self, seconds: f64) {
        self.send(Command::Seek(seconds));
    }

    pub fn skip_forward(&self) {
        self.send(Command::SkipForward);
    }

    pub fn skip_backward(&self) {
        self.send(Command::SkipBackward);
    }

    pub fn set_volume(&self, volume: f64) {
        self.send(Command::SetVolume(volume));
    }

    pub fn toggle_mute(&self) {
        self.send(Command::ToggleMute);
    }

    pub fn set_playback_rate(&self, rate: f64) {
        self.send(Command::SetPlaybackRate(rate));
    }

    pub fn show_mini_player(&self) {
        self.send(Command::ShowMiniPlayer);
    }

    pub fn close_mini_player(&self) {
        self.send(Command::CloseMiniPlayer);
    }

    pub fn add_to_queue(&self, episode: Arc<Episode>) {
        self.send(Command::AddToQueue(episode));
    }

    pub fn remove_from_queue(&self, id: EpisodeId) {
        self.send(Command::RemoveFromQueue(id));
    }

    pub fn clear_queue(&self) {
        self.send(Command::ClearQueue);
    }

    pub fn play_next(&self) {
        self.send(Command::PlayNext);
    }

    pub fn play_previous(&self) {
        self.send(Command::PlayPrevious);
    }

    /// Latest published state.
    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    /// Pauses, writes the final progress and stops the task.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx));
        let _ = rx.await;
    }
}

pub struct PlayerService<H: AudioHandle, B: PlayerBackend> {
    controller: Controller<H>,
    backend: Arc<B>,
    commands: mpsc::UnboundedReceiver<Command>,
    audio: mpsc::UnboundedReceiver<AudioSignal>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    state_tx: watch::Sender<PlaybackState>,
}

impl<H: AudioHandle, B: PlayerBackend> PlayerService<H, B> {
    pub fn new(handle: H, backend: Arc<B>, settings: PlayerSettings) -> (Self, PlayerHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (audio_tx, audio) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PlaybackState::default());

        let service = PlayerService {
            controller: Controller::new(handle, settings, audio_tx),
            backend,
            commands,
            audio,
            completions_tx,
            completions,
            state_tx,
        };
        let player = PlayerHandle {
            commands: command_tx,
            state: state_rx,
        };
        (service, player)
    }

    /// Starts the service on the current runtime.
    pub fn spawn(handle: H, backend: Arc<B>, settings: PlayerSettings) -> PlayerHandle {
        let (service, player) = Self::new(handle, backend, settings);
        tokio::spawn(service.run());
        player
    }

    pub async fn run(mut self) {
        tracing::info!("player service started");
        loop {
            let deadline = self.controller.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.finish().await;
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.apply(command),
                    None => break,
                },
                Some(signal) = self.audio.recv() => self.controller.handle_audio(signal),
                Some(completion) = self.completions.recv() => match completion {
                    Completion::Related { episode_id, episodes } => {
                        self.controller.on_related(episode_id, episodes)
                    }
                    Completion::PlayResult { episode_id, result } => {
                        self.controller.on_play_result(episode_id, result)
                    }
                },
                _ = wait_until(deadline) => self.controller.on_timer(),
            }
            self.run_effects();
            self.publish();
        }
        // Every handle was dropped
        self.finish().await;
    }

    fn apply(&mut self, command: Command) {
        let skip = self.controller.settings().skip_seconds;
        let ctl = &mut self.controller;
        match command {
            Command::Play(episode) => ctl.play(episode),
            Command::Pause => ctl.pause(),
            Command::Resume => ctl.resume(),
            Command::TogglePlay => ctl.toggle_play(),
            Command::Stop => ctl.stop(),
            Command::Seek(seconds) => ctl.seek_to(seconds),
            Command::SkipForward => ctl.skip_forward(skip),
            Command::SkipBackward => ctl.skip_backward(skip),
            Command::SetVolume(volume) => ctl.set_volume(volume),
            Command::ToggleMute => ctl.toggle_mute(),
            Command::SetPlaybackRate(rate) => ctl.set_playback_rate(rate),
            Command::ShowMiniPlayer => ctl.show_mini_player(),
            Command::CloseMiniPlayer => ctl.close_mini_player(),
            Command::AddToQueue(episode) => ctl.add_to_queue(episode),
            Command::RemoveFromQueue(id) => ctl.remove_from_queue(id),
            Command::ClearQueue => ctl.clear_queue(),
            Command::PlayNext => ctl.play_next(),
            Command::PlayPrevious => ctl.play_previous(),
            Command::Shutdown(_) => {}
        }
    }

    fn run_effects(&mut self) {
        for effect in self.controller.take_effects() {
            match effect {
                Effect::SaveProgress(save) => {
                    tracing::debug!(episode = save.episode_id, percent = save.percent, "saving progress");
                    let backend = Arc::clone(&self.backend);
                    tokio::spawn(async move { backend.persist_progress(save).await });
                }
                Effect::FetchRelated { episode_id, area } => {
                    let backend = Arc::clone(&self.backend);
                    let tx = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let episodes = backend.fetch_related(&area).await;
                        let _ = tx.send(Completion::Related {
                            episode_id,
                            episodes,
                        });
                    });
                }
                Effect::AwaitPlay {
                    episode_id,
                    attempt,
                } => {
                    let tx = self.completions_tx.clone();
                    tokio::spawn(async move {
                        // A dropped sender means the source was replaced first
                        if let Ok(result) = attempt.await {
                            let _ = tx.send(Completion::PlayResult { episode_id, result });
                        }
                    });
                }
            }
        }
    }

    fn publish(&self) {
        let state = self.controller.state();
        self.state_tx.send_if_modified(|published| {
            if published == state {
                false
            } else {
                *published = state.clone();
                true
            }
        });
    }

    // Final save is awaited here rather than spawned, the runtime may be
    // going away right after.
    async fn finish(&mut self) {
        self.controller.pause();
        self.controller.shutdown();
        for effect in self.controller.take_effects() {
            if let Effect::SaveProgress(save) = effect {
                self.backend.persist_progress(save).await;
            }
        }
        self.publish();
        tracing::info!("player service stopped");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
