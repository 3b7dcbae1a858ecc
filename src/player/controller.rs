// ==========================================
// PLAYBACK CONTROLLER
// ==========================================
// The controller owns the playback state, the shared audio handle and the
// progress timers. Every change goes through `dispatch()`:
//
//   operation → reduce() → react(previous state) → handle calls / effects
//
// Work that has to wait on the network (saving progress, fetching related
// episodes, a play attempt that is still loading) is not done here. It is
// queued as an `Effect` for the player service to run, and the results come
// back through `on_related()` and `on_play_result()`.
//
// Dispatches issued while reacting are queued and applied in call order, so
// one transition's effects always see a consistent state.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::handle::{AudioEvent, AudioHandle, AudioListener, AudioSignal, ListenerId, PlayAttempt};
use super::progress::{ProgressSave, ProgressSchedule};
use super::queue::{self, Advance, QueuePlan};
use super::state::{reduce, Action, PlaybackState};
use crate::catalog::{Episode, EpisodeId};
use crate::config::PlayerSettings;
use crate::error::PlaybackError;

#[derive(Debug)]
pub enum Effect {
    SaveProgress(ProgressSave),
    FetchRelated {
        episode_id: EpisodeId,
        area: String,
    },
    AwaitPlay {
        episode_id: EpisodeId,
        attempt: oneshot::Receiver<Result<(), PlaybackError>>,
    },
}

pub struct Controller<H: AudioHandle> {
    state: PlaybackState,
    handle: H,
    settings: PlayerSettings,
    schedule: ProgressSchedule,
    audio_tx: mpsc::UnboundedSender<AudioSignal>,
    listener: Option<ListenerId>,
    next_listener: ListenerId,
    // Episode whose end was reached; its progress reads as 100%
    finished: Option<EpisodeId>,
    pending: VecDeque<Action>,
    dispatching: bool,
    effects: Vec<Effect>,
}

impl<H: AudioHandle> Controller<H> {
    pub fn new(
        handle: H,
        settings: PlayerSettings,
        audio_tx: mpsc::UnboundedSender<AudioSignal>,
    ) -> Self {
        Controller {
            state: PlaybackState::default(),
            handle,
            schedule: ProgressSchedule::new(&settings),
            settings,
            audio_tx,
            listener: None,
            next_listener: 1,
            finished: None,
            pending: VecDeque::new(),
            dispatching: false,
            effects: Vec::new(),
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.schedule.next_deadline()
    }

    // ==========================================
    // DISPATCH
    // ==========================================
    fn dispatch(&mut self, action: Action) {
        self.pending.push_back(action);
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        while let Some(action) = self.pending.pop_front() {
            tracing::trace!(?action, "dispatch");
            let next = reduce(&self.state, action);
            let prev = std::mem::replace(&mut self.state, next);
            self.react(&prev);
        }
        self.dispatching = false;
    }

    fn react(&mut self, prev: &PlaybackState) {
        let episode_changed = prev.current_id() != self.state.current_id();
        let playing_changed = prev.playing != self.state.playing;

        if episode_changed {
            self.switch_episode(prev);
        } else {
            if prev.effective_volume() != self.state.effective_volume() {
                self.handle.set_volume(self.state.effective_volume());
            }
            if prev.playback_rate != self.state.playback_rate {
                self.handle.set_playback_rate(self.state.playback_rate);
            }
        }

        // A new episode needs a play call even if `playing` stayed true
        if self.state.playing && self.state.current_episode.is_some() && (playing_changed || episode_changed) {
            self.start_playback();
        } else if playing_changed && !self.state.playing {
            self.stop_playback();
        }
    }

    // ==========================================
    // EPISODE SWITCH
    // ==========================================
    // Tears down everything tied to the previous episode before wiring up the
    // new one, so no event or timer crosses over.
    fn switch_episode(&mut self, prev: &PlaybackState) {
        if self.schedule.debounce_pending() {
            // The outgoing episode's last quiet-period save would be lost otherwise
            if let Some(save) = snapshot(prev, self.finished) {
                if self.schedule.worth_saving(save.percent) {
                    self.effects.push(Effect::SaveProgress(save));
                }
            }
        }
        self.schedule.cancel_debounce();
        self.handle.unlisten();
        self.listener = None;
        self.finished = None;

        let Some(episode) = self.state.current_episode.clone() else {
            self.schedule.cancel_all();
            return;
        };
        tracing::info!(episode = episode.id, title = %episode.title, "now playing");

        if self.handle.source().as_deref() != Some(episode.audio_url.as_str()) {
            self.handle.set_source(&episode.audio_url);
            self.handle.load();
        }
        self.handle.set_volume(self.state.effective_volume());
        self.handle.set_playback_rate(self.state.playback_rate);

        let id = self.next_listener;
        self.next_listener += 1;
        self.handle.listen(AudioListener {
            id,
            events: self.audio_tx.clone(),
        });
        self.listener = Some(id);

        // The handle knows where this source actually is (0/0 after a reload)
        self.dispatch(Action::SetDuration(self.handle.duration()));
        self.dispatch(Action::SetCurrentTime(self.handle.current_time()));

        self.effects.push(Effect::FetchRelated {
            episode_id: episode.id,
            area: episode.area.clone(),
        });
    }

    fn start_playback(&mut self) {
        let Some(episode_id) = self.state.current_id() else {
            return;
        };
        self.finished = None;
        self.schedule.start_periodic(Instant::now());
        match self.handle.play() {
            PlayAttempt::Started => {}
            PlayAttempt::Rejected(err) => {
                tracing::warn!(episode = episode_id, error = %err, "play attempt rejected");
                self.dispatch(Action::Pause);
            }
            PlayAttempt::Pending(attempt) => {
                self.effects.push(Effect::AwaitPlay {
                    episode_id,
                    attempt,
                });
            }
        }
    }

    fn stop_playback(&mut self) {
        self.handle.pause();
        self.schedule.stop_periodic();
        self.schedule.cancel_debounce();
        if self.state.current_time > 0.0 {
            if let Some(save) = snapshot(&self.state, self.finished) {
                self.effects.push(Effect::SaveProgress(save));
            }
        }
    }

    // ==========================================
    // INPUTS FROM THE SERVICE LOOP
    // ==========================================

    pub fn handle_audio(&mut self, signal: AudioSignal) {
        if self.listener != Some(signal.listener) {
            tracing::trace!(listener = signal.listener, "dropping event for a detached listener");
            return;
        }
        match signal.event {
            AudioEvent::MetadataLoaded { duration } => self.dispatch(Action::SetDuration(duration)),
            AudioEvent::TimeUpdate { current_time } => {
                self.dispatch(Action::SetCurrentTime(current_time));
                self.schedule.restart_debounce(Instant::now());
            }
            AudioEvent::Ended => self.on_ended(),
        }
    }

    fn on_ended(&mut self) {
        let Some(current) = self.state.current_episode.clone() else {
            return;
        };
        self.schedule.cancel_debounce();

        let duration = if self.state.duration > 0.0 {
            self.state.duration
        } else {
            self.handle.duration()
        };
        if duration > 0.0 {
            self.dispatch(Action::SetCurrentTime(duration));
        }
        self.finished = Some(current.id);
        self.effects.push(Effect::SaveProgress(ProgressSave {
            episode_id: current.id,
            percent: 100,
            position: duration.max(self.state.current_time),
        }));
        tracing::info!(episode = current.id, "episode finished");

        if !self.advance() {
            self.dispatch(Action::Pause);
        }
    }

    // Plays whatever follows the current episode. Returns false if nothing does.
    fn advance(&mut self) -> bool {
        match queue::next_episode(&self.state) {
            Advance::ThemeSuccessor(next) | Advance::QueueHead(next) => {
                let id = next.id;
                self.dispatch(Action::Play(next));
                self.dispatch(Action::RemoveFromQueue(id));
                true
            }
            Advance::Nothing => false,
        }
    }

    pub fn on_timer(&mut self) {
        let due = self.schedule.take_due(Instant::now());
        if due.debounce {
            if let Some(save) = snapshot(&self.state, self.finished) {
                if self.schedule.worth_saving(save.percent) {
                    self.effects.push(Effect::SaveProgress(save));
                } else {
                    tracing::trace!(percent = save.percent, "progress below threshold, not saved");
                }
            }
        }
        if due.periodic && self.state.playing && self.state.current_time > 0.0 {
            if let Some(save) = snapshot(&self.state, self.finished) {
                self.effects.push(Effect::SaveProgress(save));
            }
        }
    }

    pub fn on_related(&mut self, episode_id: EpisodeId, episodes: Vec<Episode>) {
        let Some(current) = self.state.current_episode.clone() else {
            return;
        };
        if current.id != episode_id {
            tracing::debug!(
                requested_for = episode_id,
                current = current.id,
                "ignoring related episodes for a previous episode"
            );
            return;
        }

        let sequence = queue::theme_sequence(&current, &episodes);
        let plan = queue::plan_queue(
            &current,
            &sequence,
            &episodes,
            self.state.queue.is_empty(),
            self.settings.queue_seed_limit,
        );
        self.dispatch(Action::SetThemeSequence(sequence));
        if let QueuePlan::Replace(seed) = plan {
            tracing::debug!(episode = episode_id, queued = seed.len(), "queue seeded");
            self.dispatch(Action::SetQueue(seed));
        }
    }

    pub fn on_play_result(&mut self, episode_id: EpisodeId, result: Result<(), PlaybackError>) {
        if let Err(err) = result {
            if self.state.current_id() == Some(episode_id) && self.state.playing {
                tracing::warn!(episode = episode_id, error = %err, "playback failed to start");
                self.dispatch(Action::Pause);
            }
        }
    }

    // Cancels timers and detaches from the handle; used when the service stops
    pub fn shutdown(&mut self) {
        self.schedule.cancel_all();
        self.handle.unlisten();
        self.handle.pause();
        self.listener = None;
    }

    // ==========================================
    // PUBLIC OPERATIONS
    // ==========================================

    pub fn play(&mut self, episode: Arc<Episode>) {
        self.dispatch(Action::Play(episode));
    }

    pub fn pause(&mut self) {
        self.dispatch(Action::Pause);
    }

    pub fn resume(&mut self) {
        if self.state.current_episode.is_some() {
            self.dispatch(Action::Resume);
        }
    }

    pub fn toggle_play(&mut self) {
        if self.state.playing {
            self.pause();
        } else {
            self.resume();
        }
    }

    pub fn stop(&mut self) {
        if self.state.playing {
            // Pausing writes the final position
            self.dispatch(Action::Pause);
        } else if self.state.current_time > 0.0 {
            if let Some(save) = snapshot(&self.state, self.finished) {
                self.effects.push(Effect::SaveProgress(save));
            }
        }
        self.schedule.cancel_all();
        self.dispatch(Action::Stop);
        self.handle.clear_source();
    }

    // Clamping is the caller's job
    pub fn seek(&mut self, seconds: f64) {
        self.finished = None;
        self.handle.set_current_time(seconds);
        self.dispatch(Action::SetCurrentTime(seconds));
    }

    pub fn seek_to(&mut self, seconds: f64) {
        self.seek(seconds);
    }

    pub fn skip_forward(&mut self, seconds: f64) {
        let target = self.handle.current_time() + seconds;
        let duration = if self.state.duration > 0.0 {
            self.state.duration
        } else {
            self.handle.duration()
        };
        // No upper bound while the duration is still unknown
        let target = if duration > 0.0 {
            target.min(duration)
        } else {
            target
        };
        self.seek(target.max(0.0));
    }

    pub fn skip_backward(&mut self, seconds: f64) {
        let target = (self.handle.current_time() - seconds).max(0.0);
        self.seek(target);
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.dispatch(Action::SetVolume(volume));
    }

    pub fn toggle_mute(&mut self) {
        self.dispatch(Action::ToggleMute);
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.dispatch(Action::SetPlaybackRate(rate));
        }
    }

    pub fn show_mini_player(&mut self) {
        self.dispatch(Action::ShowMiniPlayer);
    }

    pub fn add_to_queue(&mut self, episode: Arc<Episode>) {
        self.dispatch(Action::AddToQueue(episode));
    }

    pub fn remove_from_queue(&mut self, id: EpisodeId) {
        self.dispatch(Action::RemoveFromQueue(id));
    }

    pub fn clear_queue(&mut self) {
        self.dispatch(Action::ClearQueue);
    }

    // Same choice as on completion: theme successor first, then the queue head
    pub fn play_next(&mut self) {
        let Some(current) = self.state.current_episode.clone() else {
            self.advance();
            return;
        };
        if matches!(queue::next_episode(&self.state), Advance::Nothing) {
            return;
        }
        self.schedule.cancel_debounce();
        let duration = self.state.duration.max(self.handle.duration());
        self.effects.push(Effect::SaveProgress(ProgressSave {
            episode_id: current.id,
            percent: 100,
            position: duration.max(self.state.current_time),
        }));
        self.advance();
    }

    // Only the theme sequence has a notion of "previous"
    pub fn play_previous(&mut self) {
        let Some(current) = self.state.current_id() else {
            return;
        };
        if let Some(previous) = queue::predecessor(&self.state.theme_sequence, current) {
            self.dispatch(Action::Play(previous));
        }
    }

    pub fn close_mini_player(&mut self) {
        self.dispatch(Action::HideMiniPlayer);
        self.handle.pause();
        self.stop();
    }
}

fn snapshot(state: &PlaybackState, finished: Option<EpisodeId>) -> Option<ProgressSave> {
    let episode = state.current_episode.as_ref()?;
    let percent = if finished == Some(episode.id) {
        100
    } else {
        state.progress_percent()
    };
    Some(ProgressSave {
        episode_id: episode.id,
        percent,
        position: state.current_time,
    })
}


#[cfg(test)]
mod tests {
    use super::fake::FakeHandle;
    use super::*;
    use crate::catalog::episode::fixtures::episode;
    use crate::player::state::Phase;
    use std::time::Duration;

    struct Harness {
        ctl: Controller<FakeHandle>,
        audio: FakeHandle,
        rx: mpsc::UnboundedReceiver<AudioSignal>,
    }

    impl Harness {
        fn new() -> Self {
            let audio = FakeHandle::default();
            let (tx, rx) = mpsc::unbounded_channel();
            let settings = PlayerSettings {
                debounce_ms: 1000,
                periodic_save_secs: 5,
                min_progress_percent: 3,
                queue_seed_limit: 5,
                skip_seconds: 10.0,
            };
            Harness {
                ctl: Controller::new(audio.clone(), settings, tx),
                audio,
                rx,
            }
        }

        // Sends an event through the handle's current listener and delivers it
        fn emit(&mut self, event: AudioEvent) {
            assert!(self.audio.emit(event), "no listener attached");
            while let Ok(signal) = self.rx.try_recv() {
                self.ctl.handle_audio(signal);
            }
        }

        fn saves(&mut self) -> Vec<ProgressSave> {
            self.ctl
                .take_effects()
                .into_iter()
                .filter_map(|effect| match effect {
                    Effect::SaveProgress(save) => Some(save),
                    _ => None,
                })
                .collect()
        }

        fn queue_ids(&self) -> Vec<EpisodeId> {
            self.ctl.state().queue.iter().map(|e| e.id).collect()
        }
    }

    fn ep(id: EpisodeId, theme: &str, seq: &str) -> Arc<Episode> {
        Arc::new(episode(id, "Penal", theme, seq))
    }

    fn area_list(episodes: &[&Arc<Episode>]) -> Vec<Episode> {
        episodes.iter().map(|e| (***e).clone()).collect()
    }

    #[test]
    fn same_source_is_not_reloaded() {
        let mut h = Harness::new();
        let a = ep(1, "Dolo", "1");
        h.ctl.play(a.clone());
        h.ctl.pause();
        h.ctl.play(a.clone());

        let audio = h.audio.inner();
        assert_eq!(audio.loads, 1);
        assert_eq!(audio.source.as_deref(), Some(a.audio_url.as_str()));
        assert_eq!(audio.plays, 2);
    }

    #[test]
    fn metadata_and_time_give_progress() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        assert_eq!(h.ctl.state().duration, 0.0);

        h.emit(AudioEvent::MetadataLoaded { duration: 300.0 });
        h.emit(AudioEvent::TimeUpdate {
            current_time: 150.0,
        });
        assert_eq!(h.ctl.state().progress_percent(), 50);
    }

    #[test]
    fn play_requests_related_episodes() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        let effects = h.ctl.take_effects();
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::FetchRelated { episode_id: 1, area } if area == "Penal"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_coalesces_time_updates() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.emit(AudioEvent::MetadataLoaded { duration: 300.0 });
        h.ctl.take_effects();

        for t in [30.0, 31.0, 32.0] {
            h.emit(AudioEvent::TimeUpdate { current_time: t });
            tokio::time::advance(Duration::from_millis(400)).await;
            h.ctl.on_timer();
        }
        assert!(h.saves().is_empty());

        tokio::time::advance(Duration::from_millis(700)).await;
        h.ctl.on_timer();
        let saves = h.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].position, 32.0);
        assert_eq!(saves[0].percent, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn short_listens_are_not_saved() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.emit(AudioEvent::MetadataLoaded { duration: 300.0 });
        h.emit(AudioEvent::TimeUpdate { current_time: 9.0 });
        h.ctl.take_effects();

        tokio::time::advance(Duration::from_millis(1100)).await;
        h.ctl.on_timer();
        assert!(h.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_saves_once_and_cancels_debounce() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.emit(AudioEvent::MetadataLoaded { duration: 300.0 });
        h.emit(AudioEvent::TimeUpdate { current_time: 60.0 });
        h.ctl.take_effects();

        h.ctl.pause();
        let saves = h.saves();
        assert_eq!(
            saves,
            vec![ProgressSave {
                episode_id: 1,
                percent: 20,
                position: 60.0
            }]
        );
        assert_eq!(h.audio.inner().pauses, 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        h.ctl.on_timer();
        assert!(h.saves().is_empty());
        assert_eq!(h.ctl.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_save_runs_only_while_playing() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.emit(AudioEvent::MetadataLoaded { duration: 100.0 });
        h.emit(AudioEvent::TimeUpdate { current_time: 2.0 });
        h.ctl.take_effects();

        tokio::time::advance(Duration::from_secs(5)).await;
        h.ctl.on_timer();
        // Periodic save ignores the threshold; the debounced one (2%) is dropped
        let saves = h.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].percent, 2);

        h.ctl.pause();
        h.ctl.take_effects();
        tokio::time::advance(Duration::from_secs(20)).await;
        h.ctl.on_timer();
        assert!(h.saves().is_empty());
    }

    #[test]
    fn switching_episodes_flushes_a_pending_quiet_period_save() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.emit(AudioEvent::MetadataLoaded { duration: 300.0 });
        h.emit(AudioEvent::TimeUpdate { current_time: 60.0 });
        h.ctl.take_effects();

        h.ctl.play(ep(2, "Dolo", "2"));
        assert_eq!(
            h.saves(),
            vec![ProgressSave {
                episode_id: 1,
                percent: 20,
                position: 60.0
            }]
        );
        assert_eq!(h.ctl.state().current_id(), Some(2));

        // Nothing left pending for the old episode
        h.ctl.pause();
        assert!(h.saves().is_empty());
    }

    #[test]
    fn switching_after_a_short_listen_saves_nothing() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.emit(AudioEvent::MetadataLoaded { duration: 300.0 });
        h.emit(AudioEvent::TimeUpdate { current_time: 6.0 });
        h.ctl.take_effects();

        h.ctl.play(ep(2, "Dolo", "2"));
        assert!(h.saves().is_empty());
    }

    #[test]
    fn ended_prefers_theme_successor_and_completes_only_the_finisher() {
        let mut h = Harness::new();
        let (a, b, c) = (ep(1, "Dolo", "1"), ep(2, "Dolo", "2"), ep(3, "Dolo", "3"));
        let x = ep(9, "Culpa", "1");

        h.ctl.play(b.clone());
        h.ctl.on_related(2, area_list(&[&a, &b, &c]));
        h.ctl.clear_queue();
        h.ctl.add_to_queue(x.clone());
        h.emit(AudioEvent::MetadataLoaded { duration: 200.0 });
        h.ctl.take_effects();

        h.emit(AudioEvent::Ended);

        let state = h.ctl.state();
        assert_eq!(state.current_id(), Some(3));
        assert!(state.playing);
        assert_eq!(h.queue_ids(), vec![9]);
        let saves = h.saves();
        assert_eq!(
            saves,
            vec![ProgressSave {
                episode_id: 2,
                percent: 100,
                position: 200.0
            }]
        );
        assert_eq!(h.audio.inner().source.as_deref(), Some(c.audio_url.as_str()));
    }

    #[test]
    fn ended_falls_back_to_queue_head() {
        let mut h = Harness::new();
        let last = ep(5, "Dolo", "9");
        h.ctl.play(last.clone());
        h.ctl.on_related(5, area_list(&[&last]));
        h.ctl.add_to_queue(ep(7, "Culpa", "1"));
        h.ctl.add_to_queue(ep(8, "Culpa", "2"));

        h.emit(AudioEvent::Ended);
        assert_eq!(h.ctl.state().current_id(), Some(7));
        assert_eq!(h.queue_ids(), vec![8]);
        assert!(h.ctl.state().playing);
    }

    #[test]
    fn ended_with_nothing_next_pauses() {
        let mut h = Harness::new();
        h.ctl.play(ep(5, "Dolo", "9"));
        h.emit(AudioEvent::MetadataLoaded { duration: 120.0 });
        h.emit(AudioEvent::TimeUpdate {
            current_time: 119.0,
        });
        h.ctl.take_effects();

        h.emit(AudioEvent::Ended);
        let state = h.ctl.state();
        assert_eq!(state.phase(), Phase::Paused);
        assert_eq!(state.current_time, 120.0);
        let saves = h.saves();
        assert!(!saves.is_empty());
        assert!(saves.iter().all(|s| s.episode_id == 5 && s.percent == 100));
    }

    #[test]
    fn play_next_takes_queue_head_without_successor() {
        let mut h = Harness::new();
        let current = ep(1, "Dolo", "1");
        h.ctl.play(current.clone());
        h.ctl.on_related(1, area_list(&[&current]));
        h.ctl.add_to_queue(ep(10, "Culpa", "1"));
        h.ctl.add_to_queue(ep(11, "Culpa", "2"));
        h.ctl.take_effects();

        h.ctl.play_next();
        assert_eq!(h.ctl.state().current_id(), Some(10));
        assert_eq!(h.queue_ids(), vec![11]);
        let saves = h.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].episode_id, 1);
        assert_eq!(saves[0].percent, 100);
    }

    #[test]
    fn play_next_without_anything_is_a_no_op() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.ctl.take_effects();
        let before = h.ctl.state().clone();

        h.ctl.play_next();
        assert_eq!(h.ctl.state(), &before);
        assert!(h.ctl.take_effects().is_empty());
    }

    #[test]
    fn play_previous_walks_the_theme_sequence() {
        let mut h = Harness::new();
        let (a, b) = (ep(1, "Dolo", "1"), ep(2, "Dolo", "2"));
        h.ctl.play(b.clone());
        h.ctl.on_related(2, area_list(&[&a, &b]));

        h.ctl.play_previous();
        assert_eq!(h.ctl.state().current_id(), Some(1));
    }

    #[test]
    fn play_previous_at_first_position_changes_nothing() {
        let mut h = Harness::new();
        let (a, b) = (ep(1, "Dolo", "1"), ep(2, "Dolo", "2"));
        h.ctl.play(a.clone());
        h.ctl.on_related(1, area_list(&[&a, &b]));
        h.ctl.take_effects();
        let before = h.ctl.state().clone();

        h.ctl.play_previous();
        assert_eq!(h.ctl.state(), &before);
        assert!(h.ctl.take_effects().is_empty());
    }

    #[test]
    fn stale_related_results_are_ignored() {
        let mut h = Harness::new();
        let (a, b) = (ep(1, "Dolo", "1"), ep(2, "Culpa", "1"));
        let a2 = ep(3, "Dolo", "2");
        h.ctl.play(a.clone());
        h.ctl.play(b.clone());

        h.ctl.on_related(1, area_list(&[&a, &a2, &b]));
        assert!(h.ctl.state().theme_sequence.is_empty());
        assert!(h.ctl.state().queue.is_empty());

        h.ctl.on_related(2, area_list(&[&a, &a2, &b]));
        let seq: Vec<_> = h.ctl.state().theme_sequence.iter().map(|e| e.id).collect();
        assert_eq!(seq, vec![2]);
        // No theme successors and an empty queue: seeded from the other theme
        assert_eq!(h.queue_ids(), vec![1, 3]);
    }

    #[test]
    fn theme_successors_replace_the_queue() {
        let mut h = Harness::new();
        let (a, b, c) = (ep(1, "Dolo", "1"), ep(2, "Dolo", "2"), ep(3, "Dolo", "3"));
        h.ctl.add_to_queue(ep(50, "Culpa", "1"));
        h.ctl.play(a.clone());
        h.ctl.on_related(1, area_list(&[&c, &b, &a]));
        assert_eq!(h.queue_ids(), vec![2, 3]);
    }

    #[test]
    fn user_queue_survives_fallback_seeding() {
        let mut h = Harness::new();
        let lonely = ep(1, "Dolo", "1");
        let other = ep(2, "Culpa", "1");
        h.ctl.add_to_queue(ep(50, "Posse", "1"));
        h.ctl.play(lonely.clone());
        h.ctl.on_related(1, area_list(&[&lonely, &other]));
        assert_eq!(h.queue_ids(), vec![50]);
    }

    #[test]
    fn events_from_a_previous_episode_are_dropped() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        let old_listener = h.audio.inner().listener.as_ref().map(|l| l.id).unwrap();

        h.ctl.play(ep(2, "Dolo", "2"));
        h.ctl.handle_audio(AudioSignal {
            listener: old_listener,
            event: AudioEvent::MetadataLoaded { duration: 999.0 },
        });
        h.ctl.handle_audio(AudioSignal {
            listener: old_listener,
            event: AudioEvent::Ended,
        });
        assert_eq!(h.ctl.state().duration, 0.0);
        assert_eq!(h.ctl.state().current_id(), Some(2));
        assert!(h.ctl.state().playing);
    }

    #[test]
    fn rejected_play_pauses() {
        let mut h = Harness::new();
        h.audio.inner().reject_next = Some(PlaybackError::Rejected("autoplay".to_string()));
        h.ctl.play(ep(1, "Dolo", "1"));
        assert_eq!(h.ctl.state().phase(), Phase::Paused);
        assert_eq!(h.ctl.next_deadline(), None);
    }

    #[test]
    fn late_rejection_pauses_only_the_same_episode() {
        let mut h = Harness::new();
        h.audio.inner().defer_plays = true;
        h.ctl.play(ep(1, "Dolo", "1"));
        let pending = h
            .ctl
            .take_effects()
            .into_iter()
            .find_map(|e| match e {
                Effect::AwaitPlay { episode_id, .. } => Some(episode_id),
                _ => None,
            });
        assert_eq!(pending, Some(1));
        assert!(h.ctl.state().playing);

        h.ctl.play(ep(2, "Dolo", "2"));
        h.ctl.on_play_result(1, Err(PlaybackError::Decode("bad frame".to_string())));
        assert!(h.ctl.state().playing);

        h.ctl.on_play_result(2, Err(PlaybackError::Decode("bad frame".to_string())));
        assert!(!h.ctl.state().playing);
    }

    #[test]
    fn volume_mute_and_rate_reach_the_handle() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.ctl.set_volume(0.5);
        assert_eq!(h.audio.inner().volume, 0.5);

        h.ctl.toggle_mute();
        assert_eq!(h.audio.inner().volume, 0.0);
        assert_eq!(h.ctl.state().volume, 0.5);

        h.ctl.toggle_mute();
        assert_eq!(h.audio.inner().volume, 0.5);

        h.ctl.set_playback_rate(1.5);
        assert_eq!(h.audio.inner().rate, 1.5);
        h.ctl.set_playback_rate(0.0);
        assert_eq!(h.ctl.state().playback_rate, 1.5);
    }

    #[test]
    fn skips_are_clamped() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.emit(AudioEvent::MetadataLoaded { duration: 100.0 });
        h.ctl.seek(95.0);

        h.ctl.skip_forward(10.0);
        assert_eq!(h.audio.inner().current_time, 100.0);
        assert_eq!(h.ctl.state().current_time, 100.0);

        h.ctl.seek(4.0);
        h.ctl.skip_backward(10.0);
        assert_eq!(h.ctl.state().current_time, 0.0);
    }

    #[test]
    fn skip_forward_is_unbounded_while_duration_unknown() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.ctl.skip_forward(10.0);
        assert_eq!(h.ctl.state().current_time, 10.0);
    }

    #[test]
    fn stop_resets_and_clears_the_source() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.emit(AudioEvent::MetadataLoaded { duration: 100.0 });
        h.emit(AudioEvent::TimeUpdate { current_time: 40.0 });
        h.ctl.take_effects();

        h.ctl.stop();
        assert_eq!(h.ctl.state(), &PlaybackState::default());
        assert!(h.audio.inner().source.is_none());
        assert!(h.audio.inner().listener.is_none());
        assert_eq!(h.ctl.next_deadline(), None);
        let saves = h.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].percent, 40);
    }

    #[test]
    fn close_mini_player_returns_to_idle() {
        let mut h = Harness::new();
        h.ctl.play(ep(1, "Dolo", "1"));
        h.ctl.close_mini_player();
        let state = h.ctl.state();
        assert_eq!(state.phase(), Phase::Idle);
        assert!(!state.mini_player_visible);
        assert!(h.audio.inner().source.is_none());
    }

    #[test]
    fn resume_without_episode_does_nothing() {
        let mut h = Harness::new();
        h.ctl.resume();
        assert!(!h.ctl.state().playing);
        assert_eq!(h.audio.inner().plays, 0);
    }
}
