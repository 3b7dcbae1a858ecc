// ==========================================
// PLAYBACK STATE AND REDUCER
// ==========================================
// The whole player is described by one `PlaybackState` value. It only ever
// changes through `reduce()`, a pure function from (state, action) to a new
// state. Side effects (talking to the audio handle, saving progress,
// fetching related episodes) live in the controller and react to the
// difference between the old and the new state.
//
// Episodes are shared through `Arc` so copying the state for every
// transition is cheap and the reducer can never mutate an episode.

use std::sync::Arc;

use crate::catalog::{Episode, EpisodeId};

// ==========================================
// PLAYBACK STATE
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub playing: bool,
    pub current_episode: Option<Arc<Episode>>,
    // 0.0..=1.0; `muted` overrides it without losing the stored value
    pub volume: f64,
    pub muted: bool,
    // Seconds. A duration of 0 means the metadata hasn't loaded yet
    pub duration: f64,
    pub current_time: f64,
    pub playback_rate: f64,
    pub mini_player_visible: bool,
    // Manual queue, no two entries share an id
    pub queue: Vec<Arc<Episode>>,
    // Episodes of the current theme in sequence order, for auto-advance
    pub theme_sequence: Vec<Arc<Episode>>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState {
            playing: false,
            current_episode: None,
            volume: 1.0,
            muted: false,
            duration: 0.0,
            current_time: 0.0,
            playback_rate: 1.0,
            mini_player_visible: false,
            queue: Vec::new(),
            theme_sequence: Vec::new(),
        }
    }
}

/// Coarse view of the state machine: Idle, Loaded-Paused or Playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Paused,
    Playing,
}

impl PlaybackState {
    pub fn phase(&self) -> Phase {
        match (&self.current_episode, self.playing) {
            (None, _) => Phase::Idle,
            (Some(_), false) => Phase::Paused,
            (Some(_), true) => Phase::Playing,
        }
    }

    pub fn current_id(&self) -> Option<EpisodeId> {
        self.current_episode.as_ref().map(|ep| ep.id)
    }

    pub fn effective_volume(&self) -> f64 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    // Whole percent listened, 0 while the duration is unknown
    pub fn progress_percent(&self) -> u8 {
        if self.duration <= 0.0 {
            return 0;
        }
        let percent = (self.current_time / self.duration * 100.0).floor();
        percent.clamp(0.0, 100.0) as u8
    }

    pub fn theme_index(&self, id: EpisodeId) -> Option<usize> {
        self.theme_sequence.iter().position(|ep| ep.id == id)
    }
}

// ==========================================
// ACTIONS
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Play(Arc<Episode>),
    Pause,
    Resume,
    Stop,
    SetVolume(f64),
    ToggleMute,
    SetDuration(f64),
    SetCurrentTime(f64),
    SetPlaybackRate(f64),
    ShowMiniPlayer,
    HideMiniPlayer,
    AddToQueue(Arc<Episode>),
    RemoveFromQueue(EpisodeId),
    SetQueue(Vec<Arc<Episode>>),
    ClearQueue,
    SetThemeSequence(Vec<Arc<Episode>>),
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn dedup_by_id(episodes: Vec<Arc<Episode>>) -> Vec<Arc<Episode>> {
    let mut out: Vec<Arc<Episode>> = Vec::with_capacity(episodes.len());
    for episode in episodes {
        if !out.iter().any(|seen| seen.id == episode.id) {
            out.push(episode);
        }
    }
    out
}

// ==========================================
// REDUCER: reduce()
// ==========================================
// Returns the next state. Never touches anything outside its arguments.
pub fn reduce(state: &PlaybackState, action: Action) -> PlaybackState {
    let mut next = state.clone();
    match action {
        Action::Play(episode) => {
            next.playing = true;
            next.current_episode = Some(episode);
            next.mini_player_visible = true;
        }
        Action::Pause => next.playing = false,
        Action::Resume => next.playing = true,
        Action::Stop => return PlaybackState::default(),
        Action::SetVolume(volume) => {
            let volume = if volume.is_nan() {
                0.0
            } else {
                volume.clamp(0.0, 1.0)
            };
            next.volume = volume;
            next.muted = volume == 0.0;
        }
        Action::ToggleMute => next.muted = !next.muted,
        Action::SetDuration(duration) => next.duration = non_negative(duration),
        Action::SetCurrentTime(time) => next.current_time = non_negative(time),
        Action::SetPlaybackRate(rate) => next.playback_rate = rate,
        Action::ShowMiniPlayer => next.mini_player_visible = true,
        Action::HideMiniPlayer => next.mini_player_visible = false,
        Action::AddToQueue(episode) => {
            if !next.queue.iter().any(|queued| queued.id == episode.id) {
                next.queue.push(episode);
            }
        }
        Action::RemoveFromQueue(id) => next.queue.retain(|queued| queued.id != id),
        Action::SetQueue(episodes) => next.queue = dedup_by_id(episodes),
        Action::ClearQueue => next.queue.clear(),
        Action::SetThemeSequence(episodes) => next.theme_sequence = dedup_by_id(episodes),
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::episode::fixtures::episode;

    fn ep(id: EpisodeId) -> Arc<Episode> {
        Arc::new(episode(id, "Penal", "Dolo", &id.to_string()))
    }

    fn run(actions: Vec<Action>) -> PlaybackState {
        actions
            .into_iter()
            .fold(PlaybackState::default(), |state, action| reduce(&state, action))
    }

    #[test]
    fn play_sets_episode_and_shows_mini_player() {
        let state = run(vec![Action::Play(ep(1))]);
        assert!(state.playing);
        assert_eq!(state.current_id(), Some(1));
        assert!(state.mini_player_visible);
        assert_eq!(state.phase(), Phase::Playing);
    }

    #[test]
    fn pause_resume_and_stop() {
        let paused = run(vec![Action::Play(ep(1)), Action::Pause]);
        assert_eq!(paused.phase(), Phase::Paused);

        let resumed = reduce(&paused, Action::Resume);
        assert_eq!(resumed.phase(), Phase::Playing);

        let stopped = reduce(
            &reduce(&resumed, Action::AddToQueue(ep(2))),
            Action::Stop,
        );
        assert_eq!(stopped, PlaybackState::default());
        assert_eq!(stopped.phase(), Phase::Idle);
    }

    #[test]
    fn volume_is_clamped_and_zero_mutes() {
        let state = run(vec![Action::SetVolume(1.7)]);
        assert_eq!(state.volume, 1.0);
        assert!(!state.muted);

        let state = reduce(&state, Action::SetVolume(-0.2));
        assert_eq!(state.volume, 0.0);
        assert!(state.muted);

        let state = reduce(&state, Action::SetVolume(f64::NAN));
        assert_eq!(state.volume, 0.0);

        let state = reduce(&state, Action::SetVolume(0.4));
        assert!(!state.muted);
    }

    #[test]
    fn volume_stays_in_range_for_any_sequence() {
        let inputs = [0.3, 5.0, -1.0, 0.0, f64::INFINITY, f64::NEG_INFINITY, 0.99];
        let mut state = PlaybackState::default();
        for (i, v) in inputs.iter().enumerate() {
            state = reduce(&state, Action::SetVolume(*v));
            if i % 2 == 0 {
                state = reduce(&state, Action::ToggleMute);
            }
            assert!((0.0..=1.0).contains(&state.volume));
            assert!((0.0..=1.0).contains(&state.effective_volume()));
        }
    }

    #[test]
    fn toggle_mute_keeps_volume() {
        let state = run(vec![Action::SetVolume(0.6), Action::ToggleMute]);
        assert!(state.muted);
        assert_eq!(state.volume, 0.6);
        assert_eq!(state.effective_volume(), 0.0);

        let state = reduce(&state, Action::ToggleMute);
        assert_eq!(state.effective_volume(), 0.6);
    }

    #[test]
    fn add_to_queue_is_idempotent() {
        let state = run(vec![Action::AddToQueue(ep(4)), Action::AddToQueue(ep(4))]);
        assert_eq!(state.queue.len(), 1);
    }

    #[test]
    fn queue_order_follows_operations() {
        let a = ep(1);
        let b = ep(2);
        let state = run(vec![
            Action::SetQueue(vec![a.clone(), b.clone()]),
            Action::RemoveFromQueue(a.id),
            Action::AddToQueue(a.clone()),
        ]);
        let ids: Vec<_> = state.queue.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1]);

        let cleared = reduce(&state, Action::ClearQueue);
        assert!(cleared.queue.is_empty());
    }

    #[test]
    fn set_queue_drops_duplicate_ids() {
        let state = run(vec![Action::SetQueue(vec![ep(1), ep(2), ep(1)])]);
        let ids: Vec<_> = state.queue.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn derived_progress_percent() {
        let state = run(vec![
            Action::Play(ep(1)),
            Action::SetDuration(300.0),
            Action::SetCurrentTime(150.0),
        ]);
        assert_eq!(state.progress_percent(), 50);

        let unknown = run(vec![Action::Play(ep(1)), Action::SetCurrentTime(20.0)]);
        assert_eq!(unknown.progress_percent(), 0);

        let past_end = reduce(&state, Action::SetCurrentTime(400.0));
        assert_eq!(past_end.progress_percent(), 100);
    }

    #[test]
    fn negative_times_are_stored_as_zero() {
        let state = run(vec![Action::SetCurrentTime(-4.0), Action::SetDuration(f64::NAN)]);
        assert_eq!(state.current_time, 0.0);
        assert_eq!(state.duration, 0.0);
    }

    #[test]
    fn reducer_never_changes_episode_data() {
        let a = ep(1);
        let before = (*a).clone();
        let _ = run(vec![
            Action::Play(a.clone()),
            Action::SetCurrentTime(30.0),
            Action::AddToQueue(a.clone()),
            Action::Stop,
        ]);
        assert_eq!(*a, before);
    }

    #[test]
    fn mini_player_visibility_is_independent() {
        let state = run(vec![Action::Play(ep(1)), Action::HideMiniPlayer]);
        assert!(state.playing);
        assert!(!state.mini_player_visible);
        assert!(reduce(&state, Action::ShowMiniPlayer).mini_player_visible);
    }
}
