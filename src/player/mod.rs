pub mod audio;
pub mod controller;
pub mod handle;
pub mod progress;
pub mod queue;
pub mod service;
pub mod state;

pub use audio::RodioHandle;
pub use handle::{AudioEvent, AudioHandle, AudioListener, AudioSignal, PlayAttempt};
pub use progress::ProgressSave;
pub use service::{PlayerBackend, PlayerHandle, PlayerService};
pub use state::{Action, Phase, PlaybackState};

/// Speeds offered by the player UI.
pub const PLAYBACK_RATES: [f64; 6] = [0.5, 0.75, 1.0, 1.25, 1.5, 2.0];

/// The offered rate after `current`, wrapping around. Unknown rates go back to 1x.
pub fn next_rate(current: f64) -> f64 {
    match PLAYBACK_RATES.iter().position(|r| *r == current) {
        Some(i) => PLAYBACK_RATES[(i + 1) % PLAYBACK_RATES.len()],
        None => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_cycle() {
        assert_eq!(next_rate(1.0), 1.25);
        assert_eq!(next_rate(2.0), 0.5);
        assert_eq!(next_rate(3.3), 1.0);
    }
}
