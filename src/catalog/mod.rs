pub mod episode;
pub mod listing;

pub use episode::{Episode, EpisodeId, EpisodeRow, ProgressEntry, UserData};
pub use listing::{AreaCard, ThemeCard};
