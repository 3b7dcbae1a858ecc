// Podcast service: every catalog read and per-user write goes through here.
//
// Error policy: backend failures are logged and never surface to callers.
// Reads answer with empty results (or local data where it exists), writes
// fall back to the local store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;

use super::local::LocalStore;
use super::rest::{Query, RestClient, EPISODES_TABLE, FAVORITES_TABLE, HISTORY_TABLE};
use crate::catalog::episode::materialize;
use crate::catalog::listing::{
    self, area_cards, featured_episodes, recent_episodes, theme_cards, title_case_slug,
};
use crate::catalog::{AreaCard, Episode, EpisodeId, EpisodeRow, ProgressEntry, ThemeCard, UserData};
use crate::error::{StoreError, StoreResult};
use crate::player::{PlayerBackend, ProgressSave};

#[derive(Debug, Serialize, Deserialize)]
struct HistoryRow {
    episode_id: EpisodeId,
    #[serde(default)]
    user_ip: String,
    #[serde(default)]
    progress_percent: f64,
    #[serde(default)]
    current_position: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

impl HistoryRow {
    fn entry(&self) -> ProgressEntry {
        ProgressEntry {
            percent: self.progress_percent.clamp(0.0, 100.0) as u8,
            position: self.current_position.max(0.0),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FavoriteRow {
    episode_id: EpisodeId,
    #[serde(default)]
    user_ip: String,
}

#[derive(Debug, Deserialize)]
struct AreaRow {
    #[serde(default)]
    area: String,
}

#[derive(Debug, Deserialize)]
struct ThemeRow {
    #[serde(default)]
    tema: String,
}

pub struct PodcastService {
    rest: Option<RestClient>,
    local: LocalStore,
    user_id: String,
}

impl PodcastService {
    pub fn new(rest: Option<RestClient>, local: LocalStore, user_id: String) -> Self {
        PodcastService {
            rest,
            local,
            user_id,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn rest(&self) -> StoreResult<&RestClient> {
        self.rest.as_ref().ok_or(StoreError::NotConfigured)
    }

    // ------------------------------------------
    // Episode reads
    // ------------------------------------------

    pub async fn all_episodes(&self) -> Vec<Episode> {
        let query = Query::table(EPISODES_TABLE)
            .select("*")
            .order("sequencia", true);
        self.load_episodes(query, "all episodes").await
    }

    pub async fn episodes_by_area(&self, area: &str) -> Vec<Episode> {
        if area.trim().is_empty() {
            return Vec::new();
        }
        let query = Query::table(EPISODES_TABLE)
            .select("*")
            .ilike("area", area.trim())
            .order("sequencia", true);
        let episodes = self.load_episodes(query, "episodes by area").await;
        tracing::debug!(area, count = episodes.len(), "episodes for area");
        episodes
    }

    // Both arguments are URL slugs, e.g. ("dolo-eventual", "direito-penal")
    pub async fn episodes_by_theme(&self, theme_slug: &str, area_slug: &str) -> Vec<Episode> {
        let query = Query::table(EPISODES_TABLE)
            .select("*")
            .ilike("tema", &title_case_slug(theme_slug))
            .ilike("area", &title_case_slug(area_slug))
            .order("sequencia", true);
        self.load_episodes(query, "episodes by theme").await
    }

    pub async fn episode_by_id(&self, id: EpisodeId) -> Option<Episode> {
        let query = Query::table(EPISODES_TABLE).select("*").eq("id", id);
        self.load_episodes(query, "episode by id").await.into_iter().next()
    }

    pub async fn areas(&self) -> Vec<AreaCard> {
        let query = Query::table(EPISODES_TABLE).select("area");
        match self.fetch::<AreaRow>(&query).await {
            Ok(rows) => area_cards(rows.iter().map(|r| r.area.as_str())),
            Err(e) => {
                tracing::error!(error = %e, "failed to load areas");
                Vec::new()
            }
        }
    }

    pub async fn themes_by_area(&self, area_slug: &str) -> Vec<ThemeCard> {
        let area = title_case_slug(area_slug);
        let query = Query::table(EPISODES_TABLE)
            .select("tema,area")
            .ilike("area", &area);
        match self.fetch::<ThemeRow>(&query).await {
            Ok(rows) => theme_cards(rows.iter().map(|r| r.tema.as_str()), &area),
            Err(e) => {
                tracing::error!(area = %area, error = %e, "failed to load themes");
                Vec::new()
            }
        }
    }

    pub async fn featured_episodes(&self) -> Vec<Episode> {
        featured_episodes(&self.all_episodes().await)
    }

    pub async fn recent_episodes(&self) -> Vec<Episode> {
        recent_episodes(&self.all_episodes().await)
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, query: &Query) -> StoreResult<Vec<T>> {
        self.rest()?.fetch(query).await
    }

    async fn load_episodes(&self, query: Query, what: &str) -> Vec<Episode> {
        match self.fetch::<EpisodeRow>(&query).await {
            Ok(rows) => {
                let ids: Vec<EpisodeId> = rows.iter().map(|r| r.id).collect();
                let user = self.user_data_for(&ids).await;
                materialize(rows, &user)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load {what}");
                Vec::new()
            }
        }
    }

    // Batch-joins progress and favorites for a page of episodes
    async fn user_data_for(&self, ids: &[EpisodeId]) -> UserData {
        if ids.is_empty() {
            return UserData::default();
        }
        match self.remote_user_data(ids).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "user data unavailable, using local store");
                self.local.user_data()
            }
        }
    }

    async fn remote_user_data(&self, ids: &[EpisodeId]) -> StoreResult<UserData> {
        let history = Query::table(HISTORY_TABLE)
            .select("episode_id,progress_percent,current_position")
            .eq("user_ip", &self.user_id)
            .in_list("episode_id", ids);
        let favorites = Query::table(FAVORITES_TABLE)
            .select("episode_id")
            .eq("user_ip", &self.user_id)
            .in_list("episode_id", ids);

        let history: Vec<HistoryRow> = self.fetch(&history).await?;
        let favorites: Vec<FavoriteRow> = self.fetch(&favorites).await?;

        Ok(UserData {
            progress: history.iter().map(|row| (row.episode_id, row.entry())).collect(),
            favorites: favorites
                .iter()
                .map(|row| (row.episode_id, true))
                .collect::<HashMap<_, _>>(),
        })
    }

    // ------------------------------------------
    // Favorites
    // ------------------------------------------

    pub async fn is_favorite(&self, id: EpisodeId) -> bool {
        match self.remote_is_favorite(id).await {
            Ok(favorite) => favorite,
            Err(e) => {
                tracing::warn!(episode = id, error = %e, "favorite check failed, using local store");
                self.local.is_favorite(id)
            }
        }
    }

    async fn remote_is_favorite(&self, id: EpisodeId) -> StoreResult<bool> {
        let query = Query::table(FAVORITES_TABLE)
            .select("episode_id")
            .eq("episode_id", id)
            .eq("user_ip", &self.user_id);
        let rows: Vec<FavoriteRow> = self.fetch(&query).await?;
        Ok(!rows.is_empty())
    }

    /// Flips the favorite flag and returns the new value.
    pub async fn toggle_favorite(&self, id: EpisodeId) -> bool {
        match self.remote_toggle_favorite(id).await {
            Ok(favorite) => favorite,
            Err(e) => {
                tracing::warn!(episode = id, error = %e, "favorite toggle failed, using local store");
                let favorite = !self.local.is_favorite(id);
                if let Err(e) = self.local.set_favorite(id, favorite) {
                    tracing::error!(episode = id, error = %e, "failed to store favorite locally");
                }
                favorite
            }
        }
    }

    async fn remote_toggle_favorite(&self, id: EpisodeId) -> StoreResult<bool> {
        let rest = self.rest()?;
        if self.remote_is_favorite(id).await? {
            let query = Query::table(FAVORITES_TABLE)
                .eq("episode_id", id)
                .eq("user_ip", &self.user_id);
            rest.delete(&query).await?;
            Ok(false)
        } else {
            let row = FavoriteRow {
                episode_id: id,
                user_ip: self.user_id.clone(),
            };
            rest.insert(FAVORITES_TABLE, &row).await?;
            Ok(true)
        }
    }

    pub async fn favorite_episodes(&self) -> Vec<Episode> {
        let query = Query::table(FAVORITES_TABLE)
            .select("episode_id")
            .eq("user_ip", &self.user_id);
        let ids = match self.fetch::<FavoriteRow>(&query).await {
            Ok(rows) => rows.into_iter().map(|r| r.episode_id).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "favorites unavailable, using local store");
                self.local.favorite_ids()
            }
        };
        self.episodes_with_ids(ids).await
    }

    // ------------------------------------------
    // Progress
    // ------------------------------------------

    pub async fn save_progress(&self, id: EpisodeId, percent: u8, position: f64) {
        let percent = percent.min(100);
        let row = HistoryRow {
            episode_id: id,
            user_ip: self.user_id.clone(),
            progress_percent: f64::from(percent),
            current_position: position.max(0.0),
            updated_at: Some(chrono::Utc::now().to_rfc3339()),
        };
        let result = match self.rest() {
            Ok(rest) => rest.upsert(HISTORY_TABLE, &row, "episode_id,user_ip").await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(episode = id, error = %e, "progress save failed, storing locally");
            if let Err(e) = self.local.set_progress(id, row.entry()) {
                tracing::error!(episode = id, error = %e, "failed to store progress locally");
            }
        } else {
            tracing::debug!(episode = id, percent, position, "progress saved");
        }
    }

    // Backend first; the local store answers when there is no row or no backend
    pub async fn progress(&self, id: EpisodeId) -> Option<ProgressEntry> {
        let query = Query::table(HISTORY_TABLE)
            .select("*")
            .eq("episode_id", id)
            .eq("user_ip", &self.user_id);
        match self.fetch::<HistoryRow>(&query).await {
            Ok(rows) => rows
                .first()
                .map(HistoryRow::entry)
                .or_else(|| self.local.progress(id)),
            Err(e) => {
                tracing::warn!(episode = id, error = %e, "progress unavailable, using local store");
                self.local.progress(id)
            }
        }
    }

    pub async fn in_progress_episodes(&self) -> Vec<Episode> {
        let query = Query::table(HISTORY_TABLE)
            .select("episode_id,progress_percent,current_position")
            .eq("user_ip", &self.user_id)
            .or(&["progress_percent.gt.0", "current_position.gt.0"])
            .lt("progress_percent", 100);
        let ids = match self.fetch::<HistoryRow>(&query).await {
            Ok(rows) => rows.into_iter().map(|r| r.episode_id).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "history unavailable, using local store");
                self.local.in_progress_ids()
            }
        };
        self.episodes_with_ids(ids).await
    }

    pub async fn completed_episodes(&self) -> Vec<Episode> {
        let query = Query::table(HISTORY_TABLE)
            .select("episode_id")
            .eq("user_ip", &self.user_id)
            .eq("progress_percent", 100);
        let ids = match self.fetch::<HistoryRow>(&query).await {
            Ok(rows) => rows.into_iter().map(|r| r.episode_id).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "history unavailable, using local store");
                self.local.completed_ids()
            }
        };
        self.episodes_with_ids(ids).await
    }

    async fn episodes_with_ids(&self, ids: Vec<EpisodeId>) -> Vec<Episode> {
        if ids.is_empty() {
            return Vec::new();
        }
        listing::filter_ids(self.all_episodes().await, &ids)
    }
}

impl PlayerBackend for PodcastService {
    fn persist_progress(&self, save: ProgressSave) -> impl Future<Output = ()> + Send {
        async move {
            self.save_progress(save.episode_id, save.percent, save.position)
                .await
        }
    }

    fn fetch_related(&self, area: &str) -> impl Future<Output = Vec<Episode>> + Send {
        let area = area.to_string();
        async move { self.episodes_by_area(&area).await }
    }
}
