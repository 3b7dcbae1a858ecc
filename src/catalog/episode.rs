// Episode model and the backend row it is built from.
//
// The backend row only carries catalog data. Per-user progress and the
// favorite flag live in separate tables and are joined in at read time
// (see `UserData`), so an `Episode` is a materialized view for one user.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type EpisodeId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub title: String,
    pub description: String,
    pub area: String,
    pub theme: String,
    pub tags: Vec<String>,
    pub audio_url: String,
    pub thumbnail_url: String,
    // Sequence marker inside a theme, usually numeric ("1", "12") but not always
    pub sequence: String,
    pub published: String,
    // 0..=100 for the current anonymous user
    pub progress: u8,
    pub favorite: bool,
    pub comments: u32,
    pub likes: u32,
}

impl Episode {
    pub fn is_completed(&self) -> bool {
        self.progress >= 100
    }

    pub fn same_theme(&self, other: &Episode) -> bool {
        normalize_label(&self.theme) == normalize_label(&other.theme)
    }
}

pub(crate) fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

// `tag` is stored inconsistently: a plain string, an array, or null.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TagField {
    #[default]
    Missing,
    One(String),
    Many(Vec<String>),
}

impl TagField {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            TagField::Missing => Vec::new(),
            TagField::One(tag) if tag.trim().is_empty() => Vec::new(),
            TagField::One(tag) => vec![tag],
            TagField::Many(tags) => tags,
        }
    }
}

/// A row of the episode table as the backend returns it.
#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeRow {
    pub id: EpisodeId,
    #[serde(default)]
    pub titulo: String,
    #[serde(default)]
    pub descricao: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub tema: String,
    #[serde(default, deserialize_with = "nullable_tags")]
    pub tag: TagField,
    #[serde(default)]
    pub url_audio: String,
    #[serde(default)]
    pub imagem_miniatura: String,
    #[serde(default, deserialize_with = "nullable_sequence")]
    pub sequencia: String,
    #[serde(default)]
    pub data_publicacao: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub comentarios: Option<u32>,
    #[serde(default)]
    pub curtidas: Option<u32>,
}

fn nullable_tags<'de, D>(deserializer: D) -> Result<TagField, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<TagField>::deserialize(deserializer)?.unwrap_or_default())
}

// Some rows store the sequence as a JSON number
fn nullable_sequence<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

impl EpisodeRow {
    pub fn into_episode(self, user: &UserData) -> Episode {
        let published = self
            .data_publicacao
            .filter(|d| !d.trim().is_empty())
            .or(self.data.filter(|d| !d.trim().is_empty()))
            .unwrap_or_else(today);

        Episode {
            progress: user.progress_for(self.id),
            favorite: user.is_favorite(self.id),
            id: self.id,
            title: self.titulo,
            description: self.descricao,
            area: self.area,
            theme: self.tema,
            tags: self.tag.into_vec(),
            audio_url: self.url_audio,
            thumbnail_url: self.imagem_miniatura,
            sequence: self.sequencia,
            published,
            comments: self.comentarios.unwrap_or(0),
            likes: self.curtidas.unwrap_or(0),
        }
    }
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Progress and favorites of one user, keyed by episode id.
#[derive(Debug, Clone, Default)]
pub struct UserData {
    pub progress: HashMap<EpisodeId, ProgressEntry>,
    pub favorites: HashMap<EpisodeId, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub percent: u8,
    pub position: f64,
}

impl UserData {
    // A listen that never got past 0% but has a position still counts as started
    pub fn progress_for(&self, id: EpisodeId) -> u8 {
        match self.progress.get(&id) {
            Some(entry) if entry.percent > 0 => entry.percent.min(100),
            Some(entry) if entry.position > 0.0 => 1,
            _ => 0,
        }
    }

    pub fn is_favorite(&self, id: EpisodeId) -> bool {
        self.favorites.get(&id).copied().unwrap_or(false)
    }
}

pub fn materialize(rows: Vec<EpisodeRow>, user: &UserData) -> Vec<Episode> {
    rows.into_iter().map(|row| row.into_episode(user)).collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn episode(id: EpisodeId, area: &str, theme: &str, sequence: &str) -> Episode {
        Episode {
            id,
            title: format!("Episode {id}"),
            description: String::new(),
            area: area.to_string(),
            theme: theme.to_string(),
            tags: Vec::new(),
            audio_url: format!("https://cdn.example/audio/{id}.mp3"),
            thumbnail_url: String::new(),
            sequence: sequence.to_string(),
            published: "2024-01-01".to_string(),
            progress: 0,
            favorite: false,
            comments: 0,
            likes: 0,
        }
    }
}
