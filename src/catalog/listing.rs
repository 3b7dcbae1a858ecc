// Catalog views derived from episode lists: sequence ordering, area and
// theme cards, featured and recent episodes, "new" badges.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::episode::{Episode, EpisodeId};

pub const FEATURED_LIMIT: usize = 6;
pub const RECENT_LIMIT: usize = 8;
pub const NEW_EPISODE_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct AreaCard {
    pub id: usize,
    pub name: String,
    pub episode_count: usize,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThemeCard {
    pub name: String,
    pub episode_count: usize,
    pub slug: String,
    pub area: String,
}

// Sort key of a sequence marker. Variant order is the sort order:
// numbers, then text, then empty markers.
#[derive(Debug)]
enum SequenceKey<'a> {
    Number(f64),
    Text(&'a str),
    Empty,
}

impl<'a> SequenceKey<'a> {
    fn of(marker: &'a str) -> Self {
        let marker = marker.trim();
        if marker.is_empty() {
            return SequenceKey::Empty;
        }
        // "nan" and "inf" parse as floats but aren't positions
        match marker.parse::<f64>() {
            Ok(n) if n.is_finite() => SequenceKey::Number(n),
            _ => SequenceKey::Text(marker),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SequenceKey::Number(_) => 0,
            SequenceKey::Text(_) => 1,
            SequenceKey::Empty => 2,
        }
    }
}

// Numbers compare numerically and come before text markers. Empty markers sort last.
pub fn compare_sequence(a: &str, b: &str) -> Ordering {
    match (SequenceKey::of(a), SequenceKey::of(b)) {
        (SequenceKey::Number(x), SequenceKey::Number(y)) => x.total_cmp(&y),
        (SequenceKey::Text(x), SequenceKey::Text(y)) => x.cmp(y),
        (x, y) => x.rank().cmp(&y.rank()),
    }
}

pub fn compare_episodes(a: &Episode, b: &Episode) -> Ordering {
    compare_sequence(&a.sequence, &b.sequence).then_with(|| a.id.cmp(&b.id))
}

pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Turns a URL slug back into the label stored in the backend,
/// e.g. `direito-penal` into `Direito Penal`.
pub fn title_case_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// Accepts RFC 3339, plain ISO dates and the Brazilian dd/mm/yyyy form
pub fn parse_publication_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok()
}

pub fn is_recent(published: &str, today: NaiveDate) -> bool {
    match parse_publication_date(published) {
        Some(date) => (today - date).num_days() <= NEW_EPISODE_DAYS,
        None => {
            tracing::debug!(published, "unparseable publication date, not marking as new");
            false
        }
    }
}

pub fn recent_episodes(episodes: &[Episode]) -> Vec<Episode> {
    let mut dated: Vec<(Option<NaiveDate>, &Episode)> = episodes
        .iter()
        .map(|ep| (parse_publication_date(&ep.published), ep))
        .collect();

    // Undated episodes go after dated ones, newest sequence first
    dated.sort_by(|(da, a), (db, b)| match (da, db) {
        (Some(da), Some(db)) => db.cmp(da),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => compare_sequence(&b.sequence, &a.sequence),
    });

    dated
        .into_iter()
        .take(RECENT_LIMIT)
        .map(|(_, ep)| ep.clone())
        .collect()
}

// First episode of every area (input is expected in sequence order)
pub fn featured_episodes(episodes: &[Episode]) -> Vec<Episode> {
    let mut firsts: Vec<&Episode> = Vec::new();
    for episode in episodes {
        if !firsts.iter().any(|seen| seen.area == episode.area) {
            firsts.push(episode);
        }
    }
    firsts.sort_by(|a, b| compare_sequence(&b.sequence, &a.sequence));
    firsts
        .into_iter()
        .take(FEATURED_LIMIT)
        .cloned()
        .collect()
}

pub fn area_cards<'a, I>(areas: I) -> Vec<AreaCard>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for area in areas {
        if !area.is_empty() {
            *counts.entry(area.to_string()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(index, (name, episode_count))| AreaCard {
            id: index + 1,
            slug: slugify(&name),
            name,
            episode_count,
        })
        .collect()
}

pub fn theme_cards<'a, I>(themes: I, area_label: &str) -> Vec<ThemeCard>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for theme in themes {
        if !theme.is_empty() {
            *counts.entry(theme.to_string()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|(name, episode_count)| ThemeCard {
            slug: slugify(&name),
            name,
            episode_count,
            area: area_label.to_string(),
        })
        .collect()
}

pub fn filter_ids(episodes: Vec<Episode>, ids: &[EpisodeId]) -> Vec<Episode> {
    episodes
        .into_iter()
        .filter(|ep| ids.contains(&ep.id))
        .collect()
}
