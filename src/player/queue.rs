// ==========================================
// QUEUE AND AUTO-ADVANCE POLICY
// ==========================================
// Two orderings decide what plays next:
//
// theme sequence
//   - every episode sharing the current episode's theme, in sequence order
//   - walked forward on completion and by "next", backward by "previous"
//
// manual queue
//   - ad hoc order, built by the user or seeded from related episodes
//   - only consulted when the theme sequence has nothing further
//
// Everything here is pure: the controller feeds in state and the episodes
// fetched for the current area, and applies the answer through the reducer.

use std::sync::Arc;

use super::state::PlaybackState;
use crate::catalog::listing::compare_episodes;
use crate::catalog::{Episode, EpisodeId};

// ==========================================
// THEME SEQUENCE: theme_sequence()
// ==========================================
// Builds the ordered sequence for `current` out of the area's episodes.
// The current episode is always part of its own sequence, even if the
// area query didn't return it.
pub fn theme_sequence(current: &Arc<Episode>, area_episodes: &[Episode]) -> Vec<Arc<Episode>> {
    let mut sequence: Vec<Arc<Episode>> = area_episodes
        .iter()
        .filter(|ep| ep.same_theme(current) && ep.id != current.id)
        .map(|ep| Arc::new(ep.clone()))
        .collect();
    sequence.push(Arc::clone(current));
    sequence.sort_by(|a, b| compare_episodes(a, b));
    sequence.dedup_by_key(|ep| ep.id);
    sequence
}

pub fn successors(sequence: &[Arc<Episode>], id: EpisodeId) -> &[Arc<Episode>] {
    match sequence.iter().position(|ep| ep.id == id) {
        Some(index) => &sequence[index + 1..],
        None => &[],
    }
}

pub fn predecessor(sequence: &[Arc<Episode>], id: EpisodeId) -> Option<Arc<Episode>> {
    match sequence.iter().position(|ep| ep.id == id) {
        Some(index) if index > 0 => Some(Arc::clone(&sequence[index - 1])),
        _ => None,
    }
}

// ==========================================
// NEXT EPISODE: next_episode()
// ==========================================
// Theme order wins over the manual queue. The two sources never both
// apply to one transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    ThemeSuccessor(Arc<Episode>),
    QueueHead(Arc<Episode>),
    Nothing,
}

pub fn next_episode(state: &PlaybackState) -> Advance {
    let Some(current) = &state.current_episode else {
        return match state.queue.first() {
            Some(head) => Advance::QueueHead(Arc::clone(head)),
            None => Advance::Nothing,
        };
    };
    if let Some(next) = successors(&state.theme_sequence, current.id).first() {
        return Advance::ThemeSuccessor(Arc::clone(next));
    }
    match state.queue.first() {
        Some(head) => Advance::QueueHead(Arc::clone(head)),
        None => Advance::Nothing,
    }
}

// ==========================================
// QUEUE SEEDING: plan_queue()
// ==========================================
// What to do with the manual queue once related episodes arrive:
// - further episodes in the theme → queue up to `limit` of them
// - otherwise, and only if the queue is empty → up to `limit` episodes
//   from the same area but another theme
// A queue the user built is never overwritten by the fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuePlan {
    Replace(Vec<Arc<Episode>>),
    Keep,
}

pub fn plan_queue(
    current: &Episode,
    sequence: &[Arc<Episode>],
    area_episodes: &[Episode],
    queue_is_empty: bool,
    limit: usize,
) -> QueuePlan {
    let ahead = successors(sequence, current.id);
    if !ahead.is_empty() {
        return QueuePlan::Replace(ahead.iter().take(limit).cloned().collect());
    }
    if !queue_is_empty {
        return QueuePlan::Keep;
    }
    let others: Vec<Arc<Episode>> = area_episodes
        .iter()
        .filter(|ep| ep.id != current.id && !ep.same_theme(current))
        .take(limit)
        .map(|ep| Arc::new(ep.clone()))
        .collect();
    if others.is_empty() {
        QueuePlan::Keep
    } else {
        QueuePlan::Replace(others)
    }
}
