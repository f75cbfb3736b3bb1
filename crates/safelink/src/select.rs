//! Destination selection among weighted, prioritized candidates.
//!
//! Three strategies keyed by the configured rule type:
//! - `static_route`: highest-priority active candidate (priority ascending,
//!   weight descending as the tiebreak)
//! - `random_route`: weighted random draw over cumulative weight bands
//! - `mute_unmute`: a persisted two-state duty cycle that alternates
//!   between serving (static-style) and returning no target
//!
//! An unknown rule type falls back to the first active candidate and never
//! errors.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;

use crate::store::{CycleState, MuteState};

/// One candidate destination, supplied by configuration per decision.
/// The selector never mutates the collection.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingTarget {
    pub url: String,
    pub weight: u32,
    pub priority: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Duty-cycle durations in seconds: how long to stay in each phase.
#[derive(Debug, Clone, Copy)]
pub struct DutyCycle {
    pub mute_duration: i64,
    pub unmute_duration: i64,
}

/// Result of one selection: the chosen URL (if any) and whether the
/// duty-cycle state was modified and needs persisting.
#[derive(Debug, Clone)]
pub struct Selection {
    pub url: Option<String>,
    pub state_changed: bool,
}

impl Selection {
    fn unchanged(url: Option<String>) -> Self {
        Self {
            url,
            state_changed: false,
        }
    }
}

/// Select a destination URL under the given rule type.
///
/// `state` is the duty-cycle state for `mute_unmute`; the same `now`
/// snapshot drives both the toggle check and the selection so the two can
/// never disagree. When `state_changed` comes back true the caller must
/// persist `state` before releasing its lock.
pub fn select_target(
    rule_type: &str,
    candidates: &[RoutingTarget],
    state: &mut MuteState,
    duty: DutyCycle,
    now: DateTime<Utc>,
) -> Selection {
    let active: Vec<&RoutingTarget> = candidates.iter().filter(|t| t.active).collect();
    if active.is_empty() {
        return Selection::unchanged(None);
    }

    match rule_type {
        "static_route" => Selection::unchanged(select_static(&active)),
        "random_route" => Selection::unchanged(select_random(&active)),
        "mute_unmute" => {
            let state_changed = duty_cycle_tick(state, duty, now);
            let url = match state.current_state {
                Some(CycleState::Unmute) => select_static(&active),
                _ => None,
            };
            Selection { url, state_changed }
        }
        // Unknown rule type: static-like default, never an error
        _ => Selection::unchanged(Some(active[0].url.clone())),
    }
}

/// Priority ascending, weight descending; first wins.
fn select_static(active: &[&RoutingTarget]) -> Option<String> {
    let mut sorted = active.to_vec();
    sorted.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(b.weight.cmp(&a.weight))
    });
    sorted.first().map(|t| t.url.clone())
}

/// Cumulative-weight draw: a uniform integer in [1, totalWeight] falls into
/// exactly one candidate's band, so selection probability is proportional
/// to weight. Falls back to a uniform pick if the walk fails to resolve.
fn select_random(active: &[&RoutingTarget]) -> Option<String> {
    let total_weight: u64 = active.iter().map(|t| u64::from(t.weight)).sum();
    if total_weight == 0 {
        return None;
    }

    let mut rng = rand::thread_rng();
    let draw = rng.gen_range(1..=total_weight);
    let mut cumulative = 0u64;
    for target in active {
        cumulative += u64::from(target.weight);
        if draw <= cumulative {
            return Some(target.url.clone());
        }
    }

    // Unreachable given a correct total, kept as a uniform fallback
    let idx = rng.gen_range(0..active.len());
    Some(active[idx].url.clone())
}

/// Advance the duty cycle if due. Returns true when `state` was modified.
///
/// With no recorded toggle the cycle bootstraps to unmute at `now`. Once a
/// phase has run for its configured duration the state flips and the
/// toggle timestamp resets to `now`.
fn duty_cycle_tick(state: &mut MuteState, duty: DutyCycle, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    let last_toggle = match state.last_toggle_time {
        Some(t) => t,
        None => {
            state.current_state = Some(CycleState::Unmute);
            state.last_toggle_time = Some(now);
            return true;
        }
    };

    let current = state.current_state.unwrap_or(CycleState::Normal);
    let duration = match current {
        CycleState::Mute => duty.mute_duration,
        _ => duty.unmute_duration,
    };

    if (now - last_toggle).num_seconds() >= duration {
        let next = match current {
            CycleState::Mute => CycleState::Unmute,
            _ => CycleState::Mute,
        };
        state.current_state = Some(next);
        state.last_toggle_time = Some(now);
        changed = true;
    }

    changed
}
