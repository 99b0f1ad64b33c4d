//! Effective per-part budget.

use crate::config::MapSettings;

/// Budget each part is assembled against.
///
/// The requested budget is raised to the floor. Without focus files it is
/// boosted by `map_mul_no_files`, capped at the room left in the consumer's
/// context window but never below the floored budget. `no_split` disables
/// the bound entirely.
pub fn effective_budget(settings: &MapSettings, has_focus_files: bool) -> usize {
    if settings.no_split {
        return usize::MAX;
    }

    let base = settings.map_tokens.max(settings.min_tokens);
    if has_focus_files {
        return base;
    }

    let boosted = (base as f64 * settings.map_mul_no_files.max(0.0)) as usize;
    let capped = match settings.max_context_window {
        Some(window) => boosted.min(window.saturating_sub(settings.context_window_padding)),
        None => boosted,
    };
    capped.max(base)
}
