use crate::domain::models::Task;

/// Returns the earliest-starting pending task whose window intersects the
/// candidate's, or `None` when the candidate is a Pomodoro task.
///
/// Only pending, non-Pomodoro, non-grouped tasks other than the candidate
/// itself take part. A timed candidate without a start time is rejected.
pub fn check_conflict<'a>(candidate: &Task, existing: &'a [Task]) -> Result<Option<&'a Task>, String> {
    if candidate.is_pomodoro {
        return Ok(None);
    }
    let window = candidate
        .window()
        .ok_or_else(|| format!("task {} has no start time to check", candidate.id))?;

    let conflict = existing
        .iter()
        .filter(|task| task.id != candidate.id)
        .filter(|task| task.is_pending() && !task.is_pomodoro && task.group_id.is_none())
        .filter_map(|task| task.window().map(|other| (task, other)))
        .filter(|(_, other)| window.overlaps(other))
        .min_by(|(left, left_window), (right, right_window)| {
            left_window
                .start
                .cmp(&right_window.start)
                .then_with(|| left.id.cmp(&right.id))
        })
        .map(|(task, _)| task);

    Ok(conflict)
}
