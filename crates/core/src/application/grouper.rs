//! Grouper - one active job per unique schedule
//!
//! Rows sharing a schedule expression are redundant definitions of the same
//! job. Only the lowest id of each group is ever scheduled, fleet-wide.

use crate::domain::{ScheduleExpression, Task};
use std::collections::BTreeMap;
use tracing::debug;

/// Partition tasks by normalized schedule expression.
///
/// Each group is ordered by id ascending.
pub fn group_by_schedule(tasks: &[Task]) -> BTreeMap<String, Vec<Task>> {
    let mut groups: BTreeMap<String, Vec<Task>> = BTreeMap::new();
    for task in tasks {
        groups
            .entry(ScheduleExpression::normalize(&task.schedule_expression))
            .or_default()
            .push(task.clone());
    }
    for group in groups.values_mut() {
        group.sort_by_key(|t| t.id);
    }
    groups
}

/// The representative (lowest id) of every schedule group, ordered by id
pub fn select_representatives(tasks: &[Task]) -> Vec<Task> {
    let groups = group_by_schedule(tasks);
    let mut representatives: Vec<Task> = groups
        .into_iter()
        .filter_map(|(schedule, mut group)| {
            if group.len() > 1 {
                debug!(
                    schedule = %schedule,
                    duplicates = group.len() - 1,
                    "Ignoring duplicate task definitions"
                );
            }
            if group.is_empty() {
                None
            } else {
                Some(group.swap_remove(0))
            }
        })
        .collect();
    representatives.sort_by_key(|t| t.id);
    representatives
}
