//! Goal Scheduler: picks the next goal to become active
//!
//! Selection is a pure query over the goal engine: nothing is dequeued or
//! mutated. Highest priority wins; ties go to the earliest-created goal.

use std::cmp::Reverse;

use crate::goal_engine::{Goal, GoalEngine, GoalMode, GoalStatus};

/// Which goals are eligible for selection
#[derive(Debug, Clone)]
pub struct GoalFilter {
    pub statuses: Vec<GoalStatus>,
    pub mode: Option<GoalMode>,
    pub min_priority: Option<i32>,
}

impl Default for GoalFilter {
    fn default() -> Self {
        Self {
            statuses: vec![GoalStatus::Pending],
            mode: None,
            min_priority: None,
        }
    }
}

impl GoalFilter {
    pub fn with_status(status: GoalStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    fn matches(&self, goal: &Goal) -> bool {
        self.statuses.contains(&goal.status)
            && self.mode.map_or(true, |m| goal.mode == m)
            && self.min_priority.map_or(true, |p| goal.priority >= p)
    }
}

/// Priority-ordered goal selection
#[derive(Debug, Clone, Default)]
pub struct GoalScheduler {
    filter: GoalFilter,
}

impl GoalScheduler {
    pub fn new(filter: GoalFilter) -> Self {
        Self { filter }
    }

    /// Next goal under the scheduler's default filter (Pending)
    pub fn get_next<'a>(&self, engine: &'a GoalEngine) -> Option<&'a Goal> {
        self.get_next_matching(engine, &self.filter)
    }

    /// Next goal under an explicit filter
    pub fn get_next_matching<'a>(
        &self,
        engine: &'a GoalEngine,
        filter: &GoalFilter,
    ) -> Option<&'a Goal> {
        engine
            .list(None)
            .into_iter()
            .filter(|g| filter.matches(g))
            .max_by_key(|g| (g.priority, Reverse(g.sequence)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal_engine::NewGoal;

    #[test]
    fn test_empty_engine_returns_none() {
        let engine = GoalEngine::new();
        assert!(GoalScheduler::default().get_next(&engine).is_none());
    }

    #[test]
    fn test_highest_priority_wins() {
        let mut engine = GoalEngine::new();
        engine.create(NewGoal::new("low", 1)).unwrap();
        let high = engine.create(NewGoal::new("high", 9)).unwrap();
        engine.create(NewGoal::new("mid", 5)).unwrap();

        let next = GoalScheduler::default().get_next(&engine).unwrap();
        assert_eq!(next.id, high.id);
    }

    #[test]
    fn test_ties_go_to_earliest_created() {
        let mut engine = GoalEngine::new();
        let first = engine.create(NewGoal::new("first", 5)).unwrap();
        engine.create(NewGoal::new("second", 5)).unwrap();
        engine.create(NewGoal::new("third", 5)).unwrap();

        let next = GoalScheduler::default().get_next(&engine).unwrap();
        assert_eq!(next.id, first.id);
    }

    #[test]
    fn test_only_pending_by_default() {
        let mut engine = GoalEngine::new();
        let busy = engine.create(NewGoal::new("busy", 10)).unwrap();
        let waiting = engine.create(NewGoal::new("waiting", 1)).unwrap();
        engine.set_active(&busy.id).unwrap();

        let scheduler = GoalScheduler::default();
        assert_eq!(scheduler.get_next(&engine).unwrap().id, waiting.id);

        let in_progress = scheduler
            .get_next_matching(&engine, &GoalFilter::with_status(GoalStatus::InProgress))
            .unwrap();
        assert_eq!(in_progress.id, busy.id);
    }

    #[test]
    fn test_selection_does_not_mutate() {
        let mut engine = GoalEngine::new();
        let goal = engine.create(NewGoal::new("only", 3)).unwrap();
        let scheduler = GoalScheduler::default();

        assert_eq!(scheduler.get_next(&engine).unwrap().id, goal.id);
        assert_eq!(scheduler.get_next(&engine).unwrap().id, goal.id);
        assert_eq!(engine.get(&goal.id).unwrap().status, GoalStatus::Pending);
    }

    #[test]
    fn test_filter_by_mode_and_priority() {
        let mut engine = GoalEngine::new();
        engine.create(NewGoal::new("one-shot", 8)).unwrap();
        let watcher = engine.create(NewGoal::new("watcher", 4).continuous()).unwrap();
        engine.create(NewGoal::new("tiny watcher", 1).continuous()).unwrap();

        let filter = GoalFilter {
            mode: Some(GoalMode::Continuous),
            min_priority: Some(2),
            ..GoalFilter::default()
        };
        let next = GoalScheduler::new(filter.clone()).get_next(&engine).unwrap();
        assert_eq!(next.id, watcher.id);

        let none = GoalFilter {
            min_priority: Some(100),
            ..filter
        };
        assert!(GoalScheduler::default().get_next_matching(&engine, &none).is_none());
    }
}
