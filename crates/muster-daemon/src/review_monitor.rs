//! Review state transitions.
//!
//! Compares each instance's freshly fetched review status against the last
//! observed one and emits at-most-once transition notifications: checks
//! newly failing, checks newly passing (only when checks exist), and
//! mergeability newly conflicting. A state that persists across polls never
//! re-fires.

use std::collections::HashMap;

use muster_core::schema::{CheckConclusion, Mergeability, ReviewStatus, StoreEvent};

/// A state change worth telling the user about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    ChecksFailed,
    ChecksPassed,
    MergeBlocked,
}

impl Transition {
    pub fn kind(self) -> &'static str {
        match self {
            Self::ChecksFailed => "checksFailed",
            Self::ChecksPassed => "checksPassed",
            Self::MergeBlocked => "mergeConflict",
        }
    }

    /// Build the notification event for this transition.
    pub fn to_event(self, path: &str, instance_name: &str, review: &ReviewStatus) -> StoreEvent {
        let (title, body) = match self {
            Self::ChecksFailed => (
                format!("Checks failing on {instance_name}"),
                format!("PR #{} \"{}\" has failing checks", review.number, review.title),
            ),
            Self::ChecksPassed => (
                format!("Checks passed on {instance_name}"),
                format!("PR #{} \"{}\" is green", review.number, review.title),
            ),
            Self::MergeBlocked => (
                format!("Merge conflict on {instance_name}"),
                format!("PR #{} \"{}\" has conflicts", review.number, review.title),
            ),
        };
        StoreEvent::Notification {
            kind: self.kind().to_string(),
            title,
            body,
            path: path.to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Observed {
    conclusion: Option<CheckConclusion>,
    mergeable: Option<Mergeability>,
    has_checks: bool,
}

impl Observed {
    fn of(review: Option<&ReviewStatus>) -> Self {
        match review {
            Some(review) => Self {
                conclusion: review.conclusion(),
                mergeable: review.mergeable,
                has_checks: review.has_checks(),
            },
            None => Self::default(),
        }
    }
}

/// Per-instance previous-state map driving fire-once transitions.
#[derive(Debug, Default)]
pub struct ReviewMonitor {
    previous: HashMap<String, Observed>,
}

impl ReviewMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh observation and return the transitions it caused.
    pub fn observe(&mut self, path: &str, review: Option<&ReviewStatus>) -> Vec<Transition> {
        let current = Observed::of(review);
        let previous = self.previous.get(path).cloned().unwrap_or_default();

        let mut transitions = Vec::new();
        if current.conclusion == Some(CheckConclusion::Failure)
            && previous.conclusion != Some(CheckConclusion::Failure)
        {
            transitions.push(Transition::ChecksFailed);
        }
        if current.conclusion == Some(CheckConclusion::Success)
            && previous.conclusion != Some(CheckConclusion::Success)
            && current.has_checks
        {
            transitions.push(Transition::ChecksPassed);
        }
        if current.mergeable == Some(Mergeability::Conflicting)
            && previous.mergeable != Some(Mergeability::Conflicting)
        {
            transitions.push(Transition::MergeBlocked);
        }

        self.previous.insert(path.to_string(), current);
        transitions
    }

    /// Drop state for a removed instance.
    pub fn forget(&mut self, path: &str) {
        self.previous.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::schema::{Checks, ReviewState};

    const PATH: &str = "/home/dev/proj";

    fn review(passing: u32, failing: u32, pending: u32, mergeable: Mergeability) -> ReviewStatus {
        ReviewStatus {
            number: 7,
            title: "Change".to_string(),
            url: "https://example.com/pr/7".to_string(),
            state: ReviewState::Open,
            mergeable: Some(mergeable),
            checks: Some(Checks::from_counts(passing, failing, pending, Vec::new())),
        }
    }

    #[test]
    fn failure_transition_fires_exactly_once() {
        let mut monitor = ReviewMonitor::new();
        let green = review(4, 0, 0, Mergeability::Mergeable);
        let red = review(3, 1, 0, Mergeability::Mergeable);

        // First observation is already a success transition baseline.
        monitor.observe(PATH, Some(&green));
        let first = monitor.observe(PATH, Some(&red));
        assert_eq!(first, vec![Transition::ChecksFailed]);

        // Still failing on the next poll: no re-fire.
        let second = monitor.observe(PATH, Some(&red));
        assert!(second.is_empty());
    }

    #[test]
    fn success_transition_requires_at_least_one_check() {
        let mut monitor = ReviewMonitor::new();
        let zero_checks = review(0, 0, 0, Mergeability::Mergeable);
        // Zero-check PRs roll up as success but must not notify.
        assert!(monitor.observe(PATH, Some(&zero_checks)).is_empty());

        let mut monitor = ReviewMonitor::new();
        let pending = review(3, 0, 1, Mergeability::Mergeable);
        let green = review(4, 0, 0, Mergeability::Mergeable);
        monitor.observe(PATH, Some(&pending));
        assert_eq!(
            monitor.observe(PATH, Some(&green)),
            vec![Transition::ChecksPassed]
        );
    }

    #[test]
    fn merge_blocked_fires_on_newly_conflicting() {
        let mut monitor = ReviewMonitor::new();
        let ok = review(4, 0, 0, Mergeability::Mergeable);
        let conflicting = review(4, 0, 0, Mergeability::Conflicting);

        monitor.observe(PATH, Some(&ok));
        let transitions = monitor.observe(PATH, Some(&conflicting));
        assert_eq!(transitions, vec![Transition::MergeBlocked]);
        assert!(monitor.observe(PATH, Some(&conflicting)).is_empty());
    }

    #[test]
    fn pending_conclusion_fires_nothing() {
        let mut monitor = ReviewMonitor::new();
        let pending = review(4, 0, 1, Mergeability::Mergeable);
        assert!(monitor.observe(PATH, Some(&pending)).is_empty());
        assert!(monitor.observe(PATH, Some(&pending)).is_empty());
    }

    #[test]
    fn pr_disappearing_then_failing_fires_again() {
        let mut monitor = ReviewMonitor::new();
        let red = review(0, 1, 0, Mergeability::Mergeable);

        assert_eq!(
            monitor.observe(PATH, Some(&red)),
            vec![Transition::ChecksFailed]
        );
        monitor.observe(PATH, None);
        assert_eq!(
            monitor.observe(PATH, Some(&red)),
            vec![Transition::ChecksFailed]
        );
    }

    #[test]
    fn notification_event_carries_kind_and_path() {
        let red = review(0, 1, 0, Mergeability::Mergeable);
        let event = Transition::ChecksFailed.to_event(PATH, "proj", &red);
        match event {
            StoreEvent::Notification { kind, path, .. } => {
                assert_eq!(kind, "checksFailed");
                assert_eq!(path, PATH);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
