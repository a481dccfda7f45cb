//! Target lifecycle states and the transition table from spec.md §4.2.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TargetState {
    #[default]
    /// Declared, not needed by this command.
    Inactive,
    /// Reachable only via a test-only path.
    Semiactive,
    /// On the critical path for this command.
    Active,
    /// All dependencies built, build task queued.
    Pending,
    /// Build task running.
    Building,
    /// Outputs exist and hashes verified.
    Built,
    /// Outputs taken from cache verbatim.
    Reused,
    /// Reused and fully validated; terminal.
    Cached,
    /// Test phase complete; terminal.
    Tested,
    /// Test phase failed after flake retries exhausted; terminal.
    TestFailed,
    /// Build command failed; terminal.
    BuildFailed,
    /// Abandoned due to upstream failure, a dependency cycle, or a kill; terminal.
    Stopped,
}

impl TargetState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TargetState::Cached
                | TargetState::Tested
                | TargetState::TestFailed
                | TargetState::BuildFailed
                | TargetState::Stopped
        )
    }

    /// Whether `self -> next` is a legal transition per the spec.md §4.2 table.
    ///
    /// `TestFailed`'s stated predecessor in that table is `Building`, but
    /// §4.6 establishes that tests only run once a target is `Built` — the
    /// same predecessor `Tested` and `Cached` use. Resolved here in favor of
    /// the narrative text: `Built -> TestFailed` is legal, `Building ->
    /// TestFailed` is not.
    pub fn can_transition_to(self, next: TargetState) -> bool {
        use TargetState::*;
        if next == Stopped {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Inactive, Semiactive)
                | (Inactive, Active)
                | (Semiactive, Active)
                | (Active, Pending)
                | (Pending, Building)
                | (Building, Built)
                | (Building, BuildFailed)
                | (Built, Tested)
                | (Built, Reused)
                | (Built, Cached)
                | (Built, TestFailed)
                | (Reused, Tested)
                | (Reused, Cached)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TargetState::*;

    #[test]
    fn inactive_can_become_semiactive_or_active() {
        assert!(Inactive.can_transition_to(Semiactive));
        assert!(Inactive.can_transition_to(Active));
        assert!(!Inactive.can_transition_to(Pending));
    }

    #[test]
    fn any_non_terminal_state_can_stop() {
        for s in [Inactive, Semiactive, Active, Pending, Building, Built, Reused] {
            assert!(s.can_transition_to(Stopped), "{s:?} -> Stopped should be legal");
        }
    }

    #[test]
    fn terminal_states_cannot_stop_again() {
        for s in [Cached, Tested, TestFailed, BuildFailed, Stopped] {
            assert!(s.is_terminal());
            assert!(!s.can_transition_to(Stopped));
        }
    }

    #[test]
    fn built_can_reach_tested_reused_cached_or_test_failed() {
        assert!(Built.can_transition_to(Tested));
        assert!(Built.can_transition_to(Reused));
        assert!(Built.can_transition_to(Cached));
        assert!(Built.can_transition_to(TestFailed));
    }

    #[test]
    fn building_cannot_skip_straight_to_tested() {
        assert!(!Building.can_transition_to(Tested));
        assert!(!Building.can_transition_to(TestFailed));
    }
}
