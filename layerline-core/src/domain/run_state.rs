// layerline-core/src/domain/run_state.rs

use serde::Serialize;
use std::fmt;

use crate::domain::error::DomainError;
use crate::domain::job::Layer;

/// Where a job run stands. Stages run strictly in layer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Pending,
    RunningRaw,
    RunningCurated,
    RunningProcessed,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn running(stage: Layer) -> Self {
        match stage {
            Layer::Raw => RunState::RunningRaw,
            Layer::Curated => RunState::RunningCurated,
            Layer::Processed => RunState::RunningProcessed,
        }
    }

    pub fn stage(&self) -> Option<Layer> {
        match self {
            RunState::RunningRaw => Some(Layer::Raw),
            RunState::RunningCurated => Some(Layer::Curated),
            RunState::RunningProcessed => Some(Layer::Processed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    pub fn can_transition_to(&self, next: &RunState) -> bool {
        match (self, next) {
            (Self::Pending, Self::RunningRaw) => true,
            (Self::RunningRaw, Self::RunningCurated) => true,
            (Self::RunningCurated, Self::RunningProcessed) => true,
            (Self::RunningProcessed, Self::Succeeded) => true,

            // Configuration failures stop a run before any stage starts.
            (Self::Pending, Self::Failed) => true,
            (s, Self::Failed) => s.stage().is_some(),

            // No self-loops and nothing leaves a terminal state.
            _ => false,
        }
    }

    pub fn transition(&mut self, next: RunState) -> Result<(), DomainError> {
        if !self.can_transition_to(&next) {
            return Err(DomainError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Pending => "Pending",
            RunState::RunningRaw => "RunningRaw",
            RunState::RunningCurated => "RunningCurated",
            RunState::RunningProcessed => "RunningProcessed",
            RunState::Succeeded => "Succeeded",
            RunState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = RunState::Pending;
        for stage in Layer::ALL {
            state.transition(RunState::running(stage)).unwrap();
            assert_eq!(state.stage(), Some(stage));
        }
        state.transition(RunState::Succeeded).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_stages_cannot_be_skipped() {
        let mut state = RunState::Pending;
        assert!(state.transition(RunState::RunningCurated).is_err());
        state.transition(RunState::RunningRaw).unwrap();
        assert!(state.transition(RunState::Succeeded).is_err());
        assert!(state.transition(RunState::RunningRaw).is_err());
    }

    #[test]
    fn test_failed_reachable_from_running_states_only() {
        for stage in Layer::ALL {
            assert!(RunState::running(stage).can_transition_to(&RunState::Failed));
        }
        assert!(!RunState::Succeeded.can_transition_to(&RunState::Failed));
        assert!(!RunState::Failed.can_transition_to(&RunState::Failed));
        assert!(!RunState::Failed.can_transition_to(&RunState::RunningRaw));
    }
}
