use pregel_common::error::{PregelError, PregelResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Default,
    Idle,
    Preparing,
    Computing,
    Recovering,
    Done,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Default => "DEFAULT",
            WorkerState::Idle => "IDLE",
            WorkerState::Preparing => "PREPARING",
            WorkerState::Computing => "COMPUTING",
            WorkerState::Recovering => "RECOVERING",
            WorkerState::Done => "DONE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    Registered,
    PrepareGlobalStep,
    StartGlobalStep,
    JobFinished,
    StartRecovery,
    Compensated,
    Finalize,
    Cancel,
}

impl WorkerState {
    /// The only place worker states change. DONE is terminal.
    pub fn transition(self, event: WorkerEvent) -> PregelResult<WorkerState> {
        use WorkerEvent as E;
        use WorkerState as S;
        let next = match (self, event) {
            (S::Default, E::Registered) => S::Idle,
            (S::Idle, E::PrepareGlobalStep) => S::Preparing,
            (S::Preparing, E::StartGlobalStep) => S::Computing,
            (S::Computing, E::JobFinished) => S::Idle,
            (S::Recovering, E::Compensated) => S::Idle,
            (S::Idle, E::Finalize) => S::Done,
            (S::Done, _) => return Err(illegal(self, event)),
            (_, E::StartRecovery) => S::Recovering,
            (_, E::Cancel) => S::Done,
            _ => return Err(illegal(self, event)),
        };
        Ok(next)
    }

    pub fn is_terminal(self) -> bool {
        self == WorkerState::Done
    }
}

fn illegal(from: WorkerState, event: WorkerEvent) -> PregelError {
    PregelError::IllegalTransition {
        from: from.to_string(),
        event: format!("{event:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superstep_cycle() {
        let s = WorkerState::Default
            .transition(WorkerEvent::Registered)
            .unwrap()
            .transition(WorkerEvent::PrepareGlobalStep)
            .unwrap()
            .transition(WorkerEvent::StartGlobalStep)
            .unwrap();
        assert_eq!(s, WorkerState::Computing);
        assert_eq!(s.transition(WorkerEvent::JobFinished).unwrap(), WorkerState::Idle);
    }

    #[test]
    fn start_requires_prepare() {
        let err = WorkerState::Idle
            .transition(WorkerEvent::StartGlobalStep)
            .unwrap_err();
        assert!(matches!(err, PregelError::IllegalTransition { .. }));
    }

    #[test]
    fn recovery_is_reachable_from_any_live_state() {
        for s in [
            WorkerState::Default,
            WorkerState::Idle,
            WorkerState::Preparing,
            WorkerState::Computing,
            WorkerState::Recovering,
        ] {
            assert_eq!(
                s.transition(WorkerEvent::StartRecovery).unwrap(),
                WorkerState::Recovering
            );
        }
        assert_eq!(
            WorkerState::Recovering
                .transition(WorkerEvent::Compensated)
                .unwrap(),
            WorkerState::Idle
        );
    }

    #[test]
    fn done_is_terminal() {
        for e in [
            WorkerEvent::PrepareGlobalStep,
            WorkerEvent::StartRecovery,
            WorkerEvent::Cancel,
            WorkerEvent::Finalize,
        ] {
            assert!(WorkerState::Done.transition(e).is_err());
        }
    }

    #[test]
    fn finalize_only_from_idle() {
        assert!(WorkerState::Computing
            .transition(WorkerEvent::Finalize)
            .is_err());
        assert_eq!(
            WorkerState::Idle.transition(WorkerEvent::Finalize).unwrap(),
            WorkerState::Done
        );
    }
}
