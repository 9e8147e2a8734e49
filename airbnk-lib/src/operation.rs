//! Two-frame lock operation state machine.
//!
//! ```text
//! Idle ──request──▶ Operating ──ack(frame1)──▶ Operating ──ack(frame2)──▶ Completed
//!                       │                          │
//!                       └────────nack──────────────┴──────────────────▶ Failed
//! ```
//!
//! Completed and Failed accept a new request like Idle does. The machine has no queue:
//! a request while Operating is rejected.

use chrono::{DateTime, Duration, Utc};

use crate::advert::LockState;
use crate::error::LockError;
use crate::packet::{FramePair, FramePosition, LockDirection};

/// The frames of the operation in flight and their acknowledgment status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub direction: LockDirection,
    pub frames: FramePair,
    pub frame1_acked: bool,
    pub frame2_acked: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OperationState {
    #[default]
    Idle,
    Operating(PendingOperation),
    Completed(LockState),
    Failed(String),
}

/// What the session has to do after feeding the machine an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Event did not apply to the operation in flight
    Ignored,
    /// Write the second frame
    SendFrame2(String),
    Completed(LockState),
    Failed(String),
}

impl OperationState {
    pub fn is_operating(&self) -> bool {
        matches!(self, OperationState::Operating(_))
    }

    pub fn pending(&self) -> Option<&PendingOperation> {
        match self {
            OperationState::Operating(pending) => Some(pending),
            _ => None,
        }
    }

    /// Enter `Operating` and return the first frame to write.
    pub fn start(
        &mut self,
        direction: LockDirection,
        frames: FramePair,
        now: DateTime<Utc>,
    ) -> Result<String, LockError> {
        if self.is_operating() {
            return Err(LockError::OperationInProgress);
        }
        let frame1 = frames.frame1.clone();
        *self = OperationState::Operating(PendingOperation {
            direction,
            frames,
            frame1_acked: false,
            frame2_acked: false,
            started_at: now,
        });
        Ok(frame1)
    }

    /// Feed a successful write acknowledgment echoing `written`.
    pub fn on_written(&mut self, written: &str) -> Transition {
        let OperationState::Operating(pending) = self else {
            return Transition::Ignored;
        };

        match pending.frames.position_of(written) {
            Some(FramePosition::First) if !pending.frame1_acked => {
                pending.frame1_acked = true;
                Transition::SendFrame2(pending.frames.frame2.clone())
            }
            Some(FramePosition::Second) if pending.frame1_acked && !pending.frame2_acked => {
                pending.frame2_acked = true;
                let final_state = match pending.direction {
                    LockDirection::Unlock => LockState::Unlocked,
                    LockDirection::Lock => LockState::Locked,
                };
                *self = OperationState::Completed(final_state);
                Transition::Completed(final_state)
            }
            _ => Transition::Ignored,
        }
    }

    /// Feed a failed write acknowledgment.
    pub fn on_failure(&mut self, status: &str) -> Transition {
        if !self.is_operating() {
            return Transition::Ignored;
        }
        let reason = LockError::AckFailure(status.to_string()).to_string();
        *self = OperationState::Failed(reason.clone());
        Transition::Failed(reason)
    }

    /// Fail an operation that has waited longer than `timeout` for its acknowledgments.
    pub fn check_timeout(&mut self, now: DateTime<Utc>, timeout: Duration) -> Transition {
        let Some(pending) = self.pending() else {
            return Transition::Ignored;
        };
        if now - pending.started_at < timeout {
            return Transition::Ignored;
        }
        let reason = "acknowledgment timeout".to_string();
        *self = OperationState::Failed(reason.clone());
        Transition::Failed(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::split_into_frames;

    fn frames() -> FramePair {
        split_into_frames(&"AB".repeat(36))
    }

    fn started(direction: LockDirection) -> OperationState {
        let mut state = OperationState::Idle;
        state.start(direction, frames(), Utc::now()).unwrap();
        state
    }

    #[test]
    fn test_unlock_completes() {
        let mut state = started(LockDirection::Unlock);
        let f = frames();
        assert_eq!(state.on_written(&f.frame1), Transition::SendFrame2(f.frame2.clone()));
        assert!(state.is_operating());
        assert_eq!(state.on_written(&f.frame2), Transition::Completed(LockState::Unlocked));
        assert_eq!(state, OperationState::Completed(LockState::Unlocked));
    }

    #[test]
    fn test_lock_completes() {
        let mut state = started(LockDirection::Lock);
        let f = frames();
        state.on_written(&f.frame1);
        assert_eq!(state.on_written(&f.frame2), Transition::Completed(LockState::Locked));
    }

    #[test]
    fn test_frame2_before_frame1_is_ignored() {
        let mut state = started(LockDirection::Lock);
        assert_eq!(state.on_written(&frames().frame2), Transition::Ignored);
        assert!(state.is_operating());
    }

    #[test]
    fn test_unrelated_and_duplicate_writes_are_ignored() {
        let mut state = started(LockDirection::Unlock);
        let f = frames();
        assert_eq!(state.on_written("FF00DEADBEEF"), Transition::Ignored);
        state.on_written(&f.frame1);
        assert_eq!(state.on_written(&f.frame1), Transition::Ignored);
    }

    #[test]
    fn test_failure_at_either_step() {
        let mut state = started(LockDirection::Unlock);
        assert!(matches!(state.on_failure("FAILWRITE"), Transition::Failed(_)));
        assert!(matches!(state, OperationState::Failed(ref r) if r.contains("FAILWRITE")));

        let mut state = started(LockDirection::Lock);
        state.on_written(&frames().frame1);
        assert!(matches!(state.on_failure("FAILCONNECT"), Transition::Failed(_)));
        assert_eq!(state.on_written(&frames().frame2), Transition::Ignored);
    }

    #[test]
    fn test_events_while_idle_are_ignored() {
        let mut state = OperationState::Idle;
        assert_eq!(state.on_failure("FAILWRITE"), Transition::Ignored);
        assert_eq!(state.on_written(&frames().frame1), Transition::Ignored);
        assert_eq!(state, OperationState::Idle);
    }

    #[test]
    fn test_second_request_is_rejected() {
        let mut state = started(LockDirection::Unlock);
        assert!(matches!(
            state.start(LockDirection::Lock, frames(), Utc::now()),
            Err(LockError::OperationInProgress)
        ));
    }

    #[test]
    fn test_terminal_states_accept_new_request() {
        let mut state = OperationState::Failed("x".into());
        assert!(state.start(LockDirection::Lock, frames(), Utc::now()).is_ok());
        let mut state = OperationState::Completed(LockState::Locked);
        assert!(state.start(LockDirection::Unlock, frames(), Utc::now()).is_ok());
    }

    #[test]
    fn test_timeout() {
        let start = Utc::now();
        let mut state = OperationState::Idle;
        state.start(LockDirection::Unlock, frames(), start).unwrap();

        let timeout = Duration::seconds(10);
        assert_eq!(state.check_timeout(start + Duration::seconds(5), timeout), Transition::Ignored);
        assert!(matches!(
            state.check_timeout(start + Duration::seconds(10), timeout),
            Transition::Failed(_)
        ));
        assert!(matches!(state, OperationState::Failed(_)));
    }
}
