//! Lifecycle of a submission. Pure functions over [`RequestSubmission`]; persistence and
//! side effects live in the orchestrator.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{RequestSubmission, SubmissionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// What a single recorded decision did to its step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    StepNotYetComplete,
    StepComplete,
    SubmissionRejected,
}

/// Where a submission goes once its current step has closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Advance { next_step: u32 },
    Finish { status: SubmissionStatus },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("submission cannot move from {from} to {to}")]
    Illegal {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
    #[error("submission is at step {current:?}, not at a step that can be completed")]
    NoActiveStep { current: Option<u32> },
}

/// Status a submission lands in once every approval step has passed.
///
/// Without fulfillment this is `Approved`, which is terminal: such a submission never
/// reaches `Completed`. `Completed` is only entered from `Fulfillment`, when the
/// deliverable is attached.
pub fn granted_status(has_fulfillment: bool) -> SubmissionStatus {
    if has_fulfillment {
        SubmissionStatus::Fulfillment
    } else {
        SubmissionStatus::Approved
    }
}

/// Status and current step of a freshly created submission.
pub fn initial_placement(
    step_count: usize,
    has_fulfillment: bool,
) -> (SubmissionStatus, Option<u32>) {
    if step_count == 0 {
        (granted_status(has_fulfillment), None)
    } else {
        (SubmissionStatus::Pending, Some(0))
    }
}

/// Decides what follows the completion of step `completed`.
pub fn progress_after_step(
    submission: &RequestSubmission,
    completed: u32,
) -> Result<Progress, TransitionError> {
    if submission.status != SubmissionStatus::Pending
        || submission.current_step_index != Some(completed)
    {
        return Err(TransitionError::NoActiveStep {
            current: submission.current_step_index,
        });
    }

    match submission.last_step_index() {
        Some(last) if completed < last => Ok(Progress::Advance {
            next_step: completed + 1,
        }),
        _ => Ok(Progress::Finish {
            status: granted_status(submission.has_fulfillment),
        }),
    }
}

fn allowed(from: SubmissionStatus, to: SubmissionStatus) -> bool {
    use SubmissionStatus::*;

    matches!(
        (from, to),
        (Pending, Approved)
            | (Pending, Fulfillment)
            | (Pending, Rejected)
            | (Fulfillment, Completed)
    )
}

/// Moves the submission to `to`. Leaving `pending` clears the current step.
pub fn transition(
    submission: &mut RequestSubmission,
    to: SubmissionStatus,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if !allowed(submission.status, to) {
        return Err(TransitionError::Illegal {
            from: submission.status,
            to,
        });
    }

    submission.status = to;
    submission.current_step_index = None;
    submission.updated_at = now;
    Ok(())
}

pub fn advance_to_step(
    submission: &mut RequestSubmission,
    next_step: u32,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if submission.status != SubmissionStatus::Pending || submission.step(next_step).is_none() {
        return Err(TransitionError::NoActiveStep {
            current: submission.current_step_index,
        });
    }

    submission.current_step_index = Some(next_step);
    submission.updated_at = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApprovalStepDef, ApproverSpec};
    use crate::testing::at;
    use serde_json::json;

    fn submission(steps: usize, has_fulfillment: bool) -> RequestSubmission {
        let steps: Vec<ApprovalStepDef> = (0..steps)
            .map(|i| ApprovalStepDef {
                name: format!("Step {}", i + 1),
                approvers: vec![ApproverSpec::User { id: 10 + i as u64 }],
            })
            .collect();
        let (status, current_step_index) = initial_placement(steps.len(), has_fulfillment);

        RequestSubmission {
            id: 1,
            request_type_id: 1,
            requester_id: 100,
            reference_code: "REQ-20260302-ABCDE".to_string(),
            status,
            current_step_index,
            steps,
            has_fulfillment,
            form_data: json!({}),
            leave: None,
            approval_state: Default::default(),
            fulfillment_path: None,
            created_at: at(2026, 3, 2),
            updated_at: at(2026, 3, 2),
        }
    }

    #[test]
    fn zero_step_types_start_granted() {
        assert_eq!(initial_placement(0, false), (SubmissionStatus::Approved, None));
        assert_eq!(initial_placement(0, true), (SubmissionStatus::Fulfillment, None));
        assert_eq!(initial_placement(2, true), (SubmissionStatus::Pending, Some(0)));
    }

    #[test]
    fn middle_step_advances_and_last_step_finishes() {
        let sub = submission(3, true);
        assert_eq!(
            progress_after_step(&sub, 0),
            Ok(Progress::Advance { next_step: 1 })
        );

        let mut sub = submission(3, true);
        advance_to_step(&mut sub, 2, at(2026, 3, 3)).unwrap();
        assert_eq!(
            progress_after_step(&sub, 2),
            Ok(Progress::Finish {
                status: SubmissionStatus::Fulfillment
            })
        );
    }

    #[test]
    fn completing_a_step_that_is_not_current_is_refused() {
        let sub = submission(3, false);

        assert_eq!(
            progress_after_step(&sub, 1),
            Err(TransitionError::NoActiveStep { current: Some(0) })
        );
    }

    #[test]
    fn leaving_pending_clears_the_step() {
        let mut sub = submission(2, false);
        transition(&mut sub, SubmissionStatus::Rejected, at(2026, 3, 4)).unwrap();

        assert_eq!(sub.status, SubmissionStatus::Rejected);
        assert_eq!(sub.current_step_index, None);
        assert_eq!(sub.updated_at, at(2026, 3, 4));
    }

    #[test]
    fn terminal_states_do_not_move() {
        let mut sub = submission(1, false);
        transition(&mut sub, SubmissionStatus::Approved, at(2026, 3, 4)).unwrap();

        assert_eq!(
            transition(&mut sub, SubmissionStatus::Rejected, at(2026, 3, 5)),
            Err(TransitionError::Illegal {
                from: SubmissionStatus::Approved,
                to: SubmissionStatus::Rejected
            })
        );
        assert!(transition(&mut sub, SubmissionStatus::Completed, at(2026, 3, 5)).is_err());
    }

    #[test]
    fn completed_is_reached_only_through_fulfillment() {
        assert_eq!(granted_status(false), SubmissionStatus::Approved);
        assert_eq!(granted_status(true), SubmissionStatus::Fulfillment);

        let mut sub = submission(1, false);
        transition(&mut sub, granted_status(false), at(2026, 3, 4)).unwrap();
        assert_eq!(
            transition(&mut sub, SubmissionStatus::Completed, at(2026, 3, 5)),
            Err(TransitionError::Illegal {
                from: SubmissionStatus::Approved,
                to: SubmissionStatus::Completed
            })
        );
    }

    #[test]
    fn fulfillment_only_completes() {
        let mut sub = submission(0, true);
        assert!(transition(&mut sub, SubmissionStatus::Rejected, at(2026, 3, 4)).is_err());

        transition(&mut sub, SubmissionStatus::Completed, at(2026, 3, 4)).unwrap();
        assert_eq!(sub.status, SubmissionStatus::Completed);
    }
}
