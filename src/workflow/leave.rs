//! Leave quantities attached to submissions of the designated leave type.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::collab::WorkingDayOracle;
use crate::model::{
    BalanceError, BalanceKey, LeaveDetails, LeaveRequestStatus, LeaveSettlement,
    RequestSubmission, SubmissionStatus,
};
use crate::store::{StoreError, UnitOfWork};

/// Leave part of a submission payload, as the employee fills it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LeaveApplication {
    #[schema(example = 1)]
    pub leave_type_id: u64,
    #[schema(example = "2026-03-02", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-03-04", format = "date", value_type = String)]
    pub end_date: NaiveDate,
}

#[derive(Debug, thiserror::Error)]
pub enum LeaveError {
    #[error("leave from {start} to {end} is not a valid range")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("no working days between {start} and {end}")]
    NoWorkingDays { start: NaiveDate, end: NaiveDate },
    #[error("No employee profile")]
    MissingEmployee,
    #[error("leave requests need start and end dates and a leave type")]
    MissingApplication,
    #[error("request type {0} does not take a leave application")]
    UnexpectedApplication(u64),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Most calendar days one application may cover, both ends included.
pub const MAX_LEAVE_SPAN_DAYS: i64 = 366;

/// Working days in `[start, end]`, both inclusive.
pub fn count_working_days(
    start: NaiveDate,
    end: NaiveDate,
    oracle: &dyn WorkingDayOracle,
) -> Result<Decimal, LeaveError> {
    if end < start || (end - start).num_days() + 1 > MAX_LEAVE_SPAN_DAYS {
        return Err(LeaveError::InvalidRange { start, end });
    }

    let days = start
        .iter_days()
        .take_while(|day| *day <= end)
        .filter(|day| oracle.is_working_day(*day))
        .count();

    if days == 0 {
        return Err(LeaveError::NoWorkingDays { start, end });
    }
    Ok(Decimal::from(days as u64))
}

/// Turns an application into the details stored on the submission. Days are booked
/// against the year the leave starts in.
pub fn leave_details(
    employee_id: u64,
    application: &LeaveApplication,
    oracle: &dyn WorkingDayOracle,
) -> Result<LeaveDetails, LeaveError> {
    let days = count_working_days(application.start_date, application.end_date, oracle)?;

    Ok(LeaveDetails {
        employee_id,
        leave_type_id: application.leave_type_id,
        start_date: application.start_date,
        end_date: application.end_date,
        days,
        year: application.start_date.year(),
    })
}

/// Applies the balance movement implied by a submission's status.
///
/// The submission's `approval_state.leave_settlement` records how far settlement has
/// gone, so every movement happens at most once however often `settle` runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeaveBalanceLedger {
    pub enforce_entitlement: bool,
}

impl LeaveBalanceLedger {
    pub fn new(enforce_entitlement: bool) -> Self {
        Self {
            enforce_entitlement,
        }
    }

    /// Returns whether anything moved. The caller persists `submission` afterwards; the
    /// balance row and leave request are written here.
    pub async fn settle(
        &self,
        uow: &mut dyn UnitOfWork,
        submission: &mut RequestSubmission,
        now: DateTime<Utc>,
    ) -> Result<bool, LeaveError> {
        let Some(leave) = submission.leave.clone() else {
            return Ok(false);
        };
        let key = BalanceKey {
            employee_id: leave.employee_id,
            leave_type_id: leave.leave_type_id,
            year: leave.year,
        };
        let from = submission.approval_state.leave_settlement;

        let to = match (submission.status, from) {
            (SubmissionStatus::Pending, LeaveSettlement::None) => {
                let mut balance = uow.lock_leave_balance(key).await?;
                balance.reserve(leave.days, self.enforce_entitlement)?;
                uow.save_leave_balance(&balance).await?;
                LeaveSettlement::Reserved
            }
            (status, LeaveSettlement::Reserved) if status.is_granted() => {
                let existing = uow.lock_leave_request_for(submission.id).await?;
                match existing {
                    // The snapshot already reflects the deduction.
                    Some(request) if request.status == LeaveRequestStatus::Approved => {}
                    existing => {
                        let mut balance = uow.lock_leave_balance(key).await?;
                        balance.deduct(leave.days)?;
                        uow.save_leave_balance(&balance).await?;
                        match existing {
                            Some(request) => {
                                uow.set_leave_request_status(
                                    request.id,
                                    LeaveRequestStatus::Approved,
                                )
                                .await?
                            }
                            None => {
                                uow.insert_leave_request(
                                    submission,
                                    LeaveRequestStatus::Approved,
                                    now,
                                )
                                .await?;
                            }
                        }
                    }
                }
                LeaveSettlement::Deducted
            }
            (status, LeaveSettlement::None) if status.is_granted() => {
                if uow.lock_leave_request_for(submission.id).await?.is_none() {
                    let mut balance = uow.lock_leave_balance(key).await?;
                    balance.consume(leave.days)?;
                    uow.save_leave_balance(&balance).await?;
                    uow.insert_leave_request(submission, LeaveRequestStatus::Approved, now)
                        .await?;
                }
                LeaveSettlement::Deducted
            }
            (SubmissionStatus::Rejected, LeaveSettlement::Reserved) => {
                let mut balance = uow.lock_leave_balance(key).await?;
                balance.release(leave.days)?;
                uow.save_leave_balance(&balance).await?;
                if let Some(request) = uow.lock_leave_request_for(submission.id).await? {
                    uow.set_leave_request_status(request.id, LeaveRequestStatus::Rejected)
                        .await?;
                }
                LeaveSettlement::Released
            }
            _ => return Ok(false),
        };

        info!(
            submission_id = submission.id,
            employee_id = key.employee_id,
            leave_type_id = key.leave_type_id,
            year = key.year,
            days = %leave.days,
            ?from,
            ?to,
            "Leave balance settled"
        );
        submission.approval_state.leave_settlement = to;
        submission.updated_at = now;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::HolidayCalendar;
    use crate::model::{LeaveBalance, NewSubmission};
    use crate::store::{MemoryStore, WorkflowStore};
    use crate::testing::{at, date};
    use serde_json::json;

    const KEY: BalanceKey = BalanceKey {
        employee_id: 1100,
        leave_type_id: 7,
        year: 2026,
    };

    fn application(start: NaiveDate, end: NaiveDate) -> LeaveApplication {
        LeaveApplication {
            leave_type_id: KEY.leave_type_id,
            start_date: start,
            end_date: end,
        }
    }

    async fn leave_submission(store: &MemoryStore, status: SubmissionStatus) -> RequestSubmission {
        let details = leave_details(
            KEY.employee_id,
            &application(date(2026, 3, 2), date(2026, 3, 4)),
            &HolidayCalendar::default(),
        )
        .unwrap();

        let mut uow = store.begin().await.unwrap();
        let submission = uow
            .insert_submission(NewSubmission {
                request_type_id: 1,
                requester_id: 100,
                reference_code: "REQ-20260301-0000A".to_string(),
                status,
                current_step_index: None,
                steps: Vec::new(),
                has_fulfillment: false,
                form_data: json!({}),
                leave: Some(details),
                approval_state: Default::default(),
                created_at: at(2026, 3, 1),
            })
            .await
            .unwrap();
        uow.commit().await.unwrap();
        submission
    }

    async fn settle(store: &MemoryStore, submission: &mut RequestSubmission) -> bool {
        let mut uow = store.begin().await.unwrap();
        let moved = LeaveBalanceLedger::default()
            .settle(uow.as_mut(), submission, at(2026, 3, 5))
            .await
            .unwrap();
        uow.save_submission(submission).await.unwrap();
        uow.commit().await.unwrap();
        moved
    }

    async fn balance(store: &MemoryStore) -> LeaveBalance {
        store.leave_balance(KEY).await.expect("balance row")
    }

    #[test]
    fn working_days_skip_weekends_and_holidays() {
        let calendar = HolidayCalendar::new([date(2026, 3, 10)]);

        // Fri 6th to Wed 11th: Fri, Mon, Wed.
        let days = count_working_days(date(2026, 3, 6), date(2026, 3, 11), &calendar).unwrap();
        assert_eq!(days, Decimal::from(3));
    }

    #[test]
    fn reversed_or_empty_ranges_are_refused() {
        let calendar = HolidayCalendar::default();

        assert!(matches!(
            count_working_days(date(2026, 3, 4), date(2026, 3, 2), &calendar),
            Err(LeaveError::InvalidRange { .. })
        ));
        assert!(matches!(
            count_working_days(date(2026, 3, 7), date(2026, 3, 8), &calendar),
            Err(LeaveError::NoWorkingDays { .. })
        ));
    }

    #[test]
    fn spans_longer_than_a_year_are_refused() {
        let calendar = HolidayCalendar::default();

        assert!(matches!(
            count_working_days(date(2026, 3, 2), date(9999, 12, 31), &calendar),
            Err(LeaveError::InvalidRange { .. })
        ));
        assert!(matches!(
            count_working_days(date(2026, 1, 1), date(2027, 1, 2), &calendar),
            Err(LeaveError::InvalidRange { .. })
        ));
        // 2028 is a leap year: Jan 1 to Dec 31 is the longest span accepted.
        let days = count_working_days(date(2028, 1, 1), date(2028, 12, 31), &calendar).unwrap();
        assert_eq!(days, Decimal::from(260));
    }

    #[test]
    fn year_follows_the_start_date() {
        let details = leave_details(
            5,
            &application(date(2026, 12, 31), date(2027, 1, 4)),
            &HolidayCalendar::default(),
        )
        .unwrap();

        assert_eq!(details.year, 2026);
        assert_eq!(details.days, Decimal::from(3));
    }

    #[actix_web::test]
    async fn reserve_then_deduct_happens_once() {
        let store = MemoryStore::new();
        let mut submission = leave_submission(&store, SubmissionStatus::Pending).await;

        assert!(settle(&store, &mut submission).await);
        assert_eq!(balance(&store).await.pending, Decimal::from(3));

        submission.status = SubmissionStatus::Approved;
        assert!(settle(&store, &mut submission).await);
        assert!(!settle(&store, &mut submission).await);

        let row = balance(&store).await;
        assert_eq!(row.pending, Decimal::ZERO);
        assert_eq!(row.used, Decimal::from(3));
        assert_eq!(row.balance, Decimal::from(-3));

        let snapshot = store.leave_request_for(submission.id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, LeaveRequestStatus::Approved);
        assert_eq!(snapshot.days, Decimal::from(3));
    }

    #[actix_web::test]
    async fn rejection_releases_the_reservation() {
        let store = MemoryStore::new();
        let mut submission = leave_submission(&store, SubmissionStatus::Pending).await;
        settle(&store, &mut submission).await;

        submission.status = SubmissionStatus::Rejected;
        assert!(settle(&store, &mut submission).await);
        assert!(!settle(&store, &mut submission).await);

        let row = balance(&store).await;
        assert_eq!(row.pending, Decimal::ZERO);
        assert_eq!(row.used, Decimal::ZERO);
        assert_eq!(submission.approval_state.leave_settlement, LeaveSettlement::Released);
        assert!(store.leave_request_for(submission.id).await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn granted_without_reservation_consumes_directly() {
        let store = MemoryStore::new();
        let mut submission = leave_submission(&store, SubmissionStatus::Approved).await;

        assert!(settle(&store, &mut submission).await);

        let row = balance(&store).await;
        assert_eq!(row.pending, Decimal::ZERO);
        assert_eq!(row.used, Decimal::from(3));
        assert_eq!(submission.approval_state.leave_settlement, LeaveSettlement::Deducted);
    }

    #[actix_web::test]
    async fn enforced_entitlement_blocks_the_reservation() {
        let store = MemoryStore::new();
        let mut entitled = LeaveBalance::zeroed(KEY);
        entitled.entitled = Decimal::from(2);
        store.put_leave_balance(entitled).await;
        let mut submission = leave_submission(&store, SubmissionStatus::Pending).await;

        let mut uow = store.begin().await.unwrap();
        let err = LeaveBalanceLedger::new(true)
            .settle(uow.as_mut(), &mut submission, at(2026, 3, 5))
            .await
            .unwrap_err();
        drop(uow);

        assert!(matches!(
            err,
            LeaveError::Balance(BalanceError::InsufficientEntitlement { .. })
        ));
        assert_eq!(balance(&store).await.pending, Decimal::ZERO);
    }

    #[actix_web::test]
    async fn submissions_without_leave_are_ignored() {
        let store = MemoryStore::new();
        let mut submission = leave_submission(&store, SubmissionStatus::Pending).await;
        submission.leave = None;

        assert!(!settle(&store, &mut submission).await);
        assert!(store.leave_balance(KEY).await.is_none());
    }
}
