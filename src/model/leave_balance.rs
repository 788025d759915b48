use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique key of a balance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub employee_id: u64,
    pub leave_type_id: u64,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("requested {requested} days but only {available} are available")]
    InsufficientEntitlement {
        requested: Decimal,
        available: Decimal,
    },
    #[error("{field} of employee {employee_id} (type {leave_type_id}, {year}) would be {value}")]
    NegativeResult {
        field: &'static str,
        value: Decimal,
        employee_id: u64,
        leave_type_id: u64,
        year: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct LeaveBalance {
    pub employee_id: u64,
    pub leave_type_id: u64,
    pub year: i32,
    #[schema(value_type = String, example = "20")]
    pub entitled: Decimal,
    #[schema(value_type = String, example = "0")]
    pub accrued: Decimal,
    #[schema(value_type = String, example = "3")]
    pub used: Decimal,
    #[schema(value_type = String, example = "0")]
    pub pending: Decimal,
    #[schema(value_type = String, example = "19")]
    pub balance: Decimal,
    #[schema(value_type = String, example = "2")]
    pub carried_over: Decimal,
}

impl LeaveBalance {
    /// Fresh row with every quantity at zero.
    pub fn zeroed(key: BalanceKey) -> Self {
        Self {
            employee_id: key.employee_id,
            leave_type_id: key.leave_type_id,
            year: key.year,
            entitled: Decimal::ZERO,
            accrued: Decimal::ZERO,
            used: Decimal::ZERO,
            pending: Decimal::ZERO,
            balance: Decimal::ZERO,
            carried_over: Decimal::ZERO,
        }
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey {
            employee_id: self.employee_id,
            leave_type_id: self.leave_type_id,
            year: self.year,
        }
    }

    pub fn derived_balance(&self) -> Decimal {
        self.entitled + self.accrued + self.carried_over - self.used - self.pending
    }

    /// Rewrites `balance` from the summands. The stored value is never read.
    pub fn recompute(&mut self) {
        self.balance = self.derived_balance();
    }

    pub fn reserve(
        &mut self,
        days: Decimal,
        enforce_entitlement: bool,
    ) -> Result<(), BalanceError> {
        self.recompute();
        if enforce_entitlement && days > self.balance {
            return Err(BalanceError::InsufficientEntitlement {
                requested: days,
                available: self.balance,
            });
        }
        self.pending += days;
        self.recompute();
        Ok(())
    }

    /// Moves a reservation into `used`.
    pub fn deduct(&mut self, days: Decimal) -> Result<(), BalanceError> {
        let pending = self.checked("pending", self.pending - days)?;
        self.pending = pending;
        self.used += days;
        self.recompute();
        Ok(())
    }

    /// Drops a reservation without consuming it.
    pub fn release(&mut self, days: Decimal) -> Result<(), BalanceError> {
        let pending = self.checked("pending", self.pending - days)?;
        self.pending = pending;
        self.recompute();
        Ok(())
    }

    /// Books days straight into `used`, for leave granted without a reservation.
    pub fn consume(&mut self, days: Decimal) -> Result<(), BalanceError> {
        self.used += days;
        self.recompute();
        Ok(())
    }

    fn checked(&self, field: &'static str, value: Decimal) -> Result<Decimal, BalanceError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(BalanceError::NegativeResult {
                field,
                value,
                employee_id: self.employee_id,
                leave_type_id: self.leave_type_id,
                year: self.year,
            });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> LeaveBalance {
        let mut balance = LeaveBalance::zeroed(BalanceKey {
            employee_id: 10,
            leave_type_id: 1,
            year: 2026,
        });
        balance.entitled = Decimal::from(20);
        balance.carried_over = Decimal::from(2);
        balance
    }

    fn holds_invariant(b: &LeaveBalance) -> bool {
        b.balance == b.entitled + b.accrued + b.carried_over - b.used - b.pending
    }

    #[test]
    fn stale_balance_is_never_trusted() {
        let mut balance = row();
        balance.balance = Decimal::from(999);

        balance.reserve(Decimal::from(3), false).unwrap();

        assert_eq!(balance.pending, Decimal::from(3));
        assert_eq!(balance.balance, Decimal::from(19));
        assert!(holds_invariant(&balance));
    }

    #[test]
    fn deduct_moves_pending_into_used() {
        let mut balance = row();
        balance.reserve(Decimal::from(3), false).unwrap();
        balance.deduct(Decimal::from(3)).unwrap();

        assert_eq!(balance.pending, Decimal::ZERO);
        assert_eq!(balance.used, Decimal::from(3));
        assert_eq!(balance.balance, Decimal::from(19));
        assert!(holds_invariant(&balance));
    }

    #[test]
    fn release_returns_the_reservation() {
        let mut balance = row();
        balance.reserve(Decimal::new(25, 1), false).unwrap();
        balance.release(Decimal::new(25, 1)).unwrap();

        assert_eq!(balance.pending, Decimal::ZERO);
        assert_eq!(balance.balance, Decimal::from(22));
        assert!(holds_invariant(&balance));
    }

    #[test]
    fn releasing_more_than_pending_is_refused() {
        let mut balance = row();
        balance.reserve(Decimal::from(1), false).unwrap();
        let before = balance.clone();

        let err = balance.release(Decimal::from(2)).unwrap_err();

        assert!(matches!(
            err,
            BalanceError::NegativeResult { field: "pending", .. }
        ));
        assert_eq!(balance, before);
    }

    #[test]
    fn entitlement_is_enforced_only_when_asked() {
        let mut balance = row();

        assert!(matches!(
            balance.reserve(Decimal::from(30), true),
            Err(BalanceError::InsufficientEntitlement { .. })
        ));
        assert_eq!(balance.pending, Decimal::ZERO);

        balance.reserve(Decimal::from(30), false).unwrap();
        assert_eq!(balance.balance, Decimal::from(-8));
        assert!(holds_invariant(&balance));
    }
}
