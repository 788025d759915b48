pub mod leave_balance;
pub mod request_type;
pub mod submission;
