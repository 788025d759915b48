//! Boundary contracts the engine consumes. The other side of each trait is owned by
//! another part of the platform; the implementations here are the production adapters.

pub mod audit;
pub mod calendar;
pub mod certificate;
pub mod files;
pub mod identity;

pub use audit::{AuditEntry, AuditError, AuditSink, SqlAuditSink};
pub use calendar::{HolidayCalendar, WorkingDayOracle};
pub use certificate::{CertificateError, CertificateGenerator, ManifestCertificateGenerator};
pub use files::{FileStore, FileStoreError, LocalFileStore};
pub use identity::{IdentityError, IdentityProvider, OrgContext, PositionInfo, SqlIdentityProvider};
