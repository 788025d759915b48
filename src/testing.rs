//! In-memory collaborators and fixtures shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::collab::{
    AuditEntry, AuditError, AuditSink, CertificateError, CertificateGenerator, FileStore,
    FileStoreError, HolidayCalendar, IdentityError, IdentityProvider, OrgContext, PositionInfo,
};
use crate::model::{
    ApprovalStepDef, ApproverSpec, BalanceKey, LeaveBalance, RequestSubmission, RequestType,
    RequestTypeDraft,
};
use crate::store::{MemoryStore, WorkflowStore};
use crate::workflow::hooks::{AuditTrailHook, CertificateHook, TransitionHook};
use crate::workflow::{Actor, WorkflowOrchestrator, WorkflowSettings};

#[derive(Default)]
struct DirectoryState {
    roles: HashMap<u64, Vec<u64>>,
    positions: HashMap<u64, (bool, Vec<u64>)>,
    faculties: HashMap<u64, u64>,
    inactive: HashSet<u64>,
}

/// Organisation directory whose membership can be changed mid-test.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl MemoryDirectory {
    pub fn with_role(self, role_id: u64, users: impl IntoIterator<Item = u64>) -> Self {
        self.set_role(role_id, users);
        self
    }

    pub fn with_position(
        self,
        position_id: u64,
        org_scoped: bool,
        holders: impl IntoIterator<Item = u64>,
    ) -> Self {
        self.state
            .write()
            .unwrap()
            .positions
            .insert(position_id, (org_scoped, holders.into_iter().collect()));
        self
    }

    pub fn with_faculty(self, user_id: u64, faculty_id: u64) -> Self {
        self.state
            .write()
            .unwrap()
            .faculties
            .insert(user_id, faculty_id);
        self
    }

    pub fn with_inactive_user(self, user_id: u64) -> Self {
        self.state.write().unwrap().inactive.insert(user_id);
        self
    }

    pub fn set_role(&self, role_id: u64, users: impl IntoIterator<Item = u64>) {
        self.state
            .write()
            .unwrap()
            .roles
            .insert(role_id, users.into_iter().collect());
    }
}

#[async_trait]
impl IdentityProvider for MemoryDirectory {
    async fn user_has_role(&self, user_id: u64, role_id: u64) -> Result<bool, IdentityError> {
        let state = self.state.read().unwrap();
        Ok(state
            .roles
            .get(&role_id)
            .is_some_and(|users| users.contains(&user_id)))
    }

    async fn users_in_role(&self, role_id: u64) -> Result<Vec<u64>, IdentityError> {
        let state = self.state.read().unwrap();
        let users = state
            .roles
            .get(&role_id)
            .ok_or(IdentityError::UnknownRole(role_id))?;
        Ok(users
            .iter()
            .copied()
            .filter(|u| !state.inactive.contains(u))
            .collect())
    }

    async fn position(&self, position_id: u64) -> Result<PositionInfo, IdentityError> {
        let state = self.state.read().unwrap();
        let (org_scoped, _) = state
            .positions
            .get(&position_id)
            .ok_or(IdentityError::UnknownPosition(position_id))?;
        Ok(PositionInfo {
            id: position_id,
            name: format!("Position {position_id}"),
            org_scoped: *org_scoped,
        })
    }

    async fn position_holders(&self, position_id: u64) -> Result<Vec<u64>, IdentityError> {
        let state = self.state.read().unwrap();
        Ok(state
            .positions
            .get(&position_id)
            .map(|(_, holders)| {
                holders
                    .iter()
                    .copied()
                    .filter(|u| !state.inactive.contains(u))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn employee_org_context(&self, user_id: u64) -> Result<OrgContext, IdentityError> {
        let state = self.state.read().unwrap();
        Ok(OrgContext {
            faculty_id: state.faculties.get(&user_id).copied(),
            department_id: None,
        })
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
    fail: bool,
}

impl RecordingAudit {
    pub fn failing() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn actions(&self) -> Vec<&'static str> {
        self.entries.lock().unwrap().iter().map(|e| e.action).collect()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        if self.fail {
            return Err(AuditError::Database(sqlx::Error::PoolTimedOut));
        }
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCertificates {
    issued: Mutex<Vec<String>>,
    failures_left: AtomicU32,
}

impl RecordingCertificates {
    pub fn failing_once() -> Self {
        Self {
            issued: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(1),
        }
    }

    pub fn issued(&self) -> Vec<String> {
        self.issued.lock().unwrap().clone()
    }
}

#[async_trait]
impl CertificateGenerator for RecordingCertificates {
    async fn generate(&self, submission: &RequestSubmission) -> Result<String, CertificateError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CertificateError::Render("renderer offline".to_string()));
        }
        self.issued
            .lock()
            .unwrap()
            .push(submission.reference_code.clone());
        Ok(format!("certificates/{}.pdf", submission.reference_code))
    }
}

#[derive(Default)]
pub struct MemoryFiles {
    files: Mutex<HashMap<String, Vec<u8>>>,
    stored: AtomicU32,
}

impl MemoryFiles {
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    /// How many files were ever stored, removed ones included.
    pub fn stored(&self) -> u32 {
        self.stored.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileStore for MemoryFiles {
    async fn store(&self, bytes: &[u8], filename: &str) -> Result<String, FileStoreError> {
        let n = self.stored.fetch_add(1, Ordering::SeqCst) + 1;
        let path = format!("{n}/{filename}");
        self.files
            .lock()
            .unwrap()
            .insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    async fn remove(&self, path: &str) -> Result<(), FileStoreError> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("memory://{path}")
    }
}

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn actor(user_id: u64) -> Actor {
    Actor {
        user_id,
        employee_id: Some(user_id + 1000),
    }
}

pub fn users(ids: &[u64]) -> Vec<ApproverSpec> {
    ids.iter().map(|id| ApproverSpec::User { id: *id }).collect()
}

pub fn step(name: &str, approvers: Vec<ApproverSpec>) -> ApprovalStepDef {
    ApprovalStepDef {
        name: name.to_string(),
        approvers,
    }
}

pub const LEAVE_TYPE_ID: u64 = 7;
pub const MANAGER_ROLE_ID: u64 = 90;

/// Orchestrator wired to in-memory collaborators, plus handles on each of them.
pub struct Harness {
    pub store: MemoryStore,
    pub directory: MemoryDirectory,
    pub audit: Arc<RecordingAudit>,
    pub certificates: Arc<RecordingCertificates>,
    pub files: Arc<MemoryFiles>,
    pub orchestrator: WorkflowOrchestrator,
}

pub struct HarnessBuilder {
    directory: MemoryDirectory,
    audit: Arc<RecordingAudit>,
    certificates: Arc<RecordingCertificates>,
    settings: WorkflowSettings,
    holidays: Vec<NaiveDate>,
    store: MemoryStore,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            directory: MemoryDirectory::default(),
            audit: Arc::new(RecordingAudit::default()),
            certificates: Arc::new(RecordingCertificates::default()),
            settings: WorkflowSettings {
                leave_request_type_id: None,
                request_manager_role_id: Some(MANAGER_ROLE_ID),
                conflict_retries: 3,
                enforce_leave_entitlement: false,
            },
            holidays: Vec::new(),
            store: MemoryStore::new(),
        }
    }

    /// Creates and publishes a request type.
    pub async fn request_type(
        &self,
        name: &str,
        has_fulfillment: bool,
        steps: Vec<ApprovalStepDef>,
    ) -> RequestType {
        let draft = RequestTypeDraft {
            name: name.to_string(),
            has_fulfillment,
            steps,
        };
        draft.validate().expect("valid request type");
        let created = self
            .store
            .insert_request_type(&draft, at(2026, 1, 5))
            .await
            .unwrap();
        self.store
            .publish_request_type(created.id, at(2026, 1, 5))
            .await
            .unwrap()
    }

    pub async fn entitle(&self, employee_id: u64, leave_type_id: u64, days: i64) {
        let mut balance = LeaveBalance::zeroed(BalanceKey {
            employee_id,
            leave_type_id,
            year: 2026,
        });
        balance.entitled = Decimal::from(days);
        self.store.put_leave_balance(balance).await;
    }
}

impl HarnessBuilder {
    pub fn directory(mut self, directory: MemoryDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn audit(mut self, audit: RecordingAudit) -> Self {
        self.audit = Arc::new(audit);
        self
    }

    pub fn certificates(mut self, certificates: RecordingCertificates) -> Self {
        self.certificates = Arc::new(certificates);
        self
    }

    pub fn leave_type(mut self, request_type_id: u64) -> Self {
        self.settings.leave_request_type_id = Some(request_type_id);
        self
    }

    pub fn without_manager_role(mut self) -> Self {
        self.settings.request_manager_role_id = None;
        self
    }

    pub fn enforce_entitlement(mut self) -> Self {
        self.settings.enforce_leave_entitlement = true;
        self
    }

    pub fn holidays(mut self, holidays: Vec<NaiveDate>) -> Self {
        self.holidays = holidays;
        self
    }

    pub fn build(self) -> Harness {
        let files = Arc::new(MemoryFiles::default());
        let shared_store: Arc<dyn WorkflowStore> = Arc::new(self.store.clone());
        let hooks: Vec<Arc<dyn TransitionHook>> = vec![
            Arc::new(AuditTrailHook::new(self.audit.clone())),
            Arc::new(CertificateHook::new(
                self.certificates.clone(),
                shared_store.clone(),
            )),
        ];

        let orchestrator = WorkflowOrchestrator::new(
            shared_store,
            Arc::new(self.directory.clone()),
            Arc::new(HolidayCalendar::new(self.holidays)),
            files.clone(),
            hooks,
            self.settings,
        );

        Harness {
            store: self.store,
            directory: self.directory,
            audit: self.audit,
            certificates: self.certificates,
            files,
            orchestrator,
        }
    }
}
