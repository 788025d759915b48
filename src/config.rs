use std::env;
use std::str::FromStr;

use crate::workflow::WorkflowSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub api_prefix: String,
    pub log_dir: String,

    // Rate limiting
    pub rate_protected_per_min: u32,

    // Workflow engine
    pub leave_request_type_id: Option<u64>,
    pub request_manager_role_id: Option<u64>,
    pub conflict_retries: u32,
    pub enforce_leave_entitlement: bool,

    // Uploaded artifacts and certificates
    pub storage_root: String,
    pub storage_base_url: String,
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn or_default(key: &'static str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = or_default(key, default);
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

fn optional<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(None),
    }
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            api_prefix: or_default("API_PREFIX", "/api"),
            log_dir: or_default("LOG_DIR", "logs"),

            rate_protected_per_min: parsed("RATE_PROTECTED_PER_MIN", "1000")?,

            leave_request_type_id: optional("LEAVE_REQUEST_TYPE_ID")?,
            request_manager_role_id: optional("REQUEST_MANAGER_ROLE_ID")?,
            conflict_retries: parsed("WORKFLOW_CONFLICT_RETRIES", "3")?,
            enforce_leave_entitlement: parsed("ENFORCE_LEAVE_ENTITLEMENT", "false")?,

            storage_root: or_default("STORAGE_ROOT", "storage"),
            storage_base_url: or_default("STORAGE_BASE_URL", "/storage"),
        })
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            leave_request_type_id: self.leave_request_type_id,
            request_manager_role_id: self.request_manager_role_id,
            conflict_retries: self.conflict_retries,
            enforce_leave_entitlement: self.enforce_leave_entitlement,
        }
    }
}
