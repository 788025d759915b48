use async_trait::async_trait;
use serde::Serialize;
use sqlx::MySqlPool;

/// Organisational placement of a user, as far as approver scoping needs it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrgContext {
    pub faculty_id: Option<u64>,
    pub department_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionInfo {
    pub id: u64,
    pub name: String,
    /// Holders only approve for requesters of their own faculty.
    pub org_scoped: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("role {0} does not exist")]
    UnknownRole(u64),
    #[error("position {0} does not exist")]
    UnknownPosition(u64),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn user_has_role(&self, user_id: u64, role_id: u64) -> Result<bool, IdentityError>;

    /// Active members of the role.
    async fn users_in_role(&self, role_id: u64) -> Result<Vec<u64>, IdentityError>;

    async fn position(&self, position_id: u64) -> Result<PositionInfo, IdentityError>;

    /// Active users currently occupying the position.
    async fn position_holders(&self, position_id: u64) -> Result<Vec<u64>, IdentityError>;

    async fn employee_org_context(&self, user_id: u64) -> Result<OrgContext, IdentityError>;
}

/// Reads the organisation tables maintained by the HR screens.
#[derive(Clone)]
pub struct SqlIdentityProvider {
    pool: MySqlPool,
}

impl SqlIdentityProvider {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityProvider for SqlIdentityProvider {
    async fn user_has_role(&self, user_id: u64, role_id: u64) -> Result<bool, IdentityError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM role_user WHERE role_id = ? AND user_id = ? LIMIT 1)",
        )
        .bind(role_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn users_in_role(&self, role_id: u64) -> Result<Vec<u64>, IdentityError> {
        let known =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM roles WHERE id = ?)")
                .bind(role_id)
                .fetch_one(&self.pool)
                .await?;
        if !known {
            return Err(IdentityError::UnknownRole(role_id));
        }

        let users = sqlx::query_scalar::<_, u64>(
            r#"
            SELECT ru.user_id
            FROM role_user ru
            JOIN users u ON u.id = ru.user_id
            WHERE ru.role_id = ?
            AND u.is_active = TRUE
            ORDER BY ru.user_id
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn position(&self, position_id: u64) -> Result<PositionInfo, IdentityError> {
        let row = sqlx::query_as::<_, (u64, String, bool)>(
            "SELECT id, name, org_scoped FROM positions WHERE id = ?",
        )
        .bind(position_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((id, name, org_scoped)) => Ok(PositionInfo {
                id,
                name,
                org_scoped,
            }),
            None => Err(IdentityError::UnknownPosition(position_id)),
        }
    }

    async fn position_holders(&self, position_id: u64) -> Result<Vec<u64>, IdentityError> {
        let users = sqlx::query_scalar::<_, u64>(
            r#"
            SELECT u.id
            FROM employees e
            JOIN users u ON u.employee_id = e.id
            WHERE e.position_id = ?
            AND u.is_active = TRUE
            ORDER BY u.id
            "#,
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn employee_org_context(&self, user_id: u64) -> Result<OrgContext, IdentityError> {
        let row = sqlx::query_as::<_, (Option<u64>, Option<u64>)>(
            r#"
            SELECT e.faculty_id, e.department_id
            FROM users u
            JOIN employees e ON e.id = u.employee_id
            WHERE u.id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(faculty_id, department_id)| OrgContext {
                faculty_id,
                department_id,
            })
            .unwrap_or_default())
    }
}
