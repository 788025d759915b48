use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::collab::identity::{IdentityError, IdentityProvider, OrgContext};
use crate::model::{ApprovalStepDef, ApproverSpec};

/// A concrete user produced from an approver spec when a step is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedApprover {
    pub user_id: u64,
    pub source: ApproverSpec,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("step {step_index} ({step_name}) resolves to no approvers")]
    EmptyStep { step_index: u32, step_name: String },
    #[error("step {step_index} names an approver that does not exist: {spec:?}")]
    UnknownApprover { step_index: u32, spec: ApproverSpec },
    #[error("approver lookup failed: {0}")]
    Identity(IdentityError),
}

/// Turns an approval step definition into the users who must act on it.
#[derive(Clone)]
pub struct ApproverResolver {
    identity: Arc<dyn IdentityProvider>,
}

impl ApproverResolver {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }

    /// Resolves `step` for a submission raised by `requester_id`, using the organisation
    /// as it stands right now. Users named by more than one spec get a single slot, bound
    /// to the first spec that produced them.
    pub async fn resolve(
        &self,
        step_index: u32,
        step: &ApprovalStepDef,
        requester_id: u64,
    ) -> Result<Vec<ResolvedApprover>, ResolutionError> {
        let mut requester_ctx: Option<OrgContext> = None;
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();

        for spec in &step.approvers {
            let users = match *spec {
                ApproverSpec::User { id } => vec![id],
                ApproverSpec::Role { id } => self
                    .identity
                    .users_in_role(id)
                    .await
                    .map_err(|e| unknown_or(e, step_index, *spec))?,
                ApproverSpec::Position { id } => {
                    self.position_approvers(step_index, *spec, id, requester_id, &mut requester_ctx)
                        .await?
                }
            };

            for user_id in users {
                if seen.insert(user_id) {
                    resolved.push(ResolvedApprover {
                        user_id,
                        source: *spec,
                    });
                }
            }
        }

        if resolved.is_empty() {
            return Err(ResolutionError::EmptyStep {
                step_index,
                step_name: step.name.clone(),
            });
        }

        debug!(
            step_index,
            step = %step.name,
            approvers = resolved.len(),
            "Resolved approval step"
        );
        Ok(resolved)
    }

    async fn position_approvers(
        &self,
        step_index: u32,
        spec: ApproverSpec,
        position_id: u64,
        requester_id: u64,
        requester_ctx: &mut Option<OrgContext>,
    ) -> Result<Vec<u64>, ResolutionError> {
        let position = self
            .identity
            .position(position_id)
            .await
            .map_err(|e| unknown_or(e, step_index, spec))?;
        let holders = self
            .identity
            .position_holders(position_id)
            .await
            .map_err(ResolutionError::Identity)?;

        if !position.org_scoped {
            return Ok(holders);
        }

        let requester = match requester_ctx {
            Some(ctx) => *ctx,
            None => {
                let ctx = self
                    .identity
                    .employee_org_context(requester_id)
                    .await
                    .map_err(ResolutionError::Identity)?;
                *requester_ctx = Some(ctx);
                ctx
            }
        };

        let mut accepted = Vec::with_capacity(holders.len());
        for holder in holders {
            let holder_ctx = self
                .identity
                .employee_org_context(holder)
                .await
                .map_err(ResolutionError::Identity)?;

            match (requester.faculty_id, holder_ctx.faculty_id) {
                (Some(wanted), Some(actual)) if wanted != actual => {
                    debug!(
                        position_id,
                        holder,
                        wanted,
                        actual,
                        "Position holder belongs to another faculty"
                    );
                }
                (Some(_), Some(_)) => accepted.push(holder),
                _ => {
                    // Fail-open: no faculty on one side means no scoping.
                    warn!(
                        position_id,
                        holder,
                        requester_id,
                        "Accepting position holder without faculty scoping"
                    );
                    accepted.push(holder);
                }
            }
        }

        Ok(accepted)
    }
}

fn unknown_or(e: IdentityError, step_index: u32, spec: ApproverSpec) -> ResolutionError {
    match e {
        IdentityError::UnknownRole(_) | IdentityError::UnknownPosition(_) => {
            ResolutionError::UnknownApprover { step_index, spec }
        }
        other => ResolutionError::Identity(other),
    }
}
