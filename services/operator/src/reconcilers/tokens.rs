//! Agent token synchronisation shared by pool and token records.
//!
//! Tokens are matched to declarations by description. A token's secret value
//! is only returned when it is created, so a tracked token whose value is
//! missing from the target secret is replaced rather than kept.

use std::collections::BTreeSet;

use tfo_events::reasons;
use tfo_id::AgentPoolId;
use tracing::{debug, info, warn};

use crate::controller::{Pass, ReconcileResult};
use crate::remote::{collect_pages, RemoteResultExt};
use crate::resources::agent_pool::{AgentTokenDeclaration, TokenStatus};
use crate::resources::{RecordStatus, Spec};
use crate::secrets::{ObjectClass, SecretData};

/// Statuses that track agent tokens.
pub trait TokenTracking: RecordStatus {
    fn agent_tokens(&mut self) -> &mut Vec<TokenStatus>;
}

impl TokenTracking for crate::resources::AgentPoolStatus {
    fn agent_tokens(&mut self) -> &mut Vec<TokenStatus> {
        &mut self.agent_tokens
    }
}

impl TokenTracking for crate::resources::AgentTokenStatus {
    fn agent_tokens(&mut self) -> &mut Vec<TokenStatus> {
        &mut self.agent_tokens
    }
}

pub struct TokenSync<'a> {
    pub pool: &'a AgentPoolId,
    pub declared: &'a [AgentTokenDeclaration],

    /// Secret in the record's namespace receiving token values by name.
    pub secret_name: &'a str,

    /// Delete remote tokens this record does not track.
    pub exclusive: bool,
}

/// Bring the pool's tokens in line with the declarations.
pub async fn sync_tokens<S>(pass: &mut Pass<'_, S>, sync: TokenSync<'_>) -> ReconcileResult<()>
where
    S: Spec,
    S::Status: TokenTracking,
{
    let remote = collect_pages(|page| pass.client.list_agent_tokens(sync.pool, page)).await?;

    // Forget tokens deleted out of band and refresh usage timestamps.
    let tracked = pass.status_mut().agent_tokens();
    tracked.retain(|token| remote.iter().any(|r| r.id == token.id));
    for token in tracked.iter_mut() {
        if let Some(current) = remote.iter().find(|r| r.id == token.id) {
            token.last_used_at = current.last_used_at;
        }
    }

    let namespace = pass.namespace().to_string();
    let secrets = pass.ctx.secrets.clone();
    let mut values: SecretData = secrets
        .get(ObjectClass::Secret, &namespace, sync.secret_name)
        .await?
        .unwrap_or_default();
    let mut values_changed = false;

    let declared: BTreeSet<&str> = sync.declared.iter().map(|d| d.name.as_str()).collect();
    let stale: Vec<TokenStatus> = pass
        .status_mut()
        .agent_tokens()
        .iter()
        .filter(|token| {
            !declared.contains(token.name.as_str()) || !values.contains_key(&token.name)
        })
        .cloned()
        .collect();
    for token in stale {
        pass.client.delete_agent_token(&token.id).await.found()?;
        pass.status_mut().agent_tokens().retain(|t| t.id != token.id);
        values_changed |= values.remove(&token.name).is_some();
        if declared.contains(token.name.as_str()) {
            warn!(token = %token.name, "Agent token value was lost, replacing the token");
        } else {
            info!(token = %token.name, "Deleted agent token");
        }
    }

    for declaration in sync.declared {
        let tracked = pass
            .status_mut()
            .agent_tokens()
            .iter()
            .any(|token| token.name == declaration.name);
        if tracked {
            continue;
        }

        let token = pass
            .client
            .create_agent_token(sync.pool, &declaration.name)
            .await?;
        pass.status_mut().agent_tokens().push(TokenStatus {
            id: token.id.clone(),
            name: declaration.name.clone(),
            created_at: Some(token.created_at),
            last_used_at: token.last_used_at,
        });
        pass.checkpoint().await?;

        if let Some(value) = token.token {
            values.insert(declaration.name.clone(), value);
            values_changed = true;
        }
        info!(token = %declaration.name, token_id = %token.id, "Created agent token");
        pass.normal(
            reasons::CREATED,
            format!("Created agent token {}", declaration.name),
        );
    }

    if values_changed {
        secrets
            .put(ObjectClass::Secret, &namespace, sync.secret_name, values)
            .await?;
        debug!(secret = %sync.secret_name, "Wrote agent token values");
    }

    if sync.exclusive {
        let owned: Vec<_> = pass
            .status_mut()
            .agent_tokens()
            .iter()
            .map(|token| token.id.clone())
            .collect();
        for token in remote.iter().filter(|token| !owned.contains(&token.id)) {
            pass.client.delete_agent_token(&token.id).await.found()?;
            info!(token_id = %token.id, description = %token.description, "Deleted unmanaged agent token");
        }
    }

    Ok(())
}

/// Delete every tracked token, tolerating tokens that are already gone.
///
/// A failed delete does not stop the others; the token stays tracked and the
/// first failure is returned once every token has been attempted.
pub async fn delete_tracked_tokens<S>(pass: &mut Pass<'_, S>) -> ReconcileResult<()>
where
    S: Spec,
    S::Status: TokenTracking,
{
    let tracked = pass.status_mut().agent_tokens().clone();
    let mut first_error = None;
    for token in tracked {
        match pass.client.delete_agent_token(&token.id).await.found() {
            Ok(_) => {
                pass.status_mut().agent_tokens().retain(|t| t.id != token.id);
                debug!(token_id = %token.id, "Deleted agent token");
            }
            Err(e) => {
                warn!(token_id = %token.id, error = %e, "Failed to delete agent token");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
