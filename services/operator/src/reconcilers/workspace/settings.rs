//! Workspace sub-resources.
//!
//! Every step reads the current remote set, then removes, updates and adds
//! entries until it matches the spec. Steps are independent and a failed
//! step leaves earlier ones in place.

use std::collections::{BTreeMap, BTreeSet};

use tfo_id::{TeamId, VariableSetId, WorkspaceId};
use tracing::{debug, info};

use crate::controller::{Pass, ReconcileError, ReconcileResult};
use crate::reconcilers::{resolve_teams, resolve_workspace};
use crate::remote::{
    collect_pages, NotificationOptions, RemoteResultExt, VariableCategory, VariableOptions,
    Workspace, WorkspaceAccess,
};
use crate::resources::workspace::VariableSpec;
use crate::resources::WorkspaceSpec;

pub(super) async fn sync_tags(
    pass: &Pass<'_, WorkspaceSpec>,
    workspace: &Workspace,
) -> ReconcileResult<()> {
    let desired: BTreeSet<&String> = pass.spec().tags.iter().collect();
    let current: BTreeSet<&String> = workspace.tag_names.iter().collect();

    let stale: Vec<String> = current.difference(&desired).map(|t| (*t).clone()).collect();
    if !stale.is_empty() {
        pass.client
            .remove_workspace_tags(&workspace.id, &stale)
            .await?;
        debug!(tags = ?stale, "Removed workspace tags");
    }

    let missing: Vec<String> = desired.difference(&current).map(|t| (*t).clone()).collect();
    if !missing.is_empty() {
        pass.client.add_workspace_tags(&workspace.id, &missing).await?;
        debug!(tags = ?missing, "Added workspace tags");
    }
    Ok(())
}

/// Resolve a declared variable into the options the platform takes.
async fn variable_options(
    pass: &Pass<'_, WorkspaceSpec>,
    variable: &VariableSpec,
    category: VariableCategory,
) -> ReconcileResult<VariableOptions> {
    let value = match (&variable.value, &variable.value_from) {
        (Some(value), _) => value.clone(),
        (None, Some(source)) => pass
            .ctx
            .secrets
            .secret_value(pass.namespace(), &source.name, &source.key)
            .await?
            .ok_or_else(|| {
                ReconcileError::unresolved("secret", format!("{}/{}", source.name, source.key))
            })?,
        (None, None) => String::new(),
    };
    Ok(VariableOptions {
        key: variable.name.clone(),
        value,
        category,
        hcl: variable.hcl,
        sensitive: variable.sensitive,
        description: variable.description.clone(),
    })
}

pub(super) async fn sync_variables(
    pass: &Pass<'_, WorkspaceSpec>,
    workspace: &WorkspaceId,
) -> ReconcileResult<()> {
    let mut desired = Vec::new();
    for (category, variables) in [
        (VariableCategory::Terraform, &pass.spec().terraform_variables),
        (VariableCategory::Env, &pass.spec().environment_variables),
    ] {
        for variable in variables {
            desired.push(variable_options(pass, variable, category).await?);
        }
    }

    let client = pass.client.as_ref();
    let current = client.list_variables(workspace).await?;
    // Sensitive values cannot be compared, so rewrite them on spec changes.
    let rewrite_sensitive = pass.generation_changed();

    for variable in &current {
        let wanted = desired
            .iter()
            .find(|d| d.key == variable.key && d.category == variable.category);
        match wanted {
            None => {
                client
                    .delete_variable(workspace, &variable.id)
                    .await
                    .found()?;
                debug!(key = %variable.key, "Deleted variable");
            }
            Some(options) if !options.matches(variable) || (options.sensitive && rewrite_sensitive) => {
                client.update_variable(workspace, &variable.id, options).await?;
                debug!(key = %variable.key, "Updated variable");
            }
            Some(_) => {}
        }
    }

    for options in &desired {
        let exists = current
            .iter()
            .any(|v| v.key == options.key && v.category == options.category);
        if !exists {
            client.create_variable(workspace, options).await?;
            debug!(key = %options.key, "Created variable");
        }
    }
    Ok(())
}

pub(super) async fn sync_team_access(
    pass: &Pass<'_, WorkspaceSpec>,
    workspace: &WorkspaceId,
) -> ReconcileResult<()> {
    let spec = pass.spec();
    let client = pass.client.as_ref();

    let references: Vec<_> = spec.team_access.iter().map(|entry| &entry.team).collect();
    let teams = resolve_teams(client, &spec.organization, &references).await?;
    let desired: BTreeMap<TeamId, WorkspaceAccess> = teams
        .into_iter()
        .zip(spec.team_access.iter().map(|entry| entry.access))
        .collect();

    let current = client.list_team_access(workspace).await?;
    for entry in &current {
        match desired.get(&entry.team_id) {
            Some(access) if *access == entry.access => {}
            Some(access) => {
                client.update_team_access(&entry.id, *access).await?;
                debug!(team_id = %entry.team_id, "Updated team access");
            }
            None => {
                client.remove_team_access(&entry.id).await.found()?;
                debug!(team_id = %entry.team_id, "Removed team access");
            }
        }
    }
    for (team, access) in &desired {
        if !current.iter().any(|entry| &entry.team_id == team) {
            client.add_team_access(workspace, team, *access).await?;
            debug!(team_id = %team, "Added team access");
        }
    }
    Ok(())
}

pub(super) async fn sync_run_triggers(
    pass: &Pass<'_, WorkspaceSpec>,
    workspace: &WorkspaceId,
) -> ReconcileResult<()> {
    let client = pass.client.as_ref();
    let mut sources = BTreeSet::new();
    for reference in &pass.spec().run_triggers {
        let source = resolve_workspace(client, &pass.spec().organization, reference).await?;
        sources.insert(source.id);
    }

    let current = client.list_run_triggers(workspace).await?;
    for trigger in &current {
        if !sources.contains(&trigger.sourceable_id) {
            client.delete_run_trigger(&trigger.id).await.found()?;
            debug!(source = %trigger.sourceable_id, "Deleted run trigger");
        }
    }
    for source in &sources {
        if !current.iter().any(|trigger| &trigger.sourceable_id == source) {
            client.create_run_trigger(workspace, source).await?;
            debug!(source = %source, "Created run trigger");
        }
    }
    Ok(())
}

pub(super) async fn sync_notifications(
    pass: &Pass<'_, WorkspaceSpec>,
    workspace: &WorkspaceId,
) -> ReconcileResult<()> {
    let client = pass.client.as_ref();
    let desired: Vec<NotificationOptions> = pass
        .spec()
        .notifications
        .iter()
        .map(|n| NotificationOptions {
            name: n.name.clone(),
            destination_type: n.destination_type,
            url: n.url.clone(),
            enabled: n.enabled,
            triggers: n.triggers.clone(),
        })
        .collect();

    let current = client.list_notifications(workspace).await?;
    for notification in &current {
        match desired.iter().find(|d| d.name == notification.name) {
            None => {
                client.delete_notification(&notification.id).await.found()?;
                debug!(name = %notification.name, "Deleted notification");
            }
            Some(options) if !options.matches(notification) => {
                client.update_notification(&notification.id, options).await?;
                debug!(name = %notification.name, "Updated notification");
            }
            Some(_) => {}
        }
    }
    for options in &desired {
        if !current.iter().any(|n| n.name == options.name) {
            client.create_notification(workspace, options).await?;
            debug!(name = %options.name, "Created notification");
        }
    }
    Ok(())
}

/// Attach declared variable sets and detach others. Global sets apply to
/// every workspace and are left alone.
pub(super) async fn sync_variable_sets(
    pass: &Pass<'_, WorkspaceSpec>,
    workspace: &WorkspaceId,
) -> ReconcileResult<()> {
    let client = pass.client.as_ref();
    let spec = pass.spec();

    let organization_sets = if spec.variable_sets.iter().any(|set| set.id.is_none()) {
        collect_pages(|page| client.list_variable_sets(&spec.organization, page)).await?
    } else {
        Vec::new()
    };
    let mut desired = BTreeSet::<VariableSetId>::new();
    for reference in &spec.variable_sets {
        let id = match (&reference.id, reference.name.as_deref()) {
            (Some(id), _) => id.clone(),
            (None, name) => organization_sets
                .iter()
                .find(|set| Some(set.name.as_str()) == name)
                .map(|set| set.id.clone())
                .ok_or_else(|| {
                    ReconcileError::unresolved("variable set", name.unwrap_or_default())
                })?,
        };
        desired.insert(id);
    }

    let current = client.list_workspace_variable_sets(workspace).await?;
    for set in current.iter().filter(|set| !set.global) {
        if !desired.contains(&set.id) {
            client
                .remove_variable_set(&set.id, workspace)
                .await
                .found()?;
            info!(variable_set = %set.name, "Detached variable set");
        }
    }
    for id in &desired {
        if !current.iter().any(|set| &set.id == id) {
            client.apply_variable_set(id, workspace).await?;
            info!(variable_set_id = %id, "Attached variable set");
        }
    }
    Ok(())
}
