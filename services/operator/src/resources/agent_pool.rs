//! Agent pool records.
//!
//! An agent pool record owns the remote pool, a set of agent tokens, and
//! optionally a fleet of agent workers that can be autoscaled from the
//! pool's pending run demand.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tfo_id::{AgentPoolId, AgentTokenId, WorkspaceId};
use tfo_reconcile::Cooldown;

use super::{DeletionPolicy, RecordStatus, ResourceKind, SecretKeyRef, Spec, ValidationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolSpec {
    pub name: String,
    pub organization: String,
    pub token: SecretKeyRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(default)]
    pub agent_tokens: Vec<AgentTokenDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_deployment: Option<AgentDeployment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AgentDeploymentAutoscaling>,
}

/// A token the record wants to exist, identified by its description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTokenDeclaration {
    pub name: String,
}

/// Worker fleet running agents against the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDeployment {
    /// Fixed replica count when autoscaling is off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDeploymentAutoscaling {
    /// Only consulted on platforms without run-level pool filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_workspaces: Option<Vec<TargetWorkspace>>,
    pub min_replicas: i32,
    pub max_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_period_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_period: Option<CooldownPeriod>,
}

impl AgentDeploymentAutoscaling {
    /// Resolve the cool-down, falling back to `default_seconds` for anything
    /// not configured.
    pub fn cooldown(&self, default_seconds: i64) -> Cooldown {
        let uniform = self.cooldown_period_seconds.unwrap_or(default_seconds);
        match &self.cooldown_period {
            Some(split) => Cooldown::Split {
                scale_up_seconds: split.scale_up_seconds.unwrap_or(uniform),
                scale_down_seconds: split.scale_down_seconds.unwrap_or(uniform),
            },
            None => Cooldown::Uniform { seconds: uniform },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownPeriod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_seconds: Option<i64>,
}

/// Selector for a workspace whose pending runs count toward demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetWorkspace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<WorkspaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Name pattern; a leading and/or trailing `*` is a wildcard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub id: AgentTokenId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingStatus {
    pub desired_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scaling_event: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolStatus {
    pub observed_generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_pool_id: Option<AgentPoolId>,
    #[serde(default)]
    pub agent_tokens: Vec<TokenStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingStatus>,
}

impl RecordStatus for AgentPoolStatus {
    fn observed_generation(&self) -> u64 {
        self.observed_generation
    }

    fn set_observed_generation(&mut self, generation: u64) {
        self.observed_generation = generation;
    }
}

impl Spec for AgentPoolSpec {
    type Status = AgentPoolStatus;

    const KIND: ResourceKind = ResourceKind::AgentPool;
    const DELETION_POLICIES: &'static [DeletionPolicy] =
        &[DeletionPolicy::Retain, DeletionPolicy::Destroy];

    fn organization(&self) -> &str {
        &self.organization
    }

    fn credentials(&self) -> &SecretKeyRef {
        &self.token
    }

    fn deletion_policy(&self) -> Option<DeletionPolicy> {
        self.deletion_policy
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::new("name", "must not be empty"));
        }
        check_token_names(&self.agent_tokens)?;

        if let Some(deployment) = &self.agent_deployment {
            if deployment.replicas.is_some_and(|replicas| replicas < 0) {
                return Err(ValidationError::new(
                    "agentDeployment.replicas",
                    "must not be negative",
                ));
            }
        }

        let Some(autoscaling) = &self.autoscaling else {
            return Ok(());
        };
        if self.agent_deployment.is_none() {
            return Err(ValidationError::new(
                "autoscaling",
                "requires agentDeployment",
            ));
        }
        if autoscaling.min_replicas < 0 || autoscaling.min_replicas > autoscaling.max_replicas {
            return Err(ValidationError::new(
                "autoscaling",
                "minReplicas must be between 0 and maxReplicas",
            ));
        }
        let negative_cooldown = autoscaling.cooldown_period_seconds.is_some_and(|s| s < 0)
            || autoscaling.cooldown_period.as_ref().is_some_and(|period| {
                period.scale_up_seconds.is_some_and(|s| s < 0)
                    || period.scale_down_seconds.is_some_and(|s| s < 0)
            });
        if negative_cooldown {
            return Err(ValidationError::new(
                "autoscaling.cooldownPeriod",
                "must not be negative",
            ));
        }
        for (i, target) in autoscaling
            .target_workspaces
            .iter()
            .flatten()
            .enumerate()
        {
            let set = [
                target.id.is_some(),
                target.name.is_some(),
                target.wildcard_name.is_some(),
            ]
            .into_iter()
            .filter(|set| *set)
            .count();
            if set != 1 {
                return Err(ValidationError::new(
                    format!("autoscaling.targetWorkspaces[{i}]"),
                    "exactly one of id, name and wildcardName must be set",
                ));
            }
        }
        Ok(())
    }
}

/// Token names must be non-empty and unique.
pub(crate) fn check_token_names(tokens: &[AgentTokenDeclaration]) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    for (i, token) in tokens.iter().enumerate() {
        if token.name.is_empty() {
            return Err(ValidationError::new(
                format!("agentTokens[{i}].name"),
                "must not be empty",
            ));
        }
        if !seen.insert(token.name.as_str()) {
            return Err(ValidationError::new(
                format!("agentTokens[{i}].name"),
                format!("duplicate token name {}", token.name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> AgentPoolSpec {
        AgentPoolSpec {
            name: "edge".to_string(),
            organization: "acme".to_string(),
            token: SecretKeyRef {
                name: "tfc".to_string(),
                key: "token".to_string(),
            },
            deletion_policy: None,
            agent_tokens: vec![AgentTokenDeclaration {
                name: "first".to_string(),
            }],
            agent_deployment: Some(AgentDeployment {
                replicas: None,
                image: None,
                labels: BTreeMap::new(),
            }),
            autoscaling: Some(AgentDeploymentAutoscaling {
                target_workspaces: None,
                min_replicas: 1,
                max_replicas: 4,
                cooldown_period_seconds: None,
                cooldown_period: None,
            }),
        }
    }

    #[test]
    fn test_valid_spec() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn test_autoscaling_requires_deployment() {
        let mut spec = spec();
        spec.agent_deployment = None;
        assert_eq!(spec.validate().unwrap_err().field, "autoscaling");
    }

    #[test]
    fn test_min_above_max_rejected() {
        let mut spec = spec();
        if let Some(autoscaling) = spec.autoscaling.as_mut() {
            autoscaling.min_replicas = 5;
        }
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_target_needs_exactly_one_selector() {
        let mut spec = spec();
        if let Some(autoscaling) = spec.autoscaling.as_mut() {
            autoscaling.target_workspaces = Some(vec![TargetWorkspace {
                id: None,
                name: Some("net".to_string()),
                wildcard_name: Some("net-*".to_string()),
            }]);
        }
        let err = spec.validate().unwrap_err();
        assert_eq!(err.field, "autoscaling.targetWorkspaces[0]");
    }

    #[test]
    fn test_duplicate_token_names_rejected() {
        let mut spec = spec();
        spec.agent_tokens.push(AgentTokenDeclaration {
            name: "first".to_string(),
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_split_cooldown_falls_back_to_uniform() {
        let autoscaling = AgentDeploymentAutoscaling {
            target_workspaces: None,
            min_replicas: 0,
            max_replicas: 3,
            cooldown_period_seconds: Some(120),
            cooldown_period: Some(CooldownPeriod {
                scale_up_seconds: Some(30),
                scale_down_seconds: None,
            }),
        };
        assert_eq!(
            autoscaling.cooldown(300),
            Cooldown::Split {
                scale_up_seconds: 30,
                scale_down_seconds: 120
            }
        );
    }
}
