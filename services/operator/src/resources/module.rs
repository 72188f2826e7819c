use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tfo_id::{ConfigurationVersionId, WorkspaceId};
use tfo_reconcile::{RetryPolicy, RetryStatus};

use super::{
    check_retry_policy, DeletionPolicy, IdOrName, RecordStatus, ResourceKind, RunRecord,
    SecretKeyRef, Spec, ValidationError,
};
use crate::remote::ConfigurationStatus;

fn default_module_name() -> String {
    "this".to_string()
}

/// A registry or VCS module executed inside an existing workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    pub organization: String,
    pub token: SecretKeyRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    pub module: ModuleSource,
    pub workspace: IdOrName<WorkspaceId>,

    /// Local name of the module block in the generated configuration.
    #[serde(default = "default_module_name")]
    pub name: String,
    #[serde(default)]
    pub variables: Vec<ModuleVariable>,
    #[serde(default)]
    pub outputs: Vec<ModuleOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSource {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A workspace variable passed through to the module input of the same name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleVariable {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleOutput {
    pub name: String,
    #[serde(default)]
    pub sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationVersionRecord {
    pub id: ConfigurationVersionId,
    pub status: ConfigurationStatus,

    /// Spec generation the uploaded configuration was rendered from.
    pub generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    pub observed_generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_version: Option<ConfigurationVersionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunRecord>,

    /// Destroy run started on teardown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroy_run: Option<RunRecord>,
    #[serde(default)]
    pub retry: RetryStatus,

    /// Non-sensitive output values from the last applied run.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl RecordStatus for ModuleStatus {
    fn observed_generation(&self) -> u64 {
        self.observed_generation
    }

    fn set_observed_generation(&mut self, generation: u64) {
        self.observed_generation = generation;
    }
}

impl Spec for ModuleSpec {
    type Status = ModuleStatus;

    const KIND: ResourceKind = ResourceKind::Module;
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
        self.workspace.check("workspace")?;
        if self.module.source.is_empty() {
            return Err(ValidationError::new("module.source", "must not be empty"));
        }
        if !is_identifier(&self.name) {
            return Err(ValidationError::new(
                "name",
                "must be a valid identifier",
            ));
        }
        for (i, variable) in self.variables.iter().enumerate() {
            if !is_identifier(&variable.name) {
                return Err(ValidationError::new(
                    format!("variables[{i}].name"),
                    "must be a valid identifier",
                ));
            }
        }
        for (i, output) in self.outputs.iter().enumerate() {
            if !is_identifier(&output.name) {
                return Err(ValidationError::new(
                    format!("outputs[{i}].name"),
                    "must be a valid identifier",
                ));
            }
        }
        check_retry_policy(self.retry_policy.as_ref())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
