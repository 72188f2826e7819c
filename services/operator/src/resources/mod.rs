//! Managed-resource records.
//!
//! A record is the declared intent for one remote object. Every kind shares
//! the same envelope: [`RecordMeta`] (identity, generation counters, guard
//! flags) plus a kind-specific spec and status.

pub mod agent_pool;
pub mod agent_token;
pub mod module;
pub mod project;
pub mod runs_collector;
pub mod workspace;

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tfo_events::ObjectRef;
use tfo_id::{AgentPoolId, ConfigurationVersionId, RunId};
use tfo_reconcile::{GuardState, RetryPolicy};
use thiserror::Error;

use crate::remote::{Run, RunStatus};

pub use agent_pool::{AgentPoolSpec, AgentPoolStatus};
pub use agent_token::{AgentTokenSpec, AgentTokenStatus};
pub use module::{ModuleSpec, ModuleStatus};
pub use project::{ProjectSpec, ProjectStatus};
pub use runs_collector::{RunsCollectorSpec, RunsCollectorStatus};
pub use workspace::{WorkspaceSpec, WorkspaceStatus};

/// The kinds of record the operator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    AgentPool,
    AgentToken,
    Module,
    Project,
    RunsCollector,
    Workspace,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::AgentPool,
        ResourceKind::AgentToken,
        ResourceKind::Module,
        ResourceKind::Project,
        ResourceKind::RunsCollector,
        ResourceKind::Workspace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::AgentPool => "AgentPool",
            ResourceKind::AgentToken => "AgentToken",
            ResourceKind::Module => "Module",
            ResourceKind::Project => "Project",
            ResourceKind::RunsCollector => "RunsCollector",
            ResourceKind::Workspace => "Workspace",
        }
    }

    /// Collection name used in HTTP paths.
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::AgentPool => "agentpools",
            ResourceKind::AgentToken => "agenttokens",
            ResourceKind::Module => "modules",
            ResourceKind::Project => "projects",
            ResourceKind::RunsCollector => "runscollectors",
            ResourceKind::Workspace => "workspaces",
        }
    }

    /// Suffix used for per-kind environment variables.
    pub fn env_suffix(&self) -> &'static str {
        match self {
            ResourceKind::AgentPool => "AGENT_POOL",
            ResourceKind::AgentToken => "AGENT_TOKEN",
            ResourceKind::Module => "MODULE",
            ResourceKind::Project => "PROJECT",
            ResourceKind::RunsCollector => "RUNS_COLLECTOR",
            ResourceKind::Workspace => "WORKSPACE",
        }
    }

    pub fn from_plural(plural: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.plural() == plural)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespaced record identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub namespace: String,
    pub name: String,
}

impl RecordKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Store-owned metadata shared by every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    pub namespace: String,
    pub name: String,

    /// Bumped whenever the spec's canonical hash changes.
    pub generation: u64,

    /// Bumped on every write; the compare-and-swap token for status writes.
    pub resource_version: u64,

    pub guard_present: bool,
    pub deletion_requested: bool,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
}

impl RecordMeta {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.namespace, &self.name)
    }

    pub fn guard_state(&self) -> GuardState {
        GuardState::new(self.guard_present, self.deletion_requested)
    }

    pub fn object_ref(&self, kind: ResourceKind) -> ObjectRef {
        ObjectRef::new(kind.as_str(), &self.namespace, &self.name)
    }
}

/// Observed state every kind tracks.
pub trait RecordStatus:
    Clone + Debug + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn observed_generation(&self) -> u64;
    fn set_observed_generation(&mut self, generation: u64);
}

/// Desired state of one record kind.
pub trait Spec:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Status: RecordStatus;

    const KIND: ResourceKind;

    /// Deletion policies this kind accepts.
    const DELETION_POLICIES: &'static [DeletionPolicy];

    fn organization(&self) -> &str;

    fn credentials(&self) -> &SecretKeyRef;

    fn deletion_policy(&self) -> Option<DeletionPolicy>;

    /// Kind-specific validation beyond shape.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Validate the shared fields and then the kind-specific ones.
pub fn validate_spec<S: Spec>(spec: &S) -> Result<(), ValidationError> {
    if spec.organization().is_empty() {
        return Err(ValidationError::new("organization", "must not be empty"));
    }
    if spec.credentials().name.is_empty() || spec.credentials().key.is_empty() {
        return Err(ValidationError::new(
            "token",
            "secret name and key must both be set",
        ));
    }
    if let Some(policy) = spec.deletion_policy() {
        if !S::DELETION_POLICIES.contains(&policy) {
            return Err(ValidationError::new(
                "deletionPolicy",
                format!("{policy} is not supported for {}", S::KIND),
            ));
        }
    }
    spec.validate()
}

/// The policy applied on teardown: the declared one, else the configured
/// default when the kind allows it, else `retain`.
pub fn effective_deletion_policy<S: Spec>(spec: &S, default: DeletionPolicy) -> DeletionPolicy {
    match spec.deletion_policy() {
        Some(policy) => policy,
        None if S::DELETION_POLICIES.contains(&default) => default,
        None => DeletionPolicy::Retain,
    }
}

/// A record: metadata, desired spec and last observed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Record<S: Spec> {
    pub meta: RecordMeta,
    pub spec: S,
    pub status: S::Status,
}

impl<S: Spec> Record<S> {
    pub fn key(&self) -> RecordKey {
        self.meta.key()
    }

    pub fn object_ref(&self) -> ObjectRef {
        self.meta.object_ref(S::KIND)
    }

    /// True once the last converged generation matches the spec.
    pub fn is_synced(&self) -> bool {
        self.status.observed_generation() == self.meta.generation
    }
}

/// What happens to the remote object when its record is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionPolicy {
    /// Leave the remote object in place.
    Retain,

    /// Delete only if nothing depends on the remote object.
    Soft,

    /// Tear down managed infrastructure first, then delete.
    Destroy,

    /// Delete unconditionally.
    Force,
}

impl DeletionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionPolicy::Retain => "retain",
            DeletionPolicy::Soft => "soft",
            DeletionPolicy::Destroy => "destroy",
            DeletionPolicy::Force => "force",
        }
    }
}

impl std::fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeletionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retain" => Ok(DeletionPolicy::Retain),
            "soft" => Ok(DeletionPolicy::Soft),
            "destroy" => Ok(DeletionPolicy::Destroy),
            "force" => Ok(DeletionPolicy::Force),
            other => Err(format!("unknown deletion policy: {other}")),
        }
    }
}

/// Reference to one key of a secret in the record's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// Reference to a remote object either by ID or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "I: Serialize",
    deserialize = "I: Deserialize<'de>"
))]
pub struct IdOrName<I> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<I>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl<I> IdOrName<I> {
    pub fn by_id(id: I) -> Self {
        Self {
            id: Some(id),
            name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    /// Exactly one of `id` and `name` must be set.
    pub fn check(&self, field: &str) -> Result<(), ValidationError> {
        match (&self.id, self.name.as_deref()) {
            (Some(_), None) => Ok(()),
            (None, Some(name)) if !name.is_empty() => Ok(()),
            _ => Err(ValidationError::new(
                field,
                "exactly one of id and name must be set",
            )),
        }
    }
}

/// A resolved agent pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPoolRef {
    pub id: AgentPoolId,
    pub name: String,
}

/// Last observed state of a run the operator tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: RunId,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_version: Option<ConfigurationVersionId>,

    /// The applied run whose outputs were last collected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_run_id: Option<RunId>,
}

impl RunRecord {
    pub fn observed(run: &Run) -> Self {
        Self {
            id: run.id.clone(),
            status: run.status,
            configuration_version: run.configuration_version_id.clone(),
            output_run_id: None,
        }
    }
}

/// Shared validation for an optional retry policy.
pub(crate) fn check_retry_policy(policy: Option<&RetryPolicy>) -> Result<(), ValidationError> {
    match policy {
        Some(policy) if !policy.is_valid() => Err(ValidationError::new(
            "retryPolicy.backoffLimit",
            "must be -1 or greater",
        )),
        _ => Ok(()),
    }
}

/// One-shot actions queued on a record and consumed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Start a run on a workspace now.
    #[serde(rename_all = "camelCase")]
    Run {
        run_type: RunType,
        #[serde(default)]
        terraform_version: Option<String>,
    },

    /// Re-upload a module's configuration and run it again.
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Plan,
    Apply,
    Refresh,
}

/// A spec that is well-formed but semantically invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}
