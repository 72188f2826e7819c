//! Typed ID definitions for all remote objects the operator touches.
//!
//! Each ID type has the prefix the platform assigns to that object type.

use crate::define_id;

// =============================================================================
// Agents
// =============================================================================

define_id!(AgentPoolId, "apool");
define_id!(AgentTokenId, "at");

// =============================================================================
// Workspaces and Runs
// =============================================================================

define_id!(WorkspaceId, "ws");
define_id!(RunId, "run");
define_id!(ConfigurationVersionId, "cv");
define_id!(StateVersionOutputId, "wsout");

// =============================================================================
// Workspace Settings
// =============================================================================

define_id!(VariableId, "var");
define_id!(VariableSetId, "varset");
define_id!(NotificationId, "nc");
define_id!(RunTriggerId, "rt");

// =============================================================================
// Organization
// =============================================================================

define_id!(ProjectId, "prj");
define_id!(TeamId, "team");
define_id!(TeamAccessId, "tws");
define_id!(ProjectTeamAccessId, "tprj");

// =============================================================================
// Tests
// =============================================================================
