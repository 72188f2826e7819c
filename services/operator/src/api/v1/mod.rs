//! API v1 routes.
//!
//! Every record kind gets the same collection under `/v1/{kind}`. Commands
//! hang off the kinds that accept them.

mod commands;
mod events;
mod records;
mod secrets;

use axum::{routing::post, Router};

use crate::resources::{
    AgentPoolSpec, AgentTokenSpec, ModuleSpec, ProjectSpec, RunsCollectorSpec, Spec,
    WorkspaceSpec,
};
use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest(&prefix::<AgentPoolSpec>(), records::routes::<AgentPoolSpec>())
        .nest(&prefix::<AgentTokenSpec>(), records::routes::<AgentTokenSpec>())
        .nest(
            &prefix::<ModuleSpec>(),
            records::routes::<ModuleSpec>()
                .route("/{namespace}/{name}/restart", post(commands::restart_module)),
        )
        .nest(&prefix::<ProjectSpec>(), records::routes::<ProjectSpec>())
        .nest(
            &prefix::<RunsCollectorSpec>(),
            records::routes::<RunsCollectorSpec>(),
        )
        .nest(
            &prefix::<WorkspaceSpec>(),
            records::routes::<WorkspaceSpec>()
                .route("/{namespace}/{name}/runs", post(commands::start_run)),
        )
        .nest("/secrets", secrets::routes())
        .nest("/events", events::routes())
}

fn prefix<S: Spec>() -> String {
    format!("/{}", S::KIND.plural())
}
