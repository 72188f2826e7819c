//! Recent operator events.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tfo_events::Event;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list_events))
}

/// Optional filters; all given filters must match.
#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub reason: Option<String>,
}

impl EventQuery {
    fn matches(&self, event: &Event) -> bool {
        let object = &event.object;
        self.kind.as_ref().is_none_or(|k| k == &object.kind)
            && self.namespace.as_ref().is_none_or(|n| n == &object.namespace)
            && self.name.as_ref().is_none_or(|n| n == &object.name)
            && self.reason.as_ref().is_none_or(|r| r == &event.reason)
    }
}

#[derive(Debug, Serialize)]
pub struct ListEventsResponse {
    pub items: Vec<Event>,
}

/// GET /v1/events
async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Json<ListEventsResponse> {
    let items = state
        .recorder()
        .events()
        .into_iter()
        .filter(|event| query.matches(event))
        .collect();
    Json(ListEventsResponse { items })
}
