use std::sync::Arc;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use shared::protocol::API_PREFIX;
use shared::types::{DiscoveryResult, DiscoveryResultFlag, Thing, ThingStatus};
use shared::uid::ThingUID;
use crate::discovery::DiscoverySink;
use crate::error::InboxError;
use crate::events::BroadcastPublisher;
use crate::inbox::Inbox;
use crate::registry::{MemoryThingRegistry, ThingRegistry};

#[derive(Clone)]
pub struct AppState {
    pub inbox: Arc<Inbox>,
    pub things: Arc<MemoryThingRegistry>,
    /// Results posted to the API enter the inbox like any other discovery
    pub discovery: DiscoverySink,
    pub events: Arc<BroadcastPublisher>,
}

#[derive(Deserialize)]
pub struct InboxQuery {
    pub flag: Option<DiscoveryResultFlag>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    pub label: Option<String>,
    pub new_thing_id: Option<String>,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: ThingStatus,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/inbox", get(list_inbox).post(submit_result))
        .route("/inbox/events", get(inbox_events))
        .route("/inbox/:uid", delete(remove_result))
        .route("/inbox/:uid/approve", post(approve_result))
        .route("/inbox/:uid/ignore", post(ignore_result))
        .route("/inbox/:uid/unignore", post(unignore_result))
        .route("/things", get(list_things))
        .route("/things/:uid", delete(remove_thing))
        .route("/things/:uid/status", put(set_thing_status));

    Router::new().nest(API_PREFIX, v1).with_state(state)
}

fn parse_uid(raw: &str) -> Result<ThingUID, StatusCode> {
    raw.parse().map_err(|e| {
        tracing::debug!("Rejected thing UID '{}': {}", raw, e);
        StatusCode::BAD_REQUEST
    })
}

/// Runs store and registry calls off the async workers; storage may block.
async fn blocking<T, F>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!("Blocking API task failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn error_status(e: &InboxError) -> StatusCode {
    match e {
        InboxError::NotFound(_) => StatusCode::NOT_FOUND,
        InboxError::InvalidId(_) | InboxError::InvalidUid(_) => StatusCode::BAD_REQUEST,
        InboxError::Registry { .. } => StatusCode::CONFLICT,
    }
}

async fn list_inbox(
    State(state): State<AppState>,
    Query(params): Query<InboxQuery>,
) -> Result<Json<Vec<DiscoveryResult>>, StatusCode> {
    let inbox = state.inbox.clone();
    let mut results = blocking(move || inbox.get_all()).await?;
    if let Some(flag) = params.flag {
        results.retain(|r| r.flag == flag);
    }
    results.sort_by(|a, b| a.thing_uid.cmp(&b.thing_uid));
    Ok(Json(results))
}

async fn submit_result(
    State(state): State<AppState>,
    Json(result): Json<DiscoveryResult>,
) -> StatusCode {
    match state.discovery.thing_discovered(result).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::error!("Failed to submit discovery result: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn remove_result(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let uid = parse_uid(&uid)?;
    let inbox = state.inbox.clone();
    if blocking(move || inbox.remove(&uid)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn approve_result(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    body: Option<Json<ApproveRequest>>,
) -> Result<Json<Thing>, StatusCode> {
    let uid = parse_uid(&uid)?;
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let inbox = state.inbox.clone();
    let approved = blocking(move || {
        inbox.approve(&uid, request.label.as_deref(), request.new_thing_id.as_deref())
    })
    .await?;

    match approved {
        Ok(Some(thing)) => Ok(Json(thing)),
        Ok(None) => Err(StatusCode::UNPROCESSABLE_ENTITY),
        Err(e) => {
            tracing::debug!("Approval rejected: {}", e);
            Err(error_status(&e))
        }
    }
}

async fn flag_result(
    state: AppState,
    uid: String,
    flag: DiscoveryResultFlag,
) -> Result<StatusCode, StatusCode> {
    let uid = parse_uid(&uid)?;
    let inbox = state.inbox.clone();
    if blocking(move || inbox.set_flag(&uid, Some(flag))).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn ignore_result(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<StatusCode, StatusCode> {
    flag_result(state, uid, DiscoveryResultFlag::Ignored).await
}

async fn unignore_result(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<StatusCode, StatusCode> {
    flag_result(state, uid, DiscoveryResultFlag::New).await
}

async fn inbox_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.events.subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default().event(event.event_type).json_data(&event);
                    return Some((sse, rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event stream subscriber lagged, {} inbox events skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn list_things(State(state): State<AppState>) -> Json<Vec<Thing>> {
    Json(state.things.all())
}

async fn remove_thing(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let uid = parse_uid(&uid)?;
    let things = state.things.clone();
    blocking(move || things.remove(&uid))
        .await?
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn set_thing_status(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<StatusCode, StatusCode> {
    let uid = parse_uid(&uid)?;
    let things = state.things.clone();
    blocking(move || things.set_status(&uid, request.status))
        .await?
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|e| {
            tracing::debug!("Status change rejected: {}", e);
            StatusCode::NOT_FOUND
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use crate::discovery::DiscoveryEvent;
    use crate::inbox::tests::{add_now, fixture, result, Fixture};

    fn state(f: &Fixture) -> (AppState, mpsc::Receiver<DiscoveryEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let state = AppState {
            inbox: f.inbox.clone(),
            things: f.things.clone(),
            discovery: DiscoverySink::new("api", tx),
            events: Arc::new(BroadcastPublisher::new(8)),
        };
        (state, rx)
    }

    #[tokio::test]
    async fn test_list_inbox_filters_by_flag() {
        let f = fixture();
        let (state, _rx) = state(&f);
        add_now(&f.inbox, result("demo:dev:2"));
        add_now(&f.inbox, result("demo:dev:1"));
        f.inbox.set_flag(&"demo:dev:2".parse().unwrap(), Some(DiscoveryResultFlag::Ignored));

        let Json(all) = list_inbox(State(state.clone()), Query(InboxQuery { flag: None }))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].thing_uid.to_string(), "demo:dev:1");

        let Json(ignored) = list_inbox(
            State(state),
            Query(InboxQuery {
                flag: Some(DiscoveryResultFlag::Ignored),
            }),
        )
        .await
        .unwrap();
        assert_eq!(ignored.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_goes_through_discovery_channel() {
        let f = fixture();
        let (state, mut rx) = state(&f);

        let status = submit_result(State(state), Json(result("demo:dev:1"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        match rx.recv().await.unwrap() {
            DiscoveryEvent::Discovered { source, result } => {
                assert_eq!(source, "api");
                assert_eq!(result.thing_uid.to_string(), "demo:dev:1");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remove_and_flag_status_codes() {
        let f = fixture();
        let (state, _rx) = state(&f);
        add_now(&f.inbox, result("demo:dev:1"));

        let bad = remove_result(State(state.clone()), Path("nope".to_string())).await;
        assert_eq!(bad, Err(StatusCode::BAD_REQUEST));

        let ignored = ignore_result(State(state.clone()), Path("demo:dev:1".to_string())).await;
        assert_eq!(ignored, Ok(StatusCode::NO_CONTENT));
        let missing = unignore_result(State(state.clone()), Path("demo:dev:9".to_string())).await;
        assert_eq!(missing, Err(StatusCode::NOT_FOUND));

        let removed = remove_result(State(state.clone()), Path("demo:dev:1".to_string())).await;
        assert_eq!(removed, Ok(StatusCode::NO_CONTENT));
        let again = remove_result(State(state), Path("demo:dev:1".to_string())).await;
        assert_eq!(again, Err(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_approve_maps_errors() {
        let f = fixture();
        let (state, _rx) = state(&f);
        add_now(&f.inbox, result("demo:dev:1"));

        let invalid = approve_result(
            State(state.clone()),
            Path("demo:dev:1".to_string()),
            Some(Json(ApproveRequest {
                label: None,
                new_thing_id: Some("a:b".to_string()),
            })),
        )
        .await;
        assert_eq!(invalid.err(), Some(StatusCode::BAD_REQUEST));

        let Json(thing) = approve_result(
            State(state.clone()),
            Path("demo:dev:1".to_string()),
            Some(Json(ApproveRequest {
                label: Some("Hall".to_string()),
                new_thing_id: None,
            })),
        )
        .await
        .unwrap();
        assert_eq!(thing.label, "Hall");

        let gone = approve_result(State(state.clone()), Path("demo:dev:1".to_string()), None).await;
        assert_eq!(gone.err(), Some(StatusCode::NOT_FOUND));

        let Json(things) = list_things(State(state)).await;
        assert_eq!(things.len(), 1);
    }

    #[tokio::test]
    async fn test_thing_endpoints() {
        let f = fixture();
        let (state, _rx) = state(&f);
        let uid: ThingUID = "demo:dev:1".parse().unwrap();
        f.things.add(Thing::new(uid.clone(), uid.thing_type_uid())).unwrap();

        let status = set_thing_status(
            State(state.clone()),
            Path("demo:dev:1".to_string()),
            Json(StatusRequest {
                status: ThingStatus::Online,
            }),
        )
        .await;
        assert_eq!(status, Ok(StatusCode::NO_CONTENT));
        assert_eq!(f.things.status(&uid), ThingStatus::Online);

        let removed = remove_thing(State(state.clone()), Path("demo:dev:1".to_string())).await;
        assert_eq!(removed, Ok(StatusCode::NO_CONTENT));
        let missing = set_thing_status(
            State(state),
            Path("demo:dev:1".to_string()),
            Json(StatusRequest {
                status: ThingStatus::Offline,
            }),
        )
        .await;
        assert_eq!(missing, Err(StatusCode::NOT_FOUND));
    }
}
