use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use spacechat::{
    Config, ConversationHistory, ExchangeClient, ExchangeError, ExchangeOutcome, ExchangeState,
    Protocol, Role, Turn,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

/// What the fake Space does once a job has been created
#[derive(Clone, Copy)]
enum Script {
    Complete,
    ServerError,
    ErrorEvent,
    Hangup,
    Hold,
    MissingJob,
}

#[derive(Clone)]
struct Space {
    script: Script,
    posts: Arc<Mutex<Vec<Value>>>,
    subscriptions: Arc<AtomicUsize>,
}

impl Space {
    fn new(script: Script) -> Self {
        Self {
            script,
            posts: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }
}

async fn create_job(State(space): State<Space>, Json(body): Json<Value>) -> Response {
    space.posts.lock().push(body);
    match space.script {
        Script::ServerError => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        _ => Json(json!({ "event_id": "abc" })).into_response(),
    }
}

async fn follow_job(State(space): State<Space>, Path(event_id): Path<String>) -> Response {
    space.subscriptions.fetch_add(1, Ordering::SeqCst);
    if event_id != "abc" || matches!(space.script, Script::MissingJob) {
        return (StatusCode::NOT_FOUND, "unknown event").into_response();
    }

    let heartbeat = Event::default().event("heartbeat").data("null");
    let events = match space.script {
        Script::Complete => vec![
            heartbeat,
            Event::default()
                .event("generating")
                .data(json!(["The capital"]).to_string()),
            Event::default()
                .event("complete")
                .data(json!(["The capital is Paris.", null]).to_string()),
        ],
        Script::ErrorEvent => vec![heartbeat, Event::default().event("error").data("null")],
        _ => vec![heartbeat],
    };
    let events = stream::iter(events.into_iter().map(Ok::<_, Infallible>));

    if matches!(space.script, Script::Hold) {
        Sse::new(events.chain(stream::pending())).into_response()
    } else {
        Sse::new(events).into_response()
    }
}

async fn predict(State(space): State<Space>, Json(body): Json<Value>) -> Response {
    space.posts.lock().push(body);
    Json(json!({ "data": ["Hello from predict"], "duration": 0.1 })).into_response()
}

async fn serve(space: Space) -> SocketAddr {
    let app = Router::new()
        .route("/gradio_api/call/chat", post(create_job))
        .route("/gradio_api/call/chat/:event_id", get(follow_job))
        .route("/api/chat", post(predict))
        .with_state(space);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config_for(addr: SocketAddr, protocol: Protocol) -> Config {
    Config {
        base_url: format!("http://{}", addr),
        api_name: "chat".to_string(),
        protocol,
        ..Config::default()
    }
}

fn contents(history: &ConversationHistory) -> Vec<(Role, String)> {
    history
        .snapshot()
        .iter()
        .map(|turn| (turn.role(), turn.content().to_string()))
        .collect()
}

#[tokio::test]
async fn queue_exchange_completes_and_records_both_turns() {
    let space = Space::new(Script::Complete);
    let addr = serve(space.clone()).await;
    let history = ConversationHistory::with_turns(vec![
        Turn::user("Hi"),
        Turn::assistant("Hello! Ask me anything."),
    ]);
    let client = ExchangeClient::from_config(&config_for(addr, Protocol::Queue), history.clone()).unwrap();

    let mut pending = client.submit("What is the capital of France?").unwrap();
    let outcome = pending.wait().await.unwrap();

    assert_eq!(
        outcome,
        ExchangeOutcome::Completed("The capital is Paris.".to_string())
    );
    assert_eq!(
        contents(&history),
        vec![
            (Role::User, "Hi".to_string()),
            (Role::Assistant, "Hello! Ask me anything.".to_string()),
            (Role::User, "What is the capital of France?".to_string()),
            (Role::Assistant, "The capital is Paris.".to_string()),
        ]
    );
    assert_eq!(
        space.posts.lock().clone(),
        vec![json!({
            "data": ["What is the capital of France?", [["Hi", "Hello! Ask me anything."]]]
        })]
    );
}

#[tokio::test]
async fn server_error_on_job_creation_is_a_submission_failure() {
    let space = Space::new(Script::ServerError);
    let addr = serve(space.clone()).await;
    let history = ConversationHistory::new();
    let client = ExchangeClient::from_config(&config_for(addr, Protocol::Queue), history.clone()).unwrap();

    let mut pending = client.submit("hello").unwrap();
    let outcome = pending.wait().await.unwrap();

    match outcome {
        ExchangeOutcome::Failed(ExchangeError::SubmissionFailed { reason }) => {
            assert!(reason.contains("500"), "reason was {reason}");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(history.is_empty());
    assert_eq!(space.subscriptions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn error_event_is_a_subscription_failure() {
    let addr = serve(Space::new(Script::ErrorEvent)).await;
    let history = ConversationHistory::with_turns(vec![Turn::user("a"), Turn::assistant("b")]);
    let client = ExchangeClient::from_config(&config_for(addr, Protocol::Queue), history.clone()).unwrap();

    let mut pending = client.submit("hello").unwrap();
    let outcome = pending.wait().await.unwrap();

    assert!(matches!(
        outcome,
        ExchangeOutcome::Failed(ExchangeError::SubscriptionFailed { .. })
    ));
    assert_eq!(
        contents(&history),
        vec![(Role::User, "a".to_string()), (Role::Assistant, "b".to_string())]
    );
}

#[tokio::test]
async fn stream_closing_without_result_is_a_subscription_failure() {
    let addr = serve(Space::new(Script::Hangup)).await;
    let client =
        ExchangeClient::from_config(&config_for(addr, Protocol::Queue), ConversationHistory::new()).unwrap();

    let mut pending = client.submit("hello").unwrap();

    assert!(matches!(
        pending.wait().await,
        Some(ExchangeOutcome::Failed(ExchangeError::SubscriptionFailed { .. }))
    ));
}

#[tokio::test]
async fn rejected_subscription_is_a_subscription_failure() {
    let addr = serve(Space::new(Script::MissingJob)).await;
    let client =
        ExchangeClient::from_config(&config_for(addr, Protocol::Queue), ConversationHistory::new()).unwrap();

    let mut pending = client.submit("hello").unwrap();

    match pending.wait().await {
        Some(ExchangeOutcome::Failed(ExchangeError::SubscriptionFailed { reason })) => {
            assert!(reason.contains("404"), "reason was {reason}");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn cancelling_an_open_subscription_releases_it() {
    let space = Space::new(Script::Hold);
    let addr = serve(space.clone()).await;
    let client =
        ExchangeClient::from_config(&config_for(addr, Protocol::Queue), ConversationHistory::new()).unwrap();

    let mut pending = client.submit("hello").unwrap();
    pending
        .subscribe_state()
        .wait_for(|state| matches!(state, ExchangeState::AwaitingResult { .. }))
        .await
        .unwrap();

    pending.cancel();
    pending.cancel();

    assert_eq!(pending.wait().await, None);
    assert_eq!(pending.state(), ExchangeState::Released);
    assert!(client.history().is_empty());
}

#[tokio::test]
async fn predict_protocol_delivers_through_the_same_exchange() {
    let space = Space::new(Script::Complete);
    let addr = serve(space.clone()).await;
    let history = ConversationHistory::new();
    let client =
        ExchangeClient::from_config(&config_for(addr, Protocol::Predict), history.clone()).unwrap();

    let mut pending = client.submit("  hi there ").unwrap();
    let outcome = pending.wait().await.unwrap();

    assert_eq!(
        outcome,
        ExchangeOutcome::Completed("Hello from predict".to_string())
    );
    assert_eq!(
        contents(&history),
        vec![
            (Role::User, "hi there".to_string()),
            (Role::Assistant, "Hello from predict".to_string()),
        ]
    );
    assert_eq!(space.posts.lock().clone(), vec![json!({ "data": ["hi there", []] })]);
    assert_eq!(space.subscriptions.load(Ordering::SeqCst), 0);
}
