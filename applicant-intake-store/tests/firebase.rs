use core::convert::Infallible;
use core::time::Duration;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use applicant_intake_store::error::{StoreError, TransportError};
use applicant_intake_store::firebase::Backoff;
use applicant_intake_store::{
    Application, Course, FirebaseStore, RecordId, RecordStore, Snapshot, StoreEvent,
    Subscription, STUDENTS,
};
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt as _};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Just enough of the hosted database's REST interface for one collection.
#[derive(Clone)]
struct FakeDatabase {
    records: Arc<Mutex<Map<String, Value>>>,
    events: broadcast::Sender<(&'static str, Value)>,
    /// While false the collection stream answers 401.
    streaming: Arc<AtomicBool>,
}

impl FakeDatabase {
    fn new() -> Self {
        Self {
            records: Arc::default(),
            events: broadcast::channel(64).0,
            streaming: Arc::new(AtomicBool::new(true)),
        }
    }

    fn push(&self, event: &'static str, path: &str, data: Value) {
        let _receivers = self.events.send((event, json!({ "path": path, "data": data })));
    }
}

fn key(file: &str) -> String {
    file.strip_suffix(".json").unwrap_or(file).to_owned()
}

async fn read(State(fake): State<FakeDatabase>, Path(file): Path<String>) -> Json<Value> {
    let records = fake.records.lock().unwrap();
    // shallow reads of a flat record still tell presence apart from absence
    Json(records.get(&key(&file)).map_or(Value::Null, |_value| Value::Bool(true)))
}

async fn write(
    State(fake): State<FakeDatabase>,
    Path(file): Path<String>,
    Json(value): Json<Value>,
) -> Json<Value> {
    let key = key(&file);
    fake.records.lock().unwrap().insert(key.clone(), value.clone());
    fake.push("put", &format!("/{key}"), value.clone());
    Json(value)
}

async fn delete(State(fake): State<FakeDatabase>, Path(file): Path<String>) -> Json<Value> {
    let key = key(&file);
    fake.records.lock().unwrap().remove(&key);
    fake.push("put", &format!("/{key}"), Value::Null);
    Json(Value::Null)
}

fn permission_denied() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Permission denied" })),
    )
        .into_response()
}

async fn stream_collection(State(fake): State<FakeDatabase>) -> Response {
    if !fake.streaming.load(Ordering::SeqCst) {
        return permission_denied();
    }
    collection_events(&fake).into_response()
}

fn collection_events(fake: &FakeDatabase) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = fake.events.subscribe();
    let initial = {
        let records = fake.records.lock().unwrap();
        let data = if records.is_empty() {
            Value::Null
        } else {
            Value::Object(records.clone())
        };
        ("put", json!({ "path": "/", "data": data }))
    };
    let updates = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((event, receiver)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(
        stream::once(async move { initial })
            .chain(updates)
            .map(|(event, data)| Ok(Event::default().event(event).data(data.to_string()))),
    )
}

async fn locked(RawQuery(query): RawQuery) -> Response {
    if query.is_some_and(|query| query.contains("auth=letmein")) {
        Json(Value::Null).into_response()
    } else {
        permission_denied()
    }
}

async fn moved(Path(file): Path<String>, State(address): State<SocketAddr>) -> Response {
    (
        StatusCode::TEMPORARY_REDIRECT,
        [(header::LOCATION, format!("http://{address}/students/{file}"))],
    )
        .into_response()
}

async fn serve(fake: FakeDatabase) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let app = Router::new()
        .route(
            "/students/:file",
            get(read).put(write).delete(delete),
        )
        .route("/students.json", get(stream_collection))
        .with_state(fake)
        .merge(
            Router::new()
                .route("/moved/students/:file", get(moved).put(moved).delete(moved))
                .with_state(address),
        )
        .route("/locked/students/:file", get(locked).put(locked).delete(locked))
        .route("/locked/students.json", get(locked));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}

fn store(address: SocketAddr, prefix: &str, auth_token: Option<&str>) -> FirebaseStore {
    FirebaseStore::new(
        &format!("http://{address}{prefix}"),
        auth_token.map(ToOwned::to_owned),
    )
    .unwrap()
    .with_backoff(Backoff {
        initial: Duration::from_millis(10),
        max: Duration::from_millis(50),
    })
}

fn application(id: &str, name: &str) -> Application {
    Application {
        id: RecordId::new(id).unwrap(),
        name: name.to_owned(),
        email: "a@x.com".to_owned(),
        phone: "555".to_owned(),
        course: Course::Cco,
        message: String::new(),
    }
}

async fn next_event(subscription: &mut Subscription) -> StoreEvent {
    tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .expect("no event within five seconds")
        .expect("subscription ended")
}

async fn next_snapshot(subscription: &mut Subscription) -> Snapshot {
    match next_event(subscription).await {
        StoreEvent::Snapshot(snapshot) => snapshot,
        StoreEvent::ReadFailed(error) => panic!("read failed: {error}"),
    }
}

#[tokio::test]
async fn create_exists_and_remove() {
    let fake = FakeDatabase::new();
    let address = serve(fake.clone()).await;
    let store = store(address, "", None);
    let ana = application("IT1111", "Ana");

    assert!(!store.exists(STUDENTS, &ana.id).await.unwrap());
    store.create(STUDENTS, &ana.id, &ana).await.unwrap();
    assert!(store.exists(STUDENTS, &ana.id).await.unwrap());
    assert_eq!(
        fake.records.lock().unwrap()["IT1111"],
        json!({"id": "IT1111", "name": "Ana", "email": "a@x.com", "phone": "555", "course": "CCO", "message": ""})
    );

    store.remove(STUDENTS, &ana.id).await.unwrap();
    assert!(!store.exists(STUDENTS, &ana.id).await.unwrap());
    // deleting what is not there is fine
    store.remove(STUDENTS, &ana.id).await.unwrap();
}

#[tokio::test]
async fn subscription_follows_puts_and_patches() {
    let fake = FakeDatabase::new();
    let address = serve(fake.clone()).await;
    let store = store(address, "", None);

    let mut subscription = store.subscribe(STUDENTS);
    assert!(next_snapshot(&mut subscription).await.is_empty());

    let ana = application("IT1111", "Ana");
    store.create(STUDENTS, &ana.id, &ana).await.unwrap();
    let snapshot = next_snapshot(&mut subscription).await;
    assert_eq!(snapshot.values().collect::<Vec<_>>(), vec![&ana]);

    fake.push(
        "patch",
        "/",
        json!({"IT2222": {"name": "Bob", "email": "b@x.com", "phone": "556", "course": "Digital Marketing"}}),
    );
    let snapshot = next_snapshot(&mut subscription).await;
    assert_eq!(snapshot.len(), 2);
    let bob = &snapshot[&RecordId::new("IT2222").unwrap()];
    assert_eq!(bob.id.as_str(), "IT2222");
    assert_eq!(bob.course, Course::DigitalMarketing);
    assert_eq!(bob.message, "");

    store.remove(STUDENTS, &ana.id).await.unwrap();
    let snapshot = next_snapshot(&mut subscription).await;
    assert_eq!(
        snapshot.keys().map(RecordId::as_str).collect::<Vec<_>>(),
        vec!["IT2222"]
    );

    subscription.unsubscribe();
}

#[tokio::test]
async fn redirects_are_followed() {
    let fake = FakeDatabase::new();
    let address = serve(fake.clone()).await;
    let store = store(address, "/moved", None);
    let ana = application("IT4321", "Ana");

    store.create(STUDENTS, &ana.id, &ana).await.unwrap();
    assert!(fake.records.lock().unwrap().contains_key("IT4321"));
    assert!(store.exists(STUDENTS, &ana.id).await.unwrap());
}

#[tokio::test]
async fn permission_denied_is_reported() {
    let address = serve(FakeDatabase::new()).await;
    let store = store(address, "/locked", None);
    let ana = application("IT1111", "Ana");

    let error = store.create(STUDENTS, &ana.id, &ana).await.unwrap_err();
    assert!(
        matches!(
            &error,
            StoreError::Write {
                path,
                source: TransportError::PermissionDenied,
            } if path == "students/IT1111"
        ),
        "{error:?}"
    );
    assert!(matches!(
        store.exists(STUDENTS, &ana.id).await,
        Err(StoreError::Read { .. })
    ));

    let mut subscription = store.subscribe(STUDENTS);
    assert!(matches!(
        next_event(&mut subscription).await,
        StoreEvent::ReadFailed(StoreError::Read {
            source: TransportError::PermissionDenied,
            ..
        })
    ));
    // the listener keeps retrying in the background
    assert!(matches!(
        next_event(&mut subscription).await,
        StoreEvent::ReadFailed(_)
    ));
}

#[tokio::test]
async fn subscription_recovers_once_the_stream_is_back() {
    let fake = FakeDatabase::new();
    fake.streaming.store(false, Ordering::SeqCst);
    let address = serve(fake.clone()).await;
    let store = store(address, "", None);
    let ana = application("IT1111", "Ana");
    store.create(STUDENTS, &ana.id, &ana).await.unwrap();

    let mut subscription = store.subscribe(STUDENTS);
    assert!(matches!(
        next_event(&mut subscription).await,
        StoreEvent::ReadFailed(StoreError::Read {
            source: TransportError::PermissionDenied,
            ..
        })
    ));

    fake.streaming.store(true, Ordering::SeqCst);
    let mut snapshot = None;
    for _ in 0..100 {
        if let StoreEvent::Snapshot(delivered) = next_event(&mut subscription).await {
            snapshot = Some(delivered);
            break;
        }
    }
    let snapshot = snapshot.expect("no snapshot after the stream came back");
    assert_eq!(snapshot.get(&ana.id), Some(&ana));

    // updates keep flowing on the new connection
    let bob = application("IT2222", "Bob");
    store.create(STUDENTS, &bob.id, &bob).await.unwrap();
    assert_eq!(next_snapshot(&mut subscription).await.len(), 2);
}

#[tokio::test]
async fn auth_token_is_sent_as_query_parameter() {
    let address = serve(FakeDatabase::new()).await;
    let store = store(address, "/locked", Some("letmein"));
    let ana = application("IT1111", "Ana");

    store.create(STUDENTS, &ana.id, &ana).await.unwrap();
    assert!(!store.exists(STUDENTS, &ana.id).await.unwrap());
}

#[tokio::test]
async fn invalid_collection_is_rejected_before_any_request() {
    let store = FirebaseStore::new("http://127.0.0.1:9", None).unwrap();
    let ana = application("IT1111", "Ana");
    assert!(matches!(
        store.create("../secrets", &ana.id, &ana).await,
        Err(StoreError::InvalidKey(_))
    ));
}
