use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use taskbin_core::access::{AccessGate, DEFAULT_WRITE_SECRET, MemoryTokenSlot};
use taskbin_core::board::Board;
use taskbin_core::criteria::CriteriaStore;
use taskbin_core::editor::TaskForm;
use taskbin_core::store::{ACCESS_KEY_HEADER, HttpRecordStore, RecordStore, StoreError};
use taskbin_core::task::Status;

const BIN_ID: &str = "682c44bf8960c979a59d8006";
const ACCESS_KEY: &str = "test-access-key";

/// Stand-in for the hosted document store: one bin, whole-document GET/PUT.
#[derive(Clone, Default)]
struct FakeBin {
    record: Arc<Mutex<Option<Value>>>,
    puts: Arc<AtomicUsize>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(ACCESS_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        == Some(ACCESS_KEY)
}

async fn read_bin(
    State(bin): State<FakeBin>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if id != BIN_ID {
        return Err(StatusCode::NOT_FOUND);
    }
    let body = match bin.record.lock().clone() {
        Some(record) => json!({ "record": record, "metadata": { "id": id, "private": true } }),
        None => json!({ "metadata": { "id": id } }),
    };
    Ok(Json(body))
}

async fn write_bin(
    State(bin): State<FakeBin>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if id != BIN_ID || !body.is_array() {
        return Err(StatusCode::BAD_REQUEST);
    }
    bin.puts.fetch_add(1, Ordering::SeqCst);
    *bin.record.lock() = Some(body.clone());
    Ok(Json(json!({ "record": body, "metadata": { "parentId": id } })))
}

async fn serve(bin: FakeBin) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake store");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new()
        .route("/v3/b/{id}", get(read_bin).put(write_bin))
        .with_state(bin);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake store");
    });
    format!("http://{addr}/v3")
}

fn client(base: &str, key: Option<&str>) -> HttpRecordStore {
    HttpRecordStore::new(base, BIN_ID, key.map(str::to_string), None).expect("client")
}

#[tokio::test]
async fn missing_record_reads_as_empty() {
    let base = serve(FakeBin::default()).await;
    let records = client(&base, Some(ACCESS_KEY)).fetch_all().await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn put_sends_bare_array_and_keeps_unknown_fields() {
    let bin = FakeBin::default();
    *bin.record.lock() = Some(json!([
        { "key": "k1", "name": "A", "description": "d", "status": "pending", "owner": "ops" }
    ]));
    let base = serve(bin.clone()).await;
    let store = client(&base, Some(ACCESS_KEY));

    let records = store.fetch_all().await.unwrap();
    assert_eq!(records.len(), 1);
    store.replace_all(&records).await.unwrap();

    let stored = bin.record.lock().clone().unwrap();
    assert_eq!(stored[0]["owner"], "ops");
    assert_eq!(stored[0]["key"], "k1");
    assert_eq!(bin.puts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_credentials_surface_as_typed_errors() {
    let base = serve(FakeBin::default()).await;
    let store = client(&base, Some("wrong"));
    assert!(matches!(store.fetch_all().await, Err(StoreError::Fetch(_))));
    assert!(matches!(store.replace_all(&[]).await, Err(StoreError::Write(_))));

    let anonymous = client(&base, None);
    assert!(matches!(anonymous.fetch_all().await, Err(StoreError::Fetch(_))));
}

#[tokio::test]
async fn unknown_bin_is_a_fetch_error() {
    let base = serve(FakeBin::default()).await;
    let store = HttpRecordStore::new(&base, "nope", Some(ACCESS_KEY.to_string()), None).unwrap();
    assert!(matches!(store.fetch_all().await, Err(StoreError::Fetch(_))));
}

#[tokio::test]
async fn board_scenario_over_http() {
    let bin = FakeBin::default();
    *bin.record.lock() = Some(json!([]));
    let base = serve(bin.clone()).await;

    let gate = AccessGate::open(Box::new(MemoryTokenSlot::new()), DEFAULT_WRITE_SECRET).unwrap();
    let board = Board::new(client(&base, Some(ACCESS_KEY)), gate, "");
    assert_eq!(board.refresh().await.unwrap(), 0);
    assert!(board.unlock(DEFAULT_WRITE_SECRET).unwrap());

    let form = TaskForm {
        name: Some("A".to_string()),
        description: Some("first task".to_string()),
        project: Some("OM".to_string()),
        deploy: Some("Dev".to_string()),
        deadline: Some("2024-01-01".to_string()),
        status: Some("pending".to_string()),
        note: None,
    };
    board.submit(&form, None).await.unwrap();
    let collection = board.collection();
    assert_eq!(collection.len(), 1);
    let key = collection[0].key.clone();
    assert!(!key.as_str().is_empty());

    board.update_criteria(|c: &mut CriteriaStore| c.set_statuses([Status::Pending]));
    assert_eq!(board.visible().rows.len(), 1);
    assert_eq!(board.address(), "status=pending");

    board.update_criteria(|c: &mut CriteriaStore| c.set_statuses([Status::Completed]));
    assert!(board.visible().is_empty());

    board.request_delete(&key).unwrap();
    assert!(board.confirm_delete().await.unwrap());
    assert!(board.collection().is_empty());
    assert_eq!(bin.record.lock().clone(), Some(json!([])));
    assert_eq!(bin.puts.load(Ordering::SeqCst), 2);
}
