//! Local HTTP server the pipeline's integration tests run against.
//!
//! Every JSON reply uses the `{"code", "msg", "data"}` shape the client side
//! expects from real backends.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    routing::{any, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: u64,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateItem {
    pub name: String,
}

#[derive(Deserialize)]
pub struct Page {
    pub page: Option<u32>,
}

#[derive(Default)]
pub struct Inventory {
    next_id: u64,
    items: BTreeMap<u64, Item>,
}

pub type Db = Arc<RwLock<Inventory>>;

/// What `/echo` saw, as JSON.
#[derive(Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Header names lowercased.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Inventory::default()));
    Router::new()
        .route("/items", get(list_items).post(create_item))
        .route("/items/{id}", put(update_item).delete(delete_item))
        .route("/status/{code}", get(status))
        .route("/slow/{ms}", get(slow))
        .route("/empty", get(empty))
        .route("/echo", any(echo))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn ok(data: Value) -> Json<Value> {
    Json(json!({ "code": "0", "msg": "ok", "data": data }))
}

fn not_found(id: u64) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "code": "404", "msg": format!("item {id} not found"), "data": {} })),
    )
}

async fn list_items(State(db): State<Db>, Query(page): Query<Page>) -> Json<Value> {
    let db = db.read().await;
    let items: Vec<&Item> = db.items.values().collect();
    ok(json!({ "page": page.page.unwrap_or(1), "items": items }))
}

async fn create_item(State(db): State<Db>, Json(input): Json<CreateItem>) -> Json<Value> {
    let mut db = db.write().await;
    db.next_id += 1;
    let item = Item {
        id: db.next_id,
        name: input.name,
    };
    db.items.insert(item.id, item.clone());
    ok(json!(item))
}

async fn update_item(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(input): Json<CreateItem>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut db = db.write().await;
    let item = db.items.get_mut(&id).ok_or_else(|| not_found(id))?;
    item.name = input.name;
    Ok(ok(json!(item)))
}

async fn delete_item(
    State(db): State<Db>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut db = db.write().await;
    let item = db.items.remove(&id).ok_or_else(|| not_found(id))?;
    Ok(ok(json!(item)))
}

async fn status(Path(code): Path<u16>) -> (StatusCode, Json<Value>) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (
        status,
        Json(json!({ "code": status.as_u16().to_string(), "msg": status.to_string(), "data": {} })),
    )
}

async fn slow(Path(ms): Path<u64>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    ok(json!({ "slept_ms": ms }))
}

async fn empty() -> StatusCode {
    StatusCode::OK
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    debug!(%method, %uri, "echo");
    let headers = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect();
    Json(Echo {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}
