//! End-to-end pipeline tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives a real `Courier`
//! over HTTP with both transports. Listeners forward every delivery into a
//! channel; tests assert on what arrives (and what does not) within a
//! bounded wait.

use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use courier_core::{
    listener, Attachment, ContentKind, Courier, Envelope, FileStore, MemoryStore, NetworkState,
    Origin, RecordStore, RequestConfig, RequestParams, ResponseListener, Status, TransportKind,
};
use mock_server::Echo;
use serde_json::Value;

const WAIT: Duration = Duration::from_secs(10);
const QUIET: Duration = Duration::from_millis(500);

#[derive(Debug)]
struct Delivery {
    success: bool,
    code: i32,
    body: String,
    origin: Origin,
    error: Option<String>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start the mock server on a random port; returns its base URL.
fn start_server() -> String {
    init_tracing();
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

fn recorder() -> (Arc<dyn ResponseListener>, mpsc::Receiver<Delivery>) {
    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    let record = |success: bool, e: &Envelope| Delivery {
        success,
        code: e.code(),
        body: e.body.clone(),
        origin: e.origin,
        error: e.error.clone(),
    };
    let l = listener(
        move |e: &Envelope| {
            let _ = tx.send(record(true, e));
        },
        move |e: &Envelope| {
            let _ = tx2.send(record(false, e));
        },
    );
    (l, rx)
}

fn courier(kind: TransportKind) -> Courier {
    Courier::with_config(RequestConfig::builder().transport(kind).build().unwrap()).unwrap()
}

fn json(body: &str) -> Value {
    serde_json::from_str(body).unwrap()
}

fn echo(body: &str) -> Echo {
    serde_json::from_str(body).unwrap()
}

const BOTH: [TransportKind; 2] = [TransportKind::Pooled, TransportKind::Direct];

#[test]
fn get_items_succeeds_on_both_transports() {
    let base = start_server();
    for kind in BOTH {
        let courier = courier(kind);
        let (l, rx) = recorder();
        courier.get(&format!("{base}/items"), RequestParams::new().field("page", 2), l);

        let got = rx.recv_timeout(WAIT).unwrap();
        assert!(got.success, "{kind:?}: {got:?}");
        assert_eq!(got.code, 200);
        assert_eq!(got.origin, Origin::Network);
        let body = json(&got.body);
        assert_eq!(body["code"], "0");
        assert_eq!(body["data"]["page"], 2);
        assert_eq!(courier.in_flight(), 0);
    }
}

#[test]
fn only_200_routes_to_success() {
    let base = start_server();
    for kind in BOTH {
        let courier = courier(kind);
        for code in [201, 404, 500] {
            let (l, rx) = recorder();
            courier.get(&format!("{base}/status/{code}"), RequestParams::new(), l);
            let got = rx.recv_timeout(WAIT).unwrap();
            assert!(!got.success, "{kind:?} {code}");
            assert_eq!(got.code, code);
            assert_eq!(json(&got.body)["code"], code.to_string());
        }
    }
}

#[test]
fn item_lifecycle() {
    let base = start_server();
    let courier = courier(TransportKind::Pooled);

    let (l, rx) = recorder();
    courier.post(&format!("{base}/items"), RequestParams::new().field("name", "bolt"), l);
    let created = rx.recv_timeout(WAIT).unwrap();
    assert!(created.success, "{created:?}");
    let id = json(&created.body)["data"]["id"].as_u64().unwrap();

    let (l, rx) = recorder();
    courier.put(&format!("{base}/items/{id}"), RequestParams::new().field("name", "nut"), l);
    let updated = rx.recv_timeout(WAIT).unwrap();
    assert!(updated.success);
    assert_eq!(json(&updated.body)["data"]["name"], "nut");

    let (l, rx) = recorder();
    courier.delete(&format!("{base}/items/{id}"), RequestParams::new(), l.clone());
    assert!(rx.recv_timeout(WAIT).unwrap().success);

    courier.delete(&format!("{base}/items/{id}"), RequestParams::new(), l);
    let gone = rx.recv_timeout(WAIT).unwrap();
    assert!(!gone.success);
    assert_eq!(gone.code, 404);
}

#[test]
fn headers_merge_defaults_with_call_overrides() {
    let base = start_server();
    for kind in BOTH {
        let config = RequestConfig::builder()
            .transport(kind)
            .default_header("X-App", "demo")
            .default_header("Accept", "text/plain")
            .build()
            .unwrap();
        let courier = Courier::with_config(config).unwrap();
        courier.set_default_header("Authorization", "Bearer t").unwrap();

        let (l, rx) = recorder();
        let params = RequestParams::new()
            .header("accept", "application/json")
            .header("User-Agent", "courier-test/1");
        courier.get(&format!("{base}/echo"), params, l);

        let seen = echo(&rx.recv_timeout(WAIT).unwrap().body);
        assert_eq!(seen.headers["x-app"], "demo");
        assert_eq!(seen.headers["accept"], "application/json");
        assert_eq!(seen.headers["authorization"], "Bearer t");
        assert_eq!(seen.headers["user-agent"], "courier-test/1");
        assert_eq!(seen.headers["connection"], "close");
    }
}

#[test]
fn fields_go_to_query_or_body_by_method() {
    let base = start_server();
    let courier = courier(TransportKind::Direct);
    let params = || RequestParams::new().field("b", "2").field("a", "x y");

    let (l, rx) = recorder();
    courier.get(&format!("{base}/echo"), params(), l.clone());
    let seen = echo(&rx.recv_timeout(WAIT).unwrap().body);
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.query.as_deref(), Some("b=2&a=x+y"));
    assert!(seen.body.is_empty());

    courier.post(&format!("{base}/echo"), params(), l);
    let seen = echo(&rx.recv_timeout(WAIT).unwrap().body);
    assert_eq!(seen.method, "POST");
    assert!(seen.query.is_none());
    assert!(seen.headers["content-type"].starts_with("application/json"));
    assert_eq!(json(&seen.body), serde_json::json!({"b": "2", "a": "x y"}));
}

#[test]
fn raw_kind_without_body_is_form_urlencoded() {
    let base = start_server();
    let config = RequestConfig::builder()
        .content_kind(ContentKind::Raw)
        .build()
        .unwrap();
    let courier = Courier::with_config(config).unwrap();

    let (l, rx) = recorder();
    courier.put(&format!("{base}/echo"), RequestParams::new().field("k", "v&w"), l.clone());
    let seen = echo(&rx.recv_timeout(WAIT).unwrap().body);
    assert_eq!(seen.headers["content-type"], "application/x-www-form-urlencoded");
    assert_eq!(seen.body, "k=v%26w");

    courier.put(&format!("{base}/echo"), RequestParams::new().raw_body("plain text"), l);
    let seen = echo(&rx.recv_timeout(WAIT).unwrap().body);
    assert!(seen.headers["content-type"].starts_with("text/plain"));
    assert_eq!(seen.body, "plain text");
}

#[test]
fn attachment_forces_multipart() {
    let base = start_server();
    for kind in BOTH {
        let courier = courier(kind);
        let (l, rx) = recorder();
        let params = RequestParams::new()
            .field("title", "notes")
            .attach("upload", Attachment::new("notes.txt", b"hello file".to_vec()));
        courier.post(&format!("{base}/echo"), params, l);

        let seen = echo(&rx.recv_timeout(WAIT).unwrap().body);
        assert!(seen.headers["content-type"].starts_with("multipart/form-data; boundary="));
        assert!(seen.body.contains("name=\"title\"\r\n\r\nnotes\r\n"));
        assert!(seen.body.contains("filename=\"notes.txt\""));
        assert!(seen.body.contains("hello file"));
    }
}

#[test]
fn oversized_attachment_is_a_transport_error() {
    let base = start_server();
    let config = RequestConfig::builder().max_upload_kb(1).build().unwrap();
    let courier = Courier::with_config(config).unwrap();
    let (l, rx) = recorder();
    let params = RequestParams::new().attach("blob", Attachment::new("blob.bin", vec![b'a'; 4096]));
    courier.post(&format!("{base}/echo"), params, l);

    let got = rx.recv_timeout(WAIT).unwrap();
    assert!(!got.success);
    assert_eq!(got.code, Status::TRANSPORT_ERROR_CODE);
    assert!(got.error.unwrap().contains("blob.bin"));
}

#[test]
fn refused_connection_is_a_transport_error() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    for kind in BOTH {
        let courier = courier(kind);
        let (l, rx) = recorder();
        courier.get(&format!("http://127.0.0.1:{port}/items"), RequestParams::new(), l);
        let got = rx.recv_timeout(WAIT).unwrap();
        assert!(!got.success);
        assert_eq!(got.code, Status::TRANSPORT_ERROR_CODE, "{kind:?}");
        assert_eq!(json(&got.body)["code"], "-2");
    }
}

#[test]
fn slow_response_times_out() {
    let base = start_server();
    for kind in BOTH {
        let config = RequestConfig::builder().transport(kind).timeouts(1).build().unwrap();
        let courier = Courier::with_config(config).unwrap();
        let (l, rx) = recorder();
        courier.get(&format!("{base}/slow/4000"), RequestParams::new(), l);
        let got = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(got.code, Status::TRANSPORT_ERROR_CODE, "{kind:?}");
    }
}

#[test]
fn empty_body_is_cached_but_not_delivered() {
    let base = start_server();
    let store = Arc::new(MemoryStore::new());
    let courier = Courier::new().with_store(store.clone());
    courier
        .init(RequestConfig::builder().cache_enabled(true).build().unwrap())
        .unwrap();

    let (l, rx) = recorder();
    courier.get(&format!("{base}/empty"), RequestParams::new(), l);
    let deadline = Instant::now() + WAIT;
    while store.len().unwrap() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(store.len().unwrap(), 1);
    assert!(rx.recv_timeout(QUIET).is_err());
}

#[test]
fn offline_cache_miss_reports_no_network() {
    let base = start_server();
    let network = Arc::new(NetworkState::new(false));
    let courier = Courier::new().with_connectivity(network);
    courier
        .init(RequestConfig::builder().cache_enabled(true).build().unwrap())
        .unwrap();

    let (l, rx) = recorder();
    courier.get(&format!("{base}/items"), RequestParams::new(), l);
    let got = rx.recv_timeout(WAIT).unwrap();
    assert!(!got.success);
    assert_eq!(got.code, Status::NO_NETWORK_CODE);
    assert_eq!(got.origin, Origin::Cache);
    let body = json(&got.body);
    assert_eq!(body["code"], "-1");
    assert_eq!(body["data"], serde_json::json!({}));
}

#[test]
fn online_response_is_replayed_offline() {
    let base = start_server();
    for kind in BOTH {
        let network = Arc::new(NetworkState::new(true));
        let courier = Courier::new().with_connectivity(network.clone());
        courier
            .init(
                RequestConfig::builder()
                    .transport(kind)
                    .cache_enabled(true)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let url = format!("{base}/items");
        let params = || RequestParams::new().field("page", 1);

        let (l, rx) = recorder();
        courier.get(&url, params(), l.clone());
        let online = rx.recv_timeout(WAIT).unwrap();
        assert!(online.success);
        assert_eq!(online.origin, Origin::Network);

        network.set_online(false);
        courier.get(&url, params(), l.clone());
        let offline = rx.recv_timeout(WAIT).unwrap();
        assert!(offline.success, "{kind:?}");
        assert_eq!(offline.code, 200);
        assert_eq!(offline.origin, Origin::Cache);
        assert_eq!(offline.body, online.body);

        // Different params are a different key.
        courier.get(&url, RequestParams::new().field("page", 9), l);
        assert_eq!(rx.recv_timeout(WAIT).unwrap().code, Status::NO_NETWORK_CODE);
    }
}

#[test]
fn file_store_survives_restart() {
    let base = start_server();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let url = format!("{base}/status/404");
    let config = || RequestConfig::builder().cache_enabled(true).build().unwrap();

    {
        let store = Arc::new(FileStore::open(&path).unwrap());
        let courier = Courier::new().with_store(store);
        courier.init(config()).unwrap();
        let (l, rx) = recorder();
        courier.get(&url, RequestParams::new(), l);
        assert_eq!(rx.recv_timeout(WAIT).unwrap().code, 404);
    }

    let store = Arc::new(FileStore::open(&path).unwrap());
    assert_eq!(store.len().unwrap(), 1);
    let courier = Courier::new()
        .with_store(store)
        .with_connectivity(Arc::new(NetworkState::new(false)));
    courier.init(config()).unwrap();
    let (l, rx) = recorder();
    courier.get(&url, RequestParams::new(), l);
    let got = rx.recv_timeout(WAIT).unwrap();
    assert!(!got.success);
    assert_eq!(got.code, 404);
    assert_eq!(got.origin, Origin::Cache);
    assert_eq!(got.error.as_deref(), Some("HTTP 404"));
}

#[test]
fn cancel_between_two_tagged_calls_suppresses_the_second() {
    let base = start_server();
    for kind in BOTH {
        let store = Arc::new(MemoryStore::new());
        let courier = Courier::new().with_store(store.clone());
        courier
            .init(
                RequestConfig::builder()
                    .transport(kind)
                    .cache_enabled(true)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let (l, rx) = recorder();
        courier.get(&format!("{base}/slow/50"), RequestParams::new().tagged("list"), l.clone());
        courier.get(&format!("{base}/slow/1500"), RequestParams::new().tagged("list"), l);

        let first = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(json(&first.body)["data"]["slept_ms"], 50);
        courier.cancel("list");

        assert!(rx.recv_timeout(Duration::from_secs(3)).is_err(), "{kind:?}");
        assert_eq!(store.len().unwrap(), 1, "cancelled call must not be cached");
        assert_eq!(courier.in_flight(), 0);
    }
}

#[test]
fn cancel_matches_tag_prefix() {
    let base = start_server();
    for kind in BOTH {
        let courier = courier(kind);
        let (l, rx) = recorder();
        courier.get(&format!("{base}/slow/800"), RequestParams::new().tagged("feed:1"), l.clone());
        courier.get(&format!("{base}/slow/800"), RequestParams::new().tagged("feed:2"), l.clone());
        courier.get(&format!("{base}/slow/800"), RequestParams::new().tagged("other"), l);
        courier.cancel("feed");

        let got = rx.recv_timeout(WAIT).unwrap();
        assert!(got.success);
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_err(), "{kind:?}");
    }
}

#[test]
fn cancel_after_delivery_has_no_effect() {
    let base = start_server();
    let courier = courier(TransportKind::Direct);
    let (l, rx) = recorder();
    courier.get(&format!("{base}/items"), RequestParams::new().tagged("t"), l.clone());
    assert!(rx.recv_timeout(WAIT).unwrap().success);
    courier.cancel("t");

    courier.get(&format!("{base}/items"), RequestParams::new().tagged("t"), l);
    assert!(rx.recv_timeout(WAIT).unwrap().success);
}

#[test]
fn call_reissued_under_a_cancelled_tag_delivers() {
    let base = start_server();
    for kind in BOTH {
        let courier = courier(kind);
        let (l, rx) = recorder();
        courier.get(&format!("{base}/slow/1500"), RequestParams::new().tagged("t"), l.clone());
        courier.cancel("t");
        courier.get(&format!("{base}/items"), RequestParams::new().tagged("t"), l);

        let got = rx.recv_timeout(WAIT).unwrap();
        assert!(got.success, "{kind:?}: {got:?}");
        let body = json(&got.body);
        assert_eq!(body["code"], "0");
        assert!(body["data"]["items"].is_array(), "{kind:?}: {body}");

        assert!(rx.recv_timeout(Duration::from_secs(3)).is_err(), "{kind:?}");
        assert_eq!(courier.in_flight(), 0);
    }
}

#[test]
fn uninitialized_facade_drops_calls() {
    let base = start_server();
    let courier = Courier::new();
    let (l, rx) = recorder();
    courier.get(&format!("{base}/items"), RequestParams::new(), l);
    assert!(rx.recv_timeout(QUIET).is_err());
}
