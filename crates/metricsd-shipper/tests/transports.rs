use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use metricsd_common::Metric;
use metricsd_shipper::remote_write::{MetricType, WriteRequest};
use metricsd_shipper::{build_shipper, ShipError, ShipperConfig, ShipperKind};
use prost::Message;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Received {
    requests: Vec<(HeaderMap, Bytes)>,
}

type Shared = Arc<Mutex<Received>>;

async fn receiver(status: StatusCode) -> (SocketAddr, Shared) {
    let shared: Shared = Arc::default();
    let app = Router::new()
        .route(
            "/ingest",
            post(
                move |State(state): State<Shared>, headers: HeaderMap, body: Bytes| async move {
                    state.lock().unwrap().requests.push((headers, body));
                    status
                },
            ),
        )
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, shared)
}

fn batch() -> Vec<Metric> {
    vec![
        Metric::gauge("system_cpu_usage_percent", 12.5).with_label("hostname", "h1"),
        Metric::counter("http_requests_total", 1027.0)
            .with_label("hostname", "h1")
            .with_label("method", "get"),
    ]
}

#[tokio::test]
async fn remote_write_sends_snappy_protobuf() {
    let (addr, received) = receiver(StatusCode::NO_CONTENT).await;
    let config = ShipperConfig::new(
        ShipperKind::PrometheusRemoteWrite,
        format!("http://{addr}/ingest"),
    );
    let shipper = build_shipper(&config).unwrap();
    shipper.ship(&batch()).await.unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.requests.len(), 1);
    let (headers, body) = &received.requests[0];
    assert_eq!(headers["content-type"], "application/x-protobuf");
    assert_eq!(headers["content-encoding"], "snappy");
    assert_eq!(headers["x-prometheus-remote-write-version"], "0.1.0");
    assert!(headers["user-agent"]
        .to_str()
        .unwrap()
        .starts_with("metricsd/"));

    let raw = snap::raw::Decoder::new().decompress_vec(body).unwrap();
    let request = WriteRequest::decode(raw.as_slice()).unwrap();
    assert_eq!(request.timeseries.len(), 2);
    let ts = request.timeseries[0].samples[0].timestamp;
    assert!(ts > 1_600_000_000_000);
    assert!(request
        .timeseries
        .iter()
        .all(|s| s.samples.iter().all(|sample| sample.timestamp == ts)));

    let second = &request.timeseries[1];
    let names: Vec<&str> = second.labels.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, ["__name__", "hostname", "method"]);
    assert_eq!(second.labels[0].value, "http_requests_total");
    assert_eq!(second.samples[0].value, 1027.0);
    assert_eq!(request.metadata[1].r#type, MetricType::Counter as i32);
}

#[tokio::test]
async fn json_transport_posts_document() {
    let (addr, received) = receiver(StatusCode::OK).await;
    let config = ShipperConfig::new(ShipperKind::HttpJson, format!("http://{addr}/ingest"));
    let shipper = build_shipper(&config).unwrap();
    shipper.ship(&batch()).await.unwrap();

    let received = received.lock().unwrap();
    let (headers, body) = &received.requests[0];
    assert_eq!(headers["content-type"], "application/json");

    let doc: serde_json::Value = serde_json::from_slice(body).unwrap();
    assert!(doc["timestamp"].as_i64().unwrap() > 1_600_000_000);
    let metrics = doc["metrics"].as_array().unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0]["name"], "system_cpu_usage_percent");
    assert_eq!(metrics[0]["type"], "gauge");
    assert_eq!(metrics[1]["type"], "counter");
    assert_eq!(metrics[1]["labels"]["method"], "get");
}

#[tokio::test]
async fn empty_batch_is_not_sent() {
    let (addr, received) = receiver(StatusCode::OK).await;
    for kind in [ShipperKind::PrometheusRemoteWrite, ShipperKind::HttpJson] {
        let shipper = build_shipper(&ShipperConfig::new(kind, format!("http://{addr}/ingest"))).unwrap();
        shipper.ship(&[]).await.unwrap();
    }
    assert!(received.lock().unwrap().requests.is_empty());
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let (addr, _received) = receiver(StatusCode::BAD_REQUEST).await;
    let config = ShipperConfig::new(
        ShipperKind::PrometheusRemoteWrite,
        format!("http://{addr}/ingest"),
    );
    let err = build_shipper(&config).unwrap().ship(&batch()).await.unwrap_err();
    assert!(matches!(err, ShipError::Status { status: 400, .. }));
}

#[tokio::test]
async fn unreachable_receiver_is_an_error() {
    let config = ShipperConfig::new(ShipperKind::HttpJson, "http://127.0.0.1:1/ingest");
    let err = build_shipper(&config).unwrap().ship(&batch()).await.unwrap_err();
    assert!(matches!(err, ShipError::Http(_)));
}
