use async_trait::async_trait;
use metricsd_agent::config::AgentConfig;
use metricsd_agent::{build_registry, health, Orchestrator};
use metricsd_collector::{CollectContext, CollectError, Source, SourceRegistry};
use metricsd_common::{Labels, Metric, MetricKind};
use metricsd_shipper::{ShipError, Shipper};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Fixed(&'static str, Vec<Metric>);

#[async_trait]
impl Source for Fixed {
    fn name(&self) -> &str {
        self.0
    }

    async fn collect(&self, _ctx: &CollectContext) -> metricsd_collector::Result<Vec<Metric>> {
        Ok(self.1.clone())
    }
}

struct Broken;

#[async_trait]
impl Source for Broken {
    fn name(&self) -> &str {
        "gpu"
    }

    async fn collect(&self, _ctx: &CollectContext) -> metricsd_collector::Result<Vec<Metric>> {
        Err(CollectError::Other("no driver".into()))
    }
}

#[derive(Default)]
struct Recording {
    batches: Mutex<Vec<Vec<Metric>>>,
    fail: bool,
}

#[async_trait]
impl Shipper for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn ship(&self, metrics: &[Metric]) -> metricsd_shipper::Result<()> {
        self.batches.lock().unwrap().push(metrics.to_vec());
        if self.fail {
            return Err(ShipError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

fn registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register(Box::new(Fixed(
        "system",
        vec![Metric::gauge("system_cpu_usage_percent", 12.5)],
    )));
    registry.register(Box::new(Broken));
    registry.register(Box::new(Fixed(
        "http",
        vec![Metric::counter("http_requests_total", 7.0).with_label("endpoint", "myapp")],
    )));
    registry
}

fn global(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn cycle_labels_and_ships_successful_sources() {
    let shipper = Arc::new(Recording::default());
    let orch = Orchestrator::new(
        registry(),
        shipper.clone(),
        Duration::from_secs(10),
        global(&[("env", "prod")]),
    )
    .with_hostname("h1");

    let shipped = orch.run_cycle(&CancellationToken::new()).await;
    assert_eq!(shipped, 2);

    let batches = shipper.batches.lock().unwrap();
    let batch = &batches[0];
    let names: Vec<&str> = batch.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["system_cpu_usage_percent", "http_requests_total"]);
    for metric in batch {
        assert_eq!(metric.labels["hostname"], "h1");
        assert_eq!(metric.labels["env"], "prod");
    }
    assert_eq!(batch[1].kind, MetricKind::Counter);
    assert_eq!(batch[1].labels["endpoint"], "myapp");
}

#[tokio::test]
async fn ship_failure_drops_batch() {
    let shipper = Arc::new(Recording {
        fail: true,
        ..Default::default()
    });
    let orch = Orchestrator::new(registry(), shipper.clone(), Duration::from_secs(10), Labels::new());

    assert_eq!(orch.run_cycle(&CancellationToken::new()).await, 0);
    assert_eq!(orch.run_cycle(&CancellationToken::new()).await, 0);
    // Each cycle ships fresh data; nothing is carried over.
    let batches = shipper.batches.lock().unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn run_cycles_immediately_and_on_interval_until_stopped() {
    let shipper = Arc::new(Recording::default());
    let orch = Arc::new(
        Orchestrator::new(registry(), shipper.clone(), Duration::from_secs(30), Labels::new())
            .with_hostname("h1"),
    );

    let task = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.run(CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(shipper.batches.lock().unwrap().len(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(shipper.batches.lock().unwrap().len(), 2);

    orch.stop();
    task.await.unwrap();
    assert!(orch.is_stopped());
}

#[tokio::test]
async fn shutdown_token_ends_run() {
    let shipper = Arc::new(Recording::default());
    let orch = Orchestrator::new(registry(), shipper, Duration::from_secs(3600), Labels::new());
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), orch.run(shutdown))
        .await
        .unwrap();
    assert!(orch.is_stopped());
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(health::serve(listener, shutdown.clone()));

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[test]
fn registry_follows_configuration() {
    let plugins = tempfile::tempdir().unwrap();
    std::fs::write(
        plugins.path().join("load.json"),
        r#"{"name":"load","metric":"load_1m","metric_type":"gauge","interval_seconds":30,
            "command":{"command":["cat","/proc/loadavg"]},
            "parser":{"mode":"regex","regex":"^(\\S+)"}}"#,
    )
    .unwrap();

    let config = AgentConfig::parse(&format!(
        r#"
[collector]
enable_cpu = false
enable_memory = true
enable_disk = false
enable_network = false

[shipper]
type = "http_json"
endpoint = "http://collector/ingest"

[[endpoints]]
name = "myapp"
url = "http://127.0.0.1:1/metrics"

[plugins]
directory = "{}"
"#,
        plugins.path().display()
    ))
    .unwrap();

    let registry = build_registry(&config).unwrap();
    assert_eq!(registry.source_names(), ["system", "http", "plugin"]);
}

#[test]
fn denied_plugin_fails_startup() {
    let plugins = tempfile::tempdir().unwrap();
    std::fs::write(
        plugins.path().join("bad.json"),
        r#"{"name":"wipe","metric":"wipe","metric_type":"gauge","interval_seconds":30,
            "command":{"command":["/bin/rm","-rf","/tmp/x"]}}"#,
    )
    .unwrap();
    let config = AgentConfig::parse(&format!(
        "[shipper]\ntype = \"http_json\"\nendpoint = \"http://c\"\n[plugins]\ndirectory = \"{}\"\n",
        plugins.path().display()
    ))
    .unwrap();

    let err = build_registry(&config).unwrap_err();
    assert!(format!("{err:#}").contains("not allowed"));
}
