mod common;

use common::manager_with;
use flate2::read::GzDecoder;
use rask_log_agent::domain::LogRecord;
use rask_log_agent::plugin::PluginRegistry;
use rask_log_agent::reliability::AlarmKind;
use serde_json::{Value, json};
use std::io::Read;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

fn http_pipeline(server: &MockServer, extra: Value) -> String {
    let mut detail = json!({
        "RemoteURL": format!("{}/v1/logs", server.uri()),
        "Workers": 1,
        "MaxAttempts": 2,
        "RetryDelayMs": 10,
    });
    if let (Some(detail), Some(extra)) = (detail.as_object_mut(), extra.as_object()) {
        detail.extend(extra.clone());
    }
    json!({
        "flushers": [{"type": "flusher_http", "detail": detail}],
        "global": {
            "Tags": {"team": "core"},
            "AggregatIntervalMs": 60000,
            "DrainTimeoutMs": 5000
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_pipeline_posts_ndjson_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/logs"))
        .and(header("content-type", "application/x-ndjson"))
        .and(header("x-batch-size", "3"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_with(PluginRegistry::with_builtins(), None);
    manager
        .load_config("prj", "store", "http_cfg", 11, &http_pipeline(&server, json!({})))
        .unwrap();
    manager.start_config("http_cfg").await.unwrap();

    let runner = manager.runner("http_cfg").unwrap();
    for i in 0..3 {
        assert!(
            runner
                .receive_raw_log(LogRecord::now().with_field("content", format!("line {i}")))
                .await
        );
    }
    assert!(manager.stop_all(Duration::from_secs(10)).await);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body = String::from_utf8(requests[0].body.clone()).unwrap();
    let lines: Vec<Value> = body
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["project"], "prj");
    assert_eq!(lines[0]["logstore"], "store");
    assert_eq!(lines[0]["config"], "http_cfg");
    assert_eq!(lines[0]["tags"]["team"], "core");
    assert_eq!(lines[2]["fields"]["content"], "line 2");
    assert!(manager.alarms().snapshot().is_empty());
}

#[tokio::test]
async fn test_compressed_payload_round_trips() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-encoding", "gzip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_with(PluginRegistry::with_builtins(), None);
    manager
        .load_config(
            "prj",
            "store",
            "gzip_cfg",
            12,
            &http_pipeline(&server, json!({"Compression": true})),
        )
        .unwrap();
    manager.start_config("gzip_cfg").await.unwrap();
    manager
        .runner("gzip_cfg")
        .unwrap()
        .receive_raw_log(LogRecord::now().with_field("content", "zipped"))
        .await;
    assert!(manager.stop_all(Duration::from_secs(10)).await);

    let requests = server.received_requests().await.unwrap();
    let mut decoded = String::new();
    GzDecoder::new(requests[0].body.as_slice())
        .read_to_string(&mut decoded)
        .unwrap();
    assert!(decoded.contains("\"content\":\"zipped\""));
}

#[tokio::test]
async fn test_rejected_batch_raises_alarm_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(413))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_with(PluginRegistry::with_builtins(), None);
    manager
        .load_config("prj", "store", "reject_cfg", 13, &http_pipeline(&server, json!({})))
        .unwrap();
    manager.start_config("reject_cfg").await.unwrap();
    manager
        .runner("reject_cfg")
        .unwrap()
        .receive_raw_log(LogRecord::now().with_field("content", "too big"))
        .await;
    assert!(manager.stop_all(Duration::from_secs(10)).await);

    let alarms = manager.alarms().snapshot();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].kind, AlarmKind::DeliveryRejected);
    assert_eq!(alarms[0].config_name, "reject_cfg");
}

#[tokio::test]
async fn test_missing_remote_url_fails_start() {
    let manager = manager_with(PluginRegistry::with_builtins(), None);
    manager
        .load_config("prj", "store", "no_url", 14, r#"{"flushers":[{"type":"flusher_http"}]}"#)
        .unwrap();

    assert!(manager.start_config("no_url").await.is_err());
    assert_eq!(manager.alarms().count(AlarmKind::PluginInit), 1);
}
