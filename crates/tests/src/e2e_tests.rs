//! End-to-end runs with the real senders.
//!
//! HTTPS and cloud ingestion talk to mockito servers, the relay to a Unix
//! listener in a temp directory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use client_factory::SenderFactory;
use config_loader::ConfigLoader;
use contracts::{BackendKind, ForwarderBlueprint, Record, RecordPayload};
use dispatcher::{create_dispatcher, RecordBuffer};
use mockito::{Matcher, Server};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../client_factory/tests/fixtures");

type ForwardMessage = (String, i64, HashMap<String, Value>);

fn base_config(https_url: &str, relay_socket: &Path) -> String {
    format!(
        "# forwarder e2e\n\
         cert_file_path={FIXTURES}/client.pem\n\
         key_file_path={FIXTURES}/client.key\n\
         https_endpoint={https_url}/logs\n\
         relay_enabled=true\n\
         relay_socket_path={}\n\
         relay_tag=e2e.container\n\
         backoff_base_ms=10\n\
         backoff_cap_ms=50\n",
        relay_socket.display()
    )
}

fn load(config: &str) -> Arc<ForwarderBlueprint> {
    Arc::new(ConfigLoader::load_from_str(config).unwrap())
}

fn record(blueprint: &ForwarderBlueprint, id: u64, line: &'static [u8]) -> Record {
    Record::new(
        id,
        RecordPayload::from_line(Bytes::from_static(line)),
        blueprint.enabled_backends(),
    )
}

/// Accept one relay connection and collect every frame until it closes
fn relay_reader(listener: UnixListener) -> JoinHandle<Vec<ForwardMessage>> {
    tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        conn.read_to_end(&mut buf).await.unwrap();

        let mut rest = &buf[..];
        let mut frames = Vec::new();
        while !rest.is_empty() {
            frames.push(rmp_serde::from_read(&mut rest).unwrap());
        }
        frames
    })
}

#[tokio::test]
async fn test_forward_to_all_three_backends() {
    let mut https = Server::new_async().await;
    let mut cloud = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("relay.sock");
    let reader = relay_reader(UnixListener::bind(&socket).unwrap());

    let https_mock = https
        .mock("POST", "/logs")
        .match_header("content-type", "application/json")
        .with_status(202)
        .expect(3)
        .create_async()
        .await;
    let token_mock = cloud
        .mock("POST", "/tenant-e2e/oauth2/v2.0/token")
        .with_status(200)
        .with_body(r#"{"access_token":"tok-e2e","expires_in":3600,"token_type":"Bearer"}"#)
        .expect(1)
        .create_async()
        .await;
    let ingest_mock = cloud
        .mock("POST", "/v1/rest/ingest/logs/container")
        .match_query(Matcher::UrlEncoded("streamFormat".into(), "multijson".into()))
        .match_header("authorization", "Bearer tok-e2e")
        .with_status(200)
        .expect(3)
        .create_async()
        .await;

    let config = format!(
        "{}cloud_ingest_endpoint={}\n\
         cloud_ingest_database=logs\n\
         cloud_ingest_table=container\n\
         cloud_tenant_id=tenant-e2e\n\
         cloud_client_id=client-e2e\n\
         cloud_client_secret=secret-e2e\n\
         cloud_authority={}\n",
        base_config(&https.url(), &socket),
        cloud.url(),
        cloud.url()
    );
    let blueprint = load(&config);
    let factory = Arc::new(SenderFactory::new(Arc::clone(&blueprint)));
    let buffer = Arc::new(RecordBuffer::from_settings(&blueprint.buffer));

    let dispatcher = create_dispatcher(&blueprint, factory, Arc::clone(&buffer))
        .await
        .unwrap();

    buffer.push(record(&blueprint, 0, b"service started")).unwrap();
    buffer
        .push(record(&blueprint, 1, br#"{"level":"warn","msg":"disk almost full"}"#))
        .unwrap();
    buffer.push(record(&blueprint, 2, b"service stopped")).unwrap();
    buffer.close();

    let report = dispatcher.spawn().await.unwrap();
    for kind in BackendKind::ALL {
        assert_eq!(report.delivered(kind), 3, "{kind}");
    }
    assert_eq!(report.dropped_no_backend, 0);

    https_mock.assert_async().await;
    token_mock.assert_async().await;
    ingest_mock.assert_async().await;

    let frames = reader.await.unwrap();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|(tag, _, _)| tag == "e2e.container"));
    assert_eq!(frames[0].2["log"], "service started");
    assert_eq!(frames[1].2["msg"], "disk almost full");
    assert_eq!(frames[2].2["log"], "service stopped");
}

#[tokio::test]
async fn test_relay_comes_up_later() {
    let mut https = Server::new_async().await;
    let https_mock = https
        .mock("POST", "/logs")
        .with_status(200)
        .expect(2)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("late.sock");
    let blueprint = load(&base_config(&https.url(), &socket));
    let factory = Arc::new(SenderFactory::new(Arc::clone(&blueprint)));
    let buffer = Arc::new(RecordBuffer::from_settings(&blueprint.buffer));

    let dispatcher = create_dispatcher(&blueprint, factory, Arc::clone(&buffer))
        .await
        .unwrap();
    let relay_metrics = dispatcher
        .slot_metrics()
        .into_iter()
        .find(|(kind, _)| *kind == BackendKind::Relay)
        .map(|(_, metrics)| metrics)
        .unwrap();
    let handle = dispatcher.spawn();

    // relay is down: the first record only reaches HTTPS
    buffer.push(record(&blueprint, 0, b"first")).unwrap();

    let reader = relay_reader(UnixListener::bind(&socket).unwrap());
    tokio::time::timeout(Duration::from_secs(5), async {
        while relay_metrics.reconnects() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    buffer.push(record(&blueprint, 1, b"second")).unwrap();
    buffer.close();
    let report = handle.await.unwrap();

    https_mock.assert_async().await;
    assert_eq!(report.delivered(BackendKind::Https), 2);
    assert_eq!(report.delivered(BackendKind::Relay), 1);
    assert_eq!(report.backend(BackendKind::Relay).unwrap().metrics.skipped, 1);

    let frames = reader.await.unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].2["log"], "second");
}

#[tokio::test]
async fn test_unusable_certificate_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = format!(
        "cert_file_path={}/missing.pem\n\
         key_file_path={}/missing.key\n\
         https_endpoint=https://ingest.example.com/logs\n",
        dir.path().display(),
        dir.path().display()
    );
    let blueprint = load(&config);
    let factory = Arc::new(SenderFactory::new(Arc::clone(&blueprint)));
    let buffer = Arc::new(RecordBuffer::from_settings(&blueprint.buffer));

    let err = create_dispatcher(&blueprint, factory, buffer)
        .await
        .err()
        .unwrap();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        dispatcher::DispatcherError::PrimaryUnavailable { kind: BackendKind::Https, .. }
    ));
}
