use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use pnum_core::types::HostId;
use pnum_manager::{Manager, ManagerConfig, ShutdownReason};
use pnum_report::ReportClient;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn status_then_kill() {
    let manager = Manager::bind(ManagerConfig {
        bind: "127.0.0.1:0".to_string(),
        ..ManagerConfig::default()
    })
    .await
    .unwrap();
    let addr = manager.local_addr().unwrap();
    let task = tokio::spawn(manager.run(CancellationToken::new()));

    // A worker in the compute client's own dialect.
    let worker = TcpStream::connect(addr).await.unwrap();
    let (read, mut write) = worker.into_split();
    let mut lines = BufReader::new(read).lines();
    lines.next_line().await.unwrap().unwrap();
    write
        .write_all(
            b"{\"orig\": \"cmp\", \"type\": \"ack\", \"flops\": 2500.000000}\n\
              {\"orig\":\"cmp\", \"type\":\"add\", \"val\": 8128}\n\
              {\"orig\":\"cmp\", \"type\":\"add\", \"val\": 496}\n\
              {\"orig\": \"cmp\", \"type\": \"req\", \"flops\": 2500.000000}\n",
        )
        .await
        .unwrap();
    let rng = lines.next_line().await.unwrap().unwrap();
    assert!(rng.contains("\"type\":\"rng\""), "{rng}");

    let mut client = ReportClient::connect(&addr.to_string(), TIMEOUT)
        .await
        .unwrap();
    let snapshot = client.status().await.unwrap();
    assert_eq!(snapshot.discovered, vec![496, 8128]);
    assert_eq!(
        snapshot.clients.get(&HostId("127.0.0.1".to_string())),
        Some(&2500.0)
    );

    client.kill().await.unwrap();
    let outcome = tokio::time::timeout(TIMEOUT, task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome.reason, ShutdownReason::ReportKill);
    assert_eq!(outcome.kill.delivered, 0);
}

#[tokio::test]
async fn connect_to_nothing_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(ReportClient::connect(&addr.to_string(), TIMEOUT)
        .await
        .is_err());
}
