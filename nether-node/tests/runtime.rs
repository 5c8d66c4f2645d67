use std::sync::Arc;
use std::time::Duration;

use nether_common::auth::StaticKeyProvider;
use nether_common::Keypair;
use nether_ledger::LedgerError;
use nether_node::runtime::random_dataset;
use nether_node::{NodeConfig, NodeRuntime};
use tempfile::TempDir;

async fn start(dir: &TempDir, name: &str) -> (NodeRuntime, Keypair) {
    let mut config = NodeConfig::default();
    config.listen_addr = "127.0.0.1:0".into();
    config.data_dir = dir.path().join(name).to_string_lossy().into_owned();
    config.pow_workers = 2;
    config.connect_timeout_secs = 2;
    config.election.default_difficulty = 0;
    std::fs::create_dir_all(&config.data_dir).unwrap();

    let keypair = Keypair::generate();
    let runtime = NodeRuntime::start(config, Arc::new(StaticKeyProvider::new(keypair.clone())))
        .await
        .unwrap();
    (runtime, keypair)
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_append_needs_a_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let (node, keypair) = start(&dir, "solo").await;

    let err = node.append_block(random_dataset(2)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Io(_)));

    node.coordinator().ledger().create(&keypair).await.unwrap();
    let block = node.append_block(random_dataset(2)).await.unwrap();
    assert_eq!(block.index, 1);
    assert_eq!(block.data.len(), 2);

    let blocks = node.blocks().await.unwrap();
    assert_eq!(blocks.len(), 2);
    assert!(node.config().ledger_path().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lead_join_ping_and_elect() {
    let dir = tempfile::tempdir().unwrap();
    let (leader, _) = start(&dir, "leader").await;
    let (follower, _) = start(&dir, "follower").await;

    leader.start_as_leader().await;
    follower
        .join_network(&format!("127.0.0.1:{}", leader.local_addr().port()))
        .await
        .unwrap();

    let (l, f) = (&leader, &follower);
    eventually("follower attached", || async move {
        l.show_connections().await.counts.nodes == 1
    })
    .await;
    assert_eq!(f.show_connections().await.counts.leaders, 1);
    assert_eq!(follower.ping_all().await, 1);

    assert!(follower.start_default_election().await.is_err());
    leader.start_default_election().await.unwrap();

    eventually("round finished with one leader", || async move {
        let a = l.status().await;
        let b = f.status().await;
        !a.round_active && !b.round_active && a.is_leader != b.is_leader
    })
    .await;
}
