//! Application core scenarios driven through the event loop

use async_trait::async_trait;
use maroon::app::{AppEvents, Application, LedgerSnapshot, OpType, Operation};
use maroon::common::{stop_channel, AppConfig, StopSender};
use maroon::p2p::{DistTransport, InboundMessage, Transaction, TransactionDistributed};
use maroon::store::{CoordinationStore, MemoryStore, WatchEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Hands every distributed transaction to the test
struct ChannelTransport {
    sent: mpsc::UnboundedSender<Transaction>,
}

#[async_trait]
impl DistTransport for ChannelTransport {
    fn distribute_tx(&self, tx: Transaction) {
        let _ = self.sent.send(tx);
    }

    async fn ack_batch(&self, _peer: &str, _hash: &str) -> maroon::Result<bool> {
        Ok(true)
    }
}

struct Harness {
    app: Arc<Application>,
    store: Arc<MemoryStore>,
    sent: mpsc::UnboundedReceiver<Transaction>,
    leader: mpsc::Sender<bool>,
    confirmations: mpsc::Sender<TransactionDistributed>,
    _inbound: mpsc::Sender<InboundMessage>,
    stop: StopSender,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let transport = Arc::new(ChannelTransport { sent: sent_tx });
        let app = Arc::new(Application::new(
            store.clone(),
            transport,
            AppConfig::default(),
        ));

        let (leader, leadership) = mpsc::channel(4);
        let (confirmations, distributed) = mpsc::channel(16);
        let (inbound_tx, inbound) = mpsc::channel(16);
        let (stop, stop_rx) = stop_channel();
        let events = AppEvents {
            stop: stop_rx,
            leadership,
            distributed,
            inbound,
            watch: None,
        };
        let runner = app.clone();
        let task = tokio::spawn(async move { runner.run(events).await });

        Self {
            app,
            store,
            sent,
            leader,
            confirmations,
            _inbound: inbound_tx,
            stop,
            task,
        }
    }

    async fn wait_until(&self, check: impl Fn(&LedgerSnapshot) -> bool) -> LedgerSnapshot {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let snapshot = self.app.snapshot().await;
            if check(&snapshot) {
                return snapshot;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached: {:?}",
                snapshot
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn set_leader(&self, is_leader: bool) {
        self.leader.send(is_leader).await.unwrap();
        self.wait_until(|s| s.is_leader == is_leader).await;
    }

    async fn submit(&mut self, values: &[&str]) -> Vec<(String, Operation)> {
        let mut out = Vec::new();
        for value in values {
            let op = Operation::new(OpType::PrintTimestamp, *value);
            let id = self.app.add_op(op.clone()).await.unwrap().unwrap();
            let tx = self.sent.recv().await.unwrap();
            assert_eq!(tx.id, id);
            out.push((id, op));
        }
        out
    }

    async fn confirm(&self, id: &str) {
        self.confirmations
            .send(TransactionDistributed { id: id.to_string() })
            .await
            .unwrap();
    }

    async fn shutdown(self) {
        self.stop.send(true).unwrap();
        self.task.await.unwrap();
    }
}

#[tokio::test]
async fn test_three_confirmations_publish_a_batch() {
    let mut h = Harness::start();
    h.set_leader(true).await;

    let ops = h.submit(&["1", "2", "3"]).await;
    for (id, _) in &ops {
        h.confirm(id).await;
    }

    let snapshot = h.wait_until(|s| s.confirmed.len() == 3).await;
    assert!(snapshot.acked.is_empty());
    assert!(snapshot.in_flight.is_empty());
    assert_eq!(
        snapshot.confirmed,
        ops.iter().map(|(_, op)| op.clone()).collect::<Vec<_>>()
    );

    let expected = format!("{},{},{}", ops[0].0, ops[1].0, ops[2].0);
    assert_eq!(
        h.store.get("/maroon/hashes/0").await.unwrap(),
        Some(expected)
    );
    h.shutdown().await;
}

#[tokio::test]
async fn test_digest_follows_confirmation_order() {
    let mut h = Harness::start();
    h.set_leader(true).await;

    let ops = h.submit(&["a", "b", "c", "d", "e", "f"]).await;
    for i in [3, 0, 5, 1, 4, 2] {
        h.confirm(&ops[i].0).await;
    }

    let snapshot = h.wait_until(|s| s.batch_counter == 2).await;
    assert_eq!(snapshot.confirmed.len(), 6);
    assert_eq!(
        h.store.get("/maroon/hashes/0").await.unwrap(),
        Some(format!("{},{},{}", ops[3].0, ops[0].0, ops[5].0))
    );
    assert_eq!(
        h.store.get("/maroon/hashes/1").await.unwrap(),
        Some(format!("{},{},{}", ops[1].0, ops[4].0, ops[2].0))
    );
    h.shutdown().await;
}

#[tokio::test]
async fn test_follower_ignores_submissions() {
    let h = Harness::start();

    let op = Operation::new(OpType::PrintTimestamp, "1");
    assert_eq!(h.app.add_op(op).await.unwrap(), None);

    let snapshot = h.app.snapshot().await;
    assert!(snapshot.in_flight.is_empty());
    assert!(snapshot.acked.is_empty());
    assert!(snapshot.confirmed.is_empty());
    h.shutdown().await;
}

/// Leadership is lost after two of three confirmations: the third one is
/// dropped and nothing is published. Pending state survives, so the batch
/// completes once leadership comes back.
#[tokio::test]
async fn test_confirmation_after_stepping_down_is_dropped() {
    let mut h = Harness::start();
    h.set_leader(true).await;

    let ops = h.submit(&["1", "2", "3"]).await;
    h.confirm(&ops[0].0).await;
    h.confirm(&ops[1].0).await;
    h.wait_until(|s| s.acked.len() == 2).await;

    h.set_leader(false).await;
    h.confirm(&ops[2].0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = h.app.snapshot().await;
    assert_eq!(snapshot.acked.len(), 2);
    assert!(snapshot.confirmed.is_empty());
    assert_eq!(snapshot.in_flight.len(), 3);
    assert!(h.store.history().await.is_empty());

    h.set_leader(true).await;
    h.confirm(&ops[2].0).await;
    let snapshot = h.wait_until(|s| s.confirmed.len() == 3).await;
    assert_eq!(snapshot.batch_counter, 1);
    h.shutdown().await;
}

#[tokio::test]
async fn test_unknown_and_duplicate_confirmations_are_ignored() {
    let mut h = Harness::start();
    h.set_leader(true).await;

    let ops = h.submit(&["1", "2", "3"]).await;
    for (id, _) in &ops {
        h.confirm(id).await;
    }
    let before = h.wait_until(|s| s.confirmed.len() == 3).await;

    // late duplicate after commit, and an ID nobody submitted
    h.confirm(&ops[0].0).await;
    h.confirm("deadbeef").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.app.snapshot().await, before);
    assert_eq!(h.store.history().await.len(), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn test_closed_inputs_do_not_stop_the_loop() {
    let h = Harness::start();
    let Harness {
        app,
        leader,
        confirmations,
        stop,
        task,
        ..
    } = h;

    leader.send(true).await.unwrap();
    drop(leader);
    drop(confirmations);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!task.is_finished());
    assert!(app.is_leader().await);

    stop.send(true).unwrap();
    task.await.unwrap();
}

/// A follower that saw batch 0 but never received its transactions is
/// promoted: its first batch goes to the next free key.
#[tokio::test]
async fn test_lagging_follower_publishes_at_next_free_key() {
    let mut h = Harness::start();
    h.store.put("/maroon/hashes/0", "x,y,z").await.unwrap();
    h.app
        .handle_watch_event(WatchEvent::Put {
            key: "/maroon/hashes/0".into(),
            value: "x,y,z".into(),
        })
        .await;
    let snapshot = h.app.snapshot().await;
    assert_eq!(snapshot.missing.len(), 3);
    assert_eq!(snapshot.batch_counter, 0);

    h.set_leader(true).await;
    let ops = h.submit(&["1", "2", "3"]).await;
    for (id, _) in &ops {
        h.confirm(id).await;
    }
    h.wait_until(|s| s.confirmed.len() == 3).await;

    assert_eq!(
        h.store.get("/maroon/hashes/0").await.unwrap(),
        Some("x,y,z".to_string())
    );
    assert_eq!(
        h.store.get("/maroon/hashes/1").await.unwrap(),
        Some(format!("{},{},{}", ops[0].0, ops[1].0, ops[2].0))
    );
    let keys: Vec<String> = h.store.history().await.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["/maroon/hashes/0", "/maroon/hashes/1"]);
    h.shutdown().await;
}
