//! Reconnect policy on a paused clock: a hub that never accepts is retried with backoff until
//! the attempt budget runs out, and an explicit close (even mid-backoff) stops the policy.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskhub_core::channel::{
    spawn_reconnect, Backoff, ChannelManager, ConnectionState, Connector, SubscriberRegistry,
    Transport, TransportError,
};

#[derive(Default)]
struct RefusingConnector {
    attempts: AtomicUsize,
}

#[async_trait]
impl Connector for RefusingConnector {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Connect {
            endpoint: endpoint.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

fn backoff(max_attempts: Option<u32>) -> Backoff {
    Backoff {
        initial: Duration::from_millis(100),
        max: Duration::from_secs(1),
        max_attempts,
    }
}

#[tokio::test(start_paused = true)]
async fn retries_until_attempts_exhausted() {
    let connector = Arc::new(RefusingConnector::default());
    let manager = Arc::new(ChannelManager::new(
        connector.clone(),
        Arc::new(SubscriberRegistry::new()),
    ));
    manager.connect("ws://hub.invalid").unwrap();
    let task = spawn_reconnect(manager.clone(), "ws://hub.invalid".to_string(), backoff(Some(3)));
    task.await.unwrap();

    assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(manager.state(), ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn explicit_close_stops_reconnecting() {
    let connector = Arc::new(RefusingConnector::default());
    let manager = Arc::new(ChannelManager::new(
        connector.clone(),
        Arc::new(SubscriberRegistry::new()),
    ));
    let task = spawn_reconnect(manager.clone(), "ws://hub.invalid".to_string(), backoff(None));
    manager.close().await;
    tokio::time::timeout(Duration::from_secs(60), task)
        .await
        .expect("reconnect task did not stop")
        .unwrap();
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn close_during_backoff_is_final() {
    let connector = Arc::new(RefusingConnector::default());
    let manager = Arc::new(ChannelManager::new(
        connector.clone(),
        Arc::new(SubscriberRegistry::new()),
    ));
    let mut state_rx = manager.watch_state();
    manager.connect("ws://hub.invalid").unwrap();
    state_rx
        .wait_for(|s| *s == ConnectionState::Failed)
        .await
        .unwrap();

    let slow = Backoff {
        initial: Duration::from_secs(1),
        max: Duration::from_secs(1),
        max_attempts: None,
    };
    let task = spawn_reconnect(manager.clone(), "ws://hub.invalid".to_string(), slow);
    // let the task start its first wait
    tokio::time::sleep(Duration::from_millis(10)).await;
    manager.close().await;
    assert_eq!(manager.state(), ConnectionState::Closed);

    tokio::time::timeout(Duration::from_secs(30), task)
        .await
        .expect("reconnect task did not stop")
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
}
