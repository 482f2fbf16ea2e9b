//! End-to-end bridge tests against stub worker processes.
//!
//! Each stub is a small shell script speaking the worker's line-delimited
//! streaming-JSON protocol, so the full spawn / stdio / parse / resolve
//! path is exercised without a real worker binary.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::panic)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use tether_daemon::bridge::{Bridge, BridgeError, BridgeOptions};
use tether_daemon::supervisor::{RestartPolicy, SpawnConfig};

fn write_worker_script(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("stub-worker.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn options(dir: &TempDir, worker_bin: PathBuf, request_timeout: Duration) -> BridgeOptions {
    BridgeOptions {
        spawn: SpawnConfig {
            worker_bin,
            working_directory: Some(dir.path().to_path_buf()),
            model: None,
        },
        request_timeout,
        terminate_timeout: Duration::from_secs(1),
        restart: RestartPolicy::default(),
    }
}

#[tokio::test]
async fn round_trip_through_stub_worker() {
    let dir = TempDir::new().unwrap();
    let script = write_worker_script(
        &dir,
        r#"while IFS= read -r line; do
  printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"Hi "}]}}'
  printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"there"}]}}'
  printf '%s\n' '{"type":"result","result":"unused"}'
done"#,
    );

    let bridge = Bridge::start(options(&dir, script, Duration::from_secs(30)));
    assert!(bridge.wait_attached(Duration::from_secs(10)).await);

    let reply = bridge.send("hello").await.unwrap();
    assert_eq!(reply.text, "Hi there");
    assert!(!reply.is_error);

    bridge.shutdown().await;
}

#[tokio::test]
async fn result_only_worker_uses_fallback_text() {
    let dir = TempDir::new().unwrap();
    let script = write_worker_script(
        &dir,
        r#"while IFS= read -r line; do
  printf '%s\n' '{"type":"result","result":"fallback"}'
done"#,
    );

    let bridge = Bridge::start(options(&dir, script, Duration::from_secs(30)));
    assert!(bridge.wait_attached(Duration::from_secs(10)).await);

    let reply = bridge.send("hello").await.unwrap();
    assert_eq!(reply.text, "fallback");

    bridge.shutdown().await;
}

#[tokio::test]
async fn noisy_worker_output_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let script = write_worker_script(
        &dir,
        r#"printf '%s\n' '{"type":"system","subtype":"init"}'
while IFS= read -r line; do
  printf '%s\n' 'startup banner, not json'
  printf '%s\n' '{"type":"system","subtype":"status"}'
  printf '%s\n' '{"type":"result","result":"ok"}'
done"#,
    );

    let bridge = Bridge::start(options(&dir, script, Duration::from_secs(30)));
    assert!(bridge.wait_attached(Duration::from_secs(10)).await);

    let reply = bridge.send("hello").await.unwrap();
    assert_eq!(reply.text, "ok");

    bridge.shutdown().await;
}

#[tokio::test]
async fn missing_worker_binary_means_not_ready() {
    let dir = TempDir::new().unwrap();
    let bridge = Bridge::start(options(
        &dir,
        PathBuf::from("/nonexistent/tether-stub-worker"),
        Duration::from_secs(30),
    ));

    assert!(!bridge.wait_attached(Duration::from_millis(200)).await);
    assert!(!bridge.health().attached);
    assert!(matches!(
        bridge.send("hello").await,
        Err(BridgeError::NotReady)
    ));

    bridge.shutdown().await;
}

#[tokio::test]
async fn silent_worker_times_out() {
    let dir = TempDir::new().unwrap();
    // Consumes stdin, never replies.
    let script = write_worker_script(&dir, "cat > /dev/null");

    let bridge = Bridge::start(options(&dir, script, Duration::from_secs(2)));
    assert!(bridge.wait_attached(Duration::from_secs(10)).await);

    let result = bridge.send("hello").await;
    assert!(matches!(result, Err(BridgeError::Timeout { secs: 2 })));

    bridge.shutdown().await;
}

#[tokio::test]
async fn queued_request_is_held_through_outage_and_dispatched_after_restart() {
    let dir = TempDir::new().unwrap();
    // First run swallows one request and dies without replying; later runs
    // serve normally. The marker file lives in the worker's cwd.
    let script = write_worker_script(
        &dir,
        r#"if [ ! -f spawn-marker ]; then
  touch spawn-marker
  IFS= read -r line
  sleep 1
  exit 1
fi
while IFS= read -r line; do
  printf '%s\n' '{"type":"result","result":"two"}'
done"#,
    );

    // Restart delay longer than the request timeout, so the first request
    // expires while the worker is still down and the second must be held
    // undispatched until re-attach.
    let mut options = options(&dir, script, Duration::from_secs(2));
    options.restart = RestartPolicy {
        initial_delay: Duration::from_secs(3),
        ..RestartPolicy::default()
    };

    let bridge = Bridge::start(options);
    assert!(bridge.wait_attached(Duration::from_secs(10)).await);

    let b1 = bridge.clone();
    let first = tokio::spawn(async move { b1.send("first").await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    let b2 = bridge.clone();
    let second = tokio::spawn(async move { b2.send("second").await });

    // The first request dies with the crashed worker; only its own timeout
    // releases the caller, while the worker is still detached.
    assert!(matches!(
        first.await.unwrap(),
        Err(BridgeError::Timeout { secs: 2 })
    ));
    assert!(!bridge.health().attached);

    // The queued request survives the outage and is dispatched to the
    // replacement worker.
    let reply = second.await.unwrap().unwrap();
    assert_eq!(reply.text, "two");

    bridge.shutdown().await;
}

#[tokio::test]
async fn worker_is_restarted_after_exit() {
    let dir = TempDir::new().unwrap();
    // Replies once, then exits; the supervisor must bring it back.
    let script = write_worker_script(
        &dir,
        r#"IFS= read -r line
printf '%s\n' '{"type":"result","result":"one"}'
sleep 1"#,
    );

    let bridge = Bridge::start(options(&dir, script, Duration::from_secs(30)));
    assert!(bridge.wait_attached(Duration::from_secs(10)).await);

    let reply = bridge.send("first").await.unwrap();
    assert_eq!(reply.text, "one");

    // Wait for the exit to be observed, then for the backoff restart.
    let detached = tokio::time::timeout(Duration::from_secs(5), async {
        while bridge.health().attached {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(detached.is_ok(), "worker exit was never observed");
    assert!(bridge.wait_attached(Duration::from_secs(10)).await);

    let reply = bridge.send("second").await.unwrap();
    assert_eq!(reply.text, "one");

    bridge.shutdown().await;
}
