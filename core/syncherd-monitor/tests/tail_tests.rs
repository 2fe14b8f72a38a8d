use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use syncherd_monitor::{LogTailer, TailConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

fn config(path: &Path) -> TailConfig {
    TailConfig::new(path).with_poll_interval(Duration::from_millis(10))
}

async fn next(rx: &mut mpsc::Receiver<String>) -> String {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a line")
        .expect("tailer stopped")
}

#[tokio::test]
async fn starts_at_end_of_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.bucardo");
    append(&path, "old line\n");

    let cancel = CancellationToken::new();
    let (mut rx, handle) = LogTailer::new(config(&path)).spawn(cancel.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;
    append(&path, "new line\n");

    assert_eq!(next(&mut rx).await, "new line");
    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn positioned_spawn_sees_lines_appended_right_after() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.bucardo");
    append(&path, "old line\n");

    let cancel = CancellationToken::new();
    let (mut rx, handle) = LogTailer::new(config(&path))
        .spawn_positioned(cancel.clone())
        .await;
    append(&path, "new line\n");

    assert_eq!(next(&mut rx).await, "new line");
    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn positioned_spawn_returns_while_file_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.bucardo");

    let (mut rx, _handle) = tokio::time::timeout(
        WAIT,
        LogTailer::new(config(&path)).spawn_positioned(CancellationToken::new()),
    )
    .await
    .unwrap();
    append(&path, "first\n");

    assert_eq!(next(&mut rx).await, "first");
}

#[tokio::test]
async fn reads_whole_lines_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.bucardo");
    append(&path, "first\npart");

    let (mut rx, _handle) =
        LogTailer::new(config(&path).with_from_start(true)).spawn(CancellationToken::new());
    assert_eq!(next(&mut rx).await, "first");

    tokio::time::sleep(Duration::from_millis(50)).await;
    append(&path, "ial\r\n");
    assert_eq!(next(&mut rx).await, "partial");
}

#[tokio::test]
async fn waits_for_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.bucardo");

    let (mut rx, _handle) = LogTailer::new(config(&path)).spawn(CancellationToken::new());
    tokio::time::sleep(Duration::from_millis(50)).await;
    append(&path, "hello\n");

    assert_eq!(next(&mut rx).await, "hello");
}

#[tokio::test]
async fn follows_replaced_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.bucardo");
    append(&path, "");

    let (mut rx, _handle) = LogTailer::new(config(&path)).spawn(CancellationToken::new());
    tokio::time::sleep(Duration::from_millis(200)).await;
    append(&path, "before rotation\n");
    assert_eq!(next(&mut rx).await, "before rotation");

    std::fs::rename(&path, dir.path().join("log.bucardo.1")).unwrap();
    append(&path, "after rotation\n");
    assert_eq!(next(&mut rx).await, "after rotation");
}

#[tokio::test]
async fn follows_truncated_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.bucardo");

    let (mut rx, _handle) =
        LogTailer::new(config(&path).with_from_start(true)).spawn(CancellationToken::new());
    append(&path, "a fairly long first line\n");
    assert_eq!(next(&mut rx).await, "a fairly long first line");

    std::fs::write(&path, "").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    append(&path, "short\n");
    assert_eq!(next(&mut rx).await, "short");
}

#[tokio::test]
async fn stops_when_receiver_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.bucardo");
    append(&path, "");

    let (rx, handle) =
        LogTailer::new(config(&path).with_from_start(true)).spawn(CancellationToken::new());
    drop(rx);
    append(&path, "nobody reads this\n");

    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
}
