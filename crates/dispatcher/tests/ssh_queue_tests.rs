//! Tests for the SSH agent queue client.

use std::time::Duration;

use posegrid_core::error::CoreError;
use posegrid_dispatcher::ssh_queue::SshQueue;

#[tokio::test]
async fn send_matches_result_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let queue = SshQueue::new(dir.path());

    // Pre-existing results must not satisfy a new request.
    std::fs::write(
        dir.path().join("results.jsonl"),
        "{\"id\":\"boot_1\",\"exit_status\":0}\n",
    )
    .unwrap();

    let results_path = dir.path().join("results.jsonl");
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut text = std::fs::read_to_string(&results_path).unwrap();
        text.push_str("{\"id\":\"other\",\"exit_status\":1}\n");
        text.push_str("{\"id\":\"boot_1\",\"exit_status\":0,\"stdout\":\"ok\"}\n");
        std::fs::write(&results_path, text).unwrap();
    });

    let result = queue
        .send("boot_1", "pod-7", "echo ok", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result.exit_status, Some(0));
    assert_eq!(result.stdout.as_deref(), Some("ok"));

    // The request line was appended for the agent to pick up.
    let requests = std::fs::read_to_string(dir.path().join("requests.jsonl")).unwrap();
    assert!(requests.contains("\"id\":\"boot_1\""));
    assert!(requests.contains("\"host\":\"pod-7\""));
}

#[tokio::test]
async fn send_times_out_without_a_result() {
    let dir = tempfile::tempdir().unwrap();
    let queue = SshQueue::new(dir.path());

    let err = queue
        .send("boot_2", "pod-7", "echo ok", Duration::from_millis(40))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Transport(_)));
}
