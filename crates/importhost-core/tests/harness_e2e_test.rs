//! End-to-end tests against a real `git daemon`.
//!
//! Every test returns early (after printing a skip notice) on machines
//! without git.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use importhost_core::{Backend, ControllerState, HarnessConfig, HarnessError, ProcessState};
use importhost_test_utils::{TestSandbox, go_import_content, http_get, start_or_skip, write_file};

fn config() -> HarnessConfig {
    HarnessConfig {
        // git daemon can be slow to come up on a loaded CI box.
        readiness_timeout: Duration::from_secs(10),
        ..HarnessConfig::default()
    }
}

#[tokio::test]
async fn commit_and_resolve_go_import() {
    let sb = TestSandbox::new();
    let pkg_dir = sb.setup("example.org/mod");
    let Some(harness) = start_or_skip(&sb, Backend::Git, config()).await else {
        return;
    };
    assert_eq!(harness.state(), ControllerState::Ready);
    assert_eq!(harness.daemon().state(), ProcessState::Ready);

    let handle = harness.setup().await.expect("handle setup");
    assert_eq!(handle.package_path(), "example.org/mod");
    assert_eq!(handle.working_dir(), pkg_dir.as_path());

    write_file(&pkg_dir, "a.go", "package mod\n");
    let commit = handle.commit().await.expect("commit");

    assert_eq!(commit.revision.len(), 40, "revision: {}", commit.revision);
    assert!(commit.revision.chars().all(|c| c.is_ascii_hexdigit()));
    let stamp = commit.time_rfc3339();
    assert!(stamp.ends_with('Z'), "stamp: {stamp}");
    assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());

    let (status, body) = http_get(&harness.http_addr(), "/example.org/mod?go-get=1").await;
    assert_eq!(status, 200, "body: {body}");
    let content = go_import_content(&body).expect("meta tag");
    let fields: Vec<&str> = content.split(' ').collect();
    assert_eq!(fields.len(), 3, "content: {content}");
    assert_eq!(fields[0], format!("{}/example.org/mod", harness.http_addr()));
    assert_eq!(fields[1], "git");
    assert!(fields[2].starts_with(harness.transport_base()));
    assert!(fields[2].ends_with("/example.org/mod/.git"), "transport: {}", fields[2]);

    sb.teardown().await;
    assert_eq!(harness.state(), ControllerState::Closed);
    assert_eq!(harness.daemon().state(), ProcessState::Reaped);
}

#[tokio::test]
async fn successive_commits_have_new_revisions() {
    let sb = TestSandbox::new();
    let pkg_dir = sb.setup("example.org/twice");
    let Some(harness) = start_or_skip(&sb, Backend::Git, config()).await else {
        return;
    };
    let handle = harness.setup().await.expect("handle setup");

    write_file(&pkg_dir, "a.go", "package twice\n");
    let first = handle.commit().await.expect("first commit");
    write_file(&pkg_dir, "a.go", "package twice\n\nconst X = 1\n");
    let second = handle.commit().await.expect("second commit");

    assert_ne!(first.revision, second.revision);
    assert!(second.time >= first.time);

    sb.teardown().await;
}

#[tokio::test]
async fn commit_without_changes_fails_with_output() {
    let sb = TestSandbox::new();
    let pkg_dir = sb.setup("example.org/empty");
    let Some(harness) = start_or_skip(&sb, Backend::Git, config()).await else {
        return;
    };
    let handle = harness.setup().await.expect("handle setup");
    write_file(&pkg_dir, "a.go", "package empty\n");
    handle.commit().await.expect("first commit");

    let err = handle.commit().await.expect_err("nothing to commit");
    match err {
        HarnessError::CommandFailed { args, output, .. } => {
            assert_eq!(args[0], "commit");
            assert!(!output.is_empty());
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }

    sb.teardown().await;
}

#[tokio::test]
async fn removed_and_unknown_packages_are_404() {
    let sb = TestSandbox::new();
    let pkg_dir = sb.setup("example.org/gone");
    let Some(harness) = start_or_skip(&sb, Backend::Git, config()).await else {
        return;
    };
    let handle = harness.setup().await.expect("handle setup");
    write_file(&pkg_dir, "a.go", "package gone\n");
    handle.commit().await.expect("commit");

    let (status, body) = http_get(&harness.http_addr(), "/unknown.org/pkg").await;
    assert_eq!(status, 404);
    assert_eq!(body, "repo not found");

    let (status, _) = http_get(&harness.http_addr(), "/example.org/gone/sub").await;
    assert_eq!(status, 200);

    handle.remove();
    let (status, _) = http_get(&harness.http_addr(), "/example.org/gone").await;
    assert_eq!(status, 404);

    sb.teardown().await;
}

#[tokio::test]
async fn duplicate_setup_is_rejected() {
    let sb = TestSandbox::new();
    sb.setup("example.org/dup");
    let Some(harness) = start_or_skip(&sb, Backend::Git, config()).await else {
        return;
    };
    let first = harness.setup().await.expect("first setup");
    let cleanups = sb.sandbox.pending_cleanups();

    let Err(err) = harness.setup().await else {
        panic!("second setup of the same package should fail");
    };
    assert!(matches!(err, HarnessError::DuplicatePackage(ref p) if p == "example.org/dup"));
    assert_eq!(harness.routes().len(), 1);
    assert_eq!(
        sb.sandbox.pending_cleanups(),
        cleanups,
        "a rejected setup must not register a cleanup"
    );
    let routed = harness.routes().resolve("example.org/dup").expect("still routed");
    assert!(Arc::ptr_eq(&routed, &first));

    sb.teardown().await;
    assert!(harness.routes().is_empty(), "teardown should deregister handles");
}

#[tokio::test]
async fn concurrent_setup_registers_one_handle() {
    let sb = TestSandbox::new();
    let dir = sb.setup("example.org/race");
    let Some(harness) = start_or_skip(&sb, Backend::Git, config()).await else {
        return;
    };

    let (a, b) = tokio::join!(
        harness.setup_at("example.org/race", &dir),
        harness.setup_at("example.org/race", &dir),
    );
    let (winner, loser) = match (a, b) {
        (Ok(h), Err(e)) | (Err(e), Ok(h)) => (h, e),
        (Ok(_), Ok(_)) => panic!("both concurrent setups succeeded"),
        (Err(a), Err(b)) => panic!("both concurrent setups failed: {a}; {b}"),
    };
    assert!(matches!(loser, HarnessError::DuplicatePackage(_)));

    let routed = harness.routes().resolve("example.org/race").expect("routed");
    assert!(Arc::ptr_eq(&routed, &winner));

    sb.teardown().await;
    assert!(harness.routes().is_empty());
}

#[tokio::test]
async fn failed_create_releases_package_slot() {
    let sb = TestSandbox::new();
    sb.setup("example.org/host");
    let Some(harness) = start_or_skip(&sb, Backend::Git, config()).await else {
        return;
    };
    let cleanups = sb.sandbox.pending_cleanups();

    let missing = sb.root().join("no/such/dir");
    let Err(err) = harness.setup_at("example.org/missing", &missing).await else {
        panic!("setup in a missing directory should fail");
    };
    assert!(matches!(err, HarnessError::Spawn { .. }), "got: {err}");
    assert!(harness.routes().is_empty());
    assert_eq!(sb.sandbox.pending_cleanups(), cleanups);

    let dir = sb.setup("example.org/missing");
    harness
        .setup_at("example.org/missing", &dir)
        .await
        .expect("slot is free again");

    sb.teardown().await;
}

#[tokio::test]
async fn two_packages_route_independently() {
    let sb = TestSandbox::new();
    let a_dir = sb.setup("example.org/a");
    let Some(harness) = start_or_skip(&sb, Backend::Git, config()).await else {
        return;
    };
    harness.setup().await.expect("setup a");
    let b_dir = sb.root().join("example.org/b");
    std::fs::create_dir_all(&b_dir).unwrap();
    harness
        .setup_at("example.org/b", &b_dir)
        .await
        .expect("setup b");
    assert_ne!(a_dir, b_dir);

    for pkg in ["example.org/a", "example.org/b"] {
        let (status, body) = http_get(&harness.http_addr(), &format!("/{pkg}")).await;
        assert_eq!(status, 200);
        let content = go_import_content(&body).unwrap();
        assert!(content.starts_with(&format!("{}/{pkg} ", harness.http_addr())));
        assert!(content.ends_with(&format!("/{pkg}/.git")));
    }

    sb.teardown().await;
}

#[tokio::test]
async fn daemon_serves_committed_repository() {
    let sb = TestSandbox::new();
    sb.setup("example.org/clone");
    // Serve everything under the sandbox root.
    sb.sandbox.cd(sb.root());
    let Some(harness) = start_or_skip(&sb, Backend::Git, config()).await else {
        return;
    };
    let pkg_dir = sb.root().join("example.org/clone");
    let handle = harness
        .setup_at("example.org/clone", &pkg_dir)
        .await
        .expect("handle setup");
    write_file(&pkg_dir, "hello.txt", "hello\n");
    let commit = handle.commit().await.expect("commit");

    let url = format!("{}example.org/clone/.git", harness.transport_base());
    let dest = sb.temp_path().join("checkout");
    let output = Command::new("git")
        .args(["clone", &url])
        .arg(&dest)
        .output()
        .expect("failed to run git clone");
    assert!(
        output.status.success(),
        "clone of {url} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let head = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(&dest)
        .output()
        .expect("failed to run git rev-parse");
    assert_eq!(String::from_utf8_lossy(&head.stdout).trim(), commit.revision);
    assert_eq!(std::fs::read_to_string(dest.join("hello.txt")).unwrap(), "hello\n");

    sb.teardown().await;
}

#[tokio::test]
async fn close_ends_http_but_not_daemon() {
    let sb = TestSandbox::new();
    sb.setup("example.org/close");
    let Some(harness) = start_or_skip(&sb, Backend::Git, config()).await else {
        return;
    };

    harness.close();
    assert_eq!(harness.state(), ControllerState::Closed);
    assert_eq!(harness.daemon().state(), ProcessState::Ready);

    sb.teardown().await;
    assert_eq!(harness.daemon().state(), ProcessState::Reaped);
    let logs = sb.sandbox.logs();
    assert!(logs.iter().any(|l| l.contains("StdErr")), "logs: {logs:?}");
}
