//! Contract Test: Rollback on proxy reload failure
//!
//! Constraints verified:
//! - A reload failure after writing the full config deletes the config,
//!   reloads again and surfaces the original error
//! - The same holds on refresh
//! - A failing rollback reload never masks the original error

mod common;

use common::*;
use vhost_core::vhost::Backend;
use vhost_core::{AddRequest, ErrorKind};

fn request() -> AddRequest {
    AddRequest::new("hub.example.com", Backend::new("127.0.0.1", 8000))
}

#[tokio::test]
async fn failed_final_reload_removes_config() {
    let mut harness = Harness::new(Some(PUBLIC_IP), false);
    harness.install_certificate("hub.example.com");
    harness.runner = harness.runner.clone().failing_reload(1);

    let err = harness.provisioner().add(&request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Process);
    assert!(err.to_string().contains("Job for nginx.service failed"));
    assert!(!harness.vhost_file("hub.example.com").exists());
    assert_eq!(
        harness.runner.calls(),
        vec![Call::Check, Call::Reload, Call::Check, Call::Reload]
    );
}

#[tokio::test]
async fn failed_refresh_reload_removes_config() {
    let mut harness = Harness::new(Some(PUBLIC_IP), false);
    harness.install_certificate("hub.example.com");
    let path = harness.vhost_file("hub.example.com");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "# outdated\n").unwrap();
    harness.runner = harness.runner.clone().failing_reload(1);

    let err = harness.provisioner().add(&request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Process);
    assert!(!path.exists());
    assert_eq!(harness.runner.count(Call::Reload), 2);
}

#[tokio::test]
async fn rollback_failure_does_not_mask_original_error() {
    let mut harness = Harness::new(Some(PUBLIC_IP), false);
    harness.install_certificate("hub.example.com");
    harness.runner = harness.runner.clone().failing_reload(2);

    let err = harness.provisioner().add(&request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Process);
    assert!(!harness.vhost_file("hub.example.com").exists());
    assert_eq!(harness.runner.count(Call::Reload), 2);
}

#[tokio::test]
async fn failed_challenge_reload_rolls_back() {
    let mut harness = Harness::new(Some(PUBLIC_IP), false);
    harness.runner = harness.runner.clone().failing_reload(1);

    let err = harness.provisioner().add(&request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Process);
    assert_eq!(harness.runner.count(Call::Obtain), 0);
    assert!(!harness.vhost_file("hub.example.com").exists());
}
