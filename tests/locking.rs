//! Run Exclusivity Integration Tests

use std::fs::File;
use std::process::Command;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tempfile::TempDir;

use gip::core::{LockError, RunLock};
use gip::{Collector, GipConfig};

fn config(temp: &TempDir) -> GipConfig {
    GipConfig {
        freshness: Duration::from_secs(300),
        cache_ttl: Duration::from_secs(600),
        response: Duration::from_secs(10),
        timeout: Duration::from_secs(10),
        flush_cache: false,
        temp_dir: temp.path().join("cache"),
        provider_dir: None,
        plugin_dir: None,
        static_dir: None,
        lock_file: temp.path().join("gip.lock"),
        kill_timeout: Duration::from_secs(3600),
        lock_retry_delay: Duration::from_millis(1),
        add_attributes: None,
        alter_attributes: None,
        remove_attributes: None,
    }
}

#[tokio::test]
async fn test_cycle_aborts_while_lock_is_held() {
    let temp = TempDir::new().unwrap();
    let cfg = config(&temp);

    let held = RunLock::acquire(
        &cfg.lock_file,
        Duration::from_secs(3600),
        Duration::from_millis(1),
    )
    .unwrap();

    let err = Collector::new(cfg.clone()).run_cycle().await.unwrap_err();
    assert!(matches!(
        err.root_cause().downcast_ref::<LockError>(),
        Some(LockError::Busy { .. })
    ));
    // The aborted run touched no persisted state.
    assert!(!cfg.snapshot_path().exists());

    drop(held);
    Collector::new(cfg).run_cycle().await.unwrap();
}

#[test]
fn test_lock_file_carries_holder_pid_and_is_cleaned_up() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("gip.lock");

    let lock = RunLock::acquire(
        &path,
        Duration::from_secs(3600),
        Duration::from_millis(1),
    )
    .unwrap();
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        std::process::id().to_string()
    );

    drop(lock);
    assert!(!path.exists());
}

#[test]
fn test_stale_holder_is_killed_and_lock_reclaimed() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("gip.lock");

    // A real external holder: writes its pid into the lock file, then
    // execs into flock(1) holding the exclusive lock far longer than the
    // test runs.
    let mut holder = Command::new("bash")
        .arg("-c")
        .arg(format!(
            "echo $$ > '{p}'; exec flock -F -x '{p}' sleep 30",
            p = path.display()
        ))
        .spawn()
        .unwrap();

    // Wait until the holder actually owns the flock before contending.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if path.exists() {
            let file = File::open(&path).unwrap();
            if file.try_lock_exclusive().is_err() {
                break;
            }
            FileExt::unlock(&file).unwrap();
        }
        assert!(Instant::now() < deadline, "holder never took the lock");
        std::thread::sleep(Duration::from_millis(10));
    }

    // A zero kill timeout makes any holder stale: acquisition must kill
    // it, outwait the kernel's flock release, and take the lock over.
    let lock = RunLock::acquire(&path, Duration::ZERO, Duration::from_millis(50)).unwrap();
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        std::process::id().to_string()
    );

    let status = holder.wait().unwrap();
    assert!(!status.success());
    drop(lock);
    assert!(!path.exists());
}
