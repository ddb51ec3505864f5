//! Multi-process tests: real launches of the demo binary sharing an identity.
//!
//! These verify the properties that only hold across process boundaries:
//! exactly one leader, activation delivered to it, and the lock released by
//! the kernel when the leader is killed.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// A running demo process whose stdout lines are collected on a thread.
struct Launched {
    child: Child,
    lines: Receiver<String>,
}

impl Launched {
    /// Wait for a stdout line equal to `expected`.
    fn wait_for_line(&self, expected: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.lines.recv_timeout(remaining) {
                Ok(line) if line.trim() == expected => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    }

    fn kill(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for Launched {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn unique_name() -> String {
    format!("demo-{}", uuid::Uuid::new_v4().simple())
}

fn demo_command(name: &str, runtime_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_instance-guard-demo"));
    cmd.arg("--name")
        .arg(name)
        .arg("--runtime-dir")
        .arg(runtime_dir)
        .stdin(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

fn spawn(name: &str, runtime_dir: &Path) -> Launched {
    let mut child = demo_command(name, runtime_dir)
        .stdout(Stdio::piped())
        .spawn()
        .expect("failed to spawn demo binary");

    let stdout = child.stdout.take().expect("stdout is piped");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    Launched { child, lines: rx }
}

fn run_to_completion(name: &str, runtime_dir: &Path) -> Output {
    demo_command(name, runtime_dir)
        .output()
        .expect("failed to run demo binary")
}

#[test]
fn test_second_launch_activates_first() {
    let temp_dir = TempDir::new().unwrap();
    let name = unique_name();

    let leader = spawn(&name, temp_dir.path());
    assert!(leader.wait_for_line("ROLE=leader", STARTUP_TIMEOUT));

    let follower = run_to_completion(&name, temp_dir.path());
    assert!(follower.status.success());
    assert_eq!(String::from_utf8_lossy(&follower.stdout).trim(), "ROLE=follower");

    assert!(leader.wait_for_line("ACTIVATED count=1", Duration::from_secs(5)));

    let follower = run_to_completion(&name, temp_dir.path());
    assert!(follower.status.success());
    assert!(leader.wait_for_line("ACTIVATED count=2", Duration::from_secs(5)));

    leader.kill();
}

#[test]
fn test_killed_leader_releases_lock() {
    let temp_dir = TempDir::new().unwrap();
    let name = unique_name();

    let first = spawn(&name, temp_dir.path());
    assert!(first.wait_for_line("ROLE=leader", STARTUP_TIMEOUT));

    // SIGKILL on Unix, TerminateProcess on Windows: no cleanup code runs.
    first.kill();

    let second = spawn(&name, temp_dir.path());
    assert!(second.wait_for_line("ROLE=leader", STARTUP_TIMEOUT));

    let follower = run_to_completion(&name, temp_dir.path());
    assert_eq!(String::from_utf8_lossy(&follower.stdout).trim(), "ROLE=follower");
    assert!(second.wait_for_line("ACTIVATED count=1", Duration::from_secs(5)));

    second.kill();
}

#[test]
fn test_concurrent_launches_leave_exactly_one_running() {
    let temp_dir = TempDir::new().unwrap();
    let name = unique_name();

    let launches: Vec<Launched> = (0..6).map(|_| spawn(&name, temp_dir.path())).collect();

    // Followers exit on their own within the hand-off timeout.
    thread::sleep(Duration::from_secs(3));

    let mut still_running = Vec::new();
    for mut launch in launches {
        match launch.child.try_wait().expect("try_wait failed") {
            Some(status) => assert!(status.success(), "follower exited with {}", status),
            None => still_running.push(launch),
        }
    }

    assert_eq!(still_running.len(), 1, "exactly one process should stay up");
    let leader = still_running.pop().unwrap();
    assert!(leader.wait_for_line("ROLE=leader", STARTUP_TIMEOUT));

    leader.kill();
}

#[test]
fn test_empty_name_fails_startup() {
    let temp_dir = TempDir::new().unwrap();

    let output = run_to_completion("   ", temp_dir.path());

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
