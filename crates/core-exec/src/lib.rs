//! Cancellable, thread-backed build execution.
//!
//! One background thread per build attempt. The child is spawned as the
//! leader of its own process group so cancellation can take down the whole
//! tree with a single group signal. The thread publishes the child PID into
//! shared state before it blocks on output collection and clears it again
//! before storing its outcome, so a concurrent `cancel` either finds a live
//! group to kill or finds it already cleared and safely skips the kill.
//!
//! Ordering contract: the `done` flag is stored with Release ordering only
//! after the outcome (output + exit code) is in place, so a poller that
//! observes `done` never sees incomplete data.

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// PID slot sentinels. A real PID is always positive.
const PID_UNPUBLISHED: i32 = 0;
const PID_CLEARED: i32 = -1;

/// Upper bound on how long `cancel` waits for the spawning thread to
/// publish the PID before giving up on the kill (the thread will still be
/// joined either way).
const PUBLISH_WAIT: Duration = Duration::from_millis(500);
/// Grace period between SIGTERM and SIGKILL escalation.
const TERM_GRACE: Duration = Duration::from_millis(300);
const SPIN_INTERVAL: Duration = Duration::from_millis(2);

/// Result of one tick's poll.
#[derive(Debug, PartialEq, Eq)]
pub enum BuildPoll {
    /// No build attempt is in flight.
    Idle,
    /// The attempt is still starting or running.
    Pending,
    /// The build ran to completion. A non-zero exit code is normal
    /// operation; its text goes to the classifier like any other.
    Done(BuildOutput),
    /// The command could not be launched at all.
    SpawnFailed(String),
}

#[derive(Debug, PartialEq, Eq)]
pub struct BuildOutput {
    /// Captured diagnostics: stderr first, then stdout.
    pub text: String,
    pub exit_code: i32,
}

#[derive(Debug)]
enum Outcome {
    Finished(BuildOutput),
    SpawnFailed(String),
}

#[derive(Debug)]
struct Shared {
    pid: AtomicI32,
    done: AtomicBool,
    outcome: Mutex<Option<Outcome>>,
}

#[derive(Debug)]
struct Attempt {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

/// At most one attempt is ever in flight; starting a new build cancels the
/// previous one first.
#[derive(Debug, Default)]
pub struct BuildExecutor {
    attempt: Option<Attempt>,
}

impl BuildExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.attempt.is_some()
    }

    /// Spawn `command args...` in its own process group and return
    /// immediately. Capture happens on a background thread.
    pub fn start(&mut self, command: &str, args: &[String]) {
        if self.attempt.is_some() {
            debug!(target: "exec", "implicit cancel of active attempt");
            self.cancel();
        }
        info!(target: "exec", command, ?args, "build_start");

        let shared = Arc::new(Shared {
            pid: AtomicI32::new(PID_UNPUBLISHED),
            done: AtomicBool::new(false),
            outcome: Mutex::new(None),
        });
        let thread_shared = Arc::clone(&shared);
        let command = command.to_string();
        let args = args.to_vec();
        let worker = thread::spawn(move || run_build(&command, &args, &thread_shared));
        self.attempt = Some(Attempt {
            shared,
            worker: Some(worker),
        });
    }

    /// Non-blocking completion check, called once per tick. When the
    /// attempt has finished, the worker thread is joined here so no handle
    /// outlives its build.
    pub fn poll(&mut self) -> BuildPoll {
        match &self.attempt {
            None => return BuildPoll::Idle,
            Some(attempt) if !attempt.shared.done.load(Ordering::Acquire) => {
                return BuildPoll::Pending;
            }
            Some(_) => {}
        }
        let Some(mut attempt) = self.attempt.take() else {
            return BuildPoll::Idle;
        };
        if let Some(worker) = attempt.worker.take() {
            let _ = worker.join();
        }
        let outcome = attempt
            .shared
            .outcome
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        match outcome {
            Some(Outcome::Finished(output)) => {
                info!(target: "exec", exit_code = output.exit_code, bytes = output.text.len(), "build_done");
                BuildPoll::Done(output)
            }
            Some(Outcome::SpawnFailed(message)) => {
                warn!(target: "exec", %message, "spawn_failed");
                BuildPoll::SpawnFailed(message)
            }
            // The worker always stores an outcome before setting `done`;
            // treat a poisoned mutex as a spawn-level failure.
            None => BuildPoll::SpawnFailed("build worker state lost".to_string()),
        }
    }

    /// Terminate the in-flight attempt, join its thread, and discard any
    /// buffered output. Safe no-op when idle.
    ///
    /// If cancel arrives before the spawning thread has published the PID,
    /// we wait (bounded) for publication instead of racing a kill against a
    /// process that does not exist yet.
    pub fn cancel(&mut self) {
        let Some(mut attempt) = self.attempt.take() else {
            return;
        };
        let shared = Arc::clone(&attempt.shared);
        let deadline = Instant::now() + PUBLISH_WAIT;
        loop {
            let pid = shared.pid.load(Ordering::Acquire);
            if pid > 0 {
                kill_group(pid, &shared);
                break;
            }
            // Cleared (already finished) or spawn failed: nothing to kill.
            if pid == PID_CLEARED || shared.done.load(Ordering::Acquire) {
                break;
            }
            if Instant::now() >= deadline {
                warn!(target: "exec", "pid publication wait expired");
                break;
            }
            thread::sleep(SPIN_INTERVAL);
        }
        if let Some(worker) = attempt.worker.take() {
            let _ = worker.join();
        }
        // Outcome, if any, drops with `attempt`: a cancelled build's output
        // never reaches a caller.
        info!(target: "exec", "build_cancelled");
    }
}

impl Drop for BuildExecutor {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Body of the background thread: spawn, publish PID, collect, store.
fn run_build(command: &str, args: &[String], shared: &Shared) {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Leader of a fresh group so descendants die with it.
        cmd.process_group(0);
    }

    let outcome = match cmd.spawn() {
        Ok(child) => {
            shared.pid.store(child.id() as i32, Ordering::Release);
            let collected = child.wait_with_output();
            shared.pid.store(PID_CLEARED, Ordering::Release);
            match collected {
                Ok(output) => {
                    let mut text =
                        String::with_capacity(output.stderr.len() + output.stdout.len());
                    text.push_str(&String::from_utf8_lossy(&output.stderr));
                    if !output.stdout.is_empty() {
                        if !text.is_empty() && !text.ends_with('\n') {
                            text.push('\n');
                        }
                        text.push_str(&String::from_utf8_lossy(&output.stdout));
                    }
                    Outcome::Finished(BuildOutput {
                        text,
                        exit_code: exit_code_of(&output.status),
                    })
                }
                Err(err) => Outcome::SpawnFailed(format!("output collection failed: {err}")),
            }
        }
        Err(err) => {
            shared.pid.store(PID_CLEARED, Ordering::Release);
            Outcome::SpawnFailed(format!("{command}: {err}"))
        }
    };

    if let Ok(mut slot) = shared.outcome.lock() {
        *slot = Some(outcome);
    }
    // Published last; pollers that see it can rely on the outcome above.
    shared.done.store(true, Ordering::Release);
}

#[cfg(unix)]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// SIGTERM the group, give it a short grace window, then SIGKILL if the
/// worker has not reported completion.
#[cfg(unix)]
fn kill_group(pid: i32, shared: &Shared) {
    debug!(target: "exec", pid, "killpg SIGTERM");
    unsafe {
        let _ = libc::killpg(pid, libc::SIGTERM);
    }
    let deadline = Instant::now() + TERM_GRACE;
    while Instant::now() < deadline {
        if shared.done.load(Ordering::Acquire) || shared.pid.load(Ordering::Acquire) == PID_CLEARED
        {
            return;
        }
        thread::sleep(SPIN_INTERVAL);
    }
    debug!(target: "exec", pid, "killpg SIGKILL escalation");
    unsafe {
        let _ = libc::killpg(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: i32, _shared: &Shared) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(executor: &mut BuildExecutor, script: &str) {
        executor.start("/bin/sh", &["-c".to_string(), script.to_string()]);
    }

    fn wait_done(executor: &mut BuildExecutor, timeout: Duration) -> BuildPoll {
        let deadline = Instant::now() + timeout;
        loop {
            match executor.poll() {
                BuildPoll::Pending => {
                    assert!(Instant::now() < deadline, "build did not finish in time");
                    thread::sleep(Duration::from_millis(5));
                }
                other => return other,
            }
        }
    }

    #[test]
    fn idle_executor_polls_idle() {
        let mut executor = BuildExecutor::new();
        assert_eq!(executor.poll(), BuildPoll::Idle);
    }

    #[test]
    fn cancel_on_idle_is_noop() {
        let mut executor = BuildExecutor::new();
        executor.cancel();
        executor.cancel();
        assert_eq!(executor.poll(), BuildPoll::Idle);
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_exit_code() {
        let mut executor = BuildExecutor::new();
        sh(&mut executor, "echo out; echo err 1>&2; exit 0");
        match wait_done(&mut executor, Duration::from_secs(5)) {
            BuildPoll::Done(output) => {
                assert_eq!(output.exit_code, 0);
                // stderr precedes stdout in the merged text
                let err_pos = output.text.find("err").unwrap();
                let out_pos = output.text.find("out").unwrap();
                assert!(err_pos < out_pos);
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert_eq!(executor.poll(), BuildPoll::Idle);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_done_not_spawn_failed() {
        let mut executor = BuildExecutor::new();
        sh(&mut executor, "echo diagnostics 1>&2; exit 3");
        match wait_done(&mut executor, Duration::from_secs(5)) {
            BuildPoll::Done(output) => {
                assert_eq!(output.exit_code, 3);
                assert!(output.text.contains("diagnostics"));
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn missing_command_is_spawn_failed() {
        let mut executor = BuildExecutor::new();
        executor.start("/definitely/not/a/real/command", &[]);
        match wait_done(&mut executor, Duration::from_secs(5)) {
            BuildPoll::SpawnFailed(message) => {
                assert!(!message.is_empty());
            }
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn cancel_terminates_long_build_and_joins() {
        let mut executor = BuildExecutor::new();
        sh(&mut executor, "sleep 30");
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        executor.cancel();
        // Join-before-return means we are back well before the sleep ends.
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(executor.poll(), BuildPoll::Idle);
    }

    #[cfg(unix)]
    #[test]
    fn immediate_cancel_does_not_miss_the_kill() {
        // Cancel can arrive before the spawning thread publishes the PID;
        // the bounded wait must still terminate the process once started.
        let mut executor = BuildExecutor::new();
        sh(&mut executor, "sleep 30");
        let started = Instant::now();
        executor.cancel();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(executor.poll(), BuildPoll::Idle);
    }

    #[cfg(unix)]
    #[test]
    fn cancel_kills_descendants_via_process_group() {
        let mut executor = BuildExecutor::new();
        // The child spawns its own child; the pipe-backed collection only
        // finishes when every writer in the group is gone.
        sh(&mut executor, "sleep 30 & wait");
        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        executor.cancel();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn starting_while_running_leaves_one_attempt() {
        let mut executor = BuildExecutor::new();
        sh(&mut executor, "sleep 30; echo first");
        thread::sleep(Duration::from_millis(50));
        sh(&mut executor, "echo second");
        match wait_done(&mut executor, Duration::from_secs(5)) {
            BuildPoll::Done(output) => {
                // The first attempt's output was discarded on cancel.
                assert!(output.text.contains("second"));
                assert!(!output.text.contains("first"));
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert_eq!(executor.poll(), BuildPoll::Idle);
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_output_never_surfaces() {
        let mut executor = BuildExecutor::new();
        sh(&mut executor, "echo leaked; sleep 30");
        thread::sleep(Duration::from_millis(100));
        executor.cancel();
        assert_eq!(executor.poll(), BuildPoll::Idle);
    }
}
