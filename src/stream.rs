// Stream supervisor: owns at most one live transcoder process.
//
// The transcoder runs in its own process group so that stopping it also takes
// down anything it forked. Stopping is non-blocking: SIGTERM goes to the group
// and a reaper thread waits for the exit, escalating to SIGKILL after a grace period.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use crate::{ulog_debug, ulog_info, ulog_warn};

/// Grace period between SIGTERM and SIGKILL (seconds)
const GRACEFUL_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
/// Reaper poll interval
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Source and destination of a relay
#[derive(Debug, Clone, PartialEq)]
pub struct StreamTarget {
    pub source: String,
    pub destination: String,
}

/// The tracked transcoder
struct StreamProcess {
    child: Child,
    /// Process group id (equals the child pid, set via `process_group(0)`)
    pgid: i32,
    target: StreamTarget,
    started_at: Instant,
}

/// Single-slot supervisor for the relay transcoder
pub struct StreamSupervisor {
    program: String,
    current: Option<StreamProcess>,
}

impl StreamSupervisor {
    /// `program` is the transcoder binary (name on PATH or absolute path).
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            current: None,
        }
    }

    /// Arguments for relaying `source` to `destination`
    pub fn transcoder_args(source: &str, destination: &str) -> Vec<String> {
        [
            "-re", "-i", source, "-c:v", "libx264", "-preset", "ultrafast", "-f", "flv",
            destination,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn resolve_program(&self) -> Result<PathBuf, String> {
        which::which(&self.program)
            .map_err(|e| format!("Transcoder '{}' not found: {}", self.program, e))
    }

    /// Start relaying. Any tracked process is stopped first; returns the new pid
    /// without waiting for the transcoder to do anything.
    pub fn start(&mut self, source: &str, destination: &str) -> Result<u32, String> {
        if self.current.is_some() {
            self.stop();
        }

        let program = self.resolve_program()?;
        let mut cmd = Command::new(&program);
        cmd.args(Self::transcoder_args(source, destination))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| format!("Failed to start {}: {}", program.display(), e))?;
        let pid = child.id();

        ulog_info!(
            "[stream] Started relay pid={} source={} destination={}",
            pid,
            source,
            redact_destination(destination)
        );

        self.current = Some(StreamProcess {
            child,
            pgid: pid as i32,
            target: StreamTarget {
                source: source.to_string(),
                destination: destination.to_string(),
            },
            started_at: Instant::now(),
        });
        Ok(pid)
    }

    /// Stop the tracked relay. Returns whether anything was tracked.
    /// The handle is cleared even if signalling fails.
    pub fn stop(&mut self) -> bool {
        let Some(process) = self.current.take() else {
            return false;
        };
        ulog_info!(
            "[stream] Stopping relay pid={} after {}s",
            process.pgid,
            process.started_at.elapsed().as_secs()
        );
        terminate_group(process.child, process.pgid);
        true
    }

    /// Whether the tracked transcoder is still alive. Never clears the handle.
    pub fn is_running(&mut self) -> bool {
        match self.current.as_mut() {
            Some(process) => matches!(process.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn target(&self) -> Option<&StreamTarget> {
        self.current.as_ref().map(|p| &p.target)
    }

    pub fn pid(&self) -> Option<u32> {
        self.current.as_ref().map(|p| p.child.id())
    }

    /// Seconds since the tracked relay was started
    pub fn uptime(&self) -> Option<Duration> {
        self.current.as_ref().map(|p| p.started_at.elapsed())
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// SIGTERM the group, then hand the child to a reaper thread that waits for it
/// and sends SIGKILL to the group if it outlives the grace period.
fn terminate_group(mut child: Child, pgid: i32) {
    #[cfg(unix)]
    {
        // ESRCH (already gone) is fine
        unsafe {
            libc::killpg(pgid, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }

    thread::spawn(move || {
        let timeout = Duration::from_secs(GRACEFUL_SHUTDOWN_TIMEOUT_SECS);
        let start = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    ulog_debug!("[stream] Relay pid={} exited: {}", pgid, status);
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    ulog_debug!("[stream] Relay pid={} wait error: {}", pgid, e);
                    return;
                }
            }

            if start.elapsed() > timeout {
                ulog_warn!(
                    "[stream] Relay pid={} didn't exit after SIGTERM, force killing",
                    pgid
                );
                #[cfg(unix)]
                {
                    unsafe {
                        libc::killpg(pgid, libc::SIGKILL);
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = child.kill();
                }
                let _ = child.wait();
                return;
            }

            thread::sleep(REAP_POLL_INTERVAL);
        }
    });
}

/// Hide the stream key part of a destination in logs
pub fn redact_destination(destination: &str) -> String {
    match destination.rfind('/') {
        Some(idx) if idx + 1 < destination.len() => {
            let key = &destination[idx + 1..];
            let visible: String = key.chars().take(4).collect();
            format!("{}/{}***", &destination[..idx], visible)
        }
        _ => destination.to_string(),
    }
}

/// Stand-in transcoder for tests: a script that ignores its arguments and sleeps.
#[cfg(all(test, unix))]
pub(crate) fn fake_transcoder(dir: &std::path::Path) -> String {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg");
    {
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"#!/bin/sh\nexec sleep 30\n").unwrap();
    }
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    // A freshly written script fails with ETXTBSY while a concurrently forked
    // child still holds the write fd; wait until it executes cleanly.
    for _ in 0..100 {
        match Command::new(&path).stdout(Stdio::null()).spawn() {
            Ok(mut child) => {
                let _ = child.kill();
                let _ = child.wait();
                break;
            }
            Err(_) => thread::sleep(Duration::from_millis(20)),
        }
    }
    path.to_string_lossy().into_owned()
}
