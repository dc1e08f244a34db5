use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lantern_core::{ExternalToolRunner, ToolCommand, ToolExit, ToolOutput};
use tracing::{debug, warn};

use crate::CancelFlag;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long output readers may keep draining once the tool itself is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Runs tools as child processes with captured output. Each tool gets its own
/// process group, and the whole group is killed when the timeout elapses or the
/// cancel flag is raised.
#[derive(Debug, Clone)]
pub struct ProcessToolRunner {
    cancel: CancelFlag,
    poll_interval: Duration,
}

impl ProcessToolRunner {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            cancel,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ExternalToolRunner for ProcessToolRunner {
    fn run(&self, command: &ToolCommand, timeout: Duration) -> Result<ToolOutput> {
        debug!(command = %command.display(), timeout_secs = timeout.as_secs(), "running external tool");

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            process.process_group(0);
        }
        let mut child = process
            .spawn()
            .with_context(|| format!("failed to launch `{}`", command.display()))?;

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let started = Instant::now();
        let exit = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("failed to wait for `{}`", command.display()))?
            {
                break exit_from_status(status);
            }
            if self.cancel.is_cancelled() {
                warn!(command = %command.display(), "interrupt received; stopping tool");
                terminate(&mut child);
                break ToolExit::Cancelled;
            }
            if started.elapsed() >= timeout {
                warn!(command = %command.display(), "tool exceeded its timeout; stopping it");
                terminate(&mut child);
                break ToolExit::TimedOut;
            }
            thread::sleep(self.poll_interval);
        };

        // Leftover descendants may still hold the pipes open; never wait on them
        // past the tool's own deadline.
        let drain_until = match exit {
            ToolExit::Exited(_) | ToolExit::Killed => {
                (started + timeout).max(Instant::now()) + READER_GRACE
            }
            ToolExit::TimedOut | ToolExit::Cancelled => Instant::now() + READER_GRACE,
        };
        let output = ToolOutput {
            stdout: collect_output(stdout, drain_until),
            stderr: collect_output(stderr, drain_until),
            exit,
        };
        debug!(command = %command.display(), exit = ?output.exit, "external tool finished");
        Ok(output)
    }
}

fn exit_from_status(status: ExitStatus) -> ToolExit {
    match status.code() {
        Some(code) => ToolExit::Exited(code),
        None => ToolExit::Killed,
    }
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        unsafe {
            libc::killpg(child.id() as libc::pid_t, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> Receiver<String> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = source.read_to_end(&mut buffer);
        let _ = sender.send(String::from_utf8_lossy(&buffer).into_owned());
    });
    receiver
}

fn collect_output(receiver: Option<Receiver<String>>, until: Instant) -> String {
    receiver
        .and_then(|receiver| {
            let wait = until.saturating_duration_since(Instant::now());
            receiver.recv_timeout(wait).ok()
        })
        .unwrap_or_default()
}
