//! Supervision of the external stage processes.
//!
//! A [`ProcessRunner`] launches one [`StageCommand`] at a time and reports
//! back through the pipeline's event channel: every output segment as a
//! [`PipelineEvent::StageOutput`] and the exit as a
//! [`PipelineEvent::StageFinished`]. Processes are spawned directly, never
//! through a shell, and on Unix in their own process group so suspend,
//! resume and terminate reach every descendant.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::command::{StageCommand, StageRole};
use crate::error::{GxsError, Result};
use crate::pipeline::{PipelineEvent, StageCompletion};

const READ_BUFFER_SIZE: usize = 4096;

/// A launched stage process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub id: u64,
    pub role: StageRole,
    pub program: String,
    pub pid: Option<u32>,
}

#[cfg_attr(test, mockall::automock)]
pub trait ProcessRunner: Send {
    /// Start `command`. Fails with [`GxsError::Launch`] when the program
    /// cannot be spawned.
    fn launch(&mut self, command: &StageCommand) -> Result<ProcessHandle>;

    /// Stop the process tree in place. [`GxsError::NotRunning`] once exited.
    fn suspend(&mut self, handle: &ProcessHandle) -> Result<()>;

    fn resume(&mut self, handle: &ProcessHandle) -> Result<()>;

    /// Kill the process tree. A no-op when it already exited.
    fn terminate(&mut self, handle: &ProcessHandle) -> Result<()>;
}

struct LiveProcess {
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
    kill: Option<oneshot::Sender<()>>,
}

/// [`ProcessRunner`] on `tokio::process`. Must be used inside a Tokio
/// runtime.
pub struct TokioProcessRunner {
    events: mpsc::UnboundedSender<PipelineEvent>,
    live: HashMap<u64, LiveProcess>,
    next_id: u64,
}

impl TokioProcessRunner {
    pub fn new(events: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self {
            events,
            live: HashMap::new(),
            next_id: 0,
        }
    }

    fn running(&self, handle: &ProcessHandle) -> Option<&LiveProcess> {
        self.live
            .get(&handle.id)
            .filter(|process| !process.exited.load(Ordering::SeqCst))
    }
}

impl ProcessRunner for TokioProcessRunner {
    fn launch(&mut self, command: &StageCommand) -> Result<ProcessHandle> {
        self.live
            .retain(|_, process| !process.exited.load(Ordering::SeqCst));

        debug!("Launching {}: {}", command.role, command.display_line());

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| GxsError::Launch {
            program: command.program.clone(),
            source,
        })?;

        self.next_id += 1;
        let id = self.next_id;
        let pid = child.id();
        let role = command.role;
        let exited = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let events = self.events.clone();
        let exited_flag = exited.clone();

        tokio::spawn(async move {
            let wait = async {
                tokio::select! {
                    status = child.wait() => status,
                    _ = kill_rx => {
                        if let Err(e) = child.start_kill() {
                            debug!("Kill of {} failed: {}", role, e);
                        }
                        child.wait().await
                    }
                }
            };
            let stdout_text = async {
                match stdout {
                    Some(out) => pump(out, role, &events, true).await,
                    None => String::new(),
                }
            };
            let stderr_text = async {
                if let Some(err) = stderr {
                    pump(err, role, &events, false).await;
                }
            };

            let (status, output, ()) = tokio::join!(wait, stdout_text, stderr_text);
            exited_flag.store(true, Ordering::SeqCst);

            let exit_code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!("Failed to wait for {} process: {}", role, e);
                    None
                }
            };
            debug!("{} process exited with {:?}", role, exit_code);

            let completion = StageCompletion::new(role, exit_code).with_output(output);
            let _ = events.send(PipelineEvent::StageFinished(completion));
        });

        self.live.insert(
            id,
            LiveProcess {
                pid,
                exited,
                kill: Some(kill_tx),
            },
        );

        Ok(ProcessHandle {
            id,
            role,
            program: command.program.clone(),
            pid,
        })
    }

    fn suspend(&mut self, handle: &ProcessHandle) -> Result<()> {
        let process = self.running(handle).ok_or(GxsError::NotRunning)?;
        signal_tree(process.pid, TreeSignal::Stop)
    }

    fn resume(&mut self, handle: &ProcessHandle) -> Result<()> {
        let process = self.running(handle).ok_or(GxsError::NotRunning)?;
        signal_tree(process.pid, TreeSignal::Continue)
    }

    fn terminate(&mut self, handle: &ProcessHandle) -> Result<()> {
        let Some(process) = self.live.get_mut(&handle.id) else {
            return Ok(());
        };
        if process.exited.load(Ordering::SeqCst) {
            return Ok(());
        }

        #[cfg(unix)]
        if let Err(e) = signal_tree(process.pid, TreeSignal::Kill) {
            debug!("Process group kill failed: {}", e);
        }
        if let Some(kill) = process.kill.take() {
            let _ = kill.send(());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum TreeSignal {
    Stop,
    Continue,
    #[cfg_attr(not(unix), allow(dead_code))]
    Kill,
}

#[cfg(unix)]
fn signal_tree(pid: Option<u32>, signal: TreeSignal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pid = pid.ok_or(GxsError::NotRunning)?;
    let signal = match signal {
        TreeSignal::Stop => Signal::SIGSTOP,
        TreeSignal::Continue => Signal::SIGCONT,
        TreeSignal::Kill => Signal::SIGKILL,
    };

    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(GxsError::NotRunning),
        Err(errno) => Err(GxsError::Io(std::io::Error::from(errno))),
    }
}

#[cfg(not(unix))]
fn signal_tree(_pid: Option<u32>, signal: TreeSignal) -> Result<()> {
    Err(GxsError::Unsupported(format!(
        "{:?} of a process tree requires POSIX signals",
        signal
    )))
}

/// Forward every `\r` or `\n` terminated segment of `reader` as a
/// [`PipelineEvent::StageOutput`]. Returns the full text when `keep` is set.
async fn pump<R>(
    mut reader: R,
    role: StageRole,
    events: &mpsc::UnboundedSender<PipelineEvent>,
    keep: bool,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let mut segment = Vec::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Read from {} process failed: {}", role, e);
                break;
            }
        };
        if keep {
            collected.extend_from_slice(&buf[..n]);
        }
        for &byte in &buf[..n] {
            if byte == b'\r' || byte == b'\n' {
                flush_segment(&mut segment, role, events);
            } else {
                segment.push(byte);
            }
        }
    }
    flush_segment(&mut segment, role, events);

    String::from_utf8_lossy(&collected).into_owned()
}

fn flush_segment(
    segment: &mut Vec<u8>,
    role: StageRole,
    events: &mpsc::UnboundedSender<PipelineEvent>,
) {
    let text = String::from_utf8_lossy(segment).trim().to_string();
    segment.clear();
    if !text.is_empty() {
        let _ = events.send(PipelineEvent::StageOutput {
            role,
            segment: text,
        });
    }
}
