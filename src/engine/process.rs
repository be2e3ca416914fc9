use crate::cancel::CancelToken;
use anyhow::{Context, Result};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Collected output of a child that exited on its own.
#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// How a supervised child process ended.
#[derive(Debug)]
pub enum ProcessExit {
    Exited(Captured),
    TimedOut { stderr: String },
    Cancelled,
}

/// Spawn `cmd` with piped output and wait until it exits, `deadline` passes
/// or `cancel` fires. On timeout or cancellation the child's whole process
/// group is killed. Nothing here waits past `deadline`: output still held
/// open by a detached grandchild is returned as collected so far.
pub fn run_supervised(
    mut cmd: Command,
    deadline: Instant,
    cancel: &CancelToken,
    poll: Duration,
) -> Result<ProcessExit> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    own_process_group(&mut cmd);

    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {program}"))?;
    debug!("spawned {} pid={}", program, child.id());

    // Drain pipes while waiting so a chatty tool can't deadlock on a full
    // stdout/stderr buffer.
    let stdout = Pipe::drain(child.stdout.take());
    let stderr = Pipe::drain(child.stderr.take());

    loop {
        // Checked first: a signal aimed at us must never turn into a
        // successful exit of an interrupted child.
        if cancel.is_cancelled() {
            warn!("{} cancelled; killing pid={}", program, child.id());
            kill(&mut child);
            return Ok(ProcessExit::Cancelled);
        }

        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            if !(stdout.wait_until(deadline, poll) && stderr.wait_until(deadline, poll)) {
                warn!(
                    "{} exited but its output pipes are still held open; using partial output",
                    program
                );
            }
            return Ok(ProcessExit::Exited(Captured {
                status,
                stdout: stdout.take(),
                stderr: stderr.take(),
            }));
        }

        if Instant::now() >= deadline {
            warn!("{} exceeded its deadline; killing pid={}", program, child.id());
            kill(&mut child);
            return Ok(ProcessExit::TimedOut {
                stderr: String::from_utf8_lossy(&stderr.take()).into_owned(),
            });
        }

        std::thread::sleep(poll);
    }
}

/// A pipe drained on its own thread into a shared buffer.
struct Pipe {
    buf: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<()>,
}

impl Pipe {
    fn drain<R: Read + Send + 'static>(source: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let reader = std::thread::spawn(move || {
            let Some(mut r) = source else { return };
            let mut chunk = [0u8; 8192];
            loop {
                match r.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => match sink.lock() {
                        Ok(mut b) => b.extend_from_slice(&chunk[..n]),
                        Err(_) => break,
                    },
                }
            }
        });
        Self { buf, reader }
    }

    /// True once the writer side closed; false if `deadline` came first.
    fn wait_until(&self, deadline: Instant, poll: Duration) -> bool {
        while !self.reader.is_finished() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(poll.min(deadline - now));
        }
        true
    }

    fn take(&self) -> Vec<u8> {
        match self.buf.lock() {
            Ok(mut b) => std::mem::take(&mut *b),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // Keeps terminal signals away from the child and lets us kill anything
    // it forked along with it.
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

fn kill(child: &mut Child) {
    #[cfg(unix)]
    {
        // The child leads its own group, so its pid is the group id.
        let _ = unsafe { libc::kill(-(child.id() as i32), libc::SIGKILL) };
    }
    let _ = child.kill();
    let _ = child.wait();
}
