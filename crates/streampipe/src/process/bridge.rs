//! ProcessBridge - pipes stream items through a shell command.
//!
//! Flow:
//! 1. Create two close-on-exec pipes and spawn `shell -c command` with the
//!    child's ends on its stdin/stdout
//! 2. Drop the child's ends in the parent, switch ours to non-blocking
//! 3. Each work call: read whole output items, then write whole input items
//! 4. Shutdown: settle staged input as the pipes allow, switch to blocking,
//!    close stdin, drain stdout (bounded), close it, reap the child
//!
//! Shutdown runs at most once; `Drop` runs it if the owner didn't.

use std::os::fd::AsFd;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use serde::Serialize;

use super::fd::{cloexec_pipe, set_blocking, set_cloexec, set_nonblocking};
use super::stream::{ItemReader, ItemWriter};
use crate::block::WorkOutcome;
use crate::config::BridgeConfig;
use crate::error::BridgeError;

/// How the child ended, as far as the parent could tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ChildExit {
    Exited(i32),
    Signaled(i32),
    /// Wait failed or the status carried neither a code nor a signal.
    Unknown,
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            ChildExit::Exited(code)
        } else if let Some(signal) = status.signal() {
            ChildExit::Signaled(signal)
        } else {
            ChildExit::Unknown
        }
    }
}

impl ChildExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, ChildExit::Exited(0))
    }
}

/// Diagnostics gathered by [`ProcessBridge::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Output the child had produced but the host never pulled.
    pub drained: Vec<u8>,
    /// Accepted input bytes that could not be delivered to the child.
    pub undelivered: usize,
    /// The drain stopped on its retry bound rather than on EOF.
    pub drain_exhausted: bool,
    pub exit: ChildExit,
}

impl ShutdownReport {
    /// Whole output items among the drained bytes.
    pub fn drained_items(&self, item_size: usize) -> usize {
        self.drained.len() / item_size
    }
}

/// Running totals over the bridge's life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub work_calls: u64,
    pub consumed_items: u64,
    pub produced_items: u64,
}

/// Owns one child process and both of its stdio pipes.
pub struct ProcessBridge {
    config: BridgeConfig,
    child: Option<Child>,
    pid: u32,
    writer: Option<ItemWriter>,
    reader: Option<ItemReader>,
    stats: BridgeStats,
    report: Option<ShutdownReport>,
}

impl std::fmt::Debug for ProcessBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBridge")
            .field("command", &self.config.command)
            .field("pid", &self.pid)
            .field("stats", &self.stats)
            .field("shut_down", &self.report.is_some())
            .finish()
    }
}

impl ProcessBridge {
    /// Spawn `config.command` under `config.shell`.
    pub fn spawn(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;

        let (child_stdin, host_stdin) = cloexec_pipe()?;
        let (host_stdout, child_stdout) = cloexec_pipe()?;

        let mut command = Command::new(&config.shell);
        command
            .arg("-c")
            .arg(&config.command)
            .stdin(Stdio::from(child_stdin))
            .stdout(Stdio::from(child_stdout))
            .stderr(Stdio::inherit());

        let child = command.spawn().map_err(|source| BridgeError::Spawn {
            command: config.command.clone(),
            source,
        })?;
        // Command still holds the child's pipe ends; without this we'd never see EOF.
        drop(command);

        let pid = child.id();
        tracing::info!(pid, command = %config.command, "Spawned child process");

        let writer = ItemWriter::new(host_stdin, config.input_item_size, config.write_buffer_size);
        let reader = ItemReader::new(host_stdout, config.output_item_size);

        // From here on Drop reaps the child if anything fails.
        let bridge = Self {
            config,
            child: Some(child),
            pid,
            writer: Some(writer),
            reader: Some(reader),
            stats: BridgeStats::default(),
            report: None,
        };
        bridge.prepare_descriptors()?;
        Ok(bridge)
    }

    fn prepare_descriptors(&self) -> Result<(), BridgeError> {
        if let Some(writer) = &self.writer {
            set_nonblocking(writer)?;
            set_cloexec(writer)?;
        }
        if let Some(reader) = &self.reader {
            set_nonblocking(reader)?;
            set_cloexec(reader)?;
        }
        Ok(())
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn input_item_size(&self) -> usize {
        self.config.input_item_size
    }

    pub fn output_item_size(&self) -> usize {
        self.config.output_item_size
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn unbuffered(&self) -> bool {
        self.config.unbuffered
    }

    pub fn set_unbuffered(&mut self, unbuffered: bool) {
        self.config.unbuffered = unbuffered;
    }

    pub fn is_shut_down(&self) -> bool {
        self.report.is_some()
    }

    /// True once the child closed its stdout.
    pub fn output_closed(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| r.at_eof())
    }

    /// Input items the host should stage to get `noutput_items` out.
    ///
    /// Advisory only; work() copes with any amount.
    pub fn forecast(&self, noutput_items: usize) -> usize {
        (noutput_items as f64 / self.config.relative_rate) as usize
    }

    /// One steady-state pass: read child output into `output`, then feed
    /// `input` to the child. Never blocks.
    ///
    /// Both regions must hold whole items. The consumed and produced counts
    /// are independent of each other.
    pub fn work(&mut self, input: &[u8], output: &mut [u8]) -> Result<WorkOutcome, BridgeError> {
        check_aligned(input.len(), self.config.input_item_size)?;
        check_aligned(output.len(), self.config.output_item_size)?;

        let (Some(reader), Some(writer)) = (self.reader.as_mut(), self.writer.as_mut()) else {
            return Err(BridgeError::AlreadyShutDown);
        };

        let produced = reader
            .read_items(output)
            .map_err(|e| BridgeError::io("read", e))?;
        let consumed = writer
            .write_items(input, self.config.unbuffered)
            .map_err(|e| BridgeError::io("write", e))?;

        self.stats.work_calls += 1;
        self.stats.consumed_items += consumed as u64;
        self.stats.produced_items += produced as u64;

        tracing::trace!(
            pid = self.pid,
            offered = input.len() / self.config.input_item_size,
            consumed,
            produced,
            staged_bytes = writer.staged_len(),
            "Bridge work"
        );

        Ok(WorkOutcome { consumed, produced })
    }

    /// Tear the child down and collect diagnostics. Runs once; later calls
    /// return the first report.
    pub fn shutdown(&mut self) -> &ShutdownReport {
        let report = match self.report.take() {
            Some(report) => report,
            None => self.run_shutdown(),
        };
        self.report.insert(report)
    }

    fn run_shutdown(&mut self) -> ShutdownReport {
        let mut drained = Vec::new();
        let mut undelivered = 0;
        let mut drain_exhausted = false;
        let attempts = self.config.drain_attempts;
        let chunk = self.config.drain_chunk;

        tracing::debug!(pid = self.pid, "Shutting down child process");

        let mut writer = self.writer.take();
        let mut reader = self.reader.take();

        // Staged input has to reach the child before stdin closes. Push it as
        // stdin makes room, pulling output in between so a child stuck on a
        // full stdout can move on. Once stdout is at EOF the blocking close
        // below can't stall on it.
        if let (Some(w), Some(r)) = (writer.as_mut(), reader.as_mut()) {
            while w.staged_len() > 0 && !r.at_eof() {
                let (writable, readable) = match wait_ready(w, r) {
                    Ok(ready) => ready,
                    Err(e) => {
                        tracing::error!(
                            pid = self.pid,
                            error = %e,
                            "poll() failed while settling input"
                        );
                        break;
                    }
                };
                if writable && let Err(e) = w.flush_staged() {
                    tracing::error!(
                        pid = self.pid,
                        error = %e,
                        "write() failed while settling input"
                    );
                    undelivered += w.discard_staged();
                }
                if readable && let Err(e) = r.read_available(&mut drained, chunk) {
                    tracing::error!(
                        pid = self.pid,
                        error = %e,
                        "read() failed while settling input"
                    );
                    break;
                }
            }
        }

        // Blocking from here: the drain must wait for output still in flight.
        if let Some(w) = &writer
            && let Err(e) = set_blocking(w)
        {
            tracing::warn!(pid = self.pid, error = %e, "Failed to make child stdin blocking");
        }
        if let Some(r) = &reader
            && let Err(e) = set_blocking(r)
        {
            tracing::warn!(pid = self.pid, error = %e, "Failed to make child stdout blocking");
        }

        if let Some(mut w) = writer.take() {
            if let Err(e) = w.finish() {
                let bytes = w.discard_staged();
                tracing::warn!(pid = self.pid, error = %e, bytes, "Child stopped reading input");
                undelivered += bytes;
            }
            drop(w);
        }

        if let Some(mut r) = reader.take() {
            let mut pending = Vec::new();
            r.take_leftover(&mut pending);
            // Bytes pulled while settling came after the partial item.
            pending.append(&mut drained);
            drained = pending;

            let mut reads = 0;
            loop {
                if r.at_eof() {
                    break;
                }
                if reads >= attempts {
                    drain_exhausted = true;
                    tracing::warn!(pid = self.pid, reads, "Drain retry bound reached before EOF");
                    break;
                }
                reads += 1;
                match r.read_chunk(&mut drained, chunk) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        tracing::error!(pid = self.pid, error = %e, "read() failed during drain");
                        break;
                    }
                }
            }
            tracing::debug!(pid = self.pid, reads, bytes = drained.len(), "Drained child output");
            drop(r);
        }

        let exit = match self.child.take() {
            Some(child) => reap(child, self.pid),
            None => ChildExit::Unknown,
        };

        tracing::debug!(
            pid = self.pid,
            work_calls = self.stats.work_calls,
            consumed = self.stats.consumed_items,
            produced = self.stats.produced_items,
            "Bridge totals"
        );

        ShutdownReport {
            drained,
            undelivered,
            drain_exhausted,
            exit,
        }
    }
}

/// Wait until stdin has room or stdout has data (or either side hung up).
///
/// Returns `(writable, readable)`.
fn wait_ready(writer: &ItemWriter, reader: &ItemReader) -> nix::Result<(bool, bool)> {
    let mut fds = [
        PollFd::new(writer.as_fd(), PollFlags::POLLOUT),
        PollFd::new(reader.as_fd(), PollFlags::POLLIN),
    ];
    loop {
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }

    let hangup = PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL;
    let ready = |fd: &PollFd<'_>, events: PollFlags| {
        fd.revents().is_some_and(|revents| revents.intersects(events | hangup))
    };
    Ok((
        ready(&fds[0], PollFlags::POLLOUT),
        ready(&fds[1], PollFlags::POLLIN),
    ))
}

fn check_aligned(len: usize, item_size: usize) -> Result<(), BridgeError> {
    if len % item_size != 0 {
        return Err(BridgeError::ItemSize { len, item_size });
    }
    Ok(())
}

/// Wait for the child, retrying across interrupted waits.
fn reap(mut child: Child, pid: u32) -> ChildExit {
    let status = loop {
        match child.wait() {
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            other => break other,
        }
    };

    match status {
        Ok(status) => {
            let exit = ChildExit::from(status);
            match exit {
                ChildExit::Exited(code) => {
                    tracing::info!(pid, exit_code = code, "Process exited");
                }
                _ => {
                    tracing::warn!(pid, ?exit, "Abnormal process termination");
                }
            }
            exit
        }
        Err(e) => {
            tracing::error!(pid, error = %e, "waitpid() failed");
            ChildExit::Unknown
        }
    }
}

impl Drop for ProcessBridge {
    fn drop(&mut self) {
        if self.report.is_none() {
            self.shutdown();
        }
    }
}
