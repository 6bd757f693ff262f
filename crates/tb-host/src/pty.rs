//! PTY-backed process
//!
//! Spawns the hosted command on a pseudo-terminal using the portable-pty
//! crate. Reads and writes on the PTY master block, so each direction runs
//! on its own blocking task and talks to async code over channels.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

use anyhow::{Context, Result};
use bytes::Bytes;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use tb_core::config::HostConfig;
use tb_protocol::TerminalSize;

/// Capacity of the output and input channels, in chunks
const PTY_CHANNEL_CAPACITY: usize = 256;

/// Size of a single PTY read
const READ_BUFFER_SIZE: usize = 4096;

/// Output from the hosted process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// Bytes read from the PTY master
    Output(Bytes),
    /// Process exited with optional exit code. Always the last event.
    Exited(Option<i32>),
}

/// Requests to the PTY writer task
#[derive(Debug)]
enum PtyCommand {
    Input(Bytes),
    Resize(TerminalSize),
}

/// Handle to a running PTY process
pub struct PtyProcess {
    /// Process ID of the child, if the platform reports one
    pid: Option<u32>,
    /// Program that was started
    program: String,
    commands: mpsc::Sender<PtyCommand>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl PtyProcess {
    /// Spawn the configured command.
    ///
    /// Returns the handle and a channel of [`PtyEvent`]s. Output is also
    /// appended to `config.record` when set.
    pub fn spawn(config: &HostConfig) -> Result<(Self, mpsc::Receiver<PtyEvent>)> {
        let size = config.initial_size;
        let pair = native_pty_system()
            .openpty(pty_size(size))
            .with_context(|| "Failed to open PTY")?;

        let (program, args) = match config.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (default_shell(), Vec::new()),
        };

        let mut cmd = CommandBuilder::new(&program);
        cmd.args(&args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {}", program))?;
        // The child holds its own copy; ours would keep the master from seeing EOF
        drop(pair.slave);

        let pid = child.process_id();
        tracing::info!(%program, ?pid, %size, "Spawned process on PTY");

        let reader = pair
            .master
            .try_clone_reader()
            .with_context(|| "Failed to clone PTY reader")?;
        let writer = pair
            .master
            .take_writer()
            .with_context(|| "Failed to take PTY writer")?;

        let record = match &config.record {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open record file {}", path.display()))?,
            ),
            None => None,
        };

        let killer = child.clone_killer();
        let (event_tx, event_rx) = mpsc::channel(PTY_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(PTY_CHANNEL_CAPACITY);

        tokio::task::spawn_blocking(move || read_output(reader, child, record, event_tx));
        tokio::task::spawn_blocking(move || apply_commands(pair.master, writer, command_rx));

        let process = Self {
            pid,
            program,
            commands: command_tx,
            killer,
        };
        Ok((process, event_rx))
    }

    /// Process ID of the child
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Program that was started
    pub fn program(&self) -> &str {
        &self.program
    }

    /// A cloneable sender for client tasks
    pub fn input(&self) -> PtyInput {
        PtyInput {
            commands: self.commands.clone(),
        }
    }

    /// Terminate the process. Its exit is still reported as [`PtyEvent::Exited`].
    pub fn kill(&mut self) {
        tracing::info!(pid = ?self.pid, "Killing process");
        if let Err(e) = self.killer.kill() {
            tracing::debug!(error = %e, "Kill failed, process may already be gone");
        }
    }
}

/// Input side of a [`PtyProcess`], shared by client connections
#[derive(Clone)]
pub struct PtyInput {
    commands: mpsc::Sender<PtyCommand>,
}

impl PtyInput {
    /// Write input to the process
    pub async fn write(&self, data: Bytes) -> Result<()> {
        self.commands
            .send(PtyCommand::Input(data))
            .await
            .map_err(|_| anyhow::anyhow!("PTY writer has stopped"))
    }

    /// Resize the PTY
    pub async fn resize(&self, size: TerminalSize) -> Result<()> {
        self.commands
            .send(PtyCommand::Resize(size))
            .await
            .map_err(|_| anyhow::anyhow!("PTY writer has stopped"))
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows(),
        cols: size.cols(),
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| {
        if cfg!(windows) {
            "cmd.exe".to_string()
        } else {
            "/bin/sh".to_string()
        }
    })
}

/// Blocking loop: forward PTY output until EOF, then report the exit status
fn read_output(
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    mut record: Option<File>,
    tx: mpsc::Sender<PtyEvent>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                tracing::debug!("PTY reader EOF");
                break;
            }
            Ok(n) => {
                if let Some(file) = record.as_mut() {
                    if let Err(e) = file.write_all(&buf[..n]) {
                        tracing::warn!(error = %e, "Failed to write record file, recording stopped");
                        record = None;
                    }
                }
                if tx
                    .blocking_send(PtyEvent::Output(Bytes::copy_from_slice(&buf[..n])))
                    .is_err()
                {
                    tracing::debug!("PTY output channel closed");
                    break;
                }
            }
            Err(e) => {
                // Linux reports EIO on the master once the child side is gone
                tracing::debug!(error = %e, "PTY reader closed");
                break;
            }
        }
    }

    let code = match child.wait() {
        Ok(status) => Some(status.exit_code() as i32),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to collect exit status");
            None
        }
    };
    tracing::info!(exit_code = ?code, "Process exited");
    let _ = tx.blocking_send(PtyEvent::Exited(code));
}

/// Blocking loop: apply input and resizes until every sender is gone
fn apply_commands(
    master: Box<dyn MasterPty + Send>,
    mut writer: Box<dyn Write + Send>,
    mut rx: mpsc::Receiver<PtyCommand>,
) {
    while let Some(command) = rx.blocking_recv() {
        match command {
            PtyCommand::Input(data) => {
                if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                    tracing::warn!(error = %e, "Failed to write to PTY");
                    break;
                }
            }
            PtyCommand::Resize(size) => {
                tracing::debug!(%size, "Resizing PTY");
                if let Err(e) = master.resize(pty_size(size)) {
                    tracing::warn!(error = %e, %size, "Failed to resize PTY");
                }
            }
        }
    }
    tracing::debug!("PTY writer exiting");
}
