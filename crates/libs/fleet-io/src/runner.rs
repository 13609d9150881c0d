//! High-level process runner with event handling.

use std::{
    path::{Path, PathBuf},
    process::ExitStatus,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
};
use tracing::debug;

use crate::process::{capture_exit_status, spawn_process};

const READ_CHUNK_SIZE: usize = 1024;

/// Events emitted during process execution.
#[derive(Debug, PartialEq)]
pub enum RunEvent {
    /// Process creation failed with error message.
    ProcessCreationFailed(String),
    /// Process was successfully created.
    ProcessCreated,
    /// Raw bytes read from stdout or stderr, in arrival order per stream.
    ProcessOutput(Vec<u8>),
    /// Process ended (true = success, false = failure).
    ProcessEnd(bool),
}

/// High-level process runner with event-driven output handling.
#[derive(Debug, Clone)]
pub struct Runner {
    command: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
}

impl Runner {
    /// Create a new runner with command and arguments.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fleet_io::runner::Runner;
    ///
    /// let runner = Runner::new("ls", vec!["-la", "/tmp"]);
    /// ```
    pub fn new(command: impl Into<String>, args: Vec<impl Into<String>>) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(|a| a.into()).collect(),
            current_dir: None,
        }
    }

    /// Run the process inside `dir`.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Get the full command string with arguments.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fleet_io::runner::Runner;
    ///
    /// let runner = Runner::new("nix", vec!["build", ".#fleet-update"]);
    /// assert_eq!(runner.get_full_command(), "nix build .#fleet-update");
    /// ```
    pub fn get_full_command(&self) -> String {
        if self.args.is_empty() {
            return self.command.clone();
        }
        format!("{} {}", &self.command, &self.args.join(" "))
    }

    async fn read_stream<T: AsyncRead + Unpin>(tx: UnboundedSender<RunEvent>, mut stream: T) {
        let mut buffer = [0; READ_CHUNK_SIZE];
        loop {
            match stream.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => {
                    let _ = tx.send(RunEvent::ProcessOutput(buffer[..n].to_vec()));
                }
                Err(err) => {
                    debug!("Stopped reading process output: {err}");
                    break;
                }
            }
        }
    }

    fn launch_stream_reader<T>(tx: UnboundedSender<RunEvent>, stream: T) -> JoinHandle<()>
    where
        T: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(Runner::read_stream(tx, stream))
    }

    /// Run the process to completion, sending events via the provided channel.
    ///
    /// Every output chunk is sent before `ProcessEnd`. Returns `None` when the
    /// process could not be spawned or waited on.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fleet_io::runner::{Runner, RunEvent};
    /// use tokio::sync::mpsc;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let runner = Runner::new("echo", vec!["Hello"]);
    ///     let (tx, mut rx) = mpsc::unbounded_channel();
    ///
    ///     let exit_status = runner.run(tx).await;
    ///     assert!(exit_status.unwrap().success());
    ///     assert_eq!(rx.recv().await, Some(RunEvent::ProcessCreated));
    /// }
    /// ```
    pub async fn run(&self, tx: UnboundedSender<RunEvent>) -> Option<ExitStatus> {
        let mut process = match spawn_process(&self.command, &self.args, self.current_dir.as_deref())
        {
            Ok(process) => process,
            Err(err) => {
                let _ = tx.send(RunEvent::ProcessCreationFailed(format!(
                    "failed to start {}: {}",
                    self.command, err
                )));
                let _ = tx.send(RunEvent::ProcessEnd(false));
                return None;
            }
        };

        let _ = tx.send(RunEvent::ProcessCreated);

        let stdout_task = process
            .stdout
            .take()
            .map(|stdout| Runner::launch_stream_reader(tx.clone(), stdout));
        let stderr_task = process
            .stderr
            .take()
            .map(|stderr| Runner::launch_stream_reader(tx.clone(), stderr));

        let exit_status = capture_exit_status(&mut process).await.ok();

        for task in [stdout_task, stderr_task].into_iter().flatten() {
            let _ = task.await;
        }

        let success = exit_status.is_some_and(|status| status.success());
        let _ = tx.send(RunEvent::ProcessEnd(success));
        exit_status
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    use super::*;

    fn drain(mut rx: UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn output(events: &[RunEvent]) -> String {
        let bytes: Vec<u8> = events
            .iter()
            .filter_map(|event| match event {
                RunEvent::ProcessOutput(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let runner = Runner::new("sh", vec!["-c", "echo out; echo err 1>&2"]);
        let (tx, rx) = unbounded_channel();

        let exit = runner.run(tx).await.expect("Couldn't get child exit status");
        assert!(exit.success());

        let events = drain(rx);
        assert_eq!(events.first(), Some(&RunEvent::ProcessCreated));
        assert_eq!(events.last(), Some(&RunEvent::ProcessEnd(true)));
        let text = output(&events);
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
    }

    #[tokio::test]
    async fn test_large_output_is_chunked() {
        let runner = Runner::new("sh", vec!["-c", "head -c 5000 /dev/zero | tr '\\0' a"]);
        let (tx, rx) = unbounded_channel();

        runner.run(tx).await.expect("Couldn't get child exit status");

        let events = drain(rx);
        let chunks = events
            .iter()
            .filter(|event| matches!(event, RunEvent::ProcessOutput(_)))
            .count();
        assert!(chunks >= 5);
        assert_eq!(output(&events), "a".repeat(5000));
    }

    #[tokio::test]
    async fn test_failing_process_reports_failure() {
        let runner = Runner::new("sh", vec!["-c", "exit 3"]);
        let (tx, rx) = unbounded_channel();

        let exit = runner.run(tx).await.expect("Couldn't get child exit status");
        assert_eq!(exit.code(), Some(3));
        assert_eq!(drain(rx).last(), Some(&RunEvent::ProcessEnd(false)));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let runner = Runner::new("definitely-not-a-real-command-xyz", Vec::<String>::new());
        let (tx, rx) = unbounded_channel();

        assert!(runner.run(tx).await.is_none());
        let events = drain(rx);
        assert!(matches!(events[0], RunEvent::ProcessCreationFailed(_)));
        assert_eq!(events[1], RunEvent::ProcessEnd(false));
    }

    #[tokio::test]
    async fn test_runs_in_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "here").unwrap();
        let runner = Runner::new("cat", vec!["marker"]).current_dir(dir.path());
        let (tx, rx) = unbounded_channel();

        runner.run(tx).await.expect("Couldn't get child exit status");
        assert_eq!(output(&drain(rx)), "here");
    }
}
