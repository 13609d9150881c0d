//! Invocation of the external build tool.

use std::path::Path;

use fleet_io::runner::{RunEvent, Runner};
use tokio::sync::mpsc;
use tracing::info;

use crate::log_writer::LogWriter;
use crate::prelude::*;

/// Trailing output kept in a build failure message.
pub const OUTPUT_EXCERPT_BYTES: usize = 8192;

/// Runs `<command> build --option builders "" <target>` inside `dir`.
///
/// Output is streamed into `log` as it arrives. The log is written from the
/// blocking pool since every flush is a store round trip. A non-zero exit or
/// a spawn failure yields [`Error::BuildCommand`] with the tail of the output.
pub async fn run_build(command: &str, dir: &Path, target: &str, log: LogWriter) -> Result<()> {
    let target = target.trim();
    if target.is_empty() {
        return Err(Error::MissingTarget);
    }

    let runner = Runner::new(command, vec!["build", "--option", "builders", "", target])
        .current_dir(dir);
    info!("Running `{}` in {}", runner.get_full_command(), dir.display());

    let (log_tx, log_rx) = std::sync::mpsc::channel::<Vec<u8>>();
    let persist = tokio::task::spawn_blocking(move || {
        for bytes in log_rx {
            log.write(&bytes);
        }
        log.flush();
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut output = Vec::new();
    let mut spawn_error = None;

    let (exit_status, ()) = tokio::join!(runner.run(tx), async {
        while let Some(event) = rx.recv().await {
            match event {
                RunEvent::ProcessOutput(bytes) => {
                    output.extend_from_slice(&bytes);
                    let _ = log_tx.send(bytes);
                }
                RunEvent::ProcessCreationFailed(message) => spawn_error = Some(message),
                RunEvent::ProcessCreated | RunEvent::ProcessEnd(_) => {}
            }
        }
    });
    drop(log_tx);
    persist
        .await
        .map_err(|err| Error::Task(format!("build log writer: {err}")))?;

    match (exit_status, spawn_error) {
        (Some(status), _) if status.success() => Ok(()),
        (Some(status), _) => Err(Error::BuildCommand {
            status: status.to_string(),
            output: output_excerpt(&output),
        }),
        (None, message) => Err(Error::BuildCommand {
            status: message.unwrap_or_else(|| String::from("process was not awaited")),
            output: output_excerpt(&output),
        }),
    }
}

/// The trimmed output, cut to its last [`OUTPUT_EXCERPT_BYTES`] bytes.
pub fn output_excerpt(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::from("no build output");
    }

    let mut start = trimmed.len().saturating_sub(OUTPUT_EXCERPT_BYTES);
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
