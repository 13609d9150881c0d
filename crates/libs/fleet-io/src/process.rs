//! Low-level async process management utilities.

use std::{
    ffi::OsStr,
    io,
    path::Path,
    process::{ExitStatus, Stdio},
};

use tokio::process::{Child, Command};

/// Spawn a new async process with piped stdout and stderr.
///
/// Stdin is closed so tools never block waiting for input, and the child is
/// killed if its handle is dropped before it exits.
///
/// # Arguments
///
/// * `cmd` - Command to execute
/// * `args` - Command line arguments
/// * `current_dir` - Working directory, inherited when `None`
///
/// # Examples
///
/// ```rust
/// use fleet_io::process::spawn_process;
///
/// #[tokio::main]
/// async fn main() {
///     let mut child = spawn_process("echo", &["Hello".to_string()], None).unwrap();
///     let output = child.stdout.take().unwrap();
/// }
/// ```
pub fn spawn_process(
    cmd: &str,
    args: &[String],
    current_dir: Option<&Path>,
) -> Result<Child, io::Error> {
    let mut command = Command::new(OsStr::new(cmd));
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = current_dir {
        command.current_dir(dir);
    }
    command.spawn()
}

/// Asynchronously capture the exit status of a child process.
///
/// # Examples
///
/// ```rust
/// use fleet_io::process::{spawn_process, capture_exit_status};
///
/// #[tokio::main]
/// async fn main() {
///     let mut child = spawn_process("echo", &["done".to_string()], None).unwrap();
///     let exit_status = capture_exit_status(&mut child).await.unwrap();
///     assert!(exit_status.success());
/// }
/// ```
pub async fn capture_exit_status(child: &mut Child) -> Result<ExitStatus, io::Error> {
    child.wait().await
}
