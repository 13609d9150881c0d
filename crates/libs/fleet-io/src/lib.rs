//! Process execution for the fleet build pipeline.
//!
//! Spawns external commands, streams their stdout and stderr as raw byte
//! chunks over a channel and reports how the process ended.
//!
//! # Usage
//!
//! ```rust,no_run
//! use fleet_io::runner::{RunEvent, Runner};
//! use tokio::sync::mpsc;
//!
//! # async fn demo() {
//! let runner = Runner::new("nix", vec!["build", ".#fleet-update"]).current_dir("/tmp/ws");
//! let (tx, mut rx) = mpsc::unbounded_channel();
//!
//! let exit_status = runner.run(tx).await;
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         RunEvent::ProcessOutput(bytes) => print!("{}", String::from_utf8_lossy(&bytes)),
//!         RunEvent::ProcessEnd(success) => println!("Process ended: {}", success),
//!         _ => {}
//!     }
//! }
//! # let _ = exit_status;
//! # }
//! ```

pub mod process;
pub mod runner;
