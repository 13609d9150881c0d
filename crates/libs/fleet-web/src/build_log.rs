//! Incremental log reads for polling clients.

use fleet_models::build::build_log::LogStream;
use fleet_pipeline::store::BuildStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prelude::*;

/// Chunks returned per poll.
pub const LOG_BATCH_LIMIT: usize = 256;

/// Query of the live log endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveLogQuery {
    pub after: Option<String>,
}

/// One poll's worth of log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveLogResponse {
    /// Status of the build, or of the installer sub-build for its stream.
    pub status: String,
    /// Concatenated text of the returned chunks.
    pub chunk: String,
    /// Cursor for the next poll.
    pub next_after: i64,
    /// The execution finished and every chunk has been returned.
    pub done: bool,
}

/// Read cursor from the `after` parameter. Anything unusable reads from the start.
pub fn parse_after(raw: Option<&str>) -> i64 {
    raw.map(str::trim)
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value >= 0)
        .unwrap_or(0)
}

/// Returns the chunks of `stream` after the cursor.
pub fn live_log(
    store: &dyn BuildStore,
    build: &Uuid,
    stream: LogStream,
    after: i64,
) -> Result<LiveLogResponse> {
    // Status first: a terminal status means the writer already flushed.
    let record = store.fetch_build(build)?;
    let (status, terminal) = match stream {
        LogStream::Build => (record.status.clone(), record.build_status()?.is_terminal()),
        LogStream::Installer => (
            record.installer_status.clone(),
            record.installer_state()?.is_terminal(),
        ),
    };

    let mut chunks = store.list_log_chunks(build, stream, after, LOG_BATCH_LIMIT as i64 + 1)?;
    let has_more = chunks.len() > LOG_BATCH_LIMIT;
    chunks.truncate(LOG_BATCH_LIMIT);

    let next_after = chunks.last().map_or(after, |chunk| chunk.id);
    let chunk = chunks.into_iter().map(|chunk| chunk.chunk).collect();

    Ok(LiveLogResponse {
        status,
        chunk,
        next_after,
        done: terminal && !has_more,
    })
}

#[cfg(test)]
mod test {
    use fleet_models::build::BuildRequest;
    use fleet_models::build::build_status::BuildStatus;
    use fleet_pipeline::store::MemoryStore;

    use super::*;

    fn store_with_build() -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let fleet = store.add_fleet("edge");
        let profile = store.add_profile("{}", &[fleet]);
        let build = store
            .create_build(BuildRequest {
                profile_id: profile,
                fleet_id: fleet,
                version: "v1.0.0".to_string(),
            })
            .unwrap();
        (store, build.id)
    }

    #[test]
    fn parses_cursor() {
        assert_eq!(parse_after(None), 0);
        assert_eq!(parse_after(Some(" 42 ")), 42);
        assert_eq!(parse_after(Some("-3")), 0);
        assert_eq!(parse_after(Some("abc")), 0);
    }

    #[test]
    fn pages_until_done() {
        let (store, build) = store_with_build();
        store
            .update_build_status(&build, BuildStatus::Running, "")
            .unwrap();
        for i in 0..300 {
            store
                .append_log_chunk(&build, LogStream::Build, &format!("{i}\n"))
                .unwrap();
        }

        let first = live_log(&store, &build, LogStream::Build, 0).unwrap();
        assert_eq!(first.status, "running");
        assert!(first.chunk.starts_with("0\n1\n"));
        assert!(first.chunk.ends_with("255\n"));
        assert!(!first.done);

        store
            .update_build_status(&build, BuildStatus::Failed, "")
            .unwrap();
        let second = live_log(&store, &build, LogStream::Build, first.next_after).unwrap();
        assert!(second.chunk.starts_with("256\n"));
        assert!(second.chunk.ends_with("299\n"));
        assert!(second.done);

        let idle = live_log(&store, &build, LogStream::Build, second.next_after).unwrap();
        assert_eq!(idle.next_after, second.next_after);
        assert!(idle.chunk.is_empty());
        assert!(idle.done);
    }

    #[test]
    fn terminal_with_backlog_is_not_done() {
        let (store, build) = store_with_build();
        for _ in 0..=LOG_BATCH_LIMIT {
            store.append_log_chunk(&build, LogStream::Build, "x").unwrap();
        }
        store
            .update_build_status(&build, BuildStatus::Failed, "")
            .unwrap();

        let page = live_log(&store, &build, LogStream::Build, 0).unwrap();
        assert_eq!(page.chunk.len(), LOG_BATCH_LIMIT);
        assert!(!page.done);
    }

    #[test]
    fn installer_stream_reports_installer_status() {
        let (store, build) = store_with_build();
        store
            .append_log_chunk(&build, LogStream::Build, "primary")
            .unwrap();

        let page = live_log(&store, &build, LogStream::Installer, 0).unwrap();
        assert_eq!(page.status, "not_requested");
        assert!(page.chunk.is_empty());
        assert!(!page.done);
    }

    #[test]
    fn unknown_build_is_not_found() {
        let (store, _) = store_with_build();
        let err = live_log(&store, &Uuid::new_v4(), LogStream::Build, 0).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
