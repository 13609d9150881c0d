//! Incremental persistence of build output.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fleet_models::build::build_log::LogStream;
use tracing::error;
use uuid::Uuid;

use crate::store::BuildStore;

/// Buffered bytes that trigger a flush without a newline.
pub const FLUSH_SIZE: usize = 4096;

#[derive(Default)]
struct Buffer {
    bytes: Vec<u8>,
    error_logged: bool,
}

/// Streams process output into a build's stored log.
///
/// Output is buffered and appended as one chunk whenever a write carries a
/// newline or the buffer reaches [`FLUSH_SIZE`]. Chunks never end inside a
/// UTF-8 sequence; an incomplete tail waits for the next write. Dropping the
/// writer flushes whatever is left.
pub struct LogWriter {
    build_id: Uuid,
    stream: LogStream,
    store: Arc<dyn BuildStore>,
    buffer: Mutex<Buffer>,
}

impl LogWriter {
    pub fn new(build_id: Uuid, stream: LogStream, store: Arc<dyn BuildStore>) -> Self {
        Self {
            build_id,
            stream,
            store,
            buffer: Mutex::new(Buffer::default()),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self, data: &[u8]) {
        let mut buffer = self.buffer();
        buffer.bytes.extend_from_slice(data);
        if buffer.bytes.len() >= FLUSH_SIZE || data.contains(&b'\n') {
            self.flush_locked(&mut buffer, false);
        }
    }

    /// Appends everything buffered, including an incomplete UTF-8 tail.
    pub fn flush(&self) {
        let mut buffer = self.buffer();
        self.flush_locked(&mut buffer, true);
    }

    fn flush_locked(&self, buffer: &mut Buffer, everything: bool) {
        let take = if everything {
            buffer.bytes.len()
        } else {
            complete_prefix_len(&buffer.bytes)
        };
        if take == 0 {
            return;
        }

        let rest = buffer.bytes.split_off(take);
        let chunk = std::mem::replace(&mut buffer.bytes, rest);
        let chunk = String::from_utf8_lossy(&chunk);
        if let Err(err) = self
            .store
            .append_log_chunk(&self.build_id, self.stream, &chunk)
        {
            if !buffer.error_logged {
                error!("Failed to persist build log for {}: {}", self.build_id, err);
                buffer.error_logged = true;
            }
        }
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Length of the longest prefix that does not end inside a UTF-8 sequence.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { len - back } else { len };
    }
    len
}
