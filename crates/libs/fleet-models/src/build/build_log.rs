//! Append-only build output, stored as ordered chunks per stream.

use crate::db::connection::DbConnection;
use crate::prelude::*;
use crate::schema::{build_installer_log_chunks, build_log_chunks};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Page size used when the caller passes a non-positive limit.
pub const DEFAULT_PAGE_SIZE: i64 = 128;
/// Largest page a single query returns.
pub const MAX_PAGE_SIZE: i64 = 512;

/// Which output stream of a build a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    /// Output of the primary image build.
    Build,
    /// Output of the installer sub-build.
    Installer,
}

/// One persisted piece of build output.
#[derive(Debug, Clone, Queryable, PartialEq, Serialize, Deserialize)]
pub struct BuildLogChunk {
    /// Monotonic chunk ID, used as the read cursor.
    pub id: i64,
    pub build_id: Uuid,
    pub chunk: String,
}

fn map_append_error(err: DieselError) -> Error {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
            Error::BuildNotFound
        }
        other => Error::Diesel(other),
    }
}

impl BuildLogChunk {
    /// Appends a chunk to the stream. Empty chunks are ignored.
    pub fn append(
        build: &Uuid,
        stream: LogStream,
        chunk: &str,
        connection: &DbConnection,
    ) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        let conn = &mut connection.pool.get()?;
        match stream {
            LogStream::Build => diesel::insert_into(build_log_chunks::table)
                .values((
                    build_log_chunks::build_id.eq(build),
                    build_log_chunks::chunk.eq(chunk),
                ))
                .execute(conn),
            LogStream::Installer => diesel::insert_into(build_installer_log_chunks::table)
                .values((
                    build_installer_log_chunks::build_id.eq(build),
                    build_installer_log_chunks::chunk.eq(chunk),
                ))
                .execute(conn),
        }
        .map_err(map_append_error)?;
        Ok(())
    }

    /// Lists chunks with an ID greater than `after`, oldest first.
    pub fn list_since(
        build: &Uuid,
        stream: LogStream,
        after: i64,
        limit: i64,
        connection: &DbConnection,
    ) -> Result<Vec<Self>> {
        let limit = match limit {
            l if l <= 0 => DEFAULT_PAGE_SIZE,
            l => l.min(MAX_PAGE_SIZE),
        };
        let after = after.max(0);

        let conn = &mut connection.pool.get()?;
        Ok(match stream {
            LogStream::Build => build_log_chunks::table
                .filter(build_log_chunks::build_id.eq(build))
                .filter(build_log_chunks::id.gt(after))
                .order(build_log_chunks::id.asc())
                .limit(limit)
                .select((
                    build_log_chunks::id,
                    build_log_chunks::build_id,
                    build_log_chunks::chunk,
                ))
                .load(conn)?,
            LogStream::Installer => build_installer_log_chunks::table
                .filter(build_installer_log_chunks::build_id.eq(build))
                .filter(build_installer_log_chunks::id.gt(after))
                .order(build_installer_log_chunks::id.asc())
                .limit(limit)
                .select((
                    build_installer_log_chunks::id,
                    build_installer_log_chunks::build_id,
                    build_installer_log_chunks::chunk,
                ))
                .load(conn)?,
        })
    }

    /// Removes every chunk of the stream.
    pub fn clear(build: &Uuid, stream: LogStream, connection: &DbConnection) -> Result<usize> {
        let conn = &mut connection.pool.get()?;
        Ok(match stream {
            LogStream::Build => diesel::delete(
                build_log_chunks::table.filter(build_log_chunks::build_id.eq(build)),
            )
            .execute(conn)?,
            LogStream::Installer => diesel::delete(
                build_installer_log_chunks::table
                    .filter(build_installer_log_chunks::build_id.eq(build)),
            )
            .execute(conn)?,
        })
    }
}
