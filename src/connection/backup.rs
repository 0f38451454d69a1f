use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::ptr::null;

use libsqlite3_sys::{
    sqlite3_backup, sqlite3_backup_finish, sqlite3_backup_init, sqlite3_backup_pagecount,
    sqlite3_backup_remaining, sqlite3_backup_step, sqlite3_wal_checkpoint_v2,
    SQLITE_CHECKPOINT_FULL, SQLITE_CHECKPOINT_PASSIVE, SQLITE_CHECKPOINT_RESTART,
    SQLITE_CHECKPOINT_TRUNCATE, SQLITE_DONE, SQLITE_OK,
};

use crate::connection::Connection;
use crate::error::{Error, Result, SqliteError};

/// How aggressively a WAL checkpoint transfers frames back into the
/// database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    Passive,
    Full,
    Restart,
    Truncate,
}

impl CheckpointMode {
    fn into_raw(self) -> c_int {
        match self {
            CheckpointMode::Passive => SQLITE_CHECKPOINT_PASSIVE,
            CheckpointMode::Full => SQLITE_CHECKPOINT_FULL,
            CheckpointMode::Restart => SQLITE_CHECKPOINT_RESTART,
            CheckpointMode::Truncate => SQLITE_CHECKPOINT_TRUNCATE,
        }
    }
}

/// Progress of an online backup, reported after each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupProgress {
    /// Pages still to be copied.
    pub remaining: i32,
    /// Total pages in the source database.
    pub page_count: i32,
}

/// Pages copied per step when a progress callback is attached; one shot
/// otherwise.
const PAGES_PER_STEP: c_int = 64;

impl Connection {
    /// Checkpoints the WAL of `schema` (every attached database when
    /// `None`), returning the WAL frame count and the number of frames
    /// checkpointed.
    pub fn checkpoint(
        &mut self,
        mode: CheckpointMode,
        schema: Option<&str>,
    ) -> Result<(i32, i32)> {
        self.assert_owner();

        let c_schema = match schema {
            Some(schema) => Some(CString::new(schema).map_err(|_| {
                Error::InvalidConfiguration(format!("invalid schema name: {schema}"))
            })?),
            None => None,
        };

        let mut wal_frames: c_int = -1;
        let mut checkpointed: c_int = -1;
        let status = unsafe {
            sqlite3_wal_checkpoint_v2(
                self.handle.as_ptr(),
                c_schema.as_ref().map_or(null(), |s| s.as_ptr()),
                mode.into_raw(),
                &mut wal_frames,
                &mut checkpointed,
            )
        };
        if status != SQLITE_OK {
            return Err(self.handle.last_error().into());
        }

        Ok((wal_frames, checkpointed))
    }

    /// Copies this database into `destination` using the engine's online
    /// backup API, overwriting the destination's content. The optional
    /// `progress` callback runs once right after the backup initializes,
    /// before any page has been copied, and again after each copy step.
    pub fn backup_to(
        &mut self,
        destination: &mut Connection,
        mut progress: Option<&mut dyn FnMut(BackupProgress)>,
    ) -> Result<()> {
        self.assert_owner();
        destination.assert_owner();

        const MAIN: &CStr = c"main";

        let backup = unsafe {
            sqlite3_backup_init(
                destination.handle.as_ptr(),
                MAIN.as_ptr(),
                self.handle.as_ptr(),
                MAIN.as_ptr(),
            )
        };
        if backup.is_null() {
            return Err(destination.handle.last_error().into());
        }

        fn report(backup: *mut sqlite3_backup) -> BackupProgress {
            BackupProgress {
                remaining: unsafe { sqlite3_backup_remaining(backup) },
                page_count: unsafe { sqlite3_backup_pagecount(backup) },
            }
        }

        // init-time report; the counters are populated by the first step,
        // so this reads as zero pages copied of an as-yet-unknown total
        if let Some(progress) = progress.as_deref_mut() {
            progress(report(backup));
        }

        let pages_per_step = if progress.is_some() { PAGES_PER_STEP } else { -1 };

        loop {
            let status = unsafe { sqlite3_backup_step(backup, pages_per_step) };

            if let Some(progress) = progress.as_deref_mut() {
                progress(report(backup));
            }

            match status {
                SQLITE_DONE => break,
                SQLITE_OK => continue,
                code => {
                    unsafe {
                        sqlite3_backup_finish(backup);
                    }
                    return Err(SqliteError::from_code(code).into());
                }
            }
        }

        let status = unsafe { sqlite3_backup_finish(backup) };
        if status != SQLITE_OK {
            return Err(destination.handle.last_error().into());
        }

        // the destination's schema changed out from under its caches
        destination.clear_schema_cache();
        Ok(())
    }
}
