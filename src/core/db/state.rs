use std::{
    io,
    path::{Path, PathBuf},
};

use sqlx::{
    Sqlite,
    pool::PoolConnection,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous},
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{
    fs as async_fs,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, info, warn};

use crate::error::{InspectionError, Result};

const DB_FILE_NAME: &str = "weldscan.db";
const PARTIAL_SUFFIX: &str = ".partial";

/// Where an artifact lives under the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Report,
}

impl ArtifactKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Image => "images",
            ArtifactKind::Report => "reports",
        }
    }
}

/// Artifact bytes written to a `.partial` sibling, not yet visible under their name.
#[derive(Debug)]
pub(super) struct StagedArtifact {
    partial: PathBuf,
    path: PathBuf,
}

pub(super) struct StoreState {
    data_dir: PathBuf,
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl std::fmt::Debug for StoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreState")
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl StoreState {
    pub(super) async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        for kind in [ArtifactKind::Image, ArtifactKind::Report] {
            async_fs::create_dir_all(data_dir.join(kind.dir_name())).await?;
        }

        let connect_opts = SqliteConnectOptions::new()
            .filename(data_dir.join(DB_FILE_NAME))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_opts)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(data_dir = %data_dir.display(), "store opened");

        Ok(Self {
            data_dir,
            pool,
            writer: Mutex::new(()),
        })
    }

    pub(super) fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub(super) async fn conn(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Held for the whole of a transaction that reads before it writes. SQLite admits a
    /// single writer and a deferred transaction whose snapshot went stale fails with
    /// `SQLITE_BUSY` instead of waiting.
    pub(super) async fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    pub(super) async fn close(&self) {
        self.pool.close().await;
    }

    /// Resolve an artifact filename, refusing anything that could escape its directory.
    pub(super) fn artifact_path(&self, kind: ArtifactKind, filename: &str) -> Option<PathBuf> {
        let valid = !filename.is_empty()
            && !filename.starts_with('.')
            && !filename.contains(['/', '\\'])
            && !filename.ends_with(PARTIAL_SUFFIX);
        valid.then(|| self.data_dir.join(kind.dir_name()).join(filename))
    }

    /// Write through a `.partial` sibling and rename into place. The partial file never
    /// survives a failed write.
    pub(super) async fn write_artifact(
        &self,
        kind: ArtifactKind,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let staged = self.stage_artifact(kind, filename, bytes).await?;
        self.publish_artifact(staged).await
    }

    /// Write `bytes` next to the artifact without touching the live file. Pair with
    /// [`Self::publish_artifact`] once the owning transaction has committed, or
    /// [`Self::discard_artifact`] if it has not.
    pub(super) async fn stage_artifact(
        &self,
        kind: ArtifactKind,
        filename: &str,
        bytes: &[u8],
    ) -> Result<StagedArtifact> {
        let Some(path) = self.artifact_path(kind, filename) else {
            return Err(InspectionError::StorageWrite {
                path: PathBuf::from(filename),
                source: io::Error::new(io::ErrorKind::InvalidInput, "invalid artifact filename"),
            });
        };
        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let staged = StagedArtifact {
            partial: PathBuf::from(partial),
            path,
        };

        if let Err(source) = async_fs::write(&staged.partial, bytes).await {
            self.discard_artifact(&staged).await;
            return Err(InspectionError::StorageWrite {
                path: staged.path,
                source,
            });
        }
        debug!(path = %staged.partial.display(), bytes = bytes.len(), "artifact staged");
        Ok(staged)
    }

    pub(super) async fn publish_artifact(&self, staged: StagedArtifact) -> Result<PathBuf> {
        if let Err(source) = async_fs::rename(&staged.partial, &staged.path).await {
            self.discard_artifact(&staged).await;
            return Err(InspectionError::StorageWrite {
                path: staged.path,
                source,
            });
        }
        debug!(path = %staged.path.display(), "artifact written");
        Ok(staged.path)
    }

    pub(super) async fn discard_artifact(&self, staged: &StagedArtifact) {
        match async_fs::remove_file(&staged.partial).await {
            Ok(()) => debug!(path = %staged.partial.display(), "staged artifact discarded"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %staged.partial.display(), error = %err, "failed to remove partial artifact")
            }
        }
    }

    pub(super) async fn read_artifact(&self, kind: ArtifactKind, filename: &str) -> Result<Vec<u8>> {
        let not_found = || InspectionError::ArtifactNotFound(filename.to_string());
        let path = self.artifact_path(kind, filename).ok_or_else(not_found)?;
        match async_fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(not_found()),
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort removal; a missing file is not an error.
    pub(super) async fn remove_artifact(&self, kind: ArtifactKind, filename: &str) {
        let Some(path) = self.artifact_path(kind, filename) else {
            return;
        };
        match async_fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "artifact removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove artifact"),
        }
    }
}

pub(super) fn now_timestamp() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| InspectionError::Corrupt(format!("failed to format timestamp: {}", e)))
}

pub(super) fn parse_timestamp(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|e| InspectionError::Corrupt(format!("invalid timestamp {:?}: {}", value, e)))
}
