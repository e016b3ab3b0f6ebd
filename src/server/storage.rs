//! Server-local file storage.
//!
//! All names are confined to a flat storage root: anything that could escape
//! it (separators, `..`, absolute paths, NUL) is rejected before touching the
//! file system. Uploads land in a hidden `.part` file and are renamed into
//! place once the final chunk is verified; the replaced version, if any, is
//! moved to the backup area under a timestamp-qualified name.

use crate::config::ServerConfig;
use crate::error::{constants, ProtocolError, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, instrument, warn};

/// Held by a session streaming a name out; readers share a name.
pub type SharedGuard = OwnedRwLockReadGuard<()>;

/// Held by a session replacing or removing a name.
pub type ExclusiveGuard = OwnedRwLockWriteGuard<()>;

#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    backup: PathBuf,
    keep_versions: bool,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl Storage {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            root: config.storage_root.clone(),
            backup: config.backup_dir.clone(),
            keep_versions: config.keep_versions,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup
    }

    /// Create the storage root and backup area if absent.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn provision(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        if self.keep_versions {
            fs::create_dir_all(&self.backup).await?;
        }
        info!("Storage provisioned");
        Ok(())
    }

    /// Path of `name` inside the storage root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Staging path for an in-progress upload of `name`.
    pub fn partial_path(&self, name: &str, transfer_id: u32) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(format!(".{name}.{transfer_id:08x}.part")))
    }

    /// Shared hold on `name` for streaming it out.
    ///
    /// Never waits: a name being written or deleted fails with `FileInUse`,
    /// so the requester hears back at once instead of timing out.
    pub fn lock_shared(&self, name: &str) -> Result<SharedGuard> {
        self.name_lock(name)?
            .try_read_owned()
            .map_err(|_| ProtocolError::FileInUse(name.to_owned()))
    }

    /// Sole hold on `name` for replacing or removing it. Never waits.
    pub fn lock_exclusive(&self, name: &str) -> Result<ExclusiveGuard> {
        self.name_lock(name)?
            .try_write_owned()
            .map_err(|_| ProtocolError::FileInUse(name.to_owned()))
    }

    fn name_lock(&self, name: &str) -> Result<Arc<RwLock<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(locks
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone())
    }

    /// Move a completed upload into place, backing up the previous version.
    ///
    /// Returns the backup path when an existing file was preserved.
    #[instrument(skip(self, partial))]
    pub async fn commit(&self, name: &str, partial: &Path) -> Result<Option<PathBuf>> {
        let dest = self.resolve(name)?;
        let mut preserved = None;

        if self.keep_versions && fs::try_exists(&dest).await? {
            let target = self.backup.join(versioned_name(name, unix_millis()));
            move_file(&dest, &target).await?;
            debug!(backup = %target.display(), "Previous version preserved");
            preserved = Some(target);
        }

        move_file(partial, &dest).await?;
        Ok(preserved)
    }

    /// Best-effort removal of an abandoned upload.
    pub async fn discard(&self, partial: &Path) {
        if let Err(e) = fs::remove_file(partial).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, path = %partial.display(), "Failed to remove partial upload");
            }
        }
    }
}

/// Reject names that are empty, hidden, or could leave the storage root.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason| ProtocolError::InvalidFileName {
        name: name.to_owned(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid(constants::ERR_EMPTY_NAME));
    }
    if name.starts_with('.')
        || name.contains(['/', '\\', ':', '\0'])
        || Path::new(name).is_absolute()
    {
        return Err(invalid(constants::ERR_PATH_TRAVERSAL));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid(constants::ERR_PATH_TRAVERSAL)),
    }
}

/// `report.txt` at `t` becomes `report_<t>.txt`.
pub fn versioned_name(name: &str, millis: u128) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{millis}.{ext}"),
        _ => format!("{name}_{millis}"),
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Rename, falling back to copy + remove across file systems.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    fs::copy(from, to).await?;
    fs::remove_file(from).await?;
    Ok(())
}
