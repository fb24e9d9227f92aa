//! External collaborator contracts. These are interfaces only — the real
//! scanner, catalog, and platform decoder live outside this crate.
//! [`OsTrash`] is the one concrete implementation this crate ships, since
//! moving files to the OS trash for a reversible consolidation is squarely
//! this crate's own concern, not an external one.

use std::path::{Path, PathBuf};

use crate::error::{DecodeError, ScanError, TrashError};
use crate::model::{Asset, DuplicateGroup, FileId, MergeTransaction, RestoreToken};

/// Yields `Asset` records by walking paths; honors exclusion rules (hidden
/// files, system bundles, off-by-default symlinks, inode-deduped hardlinks).
/// The concrete walker lives outside this crate.
pub trait Scanner {
    fn walk(&self, roots: &[PathBuf]) -> Result<Vec<Asset>, ScanError>;
}

/// A decoded raster, resized so its longer side is at most `max_dim` when a
/// caller requested scaling, kept fully opaque to this crate's callers.
pub type Raster = image::DynamicImage;

/// Decodes images and extracts video frames. The platform-specific decode
/// framework backing this is assumed available; this crate's video
/// fingerprinter supplies a default ffmpeg-based implementation (see
/// [`crate::fingerprint::video::FfmpegDecoder`]).
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8], max_dim: u32) -> Result<Raster, DecodeError>;
    fn extract_frame(&self, video: &Path, t_sec: f64, max_dim: u32) -> Result<Raster, DecodeError>;
}

/// The durable catalog: a KV/relational store holding `File`, `Group`, and
/// `Transaction` records. Entirely out of scope for this crate; it is the
/// thing that calls into this crate's `build_groups`/`merge`/etc, not the
/// other way around for reads. The executor and recovery pass still need to
/// persist transactions and read back file records, hence this trait.
pub trait Catalog {
    fn upsert_file(&self, asset: &Asset) -> Result<(), CatalogError>;
    fn get_file_by_id(&self, id: FileId) -> Result<Option<Asset>, CatalogError>;
    fn resolve_url(&self, path: &Path) -> Result<Option<String>, CatalogError>;
    fn create_or_update_group(&self, group: &DuplicateGroup) -> Result<(), CatalogError>;
    fn record_transaction(&self, txn: &MergeTransaction) -> Result<(), CatalogError>;
    fn fetch_history(&self) -> Result<Vec<MergeTransaction>, CatalogError>;

    /// Runs `f` inside a single catalog-level transaction boundary, so the
    /// handful of writes the executor issues while running one merge (keeper
    /// upsert, trash token bookkeeping, transaction record) commit or fail
    /// together from the catalog's point of view. The default just runs `f`
    /// inline, for catalogs with no native transaction support of their own;
    /// a catalog backed by a real database overrides this to wrap `f` in a
    /// DB transaction.
    fn background_transaction(
        &self,
        f: Box<dyn FnOnce() -> Result<(), CatalogError> + '_>,
    ) -> Result<(), CatalogError> {
        f()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("catalog operation failed: {0}")]
    Failed(String),
}

/// Moves files to, and restores them from, the OS trash.
pub trait Trash: Send + Sync {
    fn move_to_trash(&self, path: &Path) -> Result<RestoreToken, TrashError>;
    fn restore_from_trash(&self, token: &RestoreToken, original_path: &Path) -> Result<(), TrashError>;
}

/// Default [`Trash`] implementation backed by the `trash` crate, the way the
/// broader example corpus's file-management tools move files to the
/// platform trash can instead of unlinking them outright.
pub struct OsTrash;

impl Trash for OsTrash {
    fn move_to_trash(&self, path: &Path) -> Result<RestoreToken, TrashError> {
        trash::delete(path).map_err(|e| TrashError::MoveFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(RestoreToken {
            original_path: path.to_path_buf(),
            trashed_at: chrono::Utc::now(),
            trash_url: None,
        })
    }

    fn restore_from_trash(&self, token: &RestoreToken, original_path: &Path) -> Result<(), TrashError> {
        let items = trash::os_limited::list().map_err(|e| TrashError::RestoreFailed {
            path: original_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let candidate = items
            .into_iter()
            .filter(|item| item.original_parent.join(&item.name) == token.original_path)
            .max_by_key(|item| item.time_deleted)
            .ok_or(TrashError::NotFound)?;

        trash::os_limited::restore_all([candidate]).map_err(|e| TrashError::RestoreFailed {
            path: original_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(())
    }
}
