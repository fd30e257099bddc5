//! Avatar Store: durable artifact sets on the local filesystem.
//!
//! Layout under the results root:
//!
//! ```text
//! {results_dir}/{version}/avatars/{avatar_id}/
//!     full_imgs/00000000.png ...
//!     mask/00000000.png ...
//!     coords.json
//!     mask_coords.json
//!     latents.json.gz
//!     avatar_info.json
//! ```
//!
//! A set is written into a sibling `.staging-*` directory and renamed into
//! place, with `avatar_info.json` written last.

use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use image::{GrayImage, ImageOutputFormat, RgbImage};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use talkhead_models::encoding::frame_file_name;
use talkhead_models::{AvatarId, AvatarInfo, BBox};

use crate::avatar::Avatar;
use crate::error::{StorageError, StorageResult};
use crate::latent_codec::{compress_latents, decompress_latents};

const FRAMES_DIR: &str = "full_imgs";
const MASKS_DIR: &str = "mask";
const COORDS_FILE: &str = "coords.json";
const MASK_COORDS_FILE: &str = "mask_coords.json";
const LATENTS_FILE: &str = "latents.json.gz";
const INFO_FILE: &str = "avatar_info.json";
const STAGING_PREFIX: &str = ".staging-";

/// Filesystem store for one preprocessing version.
#[derive(Debug, Clone)]
pub struct AvatarStore {
    results_dir: PathBuf,
    version: String,
}

impl AvatarStore {
    pub fn new(results_dir: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            results_dir: results_dir.into(),
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Directory holding every avatar of this version.
    pub fn avatars_root(&self) -> PathBuf {
        self.results_dir.join(&self.version).join("avatars")
    }

    /// Directory of one avatar.
    pub fn avatar_dir(&self, id: &AvatarId) -> PathBuf {
        self.avatars_root().join(id.as_str())
    }

    /// True only if every required artifact file is present.
    pub fn exists(&self, id: &AvatarId) -> bool {
        let dir = self.avatar_dir(id);
        let info = match self.read_info(id) {
            Ok(Some(info)) => info,
            _ => return false,
        };
        let files_present = [COORDS_FILE, MASK_COORDS_FILE, LATENTS_FILE]
            .iter()
            .all(|f| dir.join(f).is_file());
        files_present
            && info.cycle_len > 0
            && (0..info.cycle_len).all(|i| {
                let name = frame_file_name(i, "png");
                dir.join(FRAMES_DIR).join(&name).is_file() && dir.join(MASKS_DIR).join(&name).is_file()
            })
    }

    /// Read the declared-parameter record.
    ///
    /// Returns `Ok(None)` when no record exists, and an inconsistency error
    /// when the record is unreadable.
    pub fn read_info(&self, id: &AvatarId) -> StorageResult<Option<AvatarInfo>> {
        let path = self.avatar_dir(id).join(INFO_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let info: AvatarInfo = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::inconsistent(id.as_str(), format!("unreadable {}: {}", INFO_FILE, e)))?;
        if &info.avatar_id != id {
            return Err(StorageError::inconsistent(
                id.as_str(),
                format!("record names avatar {}", info.avatar_id),
            ));
        }
        Ok(Some(info))
    }

    /// True iff a complete artifact set exists and was built with
    /// `bbox_shift`.
    pub fn is_consistent(&self, id: &AvatarId, bbox_shift: i32) -> bool {
        if !self.exists(id) {
            return false;
        }
        matches!(self.read_info(id), Ok(Some(info)) if info.matches_bbox_shift(bbox_shift))
    }

    /// Read every artifact list of an avatar.
    pub fn load(&self, id: &AvatarId) -> StorageResult<Avatar> {
        let dir = self.avatar_dir(id);
        if !dir.is_dir() {
            return Err(StorageError::not_found(id.as_str()));
        }
        let info = self
            .read_info(id)?
            .ok_or_else(|| StorageError::not_found(id.as_str()))?;

        let inconsistent = |reason: String| StorageError::inconsistent(id.as_str(), reason);

        let coords = read_boxes(&dir.join(COORDS_FILE)).map_err(|e| inconsistent(format!("{}: {}", COORDS_FILE, e)))?;
        let mask_coords = read_boxes(&dir.join(MASK_COORDS_FILE))
            .map_err(|e| inconsistent(format!("{}: {}", MASK_COORDS_FILE, e)))?;
        let latents = fs::read(dir.join(LATENTS_FILE))
            .map_err(StorageError::from)
            .and_then(|bytes| decompress_latents(&bytes))
            .map_err(|e| inconsistent(format!("{}: {}", LATENTS_FILE, e)))?;

        let frames_dir = dir.join(FRAMES_DIR);
        let frames = (0..info.cycle_len)
            .into_par_iter()
            .map(|i| {
                let path = frames_dir.join(frame_file_name(i, "png"));
                image::open(&path)
                    .map(|img| img.to_rgb8())
                    .map_err(|e| inconsistent(format!("{}: {}", path.display(), e)))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let masks_dir = dir.join(MASKS_DIR);
        let masks = (0..info.cycle_len)
            .into_par_iter()
            .map(|i| {
                let path = masks_dir.join(frame_file_name(i, "png"));
                image::open(&path)
                    .map(|img| img.to_luma8())
                    .map_err(|e| inconsistent(format!("{}: {}", path.display(), e)))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let avatar = Avatar {
            info,
            frames,
            coords,
            latents,
            masks,
            mask_coords,
        };
        avatar.check_aligned().map_err(inconsistent)?;

        info!(avatar_id = %id, cycle_len = avatar.cycle_len(), "Loaded avatar from disk");
        Ok(avatar)
    }

    /// Persist a complete artifact set, replacing any previous one.
    ///
    /// Nothing is written into the live directory until every artifact,
    /// and the declared record after them, is durable in staging.
    pub fn save(&self, avatar: &Avatar) -> StorageResult<()> {
        let id = avatar.id();
        avatar
            .check_aligned()
            .map_err(|reason| StorageError::inconsistent(id.as_str(), reason))?;

        let root = self.avatars_root();
        fs::create_dir_all(&root)?;

        let staging = tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir_in(&root)?;
        let stage = staging.path();
        fs::create_dir(stage.join(FRAMES_DIR))?;
        fs::create_dir(stage.join(MASKS_DIR))?;

        avatar
            .frames
            .par_iter()
            .enumerate()
            .try_for_each(|(i, frame)| write_png_rgb(&stage.join(FRAMES_DIR).join(frame_file_name(i, "png")), frame))?;
        avatar
            .masks
            .par_iter()
            .enumerate()
            .try_for_each(|(i, mask)| write_png_gray(&stage.join(MASKS_DIR).join(frame_file_name(i, "png")), mask))?;

        write_synced(&stage.join(COORDS_FILE), &serde_json::to_vec(&avatar.coords)?)?;
        write_synced(&stage.join(MASK_COORDS_FILE), &serde_json::to_vec(&avatar.mask_coords)?)?;
        write_synced(&stage.join(LATENTS_FILE), &compress_latents(&avatar.latents)?)?;
        write_synced(&stage.join(INFO_FILE), &serde_json::to_vec_pretty(&avatar.info)?)?;

        let target = self.avatar_dir(id);
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        // Disarm the guard before the move; a failed rename cleans up here.
        let stage = staging.into_path();
        if let Err(e) = fs::rename(&stage, &target) {
            let _ = fs::remove_dir_all(&stage);
            return Err(e.into());
        }

        info!(
            avatar_id = %id,
            cycle_len = avatar.cycle_len(),
            bbox_shift = avatar.info.bbox_shift,
            "Saved avatar"
        );
        Ok(())
    }

    /// Discard an avatar's artifact set. Returns whether anything was removed.
    pub fn remove(&self, id: &AvatarId) -> StorageResult<bool> {
        let dir = self.avatar_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(avatar_id = %id, "Removed avatar directory");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Identifiers of avatars with a declared record on disk, sorted.
    pub fn list(&self) -> StorageResult<Vec<AvatarId>> {
        let root = self.avatars_root();
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(STAGING_PREFIX) {
                continue;
            }
            match AvatarId::parse(name.clone()) {
                Ok(id) if entry.path().join(INFO_FILE).is_file() => ids.push(id),
                Ok(_) => {}
                Err(e) => warn!(dir = %name, error = %e, "Skipping unexpected avatar directory"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn read_boxes(path: &Path) -> StorageResult<Vec<BBox>> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

fn write_png_rgb(path: &Path, img: &RgbImage) -> StorageResult<()> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Png)?;
    write_synced(path, buf.get_ref())
}

fn write_png_gray(path: &Path, img: &GrayImage) -> StorageResult<()> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Png)?;
    write_synced(path, buf.get_ref())
}

fn write_synced(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}
