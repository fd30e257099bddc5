//! In-memory avatar artifact set.

use image::{GrayImage, RgbImage};

use talkhead_models::{AvatarId, AvatarInfo, BBox, Latent};

/// A ready avatar: the declared record plus five index-aligned cyclic lists.
#[derive(Debug, Clone)]
pub struct Avatar {
    pub info: AvatarInfo,
    /// Full-resolution cycle frames
    pub frames: Vec<RgbImage>,
    /// Face box per frame
    pub coords: Vec<BBox>,
    /// Model-space encoding per frame
    pub latents: Vec<Latent>,
    /// Grayscale blend mask per frame
    pub masks: Vec<GrayImage>,
    /// Frame crop each mask applies to
    pub mask_coords: Vec<BBox>,
}

impl Avatar {
    pub fn id(&self) -> &AvatarId {
        &self.info.avatar_id
    }

    /// Number of entries in each cyclic list.
    pub fn cycle_len(&self) -> usize {
        self.frames.len()
    }

    /// Position in the cyclic lists for a monotonically increasing cursor.
    ///
    /// Callers must not use this on an empty avatar; [`Avatar::check_aligned`]
    /// rejects those.
    pub fn cycle_index(&self, cursor: usize) -> usize {
        cursor % self.cycle_len()
    }

    /// Verify the list alignment invariants.
    ///
    /// Returns a description of the first violation found.
    pub fn check_aligned(&self) -> Result<(), String> {
        let n = self.frames.len();
        if n == 0 {
            return Err("avatar has no frames".to_string());
        }
        let lens = [
            ("coords", self.coords.len()),
            ("latents", self.latents.len()),
            ("masks", self.masks.len()),
            ("mask_coords", self.mask_coords.len()),
        ];
        for (name, len) in lens {
            if len != n {
                return Err(format!("{} has {} entries, frames has {}", name, len, n));
            }
        }
        if self.info.cycle_len != n {
            return Err(format!(
                "declared cycle length {} but {} frames present",
                self.info.cycle_len, n
            ));
        }

        for i in 0..n {
            let (w, h) = self.frames[i].dimensions();
            if !self.coords[i].fits_within(w, h) {
                return Err(format!("face box {} lies outside its frame", i));
            }
            if !self.mask_coords[i].fits_within(w, h) {
                return Err(format!("mask box {} lies outside its frame", i));
            }
            let crop = self.mask_coords[i];
            if self.masks[i].dimensions() != (crop.width(), crop.height()) {
                return Err(format!("mask {} does not match its crop box", i));
            }
        }
        Ok(())
    }

    /// True when the second half of the cycle replays the first in reverse.
    pub fn is_mirrored(&self) -> bool {
        let n = self.cycle_len();
        if n % 2 != 0 {
            return false;
        }
        let half = n / 2;
        (0..half).all(|k| {
            let (a, b) = (half - 1 - k, half + k);
            self.coords[a] == self.coords[b] && self.frames[a] == self.frames[b]
        })
    }
}
