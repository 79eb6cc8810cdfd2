/*
    Owlet
    https://github.com/owlet-emu/owlet

    Copyright 2022-2025 The Owlet Project Contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    devices::disc_drive.rs

    Implements a floppy disc drive and its mounted image

*/

use std::path::{Path, PathBuf};

use anyhow::Error;

use crate::{
    device_types::disc::{DiscKind, Track, SECTORS_PER_TRACK, TRACKS_PER_DRIVE},
    disc_image::{fsd, ssd, LoadedDisc},
};

/// Valid DFS catalogue sector counts: 80 tracks of 10 sectors, or 40.
const CATALOGUE_SECTORS_80: usize = 0x320;
const CATALOGUE_SECTORS_40: usize = 0x190;

pub struct DiscDrive {
    drive_n: usize,
    path: Option<PathBuf>,
    kind: Option<DiscKind>,
    writeable: bool,
    /// Heads code: 1 = single-sided SSD, 2 = DSD, 0 = double-length SSD
    /// spanning both surfaces sequentially.
    heads: u8,
    /// Total track count recorded in the image (FSD only).
    total_tracks: usize,
    tracks: Box<[[Track; TRACKS_PER_DRIVE]; 2]>,
}

impl DiscDrive {
    pub fn new(drive_n: usize) -> Self {
        DiscDrive {
            drive_n,
            path: None,
            kind: None,
            writeable: false,
            heads: 1,
            total_tracks: 0,
            tracks: Box::new(std::array::from_fn(|_| {
                std::array::from_fn(|_| Track::default())
            })),
        }
    }

    /// Mount a parsed image.
    fn mount(&mut self, path: &Path, disc: LoadedDisc) {
        self.path = Some(path.to_path_buf());
        self.kind = Some(disc.kind);
        self.heads = disc.heads;
        self.total_tracks = disc.total_tracks;
        self.tracks = disc.tracks;
    }

    /// Load a sequential (SSD) image into this drive. On failure the drive
    /// is left empty.
    pub fn load_ssd(&mut self, path: &Path) -> Result<(), Error> {
        self.eject();
        let disc = ssd::load_ssd(path)?;
        self.mount(path, disc);
        log::debug!("drive {}: mounted SSD {}", self.drive_n, path.display());
        Ok(())
    }

    /// Load an interleaved double-sided (DSD) image into this drive.
    pub fn load_dsd(&mut self, path: &Path) -> Result<(), Error> {
        self.eject();
        let disc = ssd::load_dsd(path)?;
        self.mount(path, disc);
        log::debug!("drive {}: mounted DSD {}", self.drive_n, path.display());
        Ok(())
    }

    /// Load a sector-accurate (FSD) image into this drive.
    pub fn load_fsd(&mut self, path: &Path) -> Result<(), Error> {
        self.eject();
        let disc = fsd::load_fsd(path)?;
        self.mount(path, disc);
        log::debug!("drive {}: mounted FSD {}", self.drive_n, path.display());
        Ok(())
    }

    /// Load an image, picking the loader from the file extension. Anything
    /// that is not `.dsd` or `.fsd` is treated as an SSD.
    pub fn load(&mut self, path: &Path) -> Result<(), Error> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("dsd") => self.load_dsd(path),
            Some("fsd") => self.load_fsd(path),
            _ => self.load_ssd(path),
        }
    }

    /// Eject the mounted image, releasing every sector buffer.
    pub fn eject(&mut self) {
        self.path = None;
        self.kind = None;
        self.heads = 1;
        self.total_tracks = 0;
        for surface in self.tracks.iter_mut() {
            for track in surface.iter_mut() {
                *track = Track::default();
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.tracks[0][0].is_formatted()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn kind(&self) -> Option<DiscKind> {
        self.kind
    }

    pub fn heads(&self) -> u8 {
        self.heads
    }

    pub fn total_tracks(&self) -> usize {
        self.total_tracks
    }

    pub fn is_writeable(&self) -> bool {
        self.writeable
    }

    /// Restore writability without the catalogue check, for state loads.
    pub(crate) fn set_writeable(&mut self, writeable: bool) {
        self.writeable = writeable;
    }

    /// Restore a recorded heads code, for state loads.
    pub(crate) fn set_heads(&mut self, heads: u8) {
        self.heads = heads;
    }

    /// File name and heads code of the mounted image, for the shell.
    pub fn disc_info(&self) -> (Option<&Path>, u8) {
        (self.path.as_deref(), self.heads)
    }

    /// Track accessor. Out-of-range positions resolve to the last track.
    pub fn track(&self, head: usize, track: usize) -> &Track {
        &self.tracks[head.min(1)][track.min(TRACKS_PER_DRIVE - 1)]
    }

    pub fn track_mut(&mut self, head: usize, track: usize) -> &mut Track {
        &mut self.tracks[head.min(1)][track.min(TRACKS_PER_DRIVE - 1)]
    }

    /// Toggle writability. When enabling writes, the DFS catalogue is checked
    /// for consistency: the DFS ROMs overwrite files at the start of the disc
    /// if catalogue entries are not in descending sector order or the sector
    /// count is wrong. Returns false if the catalogue looks corrupt; the disc
    /// is made writeable either way.
    pub fn write_enable(&mut self, enable: bool) -> bool {
        self.writeable = enable;

        if !enable {
            return true;
        }

        let catalogue_ok = self.validate_catalogue();
        if !catalogue_ok {
            log::warn!(
                "drive {}: invalid disc catalogue, writing may corrupt the image",
                self.drive_n
            );
        }
        catalogue_ok
    }

    fn validate_catalogue(&self) -> bool {
        for head in 0..self.heads as usize {
            let track = &self.tracks[head][0];
            if !track.is_formatted() || track.n_sectors() < SECTORS_PER_TRACK {
                // No disc image, nothing to validate.
                return true;
            }

            // A Watford DFS disc carries a second, 62-file catalogue whose
            // marker is eight 0xAA bytes at the start of sector 2.
            let mut catalogues = 1;
            let marker = &self.tracks[head][0].sectors[2].data;
            if marker.len() >= 8 && marker[..8].iter().all(|&b| b == 0xaa) {
                catalogues = 2;
            }

            for catalogue in 0..catalogues {
                let data = &self.tracks[head][0].sectors[catalogue * 2 + 1].data;
                if data.len() < 256 {
                    return false;
                }

                let sector_count = ((data[6] as usize & 3) << 8) + data[7] as usize;
                if sector_count != CATALOGUE_SECTORS_80 && sector_count != CATALOGUE_SECTORS_40 {
                    return false;
                }

                // File start sectors must descend through the catalogue.
                let mut last_start = CATALOGUE_SECTORS_80;
                for file in 0..(data[5] as usize / 8) {
                    let start =
                        ((data[file * 8 + 14] as usize & 3) << 8) + data[file * 8 + 15] as usize;
                    if last_start < start {
                        return false;
                    }
                    last_start = start;
                }
            }
        }

        true
    }

    /// Serialise one modified track back to the backing image file.
    pub fn save_track(&self, head: usize, track_n: usize) -> Result<(), Error> {
        let Some(path) = self.path.as_deref() else {
            return Err(anyhow::anyhow!(
                "drive {}: no backing file to write to",
                self.drive_n
            ));
        };

        ssd::save_track(
            path,
            self.heads,
            head,
            track_n.min(TRACKS_PER_DRIVE - 1),
            self.track(head, track_n),
        )
    }
}
