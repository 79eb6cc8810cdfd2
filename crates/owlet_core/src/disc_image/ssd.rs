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
*/

//! Loaders for the raw sequential image formats and the single-track
//! writeback used by the write and format commands.
//!
//! An SSD is 10 × 256-byte sectors per track, tracks in ascending order. A
//! file longer than 0x40000 bytes continues onto surface 1 after surface 0.
//! A DSD interleaves surfaces by track: track 0 head 0, track 0 head 1, and
//! so on.

use std::{
    fs::{self, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::Path,
};

use anyhow::{anyhow, Error};

use crate::{
    device_types::disc::{
        IdField, Sector, Track, DiscKind, SECTORS_PER_TRACK, SECTOR_SIZE, TRACKS_PER_DRIVE,
        TRACK_BYTES,
    },
    disc_image::{DiscImageError, LoadedDisc},
};

/// A sequential image longer than this carries a second surface.
pub const DOUBLE_SIDED_THRESHOLD: usize = 0x40000;

/// Build one standard 10-sector track, consuming the next 2560 bytes of the
/// image. Bytes beyond the end of the file read as zero.
fn sequential_track(logical_track: usize, id_head: u8, data: &[u8], offset: &mut usize) -> Track {
    let mut track = Track {
        readable: true,
        logical_sectors: SECTORS_PER_TRACK as u8,
        ..Default::default()
    };

    for sector_n in 0..SECTORS_PER_TRACK {
        let mut buf = vec![0u8; SECTOR_SIZE];
        if *offset < data.len() {
            let avail = (data.len() - *offset).min(SECTOR_SIZE);
            buf[..avail].copy_from_slice(&data[*offset..*offset + avail]);
        }
        *offset += SECTOR_SIZE;

        track.sectors.push(Sector {
            id: IdField {
                logical_track: logical_track as u8,
                head: id_head,
                logical_sector: sector_n as u8,
                size_code: 1,
            },
            cylinder: logical_track as u8,
            record: sector_n as u8,
            id_size: SECTOR_SIZE,
            real_size: SECTOR_SIZE,
            error: 0,
            data: buf,
        });
    }

    track
}

/// Load a sequential (SSD) image.
pub fn load_ssd(path: &Path) -> Result<LoadedDisc, Error> {
    let data = fs::read(path)?;

    // A long sequential image continues onto side 1.
    let (heads_code, head_ct) = if data.len() > DOUBLE_SIDED_THRESHOLD {
        (0u8, 2usize)
    }
    else {
        (1u8, 1usize)
    };

    let mut disc = LoadedDisc::blank(DiscKind::Ssd, heads_code);
    let mut offset = 0;

    for head in 0..head_ct {
        for track_n in 0..TRACKS_PER_DRIVE {
            // The ID fields always carry head 0, even on the second surface.
            disc.tracks[head][track_n] = sequential_track(track_n, 0, &data, &mut offset);
        }
    }

    log::debug!(
        "load_ssd(): loaded {} ({} bytes, {} surface(s))",
        path.display(),
        data.len(),
        head_ct
    );

    Ok(disc)
}

/// Load an interleaved double-sided (DSD) image.
pub fn load_dsd(path: &Path) -> Result<LoadedDisc, Error> {
    let data = fs::read(path)?;

    let mut disc = LoadedDisc::blank(DiscKind::Dsd, 2);
    let mut offset = 0;

    for track_n in 0..TRACKS_PER_DRIVE {
        for head in 0..2 {
            disc.tracks[head][track_n] = sequential_track(track_n, head as u8, &data, &mut offset);
        }
    }

    log::debug!("load_dsd(): loaded {} ({} bytes)", path.display(), data.len());

    Ok(disc)
}

/// Byte offset of one track's data within a sequential image file.
pub fn track_file_offset(heads_code: u8, head: usize, track_n: usize) -> u64 {
    if heads_code != 0 {
        (heads_code as u64 * track_n as u64 + head as u64) * TRACK_BYTES as u64
    }
    else {
        // Double-length single-sided image: surface 1 follows surface 0.
        (track_n as u64 + head as u64 * TRACKS_PER_DRIVE as u64) * TRACK_BYTES as u64
    }
}

/// Serialise one modified track back into its backing image file, extending
/// the file with zeroes if the track lies beyond the current end.
pub fn save_track(
    path: &Path,
    heads_code: u8,
    head: usize,
    track_n: usize,
    track: &Track,
) -> Result<(), Error> {
    if track.sectors.len() < SECTORS_PER_TRACK {
        return Err(anyhow!(
            "track {} has only {} sectors, cannot write back a full track",
            track_n,
            track.sectors.len()
        ));
    }

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;

    let offset = track_file_offset(heads_code, head, track_n);
    let file_len = file.seek(SeekFrom::End(0))?;

    if offset > file_len {
        let pad = vec![0u8; (offset - file_len) as usize];
        file.write_all(&pad)?;
    }

    file.seek(SeekFrom::Start(offset))?;

    for (sector_n, sector) in track.sectors.iter().take(SECTORS_PER_TRACK).enumerate() {
        if sector.data.len() < SECTOR_SIZE {
            return Err(DiscImageError::ShortSector {
                track: track_n,
                sector: sector_n,
            }
            .into());
        }
        file.write_all(&sector.data[..SECTOR_SIZE])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_image(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.ssd");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn ssd_sector_mapping() {
        // Two full tracks of ascending bytes.
        let mut bytes = Vec::new();
        for i in 0..(2 * TRACK_BYTES) {
            bytes.push((i % 251) as u8);
        }
        let (_dir, path) = write_image(&bytes);

        let disc = load_ssd(&path).unwrap();
        assert_eq!(disc.heads, 1);
        assert_eq!(disc.kind, DiscKind::Ssd);

        // Track 1 sector 3 starts at offset 2560 + 3 * 256.
        let sector = &disc.tracks[0][1].sectors[3];
        assert_eq!(sector.id.logical_track, 1);
        assert_eq!(sector.id.logical_sector, 3);
        assert_eq!(sector.real_size, SECTOR_SIZE);
        let base = TRACK_BYTES + 3 * SECTOR_SIZE;
        assert_eq!(sector.data[0], ((base) % 251) as u8);
        assert_eq!(sector.data[255], ((base + 255) % 251) as u8);

        // Tracks beyond the end of the file read as zeroes but are formatted.
        assert!(disc.tracks[0][79].is_formatted());
        assert!(disc.tracks[0][79].sectors[9].data.iter().all(|&b| b == 0));
    }

    #[test]
    fn long_ssd_spans_two_surfaces() {
        let bytes = vec![0xa5u8; DOUBLE_SIDED_THRESHOLD + 1];
        let (_dir, path) = write_image(&bytes);

        let disc = load_ssd(&path).unwrap();
        assert_eq!(disc.heads, 0);
        assert!(disc.tracks[1][0].is_formatted());
        // Surface 1 ID fields still carry head 0.
        assert_eq!(disc.tracks[1][0].sectors[0].id.head, 0);
    }

    #[test]
    fn dsd_interleaves_by_track() {
        // Track 0 head 0 filled with 0x11, track 0 head 1 with 0x22.
        let mut bytes = vec![0x11u8; TRACK_BYTES];
        bytes.extend(vec![0x22u8; TRACK_BYTES]);
        let (_dir, path) = write_image(&bytes);

        let disc = load_dsd(&path).unwrap();
        assert_eq!(disc.heads, 2);
        assert_eq!(disc.tracks[0][0].sectors[0].data[0], 0x11);
        assert_eq!(disc.tracks[1][0].sectors[0].data[0], 0x22);
        assert_eq!(disc.tracks[1][0].sectors[0].id.head, 1);
    }

    #[test]
    fn save_track_offsets_and_extension() {
        // Single-sided image: track 3 lands at 3 * 2560.
        assert_eq!(track_file_offset(1, 0, 3), 3 * TRACK_BYTES as u64);
        // DSD: head 1 of track 3 lands after head 0.
        assert_eq!(track_file_offset(2, 1, 3), 7 * TRACK_BYTES as u64);
        // Double-length SSD: surface 1 starts after 80 tracks.
        assert_eq!(track_file_offset(0, 1, 3), 83 * TRACK_BYTES as u64);

        // Write track 3 into a one-track file; the file must be extended.
        let (_dir, path) = write_image(&vec![0u8; TRACK_BYTES]);
        let mut track = Track::default();
        for s in 0..SECTORS_PER_TRACK {
            track.sectors.push(Sector {
                record: s as u8,
                data: vec![0xe5; SECTOR_SIZE],
                ..Default::default()
            });
        }
        save_track(&path, 1, 0, 3, &track).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 4 * TRACK_BYTES);
        assert!(bytes[TRACK_BYTES..3 * TRACK_BYTES].iter().all(|&b| b == 0));
        assert!(bytes[3 * TRACK_BYTES..].iter().all(|&b| b == 0xe5));
    }
}
