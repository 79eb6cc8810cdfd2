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

//! Loader for the sector-accurate FSD image format.
//!
//! The format records per-sector ID fields, the real stored size (which may
//! disagree with the declared size), and the error code produced when the
//! sector was imaged. Tracks flagged unreadable carry ID fields only.
//!
//! Layout: an 8-byte header (opaque), a NUL-terminated title, the last track
//! number, then per track: track id, sector count, and if the count is
//! non-zero a readable flag followed by the sector records.

use std::{
    fs,
    io::{Cursor, Read},
    path::Path,
};

use anyhow::Error;
use binrw::{binrw, BinReaderExt};

use crate::{
    device_types::disc::{sector_size_from_code, DiscKind, IdField, Sector, FSD_TRACKS_PER_DRIVE},
    disc_image::{DiscImageError, LoadedDisc},
};

/// Readable-flag value marking a track whose sectors carry data.
const TRACK_READABLE: u8 = 255;

/// The four ID bytes recorded for every sector.
#[binrw]
#[brw(little)]
struct FsdSectorId {
    logical_track: u8,
    head: u8,
    logical_sector: u8,
    size_code: u8,
}

fn read_title(reader: &mut Cursor<Vec<u8>>) -> Result<String, Error> {
    let mut title = Vec::new();
    loop {
        let byte: u8 = reader.read_le()?;
        if byte == 0 {
            break;
        }
        title.push(byte);
    }
    Ok(String::from_utf8_lossy(&title).into_owned())
}

/// Load an FSD image.
pub fn load_fsd(path: &Path) -> Result<LoadedDisc, Error> {
    let bytes = fs::read(path)?;
    let mut reader = Cursor::new(bytes);

    let _header: [u8; 8] = reader.read_le()?;
    let title = read_title(&mut reader)?;

    let last_track: u8 = reader.read_le()?;
    let total_tracks = last_track as usize + 1;

    if total_tracks > FSD_TRACKS_PER_DRIVE {
        return Err(DiscImageError::TooManyTracks { found: total_tracks }.into());
    }

    log::debug!(
        "load_fsd(): loading {} (\"{}\", {} tracks)",
        path.display(),
        title,
        total_tracks
    );

    let mut disc = LoadedDisc::blank(DiscKind::Fsd, 1);
    disc.total_tracks = total_tracks;

    for track_n in 0..total_tracks {
        let _track_id: u8 = reader.read_le()?;
        let sector_count: u8 = reader.read_le()?;

        let track = &mut disc.tracks[0][track_n];
        track.logical_sectors = sector_count;

        if sector_count == 0 {
            // Unformatted track.
            continue;
        }

        let readable: u8 = reader.read_le()?;
        track.readable = readable != 0;

        for sector_n in 0..sector_count {
            let id: FsdSectorId = reader.read_le()?;

            let mut sector = Sector {
                id: IdField {
                    logical_track: id.logical_track,
                    head: id.head,
                    logical_sector: id.logical_sector,
                    size_code: id.size_code,
                },
                cylinder: track_n as u8,
                record: sector_n,
                id_size: sector_size_from_code(id.size_code),
                real_size: 0,
                error: 0,
                data: Vec::new(),
            };

            if readable == TRACK_READABLE {
                // The real size may be misreported in the ID field as a
                // copy-protection measure; the data that follows is the
                // real size.
                let real_size_code: u8 = reader.read_le()?;
                sector.real_size = sector_size_from_code(real_size_code);
                sector.error = reader.read_le()?;

                let mut data = vec![0u8; sector.real_size];
                reader.read_exact(&mut data)?;
                sector.data = data;
            }

            track.sectors.push(sector);
        }
    }

    Ok(disc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    /// Build a two-track FSD image: track 0 readable with the given sectors,
    /// track 1 ID-fields-only.
    fn build_fsd(sectors: &[(IdField, u8, u8, Vec<u8>)]) -> Vec<u8> {
        let mut bytes = vec![0u8; 8]; // header
        bytes.extend(b"TEST\0");
        bytes.push(1); // last track number -> 2 tracks

        bytes.push(0); // track id
        bytes.push(sectors.len() as u8);
        bytes.push(255); // readable, with data
        for (id, real_code, error, data) in sectors {
            bytes.extend([id.logical_track, id.head, id.logical_sector, id.size_code]);
            bytes.push(*real_code);
            bytes.push(*error);
            bytes.extend(data);
        }

        bytes.push(1); // track id
        bytes.push(1); // one sector
        bytes.push(0); // unreadable, IDs only
        bytes.extend([1, 0, 0, 1]);

        bytes
    }

    fn write_fsd(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.fsd");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn fsd_sectors_round_trip() {
        let id_a = IdField {
            logical_track: 0,
            head: 0,
            logical_sector: 7,
            size_code: 1,
        };
        let id_b = IdField {
            logical_track: 0,
            head: 0,
            logical_sector: 3,
            size_code: 1,
        };
        let bytes = build_fsd(&[
            (id_a, 1, 0x00, vec![0xab; 256]),
            (id_b, 0, 0x0e, vec![0xcd; 128]),
        ]);
        let (_dir, path) = write_fsd(&bytes);

        let disc = load_fsd(&path).unwrap();
        assert_eq!(disc.kind, DiscKind::Fsd);
        assert_eq!(disc.total_tracks, 2);

        let track = &disc.tracks[0][0];
        assert!(track.readable);
        assert_eq!(track.n_sectors(), 2);

        // Declared and real sizes may disagree.
        let b = &track.sectors[1];
        assert_eq!(b.id, id_b);
        assert_eq!(b.id_size, 256);
        assert_eq!(b.real_size, 128);
        assert_eq!(b.error, 0x0e);
        assert_eq!(b.record, 1);
        assert!(b.data.iter().all(|&x| x == 0xcd));

        // Unreadable tracks carry ID fields only.
        let track1 = &disc.tracks[0][1];
        assert!(!track1.readable);
        assert_eq!(track1.n_sectors(), 1);
        assert!(track1.sectors[0].data.is_empty());
    }

    #[test]
    fn fsd_rejects_too_many_tracks() {
        let mut bytes = vec![0u8; 8];
        bytes.extend(b"BIG\0");
        bytes.push(41); // 42 tracks

        let (_dir, path) = write_fsd(&bytes);
        assert!(load_fsd(&path).is_err());
    }

    #[test]
    fn fsd_duplicate_logical_ids_stay_distinct() {
        let id = IdField {
            logical_track: 0,
            head: 0,
            logical_sector: 5,
            size_code: 1,
        };
        let bytes = build_fsd(&[
            (id, 1, 0x00, vec![0x11; 256]),
            (id, 1, 0x00, vec![0x22; 256]),
        ]);
        let (_dir, path) = write_fsd(&bytes);

        let disc = load_fsd(&path).unwrap();
        let track = &disc.tracks[0][0];
        assert_eq!(track.sectors[0].id.logical_sector, 5);
        assert_eq!(track.sectors[1].id.logical_sector, 5);
        assert_eq!(track.sectors[0].data[0], 0x11);
        assert_eq!(track.sectors[1].data[0], 0x22);
        assert_eq!(track.sectors[1].record, 1);
    }
}
