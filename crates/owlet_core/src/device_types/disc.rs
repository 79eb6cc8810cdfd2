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

//! In-memory model of a mounted disc: ID fields, sectors and tracks.
//!
//! Sector addressing is two-level: operations look sectors up by the logical
//! sector number recorded in the ID field, which for flux-accurate (FSD)
//! images may repeat within a track or disagree with the sector's physical
//! position. The record number ties a sector back to its stored position.

use std::fmt::Display;

/// Number of physical track positions per drive surface.
pub const TRACKS_PER_DRIVE: usize = 80;

/// FSD images describe at most 40 tracks (last track number + 1).
pub const FSD_TRACKS_PER_DRIVE: usize = 40 + 1;

/// Standard DFS geometry used by the sequential image formats.
pub const SECTORS_PER_TRACK: usize = 10;
pub const SECTOR_SIZE: usize = 256;
pub const TRACK_BYTES: usize = SECTORS_PER_TRACK * SECTOR_SIZE;

/// Decode an ID-field sector length code to a byte count.
pub fn sector_size_from_code(code: u8) -> usize {
    match code {
        1 => 256,
        2 => 512,
        3 => 1024,
        4 => 2048,
        _ => 128,
    }
}

/// The four-byte sector header written at format time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdField {
    /// Cylinder number byte identifying the track.
    pub logical_track: u8,
    /// Head number byte (top or bottom surface).
    pub head: u8,
    /// Record number byte identifying the sector.
    pub logical_sector: u8,
    /// Encoded byte length of the sector.
    pub size_code: u8,
}

impl Display for IdField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[t:{:2} h:{} s:{:2} n:{}]",
            self.logical_track, self.head, self.logical_sector, self.size_code
        )
    }
}

/// A stored sector. The declared size (from the ID field) and the real
/// stored size may disagree for copy-protected images.
#[derive(Clone, Debug, Default)]
pub struct Sector {
    pub id: IdField,
    /// Physical cylinder this sector was read from.
    pub cylinder: u8,
    /// Ordinal position of the sector within the track as stored.
    pub record: u8,
    /// Declared sector size in bytes, decoded from the ID field.
    pub id_size: usize,
    /// Real stored size in bytes.
    pub real_size: usize,
    /// Error code recorded when the sector was imaged. 0 = good read.
    pub error: u8,
    pub data: Vec<u8>,
}

/// One physical track position on one surface.
#[derive(Clone, Debug, Default)]
pub struct Track {
    /// False for FSD tracks that carry ID fields but no data.
    pub readable: bool,
    /// Sector count stated by the last format command.
    pub logical_sectors: u8,
    /// Gap sizes from the format command. Recorded but not acted on.
    pub gap1: u8,
    pub gap3: u8,
    pub gap5: u8,
    /// Stored sectors in record order. May differ in count from
    /// `logical_sectors` for FSD images.
    pub sectors: Vec<Sector>,
}

impl Track {
    pub fn n_sectors(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_formatted(&self) -> bool {
        !self.sectors.is_empty()
    }
}

/// Kind tag of a mounted disc image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiscKind {
    Ssd,
    Dsd,
    Fsd,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_codes_decode() {
        assert_eq!(sector_size_from_code(0), 128);
        assert_eq!(sector_size_from_code(1), 256);
        assert_eq!(sector_size_from_code(2), 512);
        assert_eq!(sector_size_from_code(3), 1024);
        assert_eq!(sector_size_from_code(4), 2048);
        // Out-of-range codes fall back to the smallest size.
        assert_eq!(sector_size_from_code(7), 128);
        assert_eq!(sector_size_from_code(0xff), 128);
    }

    #[test]
    fn track_formatted_state() {
        let mut track = Track::default();
        assert!(!track.is_formatted());
        assert_eq!(track.n_sectors(), 0);

        track.sectors.push(Sector {
            record: 0,
            id_size: SECTOR_SIZE,
            real_size: SECTOR_SIZE,
            data: vec![0; SECTOR_SIZE],
            ..Default::default()
        });
        assert!(track.is_formatted());
        assert_eq!(track.n_sectors(), 1);
    }
}
