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

    disc_image::mod.rs

    Disc image loaders and track writeback

*/

pub mod fsd;
pub mod ssd;

use std::{error::Error, fmt::Display};

use crate::device_types::disc::{DiscKind, Track, FSD_TRACKS_PER_DRIVE, TRACKS_PER_DRIVE};

/// A fully parsed disc image, ready to be mounted in a drive.
pub struct LoadedDisc {
    pub kind: DiscKind,
    /// Heads code: 1 = single-sided sequential, 2 = interleaved double-sided,
    /// 0 = double-length sequential image carrying surface 1 after surface 0.
    pub heads: u8,
    /// Total track count recorded in the image (FSD only; 0 otherwise).
    pub total_tracks: usize,
    pub tracks: Box<[[Track; TRACKS_PER_DRIVE]; 2]>,
}

impl LoadedDisc {
    pub(crate) fn blank(kind: DiscKind, heads: u8) -> Self {
        LoadedDisc {
            kind,
            heads,
            total_tracks: 0,
            tracks: Box::new(std::array::from_fn(|_| {
                std::array::from_fn(|_| Track::default())
            })),
        }
    }
}

#[derive(Debug)]
pub enum DiscImageError {
    TooManyTracks { found: usize },
    ShortSector { track: usize, sector: usize },
}

impl Error for DiscImageError {}

impl Display for DiscImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscImageError::TooManyTracks { found } => write!(
                f,
                "Expected a maximum of {} tracks, found {}",
                FSD_TRACKS_PER_DRIVE, found
            ),
            DiscImageError::ShortSector { track, sector } => write!(
                f,
                "Track {} sector {} holds less than a full sector of data",
                track, sector
            ),
        }
    }
}
