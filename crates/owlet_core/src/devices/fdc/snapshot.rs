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

//! Controller state record for the host's state saver. The record is a fixed
//! 613 bytes: two NUL-padded drive paths, the trigger relative to the current
//! cycle, the register file, parameter buffer and transfer state.
//!
//! Restoring a record revives the drive images from the recorded paths (DSD
//! by extension, SSD otherwise) before the registers are applied; if neither
//! drive had a path, or a revival fails, the register restore is skipped and
//! the controller keeps its reset state.

use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::Error;
use binrw::{binrw, BinReaderExt, BinWrite};

use crate::devices::{disc_drive::DiscDrive, fdc::*};

use super::controller::Intel8271;

pub const SNAPSHOT_LEN: usize = 613;

/// Sentinel for "no trigger armed".
const TRIGGER_NEVER: i32 = i32::MAX;

#[binrw]
#[brw(little)]
struct FdcSnapshot {
    drive_0_path: [u8; 256],
    drive_1_path: [u8; 256],
    trigger: i32,
    result: u8,
    status: u8,
    data: u8,
    scan_sector: u8,
    scan_count: u32,
    mode: u8,
    current_track: [u8; 2],
    drive_control_output: u8,
    drive_control_input: u8,
    bad_tracks: [u8; 4],
    command: i32,
    param_count: i32,
    params_received: i32,
    params: [u8; 16],
    heads: [i32; 2],
    select: [i32; 2],
    writeable: [i32; 2],
    first_write: i32,
    pending_error: i32,
    track_addr: i32,
    current_sector: i32,
    sector_length: i32,
    sectors_to_go: i32,
    byte_within_sector: i32,
}

fn path_record(drive: &DiscDrive) -> [u8; 256] {
    let mut record = [0u8; 256];
    if drive.is_loaded() {
        if let Some(path) = drive.path() {
            let path = path.to_string_lossy();
            let bytes = path.as_bytes();
            let len = bytes.len().min(record.len() - 1);
            record[..len].copy_from_slice(&bytes[..len]);
        }
    }
    record
}

fn record_path(record: &[u8; 256]) -> Option<PathBuf> {
    let len = record.iter().position(|&b| b == 0).unwrap_or(record.len());
    if len == 0 {
        return None;
    }
    Some(PathBuf::from(
        String::from_utf8_lossy(&record[..len]).into_owned(),
    ))
}

fn is_dsd(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("dsd"))
        .unwrap_or(false)
}

impl Intel8271 {
    /// Serialise the controller state into a 613-byte record.
    pub fn save_state(&self, now: u64) -> Result<Vec<u8>, Error> {
        let snapshot = FdcSnapshot {
            drive_0_path: path_record(&self.drives[0]),
            drive_1_path: path_record(&self.drives[1]),
            trigger: match self.trigger {
                None => TRIGGER_NEVER,
                Some(at) => at.saturating_sub(now) as i32,
            },
            result: self.result,
            status: self.status,
            data: self.data,
            scan_sector: self.scan_sector,
            scan_count: self.scan_count as u32,
            mode: self.mode,
            current_track: self.current_track,
            drive_control_output: self.drive_control_output,
            drive_control_input: self.drive_control_input,
            bad_tracks: [
                self.bad_tracks[0][0],
                self.bad_tracks[0][1],
                self.bad_tracks[1][0],
                self.bad_tracks[1][1],
            ],
            command: self.command.map_or(-1, |command| command as i32),
            param_count: self.param_count as i32,
            params_received: self.params_received as i32,
            params: self.params,
            heads: [
                self.drives[0].heads() as i32,
                self.drives[1].heads() as i32,
            ],
            select: [self.select[0] as i32, self.select[1] as i32],
            writeable: [
                self.drives[0].is_writeable() as i32,
                self.drives[1].is_writeable() as i32,
            ],
            first_write: self.xfer.first_write as i32,
            pending_error: match self.xfer.pending {
                Pending::None => 0,
                Pending::Error(code) => code as i32,
            },
            track_addr: self.xfer.track_addr as i32,
            current_sector: self.xfer.current_sector as i32,
            sector_length: self.xfer.sector_length as i32,
            sectors_to_go: self.xfer.sectors_to_go,
            byte_within_sector: self.xfer.byte_within_sector as i32,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(SNAPSHOT_LEN));
        snapshot.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Restore controller state from a record produced by `save_state`.
    pub fn load_state(&mut self, record: &[u8], now: u64) -> Result<(), Error> {
        let mut cursor = Cursor::new(record);
        let snapshot: FdcSnapshot = cursor.read_le()?;

        // Drop the current images first; a state saved mid-write must not
        // land on top of half-updated tracks.
        self.drives[0].eject();
        self.drives[1].eject();

        let mut any_loaded = false;
        let mut load_failed = false;

        for (drive_n, record) in [&snapshot.drive_0_path, &snapshot.drive_1_path]
            .into_iter()
            .enumerate()
        {
            if let Some(path) = record_path(record) {
                any_loaded = true;
                let result = if is_dsd(&path) {
                    self.drives[drive_n].load_dsd(&path)
                }
                else {
                    self.drives[drive_n].load_ssd(&path)
                };
                if let Err(e) = result {
                    log::warn!(
                        "state load: could not revive drive {} image {}: {:#}",
                        drive_n,
                        path.display(),
                        e
                    );
                    load_failed = true;
                }
            }
        }

        if !any_loaded || load_failed {
            log::debug!("state load: no drive images, register restore skipped");
            return Ok(());
        }

        self.trigger = if snapshot.trigger == TRIGGER_NEVER {
            None
        }
        else {
            Some(now + snapshot.trigger.max(0) as u64)
        };

        self.result = snapshot.result;
        self.status = snapshot.status;
        self.update_nmi();
        self.data = snapshot.data;
        self.scan_sector = snapshot.scan_sector;
        self.scan_count = snapshot.scan_count as u16;
        self.mode = snapshot.mode;
        self.current_track = snapshot.current_track;
        self.drive_control_output = snapshot.drive_control_output;
        self.drive_control_input = snapshot.drive_control_input;
        self.bad_tracks = [
            [snapshot.bad_tracks[0], snapshot.bad_tracks[1]],
            [snapshot.bad_tracks[2], snapshot.bad_tracks[3]],
        ];
        self.command = if snapshot.command < 0 {
            None
        }
        else {
            Some(snapshot.command as u8)
        };
        self.param_count = snapshot.param_count.max(0) as usize;
        self.params_received = (snapshot.params_received.max(0) as usize).min(self.params.len());
        self.params = snapshot.params;

        self.drives[0].set_heads(snapshot.heads[0] as u8);
        self.drives[1].set_heads(snapshot.heads[1] as u8);
        self.select = [snapshot.select[0] != 0, snapshot.select[1] != 0];
        self.drives[0].set_writeable(snapshot.writeable[0] != 0);
        self.drives[1].set_writeable(snapshot.writeable[1] != 0);

        self.xfer.first_write = snapshot.first_write != 0;
        self.xfer.pending = match snapshot.pending_error as u8 {
            0 => Pending::None,
            code => Pending::Error(code),
        };
        self.xfer.track_addr = snapshot.track_addr as u8;
        self.xfer.current_sector = snapshot.current_sector as u8;
        self.xfer.sector_length = snapshot.sector_length.max(0) as usize;
        self.xfer.sectors_to_go = snapshot.sectors_to_go;
        self.xfer.byte_within_sector = snapshot.byte_within_sector.max(0) as usize;

        // Re-resolve the transfer indices against the revived images.
        self.xfer.drive = self.selected_drive_index().unwrap_or(0);
        self.xfer.head = self.current_head();
        self.xfer.track_index = self.resolve_logical_track(self.xfer.track_addr);
        self.xfer.sector_index = match self.xfer.track_index {
            Some(track_n) => self.find_sector_by_id(
                self.xfer.drive,
                self.xfer.head,
                track_n,
                self.xfer.current_sector,
            ),
            None => None,
        };

        Ok(())
    }
}
