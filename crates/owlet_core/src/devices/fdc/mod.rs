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

    devices::fdc::mod.rs

    Intel 8271 Floppy Disc Controller

*/

pub mod controller;
pub mod motor;
pub mod snapshot;
pub mod transfer;

// Status register bits.
pub const STATUS_COMMAND_BUSY: u8 = 0x80;
pub const STATUS_COMMAND_FULL: u8 = 0x40;
pub const STATUS_PARAMETER_FULL: u8 = 0x20;
pub const STATUS_RESULT_FULL: u8 = 0x10;
pub const STATUS_INTERRUPT_REQUEST: u8 = 0x08;
pub const STATUS_NON_DMA_MODE: u8 = 0x04;

// Result register codes.
pub const RESULT_SUCCESS: u8 = 0x00;
pub const RESULT_SCAN_NOT_MET: u8 = 0x00;
pub const RESULT_SCAN_MET_EQUAL: u8 = 0x02;
pub const RESULT_SCAN_MET_NOT_EQUAL: u8 = 0x04;
pub const RESULT_CLOCK_ERROR: u8 = 0x08;
pub const RESULT_LATE_DMA: u8 = 0x0a;
pub const RESULT_ID_CRC_ERROR: u8 = 0x0c;
pub const RESULT_DATA_CRC_ERROR: u8 = 0x0e;
pub const RESULT_DRIVE_NOT_READY: u8 = 0x10;
pub const RESULT_WRITE_PROTECT: u8 = 0x12;
pub const RESULT_TRACK_0_NOT_FOUND: u8 = 0x14;
pub const RESULT_WRITE_FAULT: u8 = 0x16;
pub const RESULT_SECTOR_NOT_FOUND: u8 = 0x18;
// Undocumented; issued by the real part for several mid-command failures.
pub const RESULT_DRIVE_NOT_PRESENT: u8 = 0x1e;
pub const RESULT_DELETED_DATA_FOUND: u8 = 0x20;
pub const RESULT_DELETED_DATA_CRC_ERROR: u8 = 0x2e;

// Image-level error markers for sectors that must only read cleanly at one
// particular requested size.
pub const ERROR_TRAP_128: u8 = 0xe0;
pub const ERROR_TRAP_256: u8 = 0xe1;

// Special register numbers.
pub const SPECIAL_REG_SCAN_SECTOR_NUMBER: u8 = 0x06;
pub const SPECIAL_REG_SCAN_COUNT_MSB: u8 = 0x14;
pub const SPECIAL_REG_SCAN_COUNT_LSB: u8 = 0x13;
pub const SPECIAL_REG_SURFACE_0_CURRENT_TRACK: u8 = 0x12;
pub const SPECIAL_REG_SURFACE_1_CURRENT_TRACK: u8 = 0x1a;
pub const SPECIAL_REG_MODE_REGISTER: u8 = 0x17;
pub const SPECIAL_REG_DRIVE_CONTROL_OUTPUT_PORT: u8 = 0x23;
pub const SPECIAL_REG_DRIVE_CONTROL_INPUT_PORT: u8 = 0x22;
pub const SPECIAL_REG_SURFACE_0_BAD_TRACK_1: u8 = 0x10;
pub const SPECIAL_REG_SURFACE_0_BAD_TRACK_2: u8 = 0x11;
pub const SPECIAL_REG_SURFACE_1_BAD_TRACK_1: u8 = 0x18;
pub const SPECIAL_REG_SURFACE_1_BAD_TRACK_2: u8 = 0x19;

// One byte moves every 80µs at 2MHz.
pub const TIME_BETWEEN_BYTES: u64 = 160;

// Short delays before an error or a seek/verify completion interrupt.
pub const ERROR_DELAY: u64 = 50;
pub const SETTLE_DELAY: u64 = 100;

// Head/motor model timing.
pub const HEAD_UNLOAD_DELAY: u64 = 4_000_000; // ~2s of inactivity
pub const HEAD_LOAD_CYCLES: u64 = 400_000;
pub const HEAD_STEP_CYCLES: u64 = 100_000;
pub const HEAD_SEEK_CYCLES_PER_TRACK: u64 = 100_000;

/// The deferred-interrupt channel. An error posted here is delivered to the
/// host at the next scheduled tick instead of running the command's own
/// handler. Success, data-CRC and deleted-data codes never travel this way;
/// the tick dispatcher treats them as "no error pending".
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Pending {
    #[default]
    None,
    Error(u8),
}

/// Per-command transfer state. Track and sector are held as indices into the
/// mounted image, resolved through the image model on every access, so a
/// reload or eject can never leave a dangling reference.
#[derive(Clone, Debug, Default)]
pub struct TransferState {
    /// Track address parameter of the running command.
    pub track_addr: u8,
    /// Logical sector ID the command is currently on.
    pub current_sector: u8,
    /// Byte length of one record for this command.
    pub sector_length: usize,
    /// Records left. -1 flags the final result-pickup interrupt.
    pub sectors_to_go: i32,
    pub drive: usize,
    pub head: usize,
    pub track_index: Option<usize>,
    pub sector_index: Option<usize>,
    pub byte_within_sector: usize,
    /// The 8271 interrupts to request the first byte of a write before any
    /// byte is accepted.
    pub first_write: bool,
    pub pending: Pending,
}
