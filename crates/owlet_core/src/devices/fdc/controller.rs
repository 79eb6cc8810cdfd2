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

    devices::fdc::controller.rs

    Implements the Intel 8271 Floppy Disc Controller

*/

use std::collections::VecDeque;

use modular_bitfield::{bitfield, prelude::*};

use crate::{
    device_traits::drive_sound::DriveSoundSink,
    device_types::disc::{Sector, TRACKS_PER_DRIVE},
    devices::{disc_drive::DiscDrive, fdc::*},
    machine_config::FdcConfig,
};

pub const FDC_LOG_LEN: usize = 256;

/// Acorn DFS programs these timing defaults after a reset.
pub const DEFAULT_STEP_RATE: u8 = 12;
pub const DEFAULT_HEAD_SETTLING_TIME: u8 = 10;
pub const DEFAULT_INDEX_COUNT_BEFORE_UNLOAD: u8 = 12;
pub const DEFAULT_HEAD_LOAD_TIME: u8 = 8;

/// A command byte: six opcode bits plus the two drive select bits.
#[bitfield]
#[derive(Copy, Clone)]
pub struct CommandByte {
    pub opcode: B6,
    pub select_0: bool,
    pub select_1: bool,
}

/// The size/count parameter of the variable-length transfer commands:
/// a 5-bit record count and a 3-bit record length code.
#[bitfield]
#[derive(Copy, Clone)]
pub struct SectorCountByte {
    pub count: B5,
    pub size_code: B3,
}

/// The packed third parameter of the Specify initialisation sub-command.
#[bitfield]
#[derive(Copy, Clone)]
pub struct HeadTimingByte {
    pub head_load_time: B4,
    pub index_count: B4,
}

pub(crate) type CommandHandler = fn(&mut Intel8271, u64);

/// One decode-table entry. The host byte matches the first entry for which
/// `value & mask == opcode`; the terminal entry has a zero mask and matches
/// everything.
pub(crate) struct CommandEntry {
    pub opcode: u8,
    pub mask: u8,
    pub params: usize,
    pub setup: CommandHandler,
    pub tick: Option<CommandHandler>,
    pub name: &'static str,
}

#[rustfmt::skip]
pub(crate) const COMMAND_TABLE: &[CommandEntry] = &[
    CommandEntry { opcode: 0x00, mask: 0x3f, params: 3, setup: Intel8271::command_unsupported,       tick: None,                                   name: "Scan Data (Variable Length/Multi-Record)" },
    CommandEntry { opcode: 0x04, mask: 0x3f, params: 3, setup: Intel8271::command_unsupported,       tick: None,                                   name: "Scan Data & Deleted Data (Variable Length/Multi-Record)" },
    CommandEntry { opcode: 0x0a, mask: 0x3f, params: 2, setup: Intel8271::command_unsupported,       tick: None,                                   name: "Write Data (128 Byte/Single Record)" },
    CommandEntry { opcode: 0x0b, mask: 0x3f, params: 3, setup: Intel8271::command_write_data,        tick: Some(Intel8271::operation_write),       name: "Write Data (Variable Length/Multi-Record)" },
    CommandEntry { opcode: 0x0e, mask: 0x3f, params: 2, setup: Intel8271::command_unsupported,       tick: None,                                   name: "Write Deleted Data (128 Byte/Single Record)" },
    CommandEntry { opcode: 0x0f, mask: 0x3f, params: 3, setup: Intel8271::command_unsupported,       tick: None,                                   name: "Write Deleted Data (Variable Length/Multi-Record)" },
    CommandEntry { opcode: 0x12, mask: 0x3f, params: 2, setup: Intel8271::command_unsupported,       tick: None,                                   name: "Read Data (128 Byte/Single Record)" },
    CommandEntry { opcode: 0x13, mask: 0x3f, params: 3, setup: Intel8271::command_read_data,         tick: Some(Intel8271::operation_read),        name: "Read Data (Variable Length/Multi-Record)" },
    CommandEntry { opcode: 0x16, mask: 0x3f, params: 2, setup: Intel8271::command_read_128,          tick: Some(Intel8271::operation_read_128),    name: "Read Data & Deleted Data (128 Byte/Single Record)" },
    CommandEntry { opcode: 0x17, mask: 0x3f, params: 3, setup: Intel8271::command_read_data,         tick: Some(Intel8271::operation_read),        name: "Read Data & Deleted Data (Variable Length/Multi-Record)" },
    CommandEntry { opcode: 0x1b, mask: 0x3f, params: 3, setup: Intel8271::command_read_id,           tick: Some(Intel8271::operation_read_id),     name: "Read ID" },
    CommandEntry { opcode: 0x1e, mask: 0x3f, params: 2, setup: Intel8271::command_unsupported,       tick: None,                                   name: "Verify Data & Deleted Data (128 Byte/Single Record)" },
    CommandEntry { opcode: 0x1f, mask: 0x3f, params: 3, setup: Intel8271::command_verify,            tick: Some(Intel8271::operation_verify),      name: "Verify Data & Deleted Data (Variable Length/Multi-Record)" },
    CommandEntry { opcode: 0x23, mask: 0x3f, params: 5, setup: Intel8271::command_format,            tick: Some(Intel8271::operation_format),      name: "Format" },
    CommandEntry { opcode: 0x29, mask: 0x3f, params: 1, setup: Intel8271::command_seek,              tick: Some(Intel8271::operation_seek),        name: "Seek" },
    CommandEntry { opcode: 0x2c, mask: 0x3f, params: 0, setup: Intel8271::command_read_drive_status, tick: None,                                   name: "Read Drive Status" },
    CommandEntry { opcode: 0x35, mask: 0xff, params: 4, setup: Intel8271::command_specify,           tick: None,                                   name: "Specify" },
    CommandEntry { opcode: 0x3a, mask: 0x3f, params: 2, setup: Intel8271::command_write_special,     tick: None,                                   name: "Write Special Register" },
    CommandEntry { opcode: 0x3d, mask: 0x3f, params: 1, setup: Intel8271::command_read_special,      tick: None,                                   name: "Read Special Register" },
    CommandEntry { opcode: 0x00, mask: 0x00, params: 0, setup: Intel8271::command_bad,               tick: None,                                   name: "Unknown Command" },
];

pub(crate) fn lookup_command(value: u8) -> &'static CommandEntry {
    COMMAND_TABLE
        .iter()
        .find(|entry| (value & entry.mask) == entry.opcode)
        .unwrap_or(&COMMAND_TABLE[COMMAND_TABLE.len() - 1])
}

/// Bounded log of recently dispatched commands, surfaced by the debug state.
pub(crate) struct CommandLog {
    entries: VecDeque<String>,
}

impl CommandLog {
    fn new() -> Self {
        CommandLog {
            entries: VecDeque::with_capacity(FDC_LOG_LEN),
        }
    }

    pub(crate) fn push(&mut self, entry: String) {
        if self.entries.len() == FDC_LOG_LEN {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn as_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Register and model state snapshot for a debugger view.
pub struct FdcDebugState {
    pub status: u8,
    pub result: u8,
    pub data: u8,
    pub command: Option<u8>,
    pub command_name: &'static str,
    pub params: Vec<u8>,
    pub select: [bool; 2],
    pub scan_sector: u8,
    pub scan_count: u16,
    pub mode: u8,
    pub current_track: [u8; 2],
    pub drive_control_output: u8,
    pub drive_control_input: u8,
    pub bad_tracks: [[u8; 2]; 2],
    pub step_rate: u8,
    pub head_settling_time: u8,
    pub index_count_before_unload: u8,
    pub head_load_time: u8,
    pub physical_track: u8,
    pub logical_track: u8,
    pub position_in_track: u8,
    pub trigger: Option<u64>,
    pub pending: Pending,
    pub leds: [bool; 2],
    pub cmd_log: Vec<String>,
}

pub struct Intel8271 {
    pub(crate) config: FdcConfig,
    pub(crate) enabled: bool,

    pub(crate) result: u8,
    pub(crate) status: u8,
    pub(crate) data: u8,

    /// The raw latched command byte, select bits included.
    pub(crate) command: Option<u8>,
    pub(crate) param_count: usize,
    pub(crate) params_received: usize,
    pub(crate) params: [u8; 16],

    /// Which drives the last command selected. Cleared when the motor stops,
    /// doubling as the "drive ready" state.
    pub(crate) select: [bool; 2],

    pub(crate) scan_sector: u8,
    pub(crate) scan_count: u16,
    pub(crate) mode: u8,
    pub(crate) current_track: [u8; 2],
    pub(crate) drive_control_output: u8,
    pub(crate) drive_control_input: u8,
    pub(crate) bad_tracks: [[u8; 2]; 2],

    // Timing parameters from the Specify command. Recorded for the host to
    // read back; the transfer engine uses its own cycle constants.
    pub(crate) step_rate: u8,
    pub(crate) head_settling_time: u8,
    pub(crate) index_count_before_unload: u8,
    pub(crate) head_load_time: u8,

    // Head positioning. Shared across both drives, as on the real board.
    pub(crate) physical_track: u8,
    pub(crate) logical_track: u8,
    pub(crate) position_in_track: u8,
    pub(crate) using_special: bool,
    /// Drive-status reads since the last seek or track write. More than one
    /// in a row means the host is starting over rather than re-reading.
    pub(crate) drdsc: u8,
    pub(crate) sector_over_read: bool,

    pub(crate) xfer: TransferState,

    pub(crate) drives: [DiscDrive; 2],

    /// Absolute cycle of the next controller event, None when idle.
    pub(crate) trigger: Option<u64>,
    pub(crate) nmi: bool,

    pub(crate) head_loaded: bool,
    pub(crate) unload_pending: bool,
    pub(crate) head_position: [u8; 2],
    pub(crate) leds: [bool; 2],
    pub(crate) sound: Option<Box<dyn DriveSoundSink>>,

    pub(crate) cmd_log: CommandLog,
}

impl Default for Intel8271 {
    fn default() -> Self {
        Self::new(FdcConfig::default())
    }
}

impl Intel8271 {
    pub fn new(config: FdcConfig) -> Self {
        let mut fdc = Intel8271 {
            config,
            enabled: config.enabled,
            result: 0,
            status: 0,
            data: 0,
            command: None,
            param_count: 0,
            params_received: 0,
            params: [0; 16],
            select: [false, false],
            scan_sector: 0,
            scan_count: 0,
            mode: 0,
            current_track: [0, 0],
            drive_control_output: 0,
            drive_control_input: 0,
            bad_tracks: [[0xff; 2]; 2],
            step_rate: DEFAULT_STEP_RATE,
            head_settling_time: DEFAULT_HEAD_SETTLING_TIME,
            index_count_before_unload: DEFAULT_INDEX_COUNT_BEFORE_UNLOAD,
            head_load_time: DEFAULT_HEAD_LOAD_TIME,
            physical_track: 0,
            logical_track: 0,
            position_in_track: 0,
            using_special: false,
            drdsc: 0,
            sector_over_read: false,
            xfer: TransferState::default(),
            drives: [DiscDrive::new(0), DiscDrive::new(1)],
            trigger: None,
            nmi: false,
            head_loaded: false,
            unload_pending: false,
            head_position: [0, 0],
            leds: [false, false],
            sound: None,
            cmd_log: CommandLog::new(),
        };
        fdc.reset();
        fdc
    }

    /// Reset the controller. Any in-flight command is discarded without
    /// notifying the host; mounted discs are untouched.
    pub fn reset(&mut self) {
        self.result = RESULT_SUCCESS;
        self.status = 0;
        self.update_nmi();

        self.scan_sector = 0;
        self.scan_count = 0;
        self.mode = 0;
        self.current_track = [0, 0];
        self.using_special = false;
        self.drive_control_output = 0;
        self.drive_control_input = 0;
        self.bad_tracks = [[0xff; 2]; 2];

        self.step_rate = DEFAULT_STEP_RATE;
        self.head_settling_time = DEFAULT_HEAD_SETTLING_TIME;
        self.index_count_before_unload = DEFAULT_INDEX_COUNT_BEFORE_UNLOAD;
        self.head_load_time = DEFAULT_HEAD_LOAD_TIME;

        if self.head_loaded {
            self.unload_pending = true;
            self.motor_update(0);
        }

        self.clear_trigger();

        self.command = None;
        self.param_count = 0;
        self.params_received = 0;
        self.select = [false, false];
        self.xfer = TransferState::default();

        self.cmd_log.clear();
        self.log_str("FDC reset");
    }

    /// Enable or disable the controller's register window. A disabled
    /// controller reads as 0xFF and ignores writes.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn attach_sound_sink(&mut self, sink: Box<dyn DriveSoundSink>) {
        self.sound = Some(sink);
    }

    pub fn drive(&self, drive_n: usize) -> &DiscDrive {
        &self.drives[drive_n & 1]
    }

    pub fn drive_mut(&mut self, drive_n: usize) -> &mut DiscDrive {
        &mut self.drives[drive_n & 1]
    }

    /// State of the host-visible NMI line.
    pub fn nmi(&self) -> bool {
        self.nmi
    }

    /// Absolute cycle at which the controller next needs a tick, if any.
    pub fn trigger(&self) -> Option<u64> {
        self.trigger
    }

    pub fn leds(&self) -> [bool; 2] {
        self.leds
    }

    /// Run the controller if its trigger has come due. Returns true if a
    /// tick was taken.
    pub fn poll(&mut self, now: u64) -> bool {
        match self.trigger {
            Some(t) if now >= t => {
                self.tick(now);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_trigger(&mut self, now: u64, delay: u64) {
        self.trigger = Some(now + delay);
    }

    pub(crate) fn clear_trigger(&mut self) {
        self.trigger = None;
    }

    pub(crate) fn update_nmi(&mut self) {
        self.nmi = self.status & STATUS_INTERRUPT_REQUEST != 0;
    }

    /// Host read of the register window. Offsets 0, 1 and 4 decode to the
    /// status, result and data registers; everything else reads as zero.
    pub fn read(&mut self, reg: u8) -> u8 {
        if !self.enabled {
            return 0xff;
        }

        match reg {
            0 => self.status,
            1 => {
                self.status &= !(STATUS_RESULT_FULL | STATUS_INTERRUPT_REQUEST);
                self.update_nmi();
                let value = self.result;
                // The register reads back as zero once collected.
                self.result = RESULT_SUCCESS;
                value
            }
            4 => {
                // DFS never looks at the result register during a transfer;
                // collecting the data byte acknowledges the interrupt.
                self.status &= !(STATUS_INTERRUPT_REQUEST | STATUS_NON_DMA_MODE);
                self.update_nmi();
                self.data
            }
            _ => 0,
        }
    }

    /// Host write of the register window.
    pub fn write(&mut self, reg: u8, value: u8, now: u64) {
        if !self.enabled {
            return;
        }

        // Activity cancels a pending head unload.
        if self.unload_pending {
            self.unload_pending = false;
            self.clear_trigger();
        }

        match reg {
            0 => self.command_register_write(value, now),
            1 => self.parameter_register_write(value, now),
            2 => {
                // The host is meant to pulse this line; resetting on every
                // edge is close enough.
                self.reset();
            }
            4 => {
                self.status &= !(STATUS_INTERRUPT_REQUEST | STATUS_NON_DMA_MODE);
                self.update_nmi();
                self.data = value;
            }
            _ => {}
        }

        self.schedule_head_unload(now);
    }

    fn command_register_write(&mut self, value: u8, now: u64) {
        let entry = lookup_command(value);
        log::trace!("command register write {:02X} ({})", value, entry.name);

        self.command = Some(value);
        self.param_count = entry.params;
        self.params_received = 0;

        // Busy and result-full both come up on command acceptance, as
        // observed on hardware for Read Special Register.
        self.status |= STATUS_COMMAND_BUSY | STATUS_RESULT_FULL;
        self.update_nmi();

        if entry.params == 0 {
            self.status &= 0x7e;
            self.update_nmi();
            self.log_command(entry);
            (entry.setup)(self, now);
        }
    }

    fn parameter_register_write(&mut self, value: u8, now: u64) {
        if self.params_received >= self.param_count {
            log::warn!("unwanted parameter register write: {:02X}", value);
            return;
        }

        self.params[self.params_received] = value;
        self.params_received += 1;

        self.status &= 0xfe;
        self.update_nmi();

        if self.params_received >= self.param_count {
            self.status &= 0x7e;
            self.update_nmi();

            let entry = lookup_command(self.command.unwrap_or(0));
            self.log_command(entry);
            (entry.setup)(self, now);
        }
    }

    fn log_command(&mut self, entry: &CommandEntry) {
        let line = format!(
            "{}: {:02X?}",
            entry.name,
            &self.params[..self.params_received]
        );
        log::trace!("{}", line);
        self.cmd_log.push(line);
    }

    pub(crate) fn log_str(&mut self, s: &str) {
        log::trace!("{}", s);
        self.cmd_log.push(s.to_string());
    }

    /// Mirror the select bits of the latched command into the select flags
    /// and the drive control output port.
    pub(crate) fn do_selects(&mut self) {
        let Some(command) = self.command else {
            return;
        };
        let byte = CommandByte::from_bytes([command]);

        self.select = [byte.select_0(), byte.select_1()];

        self.drive_control_output &= 0x3f;
        if self.select[0] {
            self.drive_control_output |= 0x40;
        }
        if self.select[1] {
            self.drive_control_output |= 0x80;
        }
    }

    /// Drive 0 wins if both select bits are set.
    pub(crate) fn selected_drive_index(&self) -> Option<usize> {
        if self.select[0] {
            Some(0)
        }
        else if self.select[1] {
            Some(1)
        }
        else {
            None
        }
    }

    /// Head select comes from bit 5 of the drive control output port.
    pub(crate) fn current_head(&self) -> usize {
        ((self.drive_control_output >> 5) & 1) as usize
    }

    /// Post an error: the next scheduled tick reports it and completes the
    /// command.
    pub(crate) fn abort_command(&mut self, error: u8, now: u64) {
        self.set_trigger(now, ERROR_DELAY);
        self.xfer.pending = Pending::Error(error);
        self.status = STATUS_COMMAND_BUSY;
        self.update_nmi();
    }

    /// Resolve a host-supplied logical track to a physical track, scanning a
    /// two-track window from the current head position. The controller
    /// cannot seek further than that in the middle of a transfer command.
    pub(crate) fn resolve_logical_track(&mut self, logical_track: u8) -> Option<usize> {
        let drive = self.selected_drive_index()?;
        let head = self.current_head();

        let start = self.physical_track as usize;
        for track_n in start..(start + 2).min(TRACKS_PER_DRIVE) {
            let track = self.drives[drive].track(head, track_n);
            // An unformatted candidate ends the search.
            let first = track.sectors.first()?;
            if first.id.logical_track == logical_track {
                self.physical_track = track_n as u8;
                return Some(track_n);
            }
        }

        None
    }

    /// Find a sector by the logical sector number in its ID field, scanning
    /// from the current rotational position and wrapping. Repeated logical
    /// IDs on a track resolve to successive stored sectors this way. Returns
    /// the matched sector's record index.
    pub(crate) fn find_sector_by_id(
        &mut self,
        drive: usize,
        head: usize,
        track_n: usize,
        logical_sector: u8,
    ) -> Option<usize> {
        let track = self.drives[drive].track(head, track_n);
        let n_sectors = track.n_sectors();
        let pos = (self.position_in_track as usize).min(n_sectors);

        for i in pos..n_sectors {
            if track.sectors[i].id.logical_sector == logical_sector {
                let record = track.sectors[i].record;
                self.position_in_track = record;
                return Some(record as usize);
            }
        }

        for i in 0..pos {
            if track.sectors[i].id.logical_sector == logical_sector {
                let record = track.sectors[i].record;
                self.position_in_track = i as u8;
                return Some(record as usize);
            }
        }

        None
    }

    /// Record index of the sector at the current rotational position. Read
    /// ID reports fields in physical order.
    pub(crate) fn sector_for_read_id(
        &self,
        drive: usize,
        head: usize,
        track_n: usize,
    ) -> Option<usize> {
        let track = self.drives[drive].track(head, track_n);
        let record = track.sectors.get(self.position_in_track as usize)?.record;
        Some(record as usize)
    }

    pub(crate) fn current_sector(&self) -> Option<&Sector> {
        let track_n = self.xfer.track_index?;
        let sector_n = self.xfer.sector_index?;
        self.drives[self.xfer.drive]
            .track(self.xfer.head, track_n)
            .sectors
            .get(sector_n)
    }

    pub(crate) fn current_sector_mut(&mut self) -> Option<&mut Sector> {
        let track_n = self.xfer.track_index?;
        let sector_n = self.xfer.sector_index?;
        self.drives[self.xfer.drive]
            .track_mut(self.xfer.head, track_n)
            .sectors
            .get_mut(sector_n)
    }

    /// Move the transfer to the given logical sector on the current track.
    pub(crate) fn advance_to_sector(&mut self, logical_sector: u8) -> bool {
        let Some(track_n) = self.xfer.track_index else {
            return false;
        };
        match self.find_sector_by_id(self.xfer.drive, self.xfer.head, track_n, logical_sector) {
            Some(record) => {
                self.xfer.sector_index = Some(record);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Command setup handlers
    // ------------------------------------------------------------------

    pub(crate) fn command_bad(&mut self, _now: u64) {}

    pub(crate) fn command_unsupported(&mut self, _now: u64) {
        self.do_selects();
        let entry = lookup_command(self.command.unwrap_or(0));
        log::error!("disc operation '{}' not supported", entry.name);
    }

    /// Read Data, and Read Data & Deleted Data, variable length.
    pub(crate) fn command_read_data(&mut self, now: u64) {
        self.do_selects();
        self.load_head();

        self.sector_over_read = false;

        let Some(drive) = self.selected_drive_index() else {
            self.abort_command(RESULT_DRIVE_NOT_READY, now);
            return;
        };

        // When the special register points the controller elsewhere the
        // head stays where it is.
        if !self.using_special {
            self.physical_track = self.params[0];
        }

        // A new logical track restarts the rotational position.
        if self.logical_track != self.params[0] {
            self.position_in_track = 0;
        }
        self.logical_track = self.params[0];

        // Repeated drive-status polls since the last seek mean the host
        // gave up on the old position; restart the search from track 0.
        if self.drdsc > 1 {
            self.physical_track = 0;
        }
        self.drdsc = 0;

        if self.physical_track == 0 {
            self.physical_track = self.logical_track;
        }

        if self.logical_track == self.physical_track {
            self.using_special = false;
        }

        let head = self.current_head();

        let Some(track_index) = self.resolve_logical_track(self.logical_track) else {
            self.abort_command(RESULT_SECTOR_NOT_FOUND, now);
            return;
        };

        if !self.drives[drive].track(head, track_index).readable {
            self.abort_command(RESULT_SECTOR_NOT_FOUND, now);
            return;
        }

        self.xfer.drive = drive;
        self.xfer.head = head;
        self.xfer.track_index = Some(track_index);

        let Some(sector_index) = self.find_sector_by_id(drive, head, track_index, self.params[1])
        else {
            self.abort_command(RESULT_SECTOR_NOT_FOUND, now);
            return;
        };
        self.xfer.sector_index = Some(sector_index);

        let count = SectorCountByte::from_bytes([self.params[2]]);
        let sector_length = 1usize << (7 + count.size_code() as usize);

        let (error, real_size, id_sector) = {
            let sector = &self.drives[drive].track(head, track_index).sectors[sector_index];
            (sector.error, sector.real_size, sector.id.logical_sector)
        };

        // Over-reading a 128-byte trap sector 9 must fail outright (3D Pool).
        if error == ERROR_TRAP_128 && id_sector == 0x09 && sector_length > real_size {
            self.abort_command(RESULT_SECTOR_NOT_FOUND, now);
            return;
        }

        self.xfer.track_addr = self.params[0];
        self.xfer.current_sector = self.params[1];
        self.xfer.sectors_to_go = count.count() as i32;
        self.xfer.sector_length = sector_length;

        // Asking for more than the sector holds is reported in the result,
        // not refused (Disc Duplicator 3).
        if self.xfer.sector_length > real_size {
            self.xfer.sector_length = real_size;
            self.sector_over_read = true;
        }

        self.xfer.byte_within_sector = 0;
        self.set_trigger(now, TIME_BETWEEN_BYTES);
        self.status = STATUS_COMMAND_BUSY;
        self.update_nmi();
    }

    /// Read Data & Deleted Data, 128 byte single record.
    pub(crate) fn command_read_128(&mut self, now: u64) {
        self.do_selects();
        self.load_head();

        let Some(drive) = self.selected_drive_index() else {
            self.abort_command(RESULT_DRIVE_NOT_READY, now);
            return;
        };

        if !self.using_special {
            self.physical_track = self.params[0];
        }

        self.current_track[drive] = self.params[0];

        if self.current_track[drive] == 0 {
            self.physical_track = 0;
        }

        let head = self.current_head();

        let Some(track_index) = self.resolve_logical_track(self.params[0]) else {
            self.abort_command(RESULT_DRIVE_NOT_READY, now);
            return;
        };

        if !self.drives[drive].track(head, track_index).readable {
            self.abort_command(RESULT_SECTOR_NOT_FOUND, now);
            return;
        }

        self.xfer.drive = drive;
        self.xfer.head = head;
        self.xfer.track_index = Some(track_index);

        let Some(sector_index) = self.find_sector_by_id(drive, head, track_index, self.params[1])
        else {
            self.abort_command(RESULT_SECTOR_NOT_FOUND, now);
            return;
        };
        self.xfer.sector_index = Some(sector_index);

        self.xfer.track_addr = self.params[0];
        self.xfer.current_sector = self.params[1];
        self.xfer.sectors_to_go = 1;
        self.xfer.sector_length = 0x80;

        self.xfer.byte_within_sector = 0;
        self.set_trigger(now, TIME_BETWEEN_BYTES);
        self.status = STATUS_COMMAND_BUSY;
        self.update_nmi();
    }

    /// Write Data, variable length.
    pub(crate) fn command_write_data(&mut self, now: u64) {
        self.do_selects();
        self.load_head();

        let Some(drive) = self.selected_drive_index() else {
            self.abort_command(RESULT_DRIVE_NOT_READY, now);
            return;
        };

        if !self.drives[drive].is_writeable() {
            self.abort_command(RESULT_WRITE_PROTECT, now);
            return;
        }

        self.current_track[drive] = self.params[0];

        let head = self.current_head();

        let Some(track_index) = self.resolve_logical_track(self.params[0]) else {
            self.abort_command(RESULT_SECTOR_NOT_FOUND, now);
            return;
        };

        self.xfer.drive = drive;
        self.xfer.head = head;
        self.xfer.track_index = Some(track_index);

        let Some(sector_index) = self.find_sector_by_id(drive, head, track_index, self.params[1])
        else {
            self.abort_command(RESULT_DRIVE_NOT_PRESENT, now);
            return;
        };
        self.xfer.sector_index = Some(sector_index);

        let count = SectorCountByte::from_bytes([self.params[2]]);

        self.xfer.track_addr = self.params[0];
        self.xfer.current_sector = self.params[1];
        self.xfer.sectors_to_go = count.count() as i32;
        self.xfer.sector_length = 1usize << (7 + count.size_code() as usize);

        self.xfer.byte_within_sector = 0;
        self.xfer.first_write = true;
        self.set_trigger(now, TIME_BETWEEN_BYTES);
        self.status = STATUS_COMMAND_BUSY;
        self.update_nmi();
    }

    /// Read ID. Fields are reported in the order they are physically stored.
    pub(crate) fn command_read_id(&mut self, now: u64) {
        self.do_selects();
        self.load_head();

        let Some(drive) = self.selected_drive_index() else {
            self.abort_command(RESULT_DRIVE_NOT_READY, now);
            return;
        };

        let head = self.current_head();

        // The track parameter is taken as a physical track id, and the
        // rotational position restarts at the index hole.
        self.position_in_track = 0;
        self.physical_track = self.params[0];
        let track_index = (self.params[0] as usize).min(TRACKS_PER_DRIVE - 1);

        self.xfer.drive = drive;
        self.xfer.head = head;
        self.xfer.track_index = Some(track_index);

        let Some(sector_index) = self.sector_for_read_id(drive, head, track_index) else {
            self.abort_command(RESULT_SECTOR_NOT_FOUND, now);
            return;
        };
        self.xfer.sector_index = Some(sector_index);

        self.xfer.track_addr = self.params[0];
        self.xfer.current_sector = 0;
        self.xfer.sectors_to_go = self.params[2] as i32;
        if self.xfer.sectors_to_go == 0 {
            self.xfer.sectors_to_go = 0x20;
        }

        self.xfer.byte_within_sector = 0;
        self.set_trigger(now, TIME_BETWEEN_BYTES);
        self.status = STATUS_COMMAND_BUSY;
        self.update_nmi();
    }

    /// Verify Data & Deleted Data, variable length. The sector is resolved
    /// but no data moves; a short delay later the command reports success.
    pub(crate) fn command_verify(&mut self, now: u64) {
        self.do_selects();

        let Some(drive) = self.selected_drive_index() else {
            self.abort_command(RESULT_DRIVE_NOT_READY, now);
            return;
        };

        self.current_track[drive] = self.params[0];
        self.physical_track = self.params[0];
        self.logical_track = self.params[0];

        let head = self.current_head();

        let Some(track_index) = self.resolve_logical_track(self.logical_track) else {
            self.abort_command(RESULT_DRIVE_NOT_READY, now);
            return;
        };

        self.xfer.drive = drive;
        self.xfer.head = head;
        self.xfer.track_index = Some(track_index);

        let Some(sector_index) = self.find_sector_by_id(drive, head, track_index, self.params[1])
        else {
            self.abort_command(RESULT_DRIVE_NOT_PRESENT, now);
            return;
        };
        self.xfer.sector_index = Some(sector_index);

        self.result = self.drives[drive].track(head, track_index).sectors[sector_index].error;

        if self.result != 0 {
            self.status = self.result;
        }
        else {
            self.status = STATUS_COMMAND_BUSY;
        }
        self.update_nmi();
        self.set_trigger(now, SETTLE_DELAY);
    }

    /// Format. Only the standard 10 × 256 byte geometry is implemented.
    pub(crate) fn command_format(&mut self, now: u64) {
        self.do_selects();
        self.load_head();

        let Some(drive) = self.selected_drive_index() else {
            self.abort_command(RESULT_DRIVE_NOT_READY, now);
            return;
        };

        if !self.drives[drive].is_writeable() {
            self.abort_command(RESULT_WRITE_PROTECT, now);
            return;
        }

        self.current_track[drive] = self.params[0];

        let head = self.current_head();

        let Some(track_index) = self.resolve_logical_track(self.params[0]) else {
            self.abort_command(RESULT_DRIVE_NOT_READY, now);
            return;
        };

        self.xfer.drive = drive;
        self.xfer.head = head;
        self.xfer.track_index = Some(track_index);

        let Some(sector_index) = self.find_sector_by_id(drive, head, track_index, 0) else {
            self.abort_command(RESULT_DRIVE_NOT_PRESENT, now);
            return;
        };
        self.xfer.sector_index = Some(sector_index);

        let count = SectorCountByte::from_bytes([self.params[2]]);

        self.xfer.track_addr = self.params[0];
        self.xfer.current_sector = 0;
        self.xfer.sectors_to_go = count.count() as i32;
        self.xfer.sector_length = 1usize << (7 + count.size_code() as usize);

        if self.xfer.sectors_to_go == 10 && self.xfer.sector_length == 256 {
            {
                let track = self.drives[drive].track_mut(head, track_index);
                track.logical_sectors = count.count();
                track.gap3 = self.params[1];
                track.gap5 = self.params[3];
                track.gap1 = self.params[4];
            }
            self.xfer.byte_within_sector = 0;
            self.xfer.first_write = true;
            self.set_trigger(now, TIME_BETWEEN_BYTES);
            self.status = STATUS_COMMAND_BUSY;
            self.update_nmi();
        }
        else {
            self.abort_command(RESULT_DRIVE_NOT_PRESENT, now);
        }
    }

    /// Seek. The head position updates immediately; a short delay later the
    /// command reports success.
    pub(crate) fn command_seek(&mut self, now: u64) {
        self.do_selects();
        self.load_head();

        let Some(drive) = self.selected_drive_index() else {
            self.abort_command(RESULT_DRIVE_NOT_READY, now);
            return;
        };

        self.drdsc = 0;
        self.current_track[drive] = self.params[0];
        self.physical_track = self.params[0];
        self.using_special = false;
        self.position_in_track = 0;

        self.status = STATUS_COMMAND_BUSY;
        self.update_nmi();
        self.set_trigger(now, SETTLE_DELAY);
    }

    /// Read Drive Status. Completes immediately with a drive state bitfield.
    pub(crate) fn command_read_drive_status(&mut self, _now: u64) {
        let mut track_0 = false;
        let mut write_protected = false;

        let command = self.command.unwrap_or(0);

        if command & 0x40 != 0 {
            track_0 = self.current_track[0] == 0;
            write_protected = !self.drives[0].is_writeable();
        }

        if command & 0x80 != 0 {
            track_0 = self.current_track[1] == 0;
            write_protected = !self.drives[1].is_writeable();
        }

        self.drdsc = self.drdsc.wrapping_add(1);

        self.result = 0x80
            | if self.select[1] { 0x40 } else { 0 }
            | if write_protected { 0x08 } else { 0 }
            | if self.select[0] { 0x04 } else { 0 }
            | if track_0 { 0x02 } else { 0 };

        self.status |= STATUS_RESULT_FULL;
        self.update_nmi();
    }

    /// Specify. Sub-command in the first parameter.
    pub(crate) fn command_specify(&mut self, _now: u64) {
        match self.params[0] {
            0x0d => {
                // Initialisation: timing parameters.
                let timing = HeadTimingByte::from_bytes([self.params[3]]);
                self.step_rate = self.params[1];
                self.head_settling_time = self.params[2];
                self.index_count_before_unload = timing.index_count();
                self.head_load_time = timing.head_load_time();
            }
            0x10 => {
                // Load bad tracks, surface 0.
                self.bad_tracks[0][0] = self.params[1];
                self.bad_tracks[0][1] = self.params[2];
                self.current_track[0] = self.params[3];
            }
            0x18 => {
                // Load bad tracks, surface 1.
                self.bad_tracks[1][0] = self.params[1];
                self.bad_tracks[1][1] = self.params[2];
                self.current_track[1] = self.params[3];
            }
            _ => {
                log::warn!("specify: unknown sub-command {:02X}", self.params[0]);
            }
        }
    }

    pub(crate) fn command_write_special(&mut self, _now: u64) {
        self.do_selects();

        let value = self.params[1];

        match self.params[0] {
            SPECIAL_REG_SCAN_SECTOR_NUMBER => self.scan_sector = value,
            SPECIAL_REG_SCAN_COUNT_MSB => {
                self.scan_count = (self.scan_count & 0x00ff) | ((value as u16) << 8);
            }
            SPECIAL_REG_SCAN_COUNT_LSB => {
                self.scan_count = (self.scan_count & 0xff00) | value as u16;
            }
            SPECIAL_REG_SURFACE_0_CURRENT_TRACK => {
                self.current_track[0] = value;
                self.logical_track = value;
                // The host now believes the head is somewhere it may not be.
                self.using_special = value != self.physical_track;
                self.drdsc = 0;
            }
            SPECIAL_REG_SURFACE_1_CURRENT_TRACK => self.current_track[1] = value,
            SPECIAL_REG_MODE_REGISTER => self.mode = value,
            SPECIAL_REG_DRIVE_CONTROL_OUTPUT_PORT => {
                self.drive_control_output = value;
                self.select[0] = value & 0x40 != 0;
                self.select[1] = value & 0x80 != 0;
            }
            SPECIAL_REG_DRIVE_CONTROL_INPUT_PORT => self.drive_control_input = value,
            SPECIAL_REG_SURFACE_0_BAD_TRACK_1 => self.bad_tracks[0][0] = value,
            SPECIAL_REG_SURFACE_0_BAD_TRACK_2 => self.bad_tracks[0][1] = value,
            SPECIAL_REG_SURFACE_1_BAD_TRACK_1 => self.bad_tracks[1][0] = value,
            SPECIAL_REG_SURFACE_1_BAD_TRACK_2 => self.bad_tracks[1][1] = value,
            _ => {
                log::warn!("write to bad special register {:02X}", self.params[0]);
            }
        }
    }

    pub(crate) fn command_read_special(&mut self, _now: u64) {
        self.do_selects();

        self.result = match self.params[0] {
            SPECIAL_REG_SCAN_SECTOR_NUMBER => self.scan_sector,
            SPECIAL_REG_SCAN_COUNT_MSB => (self.scan_count >> 8) as u8,
            SPECIAL_REG_SCAN_COUNT_LSB => self.scan_count as u8,
            SPECIAL_REG_SURFACE_0_CURRENT_TRACK => self.current_track[0],
            SPECIAL_REG_SURFACE_1_CURRENT_TRACK => self.current_track[1],
            SPECIAL_REG_MODE_REGISTER => self.mode,
            SPECIAL_REG_DRIVE_CONTROL_OUTPUT_PORT => self.drive_control_output,
            SPECIAL_REG_DRIVE_CONTROL_INPUT_PORT => self.drive_control_input,
            SPECIAL_REG_SURFACE_0_BAD_TRACK_1 => self.bad_tracks[0][0],
            SPECIAL_REG_SURFACE_0_BAD_TRACK_2 => self.bad_tracks[0][1],
            SPECIAL_REG_SURFACE_1_BAD_TRACK_1 => self.bad_tracks[1][0],
            SPECIAL_REG_SURFACE_1_BAD_TRACK_2 => self.bad_tracks[1][1],
            _ => {
                log::warn!("read of bad special register {:02X}", self.params[0]);
                return;
            }
        };

        self.status |= STATUS_RESULT_FULL;
        self.update_nmi();
    }

    pub fn get_debug_state(&self) -> FdcDebugState {
        FdcDebugState {
            status: self.status,
            result: self.result,
            data: self.data,
            command: self.command,
            command_name: self
                .command
                .map_or("None", |command| lookup_command(command).name),
            params: self.params[..self.params_received].to_vec(),
            select: self.select,
            scan_sector: self.scan_sector,
            scan_count: self.scan_count,
            mode: self.mode,
            current_track: self.current_track,
            drive_control_output: self.drive_control_output,
            drive_control_input: self.drive_control_input,
            bad_tracks: self.bad_tracks,
            step_rate: self.step_rate,
            head_settling_time: self.head_settling_time,
            index_count_before_unload: self.index_count_before_unload,
            head_load_time: self.head_load_time,
            physical_track: self.physical_track,
            logical_track: self.logical_track,
            position_in_track: self.position_in_track,
            trigger: self.trigger,
            pending: self.xfer.pending,
            leds: self.leds,
            cmd_log: self.cmd_log.as_vec(),
        }
    }
}
