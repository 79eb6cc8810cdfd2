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

    machine_config.rs

    Static configuration handed to device constructors by the shell

*/

/// Configuration for the floppy disc controller. The shell resolves its own
/// settings into this plain struct before constructing the device.
#[derive(Copy, Clone, Debug)]
pub struct FdcConfig {
    /// Whether the controller's register window responds at all. A disabled
    /// controller reads as 0xFF and ignores writes.
    pub enabled: bool,
    /// Whether the head/motor model drives the sound sink and the LEDs.
    pub drive_sound: bool,
}

impl Default for FdcConfig {
    fn default() -> Self {
        FdcConfig {
            enabled: true,
            drive_sound: true,
        }
    }
}
