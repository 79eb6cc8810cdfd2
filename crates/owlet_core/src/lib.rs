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

    lib.rs

    Emulator core: Intel 8271 FDC, disc drives and disc image handling

*/

pub mod device_traits;
pub mod device_types;
pub mod devices;
pub mod disc_image;
pub mod machine_config;

pub use device_traits::drive_sound::{DriveSample, DriveSoundSink};
pub use device_types::disc::DiscKind;
pub use devices::{
    disc_drive::DiscDrive,
    fdc::controller::{FdcDebugState, Intel8271},
};
pub use machine_config::FdcConfig;
