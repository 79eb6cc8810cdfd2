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

//! Drive head and motor model. Exists for the audible feedback and the
//! drive LEDs, but it also clears the select flags when the motor stops,
//! which is how drives drop out of the ready state.

use crate::{device_traits::drive_sound::DriveSample, devices::fdc::*};

use super::controller::Intel8271;

impl Intel8271 {
    /// Head loading itself is instantaneous; the motor state machine plays
    /// the samples and holds up the first tick while it happens.
    pub(crate) fn load_head(&mut self) {}

    /// Audible feedback needs both the config switch and an attached sink.
    pub(crate) fn drive_sound_enabled(&self) -> bool {
        self.config.drive_sound && self.sound.is_some()
    }

    fn play_sample(&mut self, sample: DriveSample, looped: bool) {
        if let Some(sink) = self.sound.as_mut() {
            sink.play(sample, looped);
        }
    }

    fn stop_sample(&mut self, sample: DriveSample) {
        if let Some(sink) = self.sound.as_mut() {
            sink.stop(sample);
        }
    }

    /// Arm the head unload when nothing else is scheduled.
    pub(crate) fn schedule_head_unload(&mut self, now: u64) {
        if self.head_loaded && self.trigger.is_none() {
            self.set_trigger(now, HEAD_UNLOAD_DELAY);
            self.unload_pending = true;
        }
    }

    /// One step of the head/motor state machine, run at the top of every
    /// tick. Returns true if the tick was consumed by head movement.
    pub(crate) fn motor_update(&mut self, now: u64) -> bool {
        if self.unload_pending {
            // Motor stops: drives are no longer ready.
            self.select = [false, false];
            self.unload_pending = false;
            if self.head_loaded && self.drive_sound_enabled() {
                self.play_sample(DriveSample::HeadUnload, false);
            }
            self.head_loaded = false;
            self.stop_sample(DriveSample::MotorSpin);
            self.stop_sample(DriveSample::HeadSeek);
            self.leds = [false, false];
            return true;
        }

        if !self.drive_sound_enabled() {
            self.head_loaded = true;
            return false;
        }

        if !self.head_loaded {
            if self.select[0] {
                self.leds[0] = true;
            }
            if self.select[1] {
                self.leds[1] = true;
            }
            self.play_sample(DriveSample::MotorSpin, true);
            self.head_loaded = true;
            self.play_sample(DriveSample::HeadLoad, false);
            self.set_trigger(now, HEAD_LOAD_CYCLES);
            return true;
        }

        let drive = if self.select[1] { 1 } else { 0 };

        self.stop_sample(DriveSample::HeadSeek);

        if self.head_position[drive] != self.physical_track {
            let delta =
                (self.head_position[drive] as i32 - self.physical_track as i32).unsigned_abs();

            if delta > 1 {
                self.play_sample(DriveSample::HeadSeek, true);
                self.set_trigger(now, delta as u64 * HEAD_SEEK_CYCLES_PER_TRACK);
            }
            else {
                self.play_sample(DriveSample::HeadStep, false);
                self.set_trigger(now, HEAD_STEP_CYCLES);
            }

            // The model moves the full distance in one step.
            self.head_position[drive] = self.physical_track;
            return true;
        }

        false
    }
}
