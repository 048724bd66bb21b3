// This file is part of clprog, a firmware update tool for Camera Link front-end boards attached through a PCIe FPGA carrier.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// clprog is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// clprog is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Front-end PROM programmer.
//!
//! Drives a decoded [`FirmwareImage`] into the front-end board's
//! configuration PROM through the register transaction channel, following the
//! controller's unlock/erase/write/verify protocol.
//!
//! One programming run is a linear state machine with no backward
//! transitions:
//!
//! ```text
//! Idle -> Unlocking -> Erasing -> Writing -> Verifying -> Done
//!                \         \         \           \
//!                 +---------+---------+-----------+--> Failed
//! ```
//!
//! Every run starts from a fresh [`ProgramSession`]; nothing of a failed
//! attempt is reused, so re-invoking after `Failed` is safe. Erase and write
//! are never retried blind: a partially written PROM with an unknown state is
//! worse than a clean failure.

use crate::channel::{RegisterChannel, Transport};
use crate::config;
use crate::error::ProgramError;
use crate::image::FirmwareImage;
use crate::profiles::PromMap;
use log::{debug, error, info, trace};
use std::fmt;
use std::thread;
use std::time::Duration;

/// Status register: erase or write in progress.
pub const STATUS_BUSY: u32 = 1 << 0;
/// Status register: the controller latched a write fault.
pub const STATUS_WERR: u32 = 1 << 1;

/// Key words accepted by the unlock register, in order.
pub const UNLOCK_KEYS: [u32; 2] = [0x305C_5C30, 0x5C30_305C];

/// States of one programming run, in order. `Failed` is terminal and
/// reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    Idle,
    Unlocking,
    Erasing,
    Writing,
    Verifying,
    Done,
    Failed,
}

impl ProgramState {
    fn rank(self) -> u8 {
        match self {
            ProgramState::Idle => 0,
            ProgramState::Unlocking => 1,
            ProgramState::Erasing => 2,
            ProgramState::Writing => 3,
            ProgramState::Verifying => 4,
            ProgramState::Done => 5,
            ProgramState::Failed => 6,
        }
    }
}

impl fmt::Display for ProgramState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProgramState::Idle => "idle",
            ProgramState::Unlocking => "unlocking",
            ProgramState::Erasing => "erasing",
            ProgramState::Writing => "writing",
            ProgramState::Verifying => "verifying",
            ProgramState::Done => "done",
            ProgramState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Outcome summary of one programming run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramReport {
    /// Payload bytes written to the PROM.
    pub bytes_written: usize,
    /// Data records streamed before the run ended.
    pub elapsed_records: usize,
    /// `true` only when the run reached `Done`, verify included.
    pub success: bool,
}

/// Mutable state of one programming run. Created when programming starts,
/// dropped when it completes or fails; never persisted.
struct ProgramSession {
    state: ProgramState,
    bytes_written: usize,
    elapsed_records: usize,
}

impl ProgramSession {
    fn new() -> Self {
        ProgramSession {
            state: ProgramState::Idle,
            bytes_written: 0,
            elapsed_records: 0,
        }
    }

    fn advance(&mut self, next: ProgramState) {
        debug_assert!(next.rank() > self.state.rank(), "no backward transitions");
        trace!("session: {} -> {next}", self.state);
        self.state = next;
    }

    fn fail(&mut self) {
        trace!("session: {} -> failed", self.state);
        self.state = ProgramState::Failed;
    }

    fn report(&self) -> ProgramReport {
        ProgramReport {
            bytes_written: self.bytes_written,
            elapsed_records: self.elapsed_records,
            success: self.state == ProgramState::Done,
        }
    }
}

/// Programmer for one front-end PROM, borrowing the lane's channel for the
/// duration of the run.
pub struct PromProgrammer<'c, T: Transport> {
    channel: &'c mut RegisterChannel<T>,
    map: PromMap,
    poll_interval: Duration,
    poll_limit: u32,
    last: Option<ProgramReport>,
}

impl<'c, T: Transport> PromProgrammer<'c, T> {
    pub fn new(channel: &'c mut RegisterChannel<T>, map: PromMap) -> Self {
        PromProgrammer {
            channel,
            map,
            poll_interval: config::ERASE_POLL_INTERVAL,
            poll_limit: config::ERASE_POLL_LIMIT,
            last: None,
        }
    }

    /// Replace the erase busy-poll bounds.
    pub fn with_poll(mut self, interval: Duration, limit: u32) -> Self {
        self.poll_interval = interval;
        self.poll_limit = limit;
        self
    }

    /// Progress of the most recent run, if any. After an `Err` from
    /// [`program`](Self::program) this reports how far the failed run got,
    /// with `success == false`.
    pub fn last_report(&self) -> Option<&ProgramReport> {
        self.last.as_ref()
    }

    /// Program `image` into the PROM: unlock, erase the image's address
    /// span, stream the data records in file order and verify by read-back.
    pub fn program(&mut self, image: &FirmwareImage) -> Result<ProgramReport, ProgramError> {
        let mut session = ProgramSession::new();
        match self.run(&mut session, image) {
            Ok(()) => {
                session.advance(ProgramState::Done);
                let report = session.report();
                info!(
                    "programmed {} bytes in {} records, verified",
                    report.bytes_written, report.elapsed_records
                );
                self.last = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                let stage = session.state;
                session.fail();
                self.last = Some(session.report());
                error!("programming failed while {stage}: {e}");
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        session: &mut ProgramSession,
        image: &FirmwareImage,
    ) -> Result<(), ProgramError> {
        let span = image.address_span();
        if let Some((_, end)) = span {
            if end > self.map.size {
                return Err(ProgramError::WriteFailed {
                    address: end - 1,
                    reason: format!("image ends beyond the 0x{:X} byte PROM", self.map.size),
                });
            }
        }

        session.advance(ProgramState::Unlocking);
        debug!("unlocking PROM controller");
        for key in UNLOCK_KEYS {
            self.channel
                .write_u32(self.map.unlock, key)
                .map_err(|source| ProgramError::Channel {
                    state: session.state,
                    source,
                })?;
        }

        session.advance(ProgramState::Erasing);
        if let Some((start, end)) = span {
            let mut sector = start - start % self.map.sector_size;
            while sector < end {
                debug!("erasing sector at 0x{sector:X}");
                self.channel
                    .write_u32(self.map.erase, sector as u32)
                    .map_err(|source| ProgramError::Channel {
                        state: session.state,
                        source,
                    })?;
                self.wait_erase_idle(sector)?;
                sector += self.map.sector_size;
            }
        }

        session.advance(ProgramState::Writing);
        for record in image.data_records() {
            let address = record.address;
            self.channel
                .write(self.map.base + address, &record.data)
                .map_err(|source| ProgramError::WriteFailed {
                    address,
                    reason: source.to_string(),
                })?;
            let status = self
                .channel
                .read_u32(self.map.status)
                .map_err(|source| ProgramError::WriteFailed {
                    address,
                    reason: format!("status unreadable after write: {source}"),
                })?;
            if status & STATUS_WERR != 0 {
                return Err(ProgramError::WriteFailed {
                    address,
                    reason: "device latched a write fault".to_string(),
                });
            }
            session.bytes_written += record.data.len();
            session.elapsed_records += 1;
        }

        session.advance(ProgramState::Verifying);
        debug!("verifying {} bytes by read-back", session.bytes_written);
        for record in image.data_records() {
            let readback = self
                .channel
                .read(self.map.base + record.address, record.data.len())
                .map_err(|source| ProgramError::Channel {
                    state: session.state,
                    source,
                })?;
            if readback != record.data {
                return Err(ProgramError::VerifyMismatch {
                    address: record.address,
                });
            }
        }

        Ok(())
    }

    fn wait_erase_idle(&mut self, sector: u64) -> Result<(), ProgramError> {
        for _ in 0..self.poll_limit {
            let status = self
                .channel
                .read_u32(self.map.status)
                .map_err(|source| ProgramError::Channel {
                    state: ProgramState::Erasing,
                    source,
                })?;
            if status & STATUS_BUSY == 0 {
                return Ok(());
            }
            thread::sleep(self.poll_interval);
        }
        Err(ProgramError::EraseTimeout {
            address: sector,
            polls: self.poll_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::decode;
    use crate::profiles::clink_profile;
    use crate::sim::SimFrontEnd;
    use googletest::prelude::*;

    const THREE_RECORD_IMAGE: &str = "\
:10000000000102030405060708090A0B0C0D0E0F78
:10001000101112131415161718191A1B1C1D1E1F68
:10002000202122232425262728292A2B2C2D2E2F58
:00000001FF
";

    #[test]
    fn round_trip_programs_and_verifies_the_exact_bytes() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        let image = decode(THREE_RECORD_IMAGE).unwrap();

        let mut programmer = PromProgrammer::new(&mut channel, profile.prom);
        let report = programmer.program(&image).unwrap();

        assert_that!(report.success, eq(true));
        assert_that!(report.bytes_written, eq(48));
        assert_that!(report.elapsed_records, eq(3));
        let expected: Vec<u8> = (0u8..48).collect();
        assert_that!(sim.prom_bytes(0, 48), container_eq(expected));
    }

    #[test]
    fn write_fault_names_the_failing_record_address() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        // the first data record goes through, the second is refused
        sim.fail_prom_writes_after(1);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        let image = decode(THREE_RECORD_IMAGE).unwrap();

        let mut programmer = PromProgrammer::new(&mut channel, profile.prom);
        let result = programmer.program(&image);

        assert_that!(
            result,
            err(displays_as(contains_substring("ProgramError::WriteFailed")))
        );
        assert_that!(result, err(displays_as(contains_substring("0x10"))));
        assert_that!(
            programmer.last_report(),
            some(eq(&ProgramReport {
                bytes_written: 16,
                elapsed_records: 1,
                success: false,
            }))
        );
    }

    #[test]
    fn latched_write_fault_bit_fails_the_first_record() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        sim.set_write_fault(true);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        let image = decode(THREE_RECORD_IMAGE).unwrap();

        let mut programmer = PromProgrammer::new(&mut channel, profile.prom);
        let result = programmer.program(&image);

        assert_that!(
            result,
            err(displays_as(contains_substring("device latched a write fault")))
        );
        assert_that!(result, err(displays_as(contains_substring("0x0"))));
    }

    #[test]
    fn stuck_busy_erase_fails_after_the_poll_bound() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        sim.set_stuck_busy(true);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        let image = decode(THREE_RECORD_IMAGE).unwrap();

        let mut programmer =
            PromProgrammer::new(&mut channel, profile.prom).with_poll(Duration::ZERO, 3);
        let result = programmer.program(&image);

        assert_that!(
            result,
            err(displays_as(contains_substring("ProgramError::EraseTimeout")))
        );
        assert_that!(result, err(displays_as(contains_substring("3 status polls"))));
    }

    #[test]
    fn corrupted_read_back_is_a_verify_mismatch() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        sim.corrupt_readback_at(0x20);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        let image = decode(THREE_RECORD_IMAGE).unwrap();

        let mut programmer = PromProgrammer::new(&mut channel, profile.prom);
        let result = programmer.program(&image);

        assert_that!(
            result,
            err(displays_as(contains_substring("ProgramError::VerifyMismatch")))
        );
        assert_that!(result, err(displays_as(contains_substring("0x20"))));
    }

    #[test]
    fn image_larger_than_the_prom_is_refused_before_any_erase() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        // one byte at the first address past the end of the PROM
        let image = decode(":020000040040BA\n:01000000AA55\n:00000001FF\n").unwrap();

        let mut programmer = PromProgrammer::new(&mut channel, profile.prom);
        let result = programmer.program(&image);

        assert_that!(
            result,
            err(displays_as(contains_substring("beyond the 0x400000 byte PROM")))
        );
    }

    #[test]
    fn an_empty_image_completes_without_touching_the_prom() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        let image = decode(":00000001FF\n").unwrap();

        let mut programmer = PromProgrammer::new(&mut channel, profile.prom);
        let report = programmer.program(&image).unwrap();

        assert_that!(report.bytes_written, eq(0));
        assert_that!(report.success, eq(true));
        assert_that!(sim.prom_bytes(0, 4), container_eq(vec![0u8; 4]));
    }

    #[test]
    fn a_failed_run_can_be_retried_with_a_fresh_session() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        sim.set_stuck_busy(true);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        let image = decode(THREE_RECORD_IMAGE).unwrap();

        let mut programmer =
            PromProgrammer::new(&mut channel, profile.prom).with_poll(Duration::ZERO, 2);
        assert_that!(programmer.program(&image), err(anything()));

        sim.set_stuck_busy(false);
        let report = programmer.program(&image).unwrap();
        assert_that!(report.success, eq(true));
        assert_that!(report.bytes_written, eq(48));
    }
}
