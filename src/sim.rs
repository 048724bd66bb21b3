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

//! Simulated carrier and front-end board.
//!
//! [`SimFrontEnd`] implements the device side of the register transaction
//! protocol against an in-memory register space: a PROM backing store with
//! erase and busy cycles, the unlock sequence, the link monitor bit and a
//! version block whose build stamp changes across a reload.
//!
//! Fault injection covers the failure modes the update sequence must
//! tolerate: a down uplink, a dropped transport, writes refused after a
//! budget, a stuck-busy erase, a device that never re-enumerates, and
//! corrupted read-back. Every handle is cheap to clone from the same
//! simulated device, so a test can hold the transport, the link monitor and
//! the observers at once.

use crate::channel::{
    OP_READ, OP_WRITE, Request, STATUS_OK, Transport, decode_request, encode_response, Response,
};
use crate::error::ChannelError;
use crate::link::LinkStatusSource;
use crate::profiles::DeviceProfile;
use crate::prom::{STATUS_BUSY, STATUS_WERR, UNLOCK_KEYS};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How many busy status reads one sector erase produces.
const ERASE_BUSY_READS: u32 = 1;
/// Version-block reads swallowed while the simulated device reboots.
const REBOOT_DROPPED_READS: u32 = 2;

struct SimState {
    profile: DeviceProfile,
    prom: Vec<u8>,
    unlock_armed: bool,
    unlocked: bool,
    busy_reads: u32,
    stuck_busy: bool,
    write_fault: bool,
    link_up: bool,
    connected: bool,
    prom_writes: usize,
    prom_write_budget: Option<usize>,
    corrupt_at: Option<u64>,
    version_word: u32,
    build: String,
    next_build: String,
    down: bool,
    boot_reads_left: u32,
    reload_responds: bool,
    transactions: usize,
}

fn ok_response(req: &Request, payload: &[u8]) -> Option<Vec<u8>> {
    Some(encode_response(&Response {
        seq: req.seq,
        op: req.op,
        status: STATUS_OK,
        payload: payload.to_vec(),
    }))
}

fn nak_response(req: &Request, status: u8) -> Option<Vec<u8>> {
    Some(encode_response(&Response {
        seq: req.seq,
        op: req.op,
        status,
        payload: Vec::new(),
    }))
}

impl SimState {
    fn handle(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let Ok(req) = decode_request(frame) else {
            return None;
        };
        let version = self.profile.version;
        let prom = self.profile.prom;

        let in_version_block = req.address == version.version
            || req.address == version.build_stamp
            || req.address == version.reload;
        if self.down && in_version_block {
            if self.reload_responds && self.boot_reads_left > 0 {
                self.boot_reads_left -= 1;
                if self.boot_reads_left == 0 {
                    self.down = false;
                    self.build = self.next_build.clone();
                }
            }
            return None;
        }

        match (req.op, req.address) {
            (OP_READ, a) if a == version.version && req.count == 4 => {
                let word = self.version_word.to_le_bytes();
                ok_response(&req, &word)
            }
            (OP_READ, a) if a == version.build_stamp => {
                let mut field = vec![0u8; req.count as usize];
                let stamp = self.build.as_bytes();
                let n = stamp.len().min(field.len());
                field[..n].copy_from_slice(&stamp[..n]);
                ok_response(&req, &field)
            }
            (OP_WRITE, a) if a == version.reload => {
                if !self.reload_responds {
                    // already rebooting into nothing; the response is lost too
                    self.down = true;
                    return None;
                }
                self.down = true;
                self.boot_reads_left = REBOOT_DROPPED_READS;
                ok_response(&req, &[])
            }
            (OP_READ, a) if a == self.profile.link_status && req.count == 4 => {
                let word: u32 = if self.link_up { 0xF } else { 0x0 };
                ok_response(&req, &word.to_le_bytes())
            }
            (OP_WRITE, a) if a == prom.unlock && req.payload.len() == 4 => {
                let key = u32::from_le_bytes(req.payload[0..4].try_into().expect("sized slice"));
                if key == UNLOCK_KEYS[0] {
                    self.unlock_armed = true;
                } else if self.unlock_armed && key == UNLOCK_KEYS[1] {
                    self.unlocked = true;
                    self.unlock_armed = false;
                } else {
                    self.unlock_armed = false;
                }
                ok_response(&req, &[])
            }
            (OP_WRITE, a) if a == prom.erase && req.payload.len() == 4 => {
                if !self.unlocked {
                    return nak_response(&req, 3);
                }
                let offset =
                    u32::from_le_bytes(req.payload[0..4].try_into().expect("sized slice")) as u64;
                if offset % prom.sector_size != 0 || offset + prom.sector_size > prom.size {
                    return nak_response(&req, 3);
                }
                let start = offset as usize;
                let end = (offset + prom.sector_size) as usize;
                self.prom[start..end].fill(0xFF);
                self.busy_reads = ERASE_BUSY_READS;
                ok_response(&req, &[])
            }
            (OP_READ, a) if a == prom.status && req.count == 4 => {
                let mut status = 0u32;
                if self.stuck_busy {
                    status |= STATUS_BUSY;
                } else if self.busy_reads > 0 {
                    self.busy_reads -= 1;
                    status |= STATUS_BUSY;
                }
                if self.write_fault {
                    status |= STATUS_WERR;
                }
                ok_response(&req, &status.to_le_bytes())
            }
            (OP_WRITE, a) if a >= prom.base && a < prom.base + prom.size => {
                if !self.unlocked {
                    return nak_response(&req, 4);
                }
                let offset = a - prom.base;
                if offset + req.payload.len() as u64 > prom.size {
                    return nak_response(&req, 4);
                }
                if let Some(budget) = self.prom_write_budget {
                    if self.prom_writes >= budget {
                        return nak_response(&req, 5);
                    }
                }
                self.prom_writes += 1;
                let start = offset as usize;
                self.prom[start..start + req.payload.len()].copy_from_slice(&req.payload);
                ok_response(&req, &[])
            }
            (OP_READ, a) if a >= prom.base && a < prom.base + prom.size => {
                let offset = a - prom.base;
                if offset + req.count as u64 > prom.size {
                    return nak_response(&req, 4);
                }
                let start = offset as usize;
                let mut data = self.prom[start..start + req.count as usize].to_vec();
                if let Some(target) = self.corrupt_at {
                    if target >= offset && target < offset + req.count as u64 {
                        data[(target - offset) as usize] ^= 0xFF;
                    }
                }
                ok_response(&req, &data)
            }
            _ => nak_response(&req, 0xEE),
        }
    }
}

/// A simulated device; hand its [`transport`](Self::transport) to a
/// [`crate::channel::RegisterChannel`] and its [`link`](Self::link) to the
/// link guard.
#[derive(Clone)]
pub struct SimFrontEnd {
    state: Arc<Mutex<SimState>>,
}

impl SimFrontEnd {
    pub fn new(profile: &DeviceProfile) -> Self {
        SimFrontEnd {
            state: Arc::new(Mutex::new(SimState {
                profile: *profile,
                prom: vec![0u8; profile.prom.size as usize],
                unlock_armed: false,
                unlocked: false,
                busy_reads: 0,
                stuck_busy: false,
                write_fault: false,
                link_up: true,
                connected: true,
                prom_writes: 0,
                prom_write_budget: None,
                corrupt_at: None,
                version_word: 0x0001_0000,
                build: String::from("v1.0"),
                next_build: String::from("v1.1"),
                down: false,
                boot_reads_left: 0,
                reload_responds: true,
                transactions: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state lock poisoned")
    }

    /// A transport handle onto this device.
    pub fn transport(&self) -> SimTransport {
        SimTransport {
            state: Arc::clone(&self.state),
            queue: VecDeque::new(),
        }
    }

    /// A link monitor handle onto this device.
    pub fn link(&self) -> SimLinkStatus {
        SimLinkStatus {
            state: Arc::clone(&self.state),
        }
    }

    /// Raise or drop the uplink of every lane.
    pub fn set_link_up(&self, up: bool) {
        self.lock().link_up = up;
    }

    /// Connect or disconnect the transport itself; a disconnected transport
    /// fails sends the way a vanished PCIe device does.
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Accept the first `budget` PROM data writes and refuse the rest.
    pub fn fail_prom_writes_after(&self, budget: usize) {
        self.lock().prom_write_budget = Some(budget);
    }

    /// Keep the busy bit latched so erases never complete.
    pub fn set_stuck_busy(&self, stuck: bool) {
        self.lock().stuck_busy = stuck;
    }

    /// Latch the write-fault status bit.
    pub fn set_write_fault(&self, fault: bool) {
        self.lock().write_fault = fault;
    }

    /// Whether the device re-enumerates after a reload command.
    pub fn set_reload_responds(&self, responds: bool) {
        self.lock().reload_responds = responds;
    }

    /// Build stamps reported before and after a reload.
    pub fn set_builds(&self, current: &str, next: &str) {
        let mut state = self.lock();
        state.build = current.to_string();
        state.next_build = next.to_string();
    }

    /// Total frames the device has been sent.
    pub fn transactions(&self) -> usize {
        self.lock().transactions
    }

    /// Snapshot of the PROM backing store.
    pub fn prom_bytes(&self, offset: u64, len: usize) -> Vec<u8> {
        let state = self.lock();
        let start = offset as usize;
        state.prom[start..start + len].to_vec()
    }

    /// Flip the PROM byte at `offset` on read-back only.
    pub fn corrupt_readback_at(&self, offset: u64) {
        self.lock().corrupt_at = Some(offset);
    }
}

/// Transport side of a [`SimFrontEnd`] handle.
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
    queue: VecDeque<Vec<u8>>,
}

impl Transport for SimTransport {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().expect("sim state lock poisoned");
        if !state.connected {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated transport disconnected",
            ));
        }
        state.transactions += 1;
        if let Some(response) = state.handle(frame) {
            self.queue.push_back(response);
        }
        Ok(())
    }

    fn recv(&mut self, _timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        // a missing response times out immediately rather than sleeping
        Ok(self.queue.pop_front())
    }
}

/// Link monitor side of a [`SimFrontEnd`] handle. Reads the link bit out of
/// band, the way the external monitor block exposes it.
pub struct SimLinkStatus {
    state: Arc<Mutex<SimState>>,
}

impl LinkStatusSource for SimLinkStatus {
    fn link_up(&mut self) -> Result<bool, ChannelError> {
        Ok(self.state.lock().expect("sim state lock poisoned").link_up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RegisterChannel;
    use crate::profiles::clink_profile;
    use googletest::prelude::*;

    #[test]
    fn erase_and_write_require_the_unlock_sequence() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);

        // without the unlock sequence the erase register refuses commands
        let refused = channel.write_u32(profile.prom.erase, 0);
        assert_that!(refused, err(displays_as(contains_substring("ChannelError::Remote"))));

        for key in UNLOCK_KEYS {
            channel.write_u32(profile.prom.unlock, key).unwrap();
        }
        assert_that!(channel.write_u32(profile.prom.erase, 0), ok(anything()));
    }

    #[test]
    fn erased_sectors_read_back_as_all_ones() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        for key in UNLOCK_KEYS {
            channel.write_u32(profile.prom.unlock, key).unwrap();
        }
        channel.write_u32(profile.prom.erase, 0).unwrap();
        assert_that!(sim.prom_bytes(0, 4), container_eq(vec![0xFFu8; 4]));
    }

    #[test]
    fn a_disconnected_transport_reports_link_down() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        sim.set_connected(false);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        let result = channel.read_u32(profile.version.version);
        assert_that!(
            result,
            err(displays_as(contains_substring("ChannelError::LinkDown")))
        );
    }

    #[test]
    fn unmapped_addresses_are_refused() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        let result = channel.read_u32(0x0000_F000);
        assert_that!(
            result,
            err(displays_as(contains_substring("ChannelError::Remote")))
        );
    }
}
