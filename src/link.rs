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

//! Uplink guard.
//!
//! The front-end PROM sits behind the Camera Link uplink; writing through a
//! down link risks an unrecoverable half-programmed device. The guard reads
//! the lane's link status once and refuses to proceed if it is down. It is a
//! hard precondition, checked before any programming transaction, and is
//! deliberately not retried.

use crate::channel::{RegisterChannel, Transport};
use crate::error::{ChannelError, LinkError};
use log::info;

/// Read-only view of the external link monitor block.
pub trait LinkStatusSource {
    /// Whether the lane's uplink is currently up.
    fn link_up(&mut self) -> Result<bool, ChannelError>;
}

/// Adapter reading the lane-up bit of a carrier-local monitor register
/// through a register channel.
pub struct MonitorLink<'c, T: Transport> {
    channel: &'c mut RegisterChannel<T>,
    address: u64,
    lane: u32,
}

impl<'c, T: Transport> MonitorLink<'c, T> {
    pub fn new(channel: &'c mut RegisterChannel<T>, address: u64, lane: u32) -> Self {
        MonitorLink {
            channel,
            address,
            lane,
        }
    }
}

impl<T: Transport> LinkStatusSource for MonitorLink<'_, T> {
    fn link_up(&mut self) -> Result<bool, ChannelError> {
        let word = self.channel.read_u32(self.address)?;
        Ok(word >> self.lane & 1 == 1)
    }
}

/// Fail unless the lane's uplink is up.
///
/// Reads the status exactly once. A down link aborts the whole update
/// sequence before the PROM is touched.
pub fn ensure_link_up(source: &mut dyn LinkStatusSource, lane: u32) -> Result<(), LinkError> {
    match source.link_up() {
        Ok(true) => {
            info!("lane {lane} uplink is up");
            Ok(())
        }
        Ok(false) => Err(LinkError::LinkDown { lane }),
        Err(source) => Err(LinkError::Status { lane, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::clink_profile;
    use crate::sim::SimFrontEnd;
    use googletest::prelude::*;

    #[test]
    fn down_link_fails_without_a_single_channel_transaction() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        sim.set_link_up(false);

        let result = ensure_link_up(&mut sim.link(), 2);

        assert_that!(
            result,
            err(displays_as(contains_substring("LinkError::LinkDown")))
        );
        assert_that!(result, err(displays_as(contains_substring("lane 2"))));
        assert_that!(sim.transactions(), eq(0));
    }

    #[test]
    fn up_link_passes_the_guard() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        assert_that!(ensure_link_up(&mut sim.link(), 0), ok(anything()));
    }

    #[test]
    fn monitor_register_adapter_reads_the_lane_bit() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);

        let mut monitor = MonitorLink::new(&mut channel, profile.link_status, 1);
        assert_that!(ensure_link_up(&mut monitor, 1), ok(anything()));
        assert_that!(sim.transactions(), eq(1));

        sim.set_link_up(false);
        let mut monitor = MonitorLink::new(&mut channel, profile.link_status, 1);
        assert_that!(
            ensure_link_up(&mut monitor, 1),
            err(displays_as(contains_substring("LinkError::LinkDown")))
        );
    }
}
