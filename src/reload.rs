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

//! Reload sequencer.
//!
//! After a successful programming run the device is told to re-read its
//! configuration PROM and restart. The sequencer then polls the version
//! block with exponential backoff, bounded by an explicit deadline, until
//! the device re-enumerates. A device that comes back with the build stamp
//! it had before programming did not actually load the new image, and that
//! is reported as a failure.

use crate::channel::{RegisterChannel, Transport};
use crate::config;
use crate::error::{ChannelError, ReloadError};
use crate::profiles::VersionMap;
use log::{info, trace, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Width of the build stamp string field in the version block.
pub const BUILD_STAMP_LEN: usize = 32;

/// Command word that triggers a configuration reload.
const RELOAD_KEY: u32 = 1;

/// Version identity of a running device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// 32-bit firmware version word.
    pub version: u32,
    /// Build stamp string, null padding stripped.
    pub build: String,
}

/// Read the device's version identity.
pub fn read_version<T: Transport>(
    channel: &mut RegisterChannel<T>,
    map: &VersionMap,
) -> Result<VersionInfo, ChannelError> {
    let version = channel.read_u32(map.version)?;
    let raw = channel.read(map.build_stamp, BUILD_STAMP_LEN)?;
    let build = String::from_utf8_lossy(&raw)
        .trim_end_matches('\0')
        .to_string();
    Ok(VersionInfo { version, build })
}

/// Issue a reload command and wait for the device to come back changed.
///
/// Polls the version block with doubling backoff until `timeout` expires.
/// The device dropping the response to the reload command itself is
/// tolerated; it is often already rebooting by then.
pub fn reload_and_verify<T: Transport>(
    channel: &mut RegisterChannel<T>,
    map: &VersionMap,
    pre_version: &VersionInfo,
    timeout: Duration,
) -> Result<VersionInfo, ReloadError> {
    info!("issuing reload command");
    match channel.write_u32(map.reload, RELOAD_KEY) {
        Ok(()) => {}
        Err(e @ ChannelError::Timeout { .. }) => warn!("reload command response lost: {e}"),
        Err(e) => return Err(ReloadError::Command(e)),
    }

    let deadline = Instant::now() + timeout;
    let mut backoff = config::RELOAD_POLL_INITIAL;
    loop {
        match read_version(channel, map) {
            Ok(version) => {
                if version.build == pre_version.build {
                    return Err(ReloadError::VersionUnchanged {
                        build: version.build,
                    });
                }
                info!(
                    "device re-enumerated with version 0x{:X}, build '{}'",
                    version.version, version.build
                );
                return Ok(version);
            }
            Err(e) => trace!("device not back yet: {e}"),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ReloadError::NoResponse { timeout });
        }
        thread::sleep(backoff.min(remaining));
        backoff = (backoff * 2).min(config::RELOAD_POLL_MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::clink_profile;
    use crate::sim::SimFrontEnd;
    use googletest::prelude::*;

    #[test]
    fn reload_confirms_once_the_build_stamp_changes() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        sim.set_builds("v1.0", "v1.1");
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);

        let pre = read_version(&mut channel, &profile.version).unwrap();
        assert_that!(pre.build, eq("v1.0"));

        let post = reload_and_verify(
            &mut channel,
            &profile.version,
            &pre,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_that!(post.build, eq("v1.1"));
    }

    #[test]
    fn a_device_that_never_comes_back_fails_at_the_deadline() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        sim.set_builds("v1.0", "v1.1");
        sim.set_reload_responds(false);
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        let pre = read_version(&mut channel, &profile.version).unwrap();

        let started = Instant::now();
        let result = reload_and_verify(
            &mut channel,
            &profile.version,
            &pre,
            Duration::from_millis(200),
        );

        assert_that!(
            result,
            err(displays_as(contains_substring("ReloadError::NoResponse")))
        );
        assert_that!(started.elapsed() < Duration::from_secs(2), eq(true));
    }

    #[test]
    fn an_unchanged_build_stamp_is_reported_as_a_failed_load() {
        let profile = clink_profile();
        let sim = SimFrontEnd::new(&profile);
        sim.set_builds("v1.0", "v1.0");
        let mut channel = RegisterChannel::new(sim.transport(), profile.window);
        let pre = read_version(&mut channel, &profile.version).unwrap();

        let result = reload_and_verify(
            &mut channel,
            &profile.version,
            &pre,
            Duration::from_secs(5),
        );
        assert_that!(
            result,
            err(displays_as(contains_substring("ReloadError::VersionUnchanged")))
        );
        assert_that!(result, err(displays_as(contains_substring("v1.0"))));
    }
}
