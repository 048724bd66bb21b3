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

//! The top-level update sequence.
//!
//! Fail-fast ordering: the link guard runs before anything else, the image
//! is decoded before any PROM transaction, programming completes before the
//! reload is issued. Once the reload command has gone out the PROM already
//! holds the new image, so a reload that cannot be confirmed is reported as
//! [`UpdateError::Unconfirmed`] rather than a plain failure.

use crate::channel::{RegisterChannel, Transport};
use crate::config;
use crate::error::UpdateError;
use crate::image;
use crate::link::{LinkStatusSource, MonitorLink, ensure_link_up};
use crate::profiles::DeviceProfile;
use crate::prom::{ProgramReport, PromProgrammer};
use crate::reload::{VersionInfo, read_version, reload_and_verify};
use log::info;
use std::time::Duration;

/// Where the update sequence reads the lane's link status from.
pub enum LinkSource<'a> {
    /// An external monitor block, observed out of band.
    External(&'a mut dyn LinkStatusSource),
    /// The carrier-local monitor register of the device profile, read
    /// through the update channel itself.
    Monitor,
}

/// Parameters of one update run.
pub struct UpdateRequest<'a> {
    pub lane: u32,
    /// Raw text of the hex-record image file.
    pub image_text: &'a str,
    pub reload_timeout: Duration,
}

impl<'a> UpdateRequest<'a> {
    pub fn new(lane: u32, image_text: &'a str) -> Self {
        UpdateRequest {
            lane,
            image_text,
            reload_timeout: config::DEFAULT_RELOAD_TIMEOUT,
        }
    }
}

/// Everything a confirmed update produced.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub report: ProgramReport,
    pub old: VersionInfo,
    pub new: VersionInfo,
}

/// Run the whole sequence: link guard, decode, program, reload, verify.
pub fn run_update<T: Transport>(
    channel: &mut RegisterChannel<T>,
    link: LinkSource<'_>,
    profile: &DeviceProfile,
    request: &UpdateRequest<'_>,
) -> Result<UpdateOutcome, UpdateError> {
    info!(
        "updating lane {} ({} variant, {} bytes of image text)",
        request.lane,
        profile.name,
        request.image_text.len()
    );

    match link {
        LinkSource::External(source) => ensure_link_up(source, request.lane)?,
        LinkSource::Monitor => {
            let mut monitor = MonitorLink::new(channel, profile.link_status, request.lane);
            ensure_link_up(&mut monitor, request.lane)?;
        }
    }

    let image = image::decode(request.image_text)?;
    info!(
        "image decoded: {} data records, {} bytes",
        image.data_records().count(),
        image.data_len()
    );

    let old = read_version(channel, &profile.version)?;
    info!("running firmware: 0x{:X} '{}'", old.version, old.build);

    let mut programmer = PromProgrammer::new(channel, profile.prom);
    let report = programmer.program(&image)?;

    let new = reload_and_verify(channel, &profile.version, &old, request.reload_timeout)
        .map_err(|source| UpdateError::Unconfirmed { source })?;

    info!(
        "update confirmed: '{}' -> '{}', {} bytes written",
        old.build, new.build, report.bytes_written
    );
    Ok(UpdateOutcome { report, old, new })
}
