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

//! Firmware update protocol for Camera Link front-end boards.
//!
//! A PCIe FPGA carrier exposes a flat register window covering its own
//! blocks and, behind the Camera Link uplink, the front-end board's PROM
//! controller. This crate implements the update sequence over that window:
//!
//! 1. [`link`] gates on the lane's uplink status.
//! 2. [`image`] decodes the hex-record firmware file.
//! 3. [`prom`] unlocks, erases, writes and verifies the PROM through a
//!    [`channel::RegisterChannel`].
//! 4. [`reload`] restarts the device and confirms the new build is live.
//!
//! [`updater::run_update`] strings the stages together fail-fast.
//! [`profiles`] carries the register maps of the supported board variants,
//! [`chardev`] the transport for the DMA driver's device node and [`sim`] a
//! simulated device for development and tests.
//!
//! The whole sequence is sequential and blocking by design: the PROM shares
//! an address decode region, so programming must not race other register
//! traffic on the same lane. A channel owns its transport exclusively;
//! independent lanes use independent channels.

pub mod channel;
pub mod chardev;
pub mod config;
pub mod error;
pub mod image;
pub mod link;
pub mod profiles;
pub mod prom;
pub mod reload;
pub mod sim;
pub mod updater;
