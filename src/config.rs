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

use std::time::Duration;

/// The device node of the first PCIe DMA carrier. One node drives all lanes.
pub static DEFAULT_DEVICE_PATH: &str = "/dev/datadev_0";

/// How long one register transaction may wait for its response frame.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_millis(500);

/// Upper bound on busy-status polls after one sector erase command.
/// Exceeding it fails the session; a blind retry of a half-erased PROM is unsafe.
pub const ERASE_POLL_LIMIT: u32 = 100;

/// Delay between two busy-status polls while a sector erase is in flight.
pub const ERASE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long `reload_and_verify` waits for the device to re-enumerate before
/// declaring the reload unconfirmed.
pub const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// First poll delay after issuing a reload command. Doubles on every miss.
pub const RELOAD_POLL_INITIAL: Duration = Duration::from_millis(100);

/// Cap on the reload poll backoff.
pub const RELOAD_POLL_MAX: Duration = Duration::from_secs(1);

/// File-stem prefix reserved for carrier-board images. Carrier images are
/// loaded through a different path and must never reach a front-end PROM.
pub static CARRIER_IMAGE_PREFIX: &str = "pcie_";

/// File-stem suffix reserved for carrier-board images.
pub static CARRIER_IMAGE_SUFFIX: &str = "_carrier";
