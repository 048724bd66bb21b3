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

//! Device profiles for the supported front-end variants.
//!
//! A profile is the explicit, typed register map of one hardware variant:
//! where the carrier decodes the link monitor, the version block and the
//! front-end PROM controller inside its flat address window. Profiles are
//! plain data; the protocol code takes a profile and never hard-codes an
//! address.
//!
//! Variants register themselves in a process-wide registry by name. The CLI
//! selects one with its protocol-variant flag; [`register_builtin_profiles`]
//! must run once at startup before any lookup.

use crate::error::UpdateError;
use log::trace;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Register block of the front-end PROM controller.
///
/// The controller sits behind the Camera Link uplink: every access crosses
/// the serial link, unlike the carrier-local monitor and version blocks.
#[derive(Debug, Clone, Copy)]
pub struct PromMap {
    /// Unlock register; takes the two key words in order.
    pub unlock: u64,
    /// Sector erase register; takes a PROM byte offset.
    pub erase: u64,
    /// Status register; see the bit constants in [`crate::prom`].
    pub status: u64,
    /// Base of the memory-mapped PROM window.
    pub base: u64,
    /// Size of the PROM in bytes.
    pub size: u64,
    /// Erase sector size in bytes.
    pub sector_size: u64,
}

/// Register block of the carrier's version identity and reload control.
#[derive(Debug, Clone, Copy)]
pub struct VersionMap {
    /// 32-bit firmware version word.
    pub version: u64,
    /// Fixed-width build stamp string field.
    pub build_stamp: u64,
    /// Reload command register.
    pub reload: u64,
}

/// Complete register map for one front-end variant.
#[derive(Debug, Clone, Copy)]
pub struct DeviceProfile {
    pub name: &'static str,
    /// Addressable window the device advertises; transactions beyond it are
    /// refused by the channel before transmission.
    pub window: u64,
    /// Carrier-local link monitor register, one lane-up bit per lane.
    pub link_status: u64,
    pub prom: PromMap,
    pub version: VersionMap,
}

type ProfileConstructor = fn() -> DeviceProfile;

static PROFILE_REGISTRY: OnceLock<Mutex<HashMap<&'static str, ProfileConstructor>>> =
    OnceLock::new();

/// Register a profile constructor under a variant name.
pub fn register_profile(name: &'static str, constructor: ProfileConstructor) {
    let mut registry = PROFILE_REGISTRY
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .expect("couldnt lock PROFILE_REGISTRY");
    registry.insert(name, constructor);
}

/// Look up the profile for a variant name.
pub fn profile_for_variant(variant: &str) -> Result<DeviceProfile, UpdateError> {
    let registry = PROFILE_REGISTRY
        .get()
        .ok_or(UpdateError::Argument(String::from(
            "no device profiles have been registered",
        )))?
        .lock()
        .map_err(|_| UpdateError::Argument(String::from("couldn't lock PROFILE_REGISTRY")))?;

    match registry.get(variant) {
        Some(constructor) => {
            trace!("matched variant '{variant}'");
            Ok(constructor())
        }
        None => {
            let mut known: Vec<&str> = registry.keys().copied().collect();
            known.sort_unstable();
            Err(UpdateError::Argument(format!(
                "'{variant}' is not a known protocol variant (known: {})",
                known.join(", ")
            )))
        }
    }
}

/// The base Camera Link front-end board.
pub fn clink_profile() -> DeviceProfile {
    DeviceProfile {
        name: "clink",
        window: 0x0100_0000,
        link_status: 0x0000_0800,
        prom: PromMap {
            unlock: 0x0080_0000,
            erase: 0x0080_0004,
            status: 0x0080_0008,
            base: 0x0090_0000,
            size: 0x0040_0000,
            sector_size: 0x1_0000,
        },
        version: VersionMap {
            version: 0x0000_0000,
            build_stamp: 0x0000_0040,
            reload: 0x0000_0004,
        },
    }
}

/// The revised front-end board: wider window, PROM controller relocated.
pub fn clink_v2_profile() -> DeviceProfile {
    DeviceProfile {
        name: "clink-v2",
        window: 0x0200_0000,
        link_status: 0x0000_0800,
        prom: PromMap {
            unlock: 0x0100_0000,
            erase: 0x0100_0004,
            status: 0x0100_0008,
            base: 0x0120_0000,
            size: 0x0080_0000,
            sector_size: 0x1_0000,
        },
        version: VersionMap {
            version: 0x0000_0000,
            build_stamp: 0x0000_0040,
            reload: 0x0000_0004,
        },
    }
}

/// Register every variant shipped with this crate.
pub fn register_builtin_profiles() {
    register_profile("clink", clink_profile);
    register_profile("clink-v2", clink_v2_profile);
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    fn setup_test_registry() {
        register_builtin_profiles();
    }

    #[test]
    fn known_variant_resolves_to_its_profile() {
        setup_test_registry();
        let profile = profile_for_variant("clink").unwrap();
        assert_that!(profile.name, eq("clink"));
        assert_that!(profile.prom.base, eq(0x0090_0000));
    }

    #[test]
    fn v2_variant_uses_the_relocated_prom_block() {
        setup_test_registry();
        let profile = profile_for_variant("clink-v2").unwrap();
        assert_that!(profile.window, eq(0x0200_0000));
        assert_that!(profile.prom.base, eq(0x0120_0000));
    }

    #[test]
    fn unknown_variant_fails_and_names_the_alternatives() {
        setup_test_registry();
        let result = profile_for_variant("opal-kelly");
        assert_that!(
            result,
            err(displays_as(contains_substring("UpdateError::Argument")))
        );
        assert_that!(result, err(displays_as(contains_substring("clink, clink-v2"))));
    }

    #[test]
    fn matching_is_case_sensitive() {
        setup_test_registry();
        assert_that!(profile_for_variant("CLINK"), err(anything()));
    }

    #[test]
    fn prom_blocks_sit_inside_the_advertised_window() {
        for profile in [clink_profile(), clink_v2_profile()] {
            assert_that!(
                profile.prom.base + profile.prom.size <= profile.window,
                eq(true)
            );
            assert_that!(profile.prom.size % profile.prom.sector_size, eq(0));
        }
    }
}
