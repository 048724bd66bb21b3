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

use clap::Parser;
use clprog::channel::RegisterChannel;
use clprog::chardev::CharDevTransport;
use clprog::config;
use clprog::error::UpdateError;
use clprog::profiles::{profile_for_variant, register_builtin_profiles};
use clprog::updater::{LinkSource, UpdateRequest, run_update};
use log::{debug, error};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "clprog")]
#[command(bin_name = "clprog")]
struct Cli {
    #[arg(
        long = "dev",
        default_value = config::DEFAULT_DEVICE_PATH,
        help = "PCIe DMA device node of the carrier"
    )]
    dev: String,
    #[arg(
        long,
        default_value = "clink",
        help = "protocol variant of the front-end board"
    )]
    variant: String,
    #[arg(long, help = "hex-record firmware image for the front-end PROM")]
    image: PathBuf,
    #[arg(long, help = "target lane index")]
    lane: u32,
}

/// Refuse image files named for the carrier board. Carrier images load
/// through a different path; streaming one into a front-end PROM bricks the
/// board.
fn validate_image_path(path: &Path) -> Result<(), UpdateError> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if stem.starts_with(config::CARRIER_IMAGE_PREFIX)
        || stem.ends_with(config::CARRIER_IMAGE_SUFFIX)
    {
        return Err(UpdateError::Argument(format!(
            "'{}' is named as a carrier-board image; clprog only programs front-end PROMs",
            path.display()
        )));
    }
    Ok(())
}

fn main() -> std::process::ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    debug!("parsed cli command with {cli:?}");
    register_builtin_profiles();

    match run(&cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    validate_image_path(&cli.image)?;
    let profile = profile_for_variant(&cli.variant)?;
    let image_text = std::fs::read_to_string(&cli.image)
        .map_err(|e| UpdateError::Argument(format!("failed to read '{}': {e}", cli.image.display())))?;

    let transport = CharDevTransport::open(Path::new(&cli.dev))?;
    let mut channel = RegisterChannel::new(transport, profile.window);
    let request = UpdateRequest::new(cli.lane, &image_text);
    let outcome = run_update(&mut channel, LinkSource::Monitor, &profile, &request)?;

    println!(
        "lane {}: '{}' -> '{}' ({} bytes written, verified)",
        cli.lane, outcome.old.build, outcome.new.build, outcome.report.bytes_written
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case::carrier_prefix("pcie_kcu105.hex")]
    #[case::carrier_suffix("kcu105_carrier.hex")]
    #[case::carrier_suffix_nested("/lib/firmware/kcu105_carrier.hex")]
    fn carrier_board_images_are_refused(#[case] path: &str) {
        let result = validate_image_path(Path::new(path));
        assert_that!(
            result,
            err(displays_as(contains_substring("carrier-board image")))
        );
    }

    #[rstest]
    #[case::front_end("clink_feb_3.2.0.hex")]
    #[case::nested("/lib/firmware/clink_feb_3.2.0.hex")]
    #[case::pcie_inside_stem("feb_pcie_bridge.hex")]
    fn front_end_images_pass_validation(#[case] path: &str) {
        assert_that!(validate_image_path(Path::new(path)), ok(anything()));
    }
}
