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

//! Error taxonomy for the firmware update path.
//!
//! Each layer owns its error enum: the transaction channel, the image
//! decoder, the PROM programmer, the link guard and the reload sequencer.
//! [`UpdateError`] wraps all of them for the top-level update sequence.
//! Lower layers never swallow a failure; every variant carries the address,
//! lane or stage needed to log and abort from the caller.

use crate::prom::ProgramState;
use std::time::Duration;

/// Transport-level failures of the register transaction channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("ChannelError::Timeout: no response for transaction at 0x{address:X} within {timeout:?}")]
    Timeout { address: u64, timeout: Duration },
    #[error("ChannelError::LinkDown: transport disconnected: {0}")]
    LinkDown(std::io::Error),
    #[error("ChannelError::Io: transport error: {0}")]
    Io(std::io::Error),
    #[error(
        "ChannelError::AddressRange: 0x{address:X}+{len} exceeds the 0x{window:X} byte device window"
    )]
    AddressRange { address: u64, len: usize, window: u64 },
    #[error("ChannelError::Frame: malformed response frame: {0}")]
    Frame(String),
    #[error("ChannelError::Remote: device rejected transaction at 0x{address:X} with status {status}")]
    Remote { address: u64, status: u8 },
}

/// Failures while decoding a hex-record firmware image.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("DecodeError::MalformedLine: line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },
    #[error(
        "DecodeError::ChecksumMismatch: line {line}: stored 0x{stored:02X}, computed 0x{computed:02X}"
    )]
    ChecksumMismatch { line: usize, stored: u8, computed: u8 },
    #[error("DecodeError::MissingEndOfFile: input exhausted without a terminal record")]
    MissingEndOfFile,
    #[error("DecodeError::UnknownRecordType: line {line}: record type 0x{kind:02X}")]
    UnknownRecordType { line: usize, kind: u8 },
}

/// Failures while programming the front-end PROM.
#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error("ProgramError::Channel: transaction failed while {state}: {source}")]
    Channel {
        state: ProgramState,
        source: ChannelError,
    },
    #[error("ProgramError::EraseTimeout: sector at 0x{address:X} still busy after {polls} status polls")]
    EraseTimeout { address: u64, polls: u32 },
    #[error("ProgramError::WriteFailed: programming failed at 0x{address:X}: {reason}")]
    WriteFailed { address: u64, reason: String },
    #[error("ProgramError::VerifyMismatch: read-back differs from image at 0x{address:X}")]
    VerifyMismatch { address: u64 },
}

/// The uplink precondition was not met.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("LinkError::LinkDown: lane {lane} uplink is down; refusing to touch the PROM")]
    LinkDown { lane: u32 },
    #[error("LinkError::Status: failed to read lane {lane} link status: {source}")]
    Status { lane: u32, source: ChannelError },
}

/// The device did not come back from a reload, or came back unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("ReloadError::NoResponse: device did not re-enumerate within {timeout:?}")]
    NoResponse { timeout: Duration },
    #[error("ReloadError::VersionUnchanged: device came back still reporting build '{build}'")]
    VersionUnchanged { build: String },
    #[error("ReloadError::Command: reload command was not accepted: {0}")]
    Command(ChannelError),
}

/// Top-level error for one update sequence.
///
/// The sequence is fail-fast: a link failure aborts before any PROM
/// transaction, a decode failure aborts before any hardware transaction and
/// a program failure aborts before the reload. The one late case is
/// [`UpdateError::Unconfirmed`]: the PROM already holds the new image, so
/// the message says so explicitly.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("{0}")]
    Link(#[from] LinkError),
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("{0}")]
    Channel(#[from] ChannelError),
    #[error("{0}")]
    Program(#[from] ProgramError),
    #[error(
        "UpdateError::Unconfirmed: the new image was written to the PROM but the reload could not \
         be confirmed ({source}); the device must be treated as unverified"
    )]
    Unconfirmed { source: ReloadError },
    #[error("UpdateError::Argument: {0}")]
    Argument(String),
}
