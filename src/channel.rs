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

//! Register transaction channel.
//!
//! Issues read/write transactions against the flat byte-addressable register
//! space a carrier exposes for itself and the front-end board behind it.
//! Requests and responses travel as little-endian frames over a [`Transport`]
//! and are correlated by sequence number; a channel owns its transport
//! exclusively, so at most one transaction is outstanding and transactions
//! complete in issue order.
//!
//! Request frame: `seq:u32 | op:u8 | addr:u64 | count:u32 | payload`
//! (payload present for writes only). Response frame: `seq:u32 | op:u8 |
//! status:u8 | payload` (payload present for read responses only).
//!
//! Retry policy belongs to the caller: a timeout or link drop is returned,
//! never absorbed here.

use crate::config;
use crate::error::ChannelError;
use log::trace;
use std::io;
use std::time::{Duration, Instant};

/// Read transaction opcode.
pub(crate) const OP_READ: u8 = 0;
/// Write transaction opcode.
pub(crate) const OP_WRITE: u8 = 1;
/// Response status byte for an accepted transaction.
pub(crate) const STATUS_OK: u8 = 0;

const REQ_HEADER_LEN: usize = 17;
const RSP_HEADER_LEN: usize = 6;

/// Framed bidirectional byte stream supplied by the hosting environment.
///
/// The reference transport is a DMA-backed PCIe stream character device; the
/// simulator in [`crate::sim`] is a second implementation. `recv` returns
/// `Ok(None)` when `timeout` elapses without a frame; an `Err` whose kind
/// indicates disconnection is surfaced as [`ChannelError::LinkDown`].
pub trait Transport {
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;
    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Request {
    pub seq: u32,
    pub op: u8,
    pub address: u64,
    pub count: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Response {
    pub seq: u32,
    pub op: u8,
    pub status: u8,
    pub payload: Vec<u8>,
}

pub(crate) fn encode_request(req: &Request) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REQ_HEADER_LEN + req.payload.len());
    frame.extend_from_slice(&req.seq.to_le_bytes());
    frame.push(req.op);
    frame.extend_from_slice(&req.address.to_le_bytes());
    frame.extend_from_slice(&req.count.to_le_bytes());
    frame.extend_from_slice(&req.payload);
    frame
}

pub(crate) fn decode_request(frame: &[u8]) -> Result<Request, ChannelError> {
    if frame.len() < REQ_HEADER_LEN {
        return Err(ChannelError::Frame(format!(
            "request of {} bytes is shorter than the {REQ_HEADER_LEN} byte header",
            frame.len()
        )));
    }
    let seq = u32::from_le_bytes(frame[0..4].try_into().expect("sized slice"));
    let op = frame[4];
    let address = u64::from_le_bytes(frame[5..13].try_into().expect("sized slice"));
    let count = u32::from_le_bytes(frame[13..17].try_into().expect("sized slice"));
    Ok(Request {
        seq,
        op,
        address,
        count,
        payload: frame[REQ_HEADER_LEN..].to_vec(),
    })
}

pub(crate) fn encode_response(rsp: &Response) -> Vec<u8> {
    let mut frame = Vec::with_capacity(RSP_HEADER_LEN + rsp.payload.len());
    frame.extend_from_slice(&rsp.seq.to_le_bytes());
    frame.push(rsp.op);
    frame.push(rsp.status);
    frame.extend_from_slice(&rsp.payload);
    frame
}

pub(crate) fn decode_response(frame: &[u8]) -> Result<Response, ChannelError> {
    if frame.len() < RSP_HEADER_LEN {
        return Err(ChannelError::Frame(format!(
            "response of {} bytes is shorter than the {RSP_HEADER_LEN} byte header",
            frame.len()
        )));
    }
    let seq = u32::from_le_bytes(frame[0..4].try_into().expect("sized slice"));
    Ok(Response {
        seq,
        op: frame[4],
        status: frame[5],
        payload: frame[RSP_HEADER_LEN..].to_vec(),
    })
}

fn map_io(e: io::Error) -> ChannelError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => ChannelError::LinkDown(e),
        _ => ChannelError::Io(e),
    }
}

/// One logical register transaction channel to one device.
///
/// Owns its [`Transport`] exclusively; concurrent callers serialize through
/// the `&mut self` methods. Independent lanes get independent channels.
pub struct RegisterChannel<T: Transport> {
    transport: T,
    window: u64,
    timeout: Duration,
    seq: u32,
}

impl<T: Transport> RegisterChannel<T> {
    /// Create a channel over `transport` for a device advertising `window`
    /// addressable bytes.
    pub fn new(transport: T, window: u64) -> Self {
        RegisterChannel {
            transport,
            window,
            timeout: config::DEFAULT_TRANSACTION_TIMEOUT,
            seq: 0,
        }
    }

    /// Replace the per-transaction response timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Write `payload` to `address` as one burst transaction.
    pub fn write(&mut self, address: u64, payload: &[u8]) -> Result<(), ChannelError> {
        self.check_window(address, payload.len())?;
        self.transact(OP_WRITE, address, payload.len() as u32, payload)
            .map(|_| ())
    }

    /// Read `count` bytes starting at `address`.
    pub fn read(&mut self, address: u64, count: usize) -> Result<Vec<u8>, ChannelError> {
        self.check_window(address, count)?;
        self.transact(OP_READ, address, count as u32, &[])
    }

    /// Write one 32-bit register word.
    pub fn write_u32(&mut self, address: u64, value: u32) -> Result<(), ChannelError> {
        self.write(address, &value.to_le_bytes())
    }

    /// Read one 32-bit register word.
    pub fn read_u32(&mut self, address: u64) -> Result<u32, ChannelError> {
        let bytes = self.read(address, 4)?;
        Ok(u32::from_le_bytes(
            bytes.as_slice().try_into().expect("length checked in transact"),
        ))
    }

    fn check_window(&self, address: u64, len: usize) -> Result<(), ChannelError> {
        let end = address.checked_add(len as u64);
        match end {
            Some(end) if end <= self.window => Ok(()),
            _ => Err(ChannelError::AddressRange {
                address,
                len,
                window: self.window,
            }),
        }
    }

    fn transact(
        &mut self,
        op: u8,
        address: u64,
        count: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, ChannelError> {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        trace!("txn {seq}: op {op} addr 0x{address:X} count {count}");
        let frame = encode_request(&Request {
            seq,
            op,
            address,
            count,
            payload: payload.to_vec(),
        });
        self.transport.send(&frame).map_err(map_io)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::Timeout {
                    address,
                    timeout: self.timeout,
                });
            }
            let Some(frame) = self.transport.recv(remaining).map_err(map_io)? else {
                return Err(ChannelError::Timeout {
                    address,
                    timeout: self.timeout,
                });
            };
            let rsp = decode_response(&frame)?;
            if rsp.seq != seq {
                // A response left behind by an earlier timed-out transaction.
                trace!("txn {seq}: discarding stale response {}", rsp.seq);
                continue;
            }
            if rsp.op != op {
                return Err(ChannelError::Frame(format!(
                    "response op {} does not match request op {op}",
                    rsp.op
                )));
            }
            if rsp.status != STATUS_OK {
                return Err(ChannelError::Remote {
                    address,
                    status: rsp.status,
                });
            }
            if op == OP_READ && rsp.payload.len() != count as usize {
                return Err(ChannelError::Frame(format!(
                    "read response carries {} bytes, expected {count}",
                    rsp.payload.len()
                )));
            }
            trace!("txn {seq}: complete");
            return Ok(rsp.payload);
        }
    }
}
