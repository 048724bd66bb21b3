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

//! Character-device transport for the PCIe DMA stream driver.
//!
//! The DMA driver's device node preserves packet boundaries: one `read(2)`
//! returns exactly one received frame and one `write(2)` transmits one.
//! Responses are pulled by a reader thread and handed over an in-process
//! queue so [`Transport::recv`] can honour a deadline; the thread belongs to
//! the transport instance and winds down when the stream closes or the
//! transport is dropped.

use crate::channel::Transport;
use log::trace;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Largest frame the DMA engine delivers: a full response header plus one
/// burst payload.
const MAX_FRAME_LEN: usize = 4096;

pub struct CharDevTransport {
    writer: File,
    frames: Receiver<io::Result<Vec<u8>>>,
}

impl CharDevTransport {
    /// Open the DMA device node and start its reader thread.
    pub fn open(path: &Path) -> io::Result<Self> {
        let writer = OpenOptions::new().read(true).write(true).open(path)?;
        let mut reader = writer.try_clone()?;
        let (tx, frames) = mpsc::channel();
        thread::Builder::new()
            .name("clprog-rx".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; MAX_FRAME_LEN];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => {
                            let _ = tx.send(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "stream closed",
                            )));
                            break;
                        }
                        Ok(n) => {
                            trace!("received {n} byte frame");
                            if tx.send(Ok(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            })?;
        Ok(CharDevTransport { writer, frames })
    }
}

impl Transport for CharDevTransport {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.writer.write_all(frame)?;
        self.writer.flush()
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        match self.frames.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "receive thread exited",
            )),
        }
    }
}
