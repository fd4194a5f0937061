// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io::Write;
use tracing::{debug, info, warn};
use crate::config::TransferConfig;
use crate::packet;
use crate::protocol::*;
use crate::retry::{self, Attempt, RetryBudget};
use crate::serial::Transport;
use crate::transfer::{state_name, TransferError, TransferOutcome, TransferState, Transition};

// ============================================================================
// States
// ============================================================================

#[derive(Clone, Copy)]
pub struct AwaitSoh {
    mode: ErrorDetectionMode,
}

#[derive(Clone, Copy)]
pub struct ReceivingBlock {
    mode: ErrorDetectionMode,
    expected: u8,
    // Leading SOH was already read during negotiation
    have_soh: bool,
}

enum Start {
    FirstBlock,
    EndOfTransmission,
}

enum BlockEvent {
    Accepted,
    Duplicate,
    EndOfTransmission,
}

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: State,
    serial: Box<dyn Transport>,
    sink: Box<dyn Write + Send>,
    config: TransferConfig,
    received: Vec<u8>,
    blocks_received: usize,
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self, state: T) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state,
            serial: self.serial,
            sink: self.sink,
            config: self.config,
            received: self.received,
            blocks_received: self.blocks_received,
        })
    }

    fn send_cancel(&mut self) {
        match self.serial.write_all(&[CAN]) {
            Ok(()) => debug!("Sent: CAN"),
            Err(e) => warn!("Failed to send CAN: {}", e),
        }
    }

    /// Strips the final block's padding and hands the whole stream to the
    /// sink. Nothing reaches the sink before this point.
    fn finish(mut self) -> Result<Transition, TransferError> {
        packet::strip_padding(&mut self.received);

        self.sink.write_all(&self.received).map_err(TransferError::Sink)?;
        self.sink.flush().map_err(TransferError::Sink)?;

        info!("Received {} blocks, {} bytes", self.blocks_received, self.received.len());
        Ok(Transition::Finished(TransferOutcome::Completed))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl TransferState for ReceiverFsm<AwaitSoh> {
    fn name(&self) -> &'static str {
        state_name::<AwaitSoh>()
    }

    fn step(self: Box<Self>) -> Result<Transition, TransferError> {
        let mut fsm = *self;
        let AwaitSoh { mode } = fsm.state;
        let timeout = fsm.config.response_timeout;

        let started = retry::attempt(RetryBudget::NEGOTIATION, |n| {
            fsm.serial.write_all(&[mode.request_byte()])?;
            debug!("Sent: {} start request (attempt {})", mode, n);

            match fsm.serial.read_byte(timeout)? {
                Some(SOH) => Ok(Attempt::Done(Start::FirstBlock)),
                Some(EOT) => Ok(Attempt::Done(Start::EndOfTransmission)),
                Some(CAN) => Err(TransferError::PeerCancelled),
                Some(other) => {
                    debug!("Ignoring 0x{:02X} while waiting for SOH", other);
                    Ok(Attempt::Retry)
                }
                None => {
                    debug!("Sender not ready");
                    Ok(Attempt::Retry)
                }
            }
        })?;

        match started.map_err(|_| TransferError::NoSoh)? {
            Start::FirstBlock => {
                info!("Sender started in {} mode", mode);
                let next = ReceivingBlock { mode, expected: 1, have_soh: true };
                Ok(Transition::Next(fsm.transition(next)))
            }
            Start::EndOfTransmission => {
                info!("Sender has nothing to send");
                fsm.serial.write_all(&[ACK])?;
                fsm.finish()
            }
        }
    }

    fn cancel(self: Box<Self>) {
        debug!("Cancelled before the sender started");
    }
}

impl TransferState for ReceiverFsm<ReceivingBlock> {
    fn name(&self) -> &'static str {
        state_name::<ReceivingBlock>()
    }

    fn step(self: Box<Self>) -> Result<Transition, TransferError> {
        let mut fsm = *self;
        let ReceivingBlock { mode, expected, mut have_soh } = fsm.state;
        let timeout = fsm.config.response_timeout;
        let frame_timeout = fsm.config.frame_timeout;
        let mut frame = vec![0u8; mode.frame_len()];

        let event = retry::attempt(RetryBudget::BLOCK, |n| {
            let lead = if std::mem::take(&mut have_soh) {
                Some(SOH)
            } else {
                fsm.serial.read_byte(timeout)?
            };

            match lead {
                Some(SOH) => {}
                Some(EOT) => {
                    fsm.serial.write_all(&[ACK])?;
                    return Ok(Attempt::Done(BlockEvent::EndOfTransmission));
                }
                Some(CAN) => return Err(TransferError::PeerCancelled),
                Some(other) => {
                    debug!("Discarding 0x{:02X} while waiting for block {} (attempt {})", other, expected, n);
                    return Ok(Attempt::Retry);
                }
                None => {
                    debug!("Timed out waiting for block {} (attempt {})", expected, n);
                    return Ok(Attempt::Retry);
                }
            }

            let len = fsm.serial.read_full(&mut frame, frame_timeout)?;
            let decoded = match packet::decode(mode, &frame[..len]) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Rejected frame for block {}: {} (attempt {})", expected, e, n);
                    // The frame boundary is lost; drop the rest before asking again
                    let discarded = fsm.serial.purge(frame_timeout)?;
                    if discarded > 0 {
                        debug!("Purged {} stray bytes", discarded);
                    }
                    fsm.serial.write_all(&[NAK])?;
                    return Ok(Attempt::Retry);
                }
            };

            if decoded.number == expected {
                fsm.received.extend_from_slice(&decoded.payload);
                fsm.serial.write_all(&[ACK])?;
                Ok(Attempt::Done(BlockEvent::Accepted))
            } else if fsm.blocks_received > 0 && decoded.number == expected.wrapping_sub(1) {
                // Our ACK for the previous block was lost
                debug!("Block {} repeated, acknowledging again", decoded.number);
                fsm.serial.write_all(&[ACK])?;
                Ok(Attempt::Done(BlockEvent::Duplicate))
            } else {
                warn!("Expected block {}, got {} (attempt {})", expected, decoded.number, n);
                fsm.serial.write_all(&[NAK])?;
                Ok(Attempt::Retry)
            }
        })?;

        match event {
            Ok(BlockEvent::Accepted) => {
                fsm.blocks_received += 1;
                debug!("Block {} accepted", expected);
                let next = ReceivingBlock { mode, expected: expected.wrapping_add(1), have_soh: false };
                Ok(Transition::Next(fsm.transition(next)))
            }
            Ok(BlockEvent::Duplicate) => {
                let next = ReceivingBlock { mode, expected, have_soh: false };
                Ok(Transition::Next(fsm.transition(next)))
            }
            Ok(BlockEvent::EndOfTransmission) => {
                debug!("Received: EOT");
                fsm.finish()
            }
            Err(_) => {
                fsm.send_cancel();
                Err(TransferError::ConnectionLost)
            }
        }
    }

    fn cancel(self: Box<Self>) {
        let mut fsm = *self;
        fsm.send_cancel();
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl ReceiverFsm<AwaitSoh> {
    /// `mode` is announced to the sender; XMODEM receivers pick it, senders follow.
    pub fn new(
        serial: Box<dyn Transport>,
        sink: Box<dyn Write + Send>,
        mode: ErrorDetectionMode,
        config: TransferConfig,
    ) -> Box<dyn TransferState> {
        Box::new(ReceiverFsm {
            state: AwaitSoh { mode },
            serial,
            sink,
            config,
            received: Vec::new(),
            blocks_received: 0,
        })
    }
}

// ============================================================================
// Test Sink
// ============================================================================

/// Sink whose contents stay readable after the state machine consumes it
#[cfg(test)]
pub struct SharedSink {
    data: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[cfg(test)]
impl SharedSink {
    pub fn new() -> (SharedSink, std::sync::Arc<std::sync::Mutex<Vec<u8>>>) {
        let data = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        (SharedSink { data: data.clone() }, data)
    }
}

#[cfg(test)]
impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
