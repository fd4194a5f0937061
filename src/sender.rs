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

use std::io::{self, Read};
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

pub struct AwaitStart;

#[derive(Clone, Copy)]
pub struct SendingBlock {
    mode: ErrorDetectionMode,
    block: u8,
}

pub struct AwaitEot;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: State,
    serial: Box<dyn Transport>,
    source: Box<dyn Read + Send>,
    config: TransferConfig,
    blocks_sent: usize,
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self, state: T) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state,
            serial: self.serial,
            source: self.source,
            config: self.config,
            blocks_sent: self.blocks_sent,
        })
    }

    /// Writes a packet, byte by byte when an inter-byte delay is configured
    fn send_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        let delay = self.config.byte_delay;
        if delay.is_zero() {
            return self.serial.write_all(packet);
        }
        for &byte in packet {
            self.serial.write_all(&[byte])?;
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn send_cancel(&mut self) {
        match self.serial.write_all(&[CAN]) {
            Ok(()) => debug!("Sent: CAN"),
            Err(e) => warn!("Failed to send CAN: {}", e),
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl TransferState for SenderFsm<AwaitStart> {
    fn name(&self) -> &'static str {
        state_name::<AwaitStart>()
    }

    fn step(self: Box<Self>) -> Result<Transition, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.config.response_timeout;

        let started = retry::attempt(RetryBudget::NEGOTIATION, |n| {
            match fsm.serial.read_byte(timeout)? {
                Some(CAN) => Err(TransferError::PeerCancelled),
                Some(byte) => match ErrorDetectionMode::from_request(byte) {
                    Some(mode) => Ok(Attempt::Done(mode)),
                    None => {
                        debug!("Ignoring 0x{:02X} while waiting for start (attempt {})", byte, n);
                        Ok(Attempt::Retry)
                    }
                },
                None => {
                    debug!("Receiver not ready (attempt {})", n);
                    Ok(Attempt::Retry)
                }
            }
        })?;

        // Nobody has engaged yet, so there is no one to send CAN to
        let mode = started.map_err(|_| TransferError::NoStartSignal)?;
        info!("Receiver requested {} mode", mode);

        Ok(Transition::Next(fsm.transition(SendingBlock { mode, block: 1 })))
    }

    fn cancel(self: Box<Self>) {
        debug!("Cancelled before the receiver started");
    }
}

impl TransferState for SenderFsm<SendingBlock> {
    fn name(&self) -> &'static str {
        state_name::<SendingBlock>()
    }

    fn step(self: Box<Self>) -> Result<Transition, TransferError> {
        let mut fsm = *self;
        let SendingBlock { mode, block } = fsm.state;

        let mut data = [0u8; BLOCK_SIZE];
        let len = match read_block(&mut fsm.source, &mut data) {
            Ok(len) => len,
            Err(e) => {
                fsm.send_cancel();
                return Err(TransferError::Source(e));
            }
        };

        if len == 0 {
            info!("Source exhausted after {} blocks", fsm.blocks_sent);
            return Ok(Transition::Next(fsm.transition(AwaitEot)));
        }

        let packet = packet::encode(mode, block, &data[..len]);
        let timeout = fsm.config.response_timeout;

        let acked = retry::attempt(RetryBudget::BLOCK, |n| {
            fsm.send_packet(&packet)?;
            match fsm.serial.read_byte(timeout)? {
                Some(ACK) => Ok(Attempt::Done(())),
                Some(CAN) => Err(TransferError::PeerCancelled),
                Some(NAK) => {
                    warn!("Block {} rejected (attempt {})", block, n);
                    Ok(Attempt::Retry)
                }
                Some(other) => {
                    warn!("Unexpected 0x{:02X} after block {} (attempt {})", other, block, n);
                    Ok(Attempt::Retry)
                }
                None => {
                    warn!("No reply to block {} (attempt {})", block, n);
                    Ok(Attempt::Retry)
                }
            }
        })?;

        if acked.is_err() {
            fsm.send_cancel();
            return Err(TransferError::RetryBudgetExhausted);
        }

        fsm.blocks_sent += 1;
        debug!("Block {} acknowledged ({} bytes)", block, len);

        let next = SendingBlock { mode, block: block.wrapping_add(1) };
        Ok(Transition::Next(fsm.transition(next)))
    }

    fn cancel(self: Box<Self>) {
        let mut fsm = *self;
        fsm.send_cancel();
    }
}

impl TransferState for SenderFsm<AwaitEot> {
    fn name(&self) -> &'static str {
        state_name::<AwaitEot>()
    }

    fn step(self: Box<Self>) -> Result<Transition, TransferError> {
        let mut fsm = *self;
        let timeout = fsm.config.response_timeout;

        let acked = retry::attempt(RetryBudget::BLOCK, |n| {
            fsm.serial.write_all(&[EOT])?;
            debug!("Sent: EOT (attempt {})", n);
            match fsm.serial.read_byte(timeout)? {
                Some(ACK) => Ok(Attempt::Done(())),
                Some(CAN) => Err(TransferError::PeerCancelled),
                _ => Ok(Attempt::Retry),
            }
        })?;

        // EOT is already terminal for the receiver; no CAN follows it
        acked.map_err(|_| TransferError::EotNotAcknowledged)?;
        info!("Sent {} blocks", fsm.blocks_sent);

        Ok(Transition::Finished(TransferOutcome::Completed))
    }

    fn cancel(self: Box<Self>) {
        let mut fsm = *self;
        fsm.send_cancel();
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl SenderFsm<AwaitStart> {
    pub fn new(
        serial: Box<dyn Transport>,
        source: Box<dyn Read + Send>,
        config: TransferConfig,
    ) -> Box<dyn TransferState> {
        Box::new(SenderFsm {
            state: AwaitStart,
            serial,
            source,
            config,
            blocks_sent: 0,
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Fills `buf` from the source, stopping early only at end of data. A short
/// read from a pipe must not turn into a padded block mid-stream.
fn read_block<R: Read + ?Sized>(source: &mut R, buf: &mut Block) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ============================================================================
// Tests
// ============================================================================
