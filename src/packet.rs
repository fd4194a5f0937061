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

//! Data block framing
//!
//! On the wire a block is `SOH, n, 255 - n, payload[128], trailer`. The
//! codec only checks structure; retry policy belongs to the state machines.

use thiserror::Error;
use crate::protocol::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("expected a {expected} byte frame, got {actual} bytes")]
    UnexpectedLength { expected: usize, actual: usize },

    #[error("block number 0x{number:02X} does not match complement 0x{complement:02X}")]
    BadBlockNumberPair { number: u8, complement: u8 },

    #[error("trailer does not match payload")]
    ChecksumMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    pub number: u8,
    pub payload: Block,
}

/// Builds a complete packet, SOH included. A payload shorter than a block
/// is padded with `PAD`.
pub fn encode(mode: ErrorDetectionMode, block_number: u8, payload: &[u8]) -> Vec<u8> {
    let block = pad_block(payload);

    let mut packet = Vec::with_capacity(1 + mode.frame_len());
    packet.push(SOH);
    packet.push(block_number);
    packet.push(255 - block_number);
    packet.extend_from_slice(&block);
    mode.push_trailer(&block, &mut packet);
    packet
}

/// Parses the bytes that follow a SOH already consumed by the caller.
pub fn decode(mode: ErrorDetectionMode, frame: &[u8]) -> Result<DecodedBlock, FrameError> {
    if frame.len() != mode.frame_len() {
        return Err(FrameError::UnexpectedLength {
            expected: mode.frame_len(),
            actual: frame.len(),
        });
    }

    let number = frame[0];
    let complement = frame[1];
    if number.wrapping_add(complement) != 0xFF {
        return Err(FrameError::BadBlockNumberPair { number, complement });
    }

    let mut payload = [0u8; BLOCK_SIZE];
    payload.copy_from_slice(&frame[2..2 + BLOCK_SIZE]);

    if !mode.verify_trailer(&payload, &frame[2 + BLOCK_SIZE..]) {
        return Err(FrameError::ChecksumMismatch);
    }

    Ok(DecodedBlock { number, payload })
}

pub fn pad_block(data: &[u8]) -> Block {
    debug_assert!(data.len() <= BLOCK_SIZE, "block payload of {} bytes", data.len());
    let mut block = [PAD; BLOCK_SIZE];
    block[..data.len()].copy_from_slice(data);
    block
}

/// Trims trailing pad bytes off a fully reassembled stream. Only valid once,
/// at the end of a transfer: `PAD` is ordinary data inside earlier blocks.
pub fn strip_padding(data: &mut Vec<u8>) {
    let end = data.iter().rposition(|&b| b != PAD).map_or(0, |i| i + 1);
    data.truncate(end);
}
