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

//! XMODEM protocol constants

use crate::checksum::{checksum8, crc16};

/// Start of header - begins a 128-byte data block
pub const SOH: u8 = 0x01;

/// End of transmission - sender has no more data
pub const EOT: u8 = 0x04;

/// Acknowledge - block or EOT accepted
pub const ACK: u8 = 0x06;

/// Negative acknowledge - retransmit, or start in checksum mode
pub const NAK: u8 = 0x15;

/// Cancel - abort the transfer
pub const CAN: u8 = 0x18;

/// Fills the final short block
pub const PAD: u8 = 0x1A;

/// Receiver asks to start in CRC-16 mode
pub const CRC_REQUEST: u8 = b'C';

/// Payload bytes carried by every data block
pub const BLOCK_SIZE: usize = 128;

pub type Block = [u8; BLOCK_SIZE];

/// Error detection used for the whole transfer, picked by the receiver's
/// first announcement byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDetectionMode {
    Checksum,
    Crc16,
}

impl ErrorDetectionMode {
    /// Maps a start request from the receiver to the mode it asks for.
    pub fn from_request(byte: u8) -> Option<Self> {
        match byte {
            NAK => Some(ErrorDetectionMode::Checksum),
            CRC_REQUEST => Some(ErrorDetectionMode::Crc16),
            _ => None,
        }
    }

    pub fn request_byte(self) -> u8 {
        match self {
            ErrorDetectionMode::Checksum => NAK,
            ErrorDetectionMode::Crc16 => CRC_REQUEST,
        }
    }

    pub fn trailer_len(self) -> usize {
        match self {
            ErrorDetectionMode::Checksum => 1,
            ErrorDetectionMode::Crc16 => 2,
        }
    }

    /// Bytes following the SOH: block number, complement, payload, trailer.
    pub fn frame_len(self) -> usize {
        2 + BLOCK_SIZE + self.trailer_len()
    }

    pub fn push_trailer(self, payload: &Block, out: &mut Vec<u8>) {
        match self {
            ErrorDetectionMode::Checksum => out.push(checksum8(payload)),
            ErrorDetectionMode::Crc16 => out.extend_from_slice(&crc16(payload).to_be_bytes()),
        }
    }

    pub fn verify_trailer(self, payload: &Block, trailer: &[u8]) -> bool {
        match self {
            ErrorDetectionMode::Checksum => trailer == [checksum8(payload)],
            ErrorDetectionMode::Crc16 => trailer == crc16(payload).to_be_bytes(),
        }
    }
}

impl std::fmt::Display for ErrorDetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetectionMode::Checksum => write!(f, "checksum"),
            ErrorDetectionMode::Crc16 => write!(f, "CRC-16"),
        }
    }
}
