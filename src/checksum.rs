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

//! Block checksums
//!
//! The 8-bit additive checksum is the legacy mode; it misses any pair of
//! errors that cancel out in the sum. CRC-16 (polynomial 0x1021, initial
//! value 0, MSB first, no final XOR) catches every single and double bit
//! flip within a block.

const CRC16_POLY: u16 = 0x1021;

/// Sum of all bytes modulo 256.
pub fn checksum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum8() {
        assert_eq!(checksum8(&[0u8; 128]), 0);
        assert_eq!(checksum8(&[0xFFu8; 128]), 0x80);

        let ramp: Vec<u8> = (0..128).collect();
        assert_eq!(checksum8(&ramp), 192);
    }

    #[test]
    fn test_crc16_known_answers() {
        assert_eq!(crc16(&[0u8; 128]), 0x0000);
        assert_eq!(crc16(&[0xFFu8; 128]), 0xEDA9);
        assert_eq!(crc16(b"123456789"), 0x31C3);

        let ramp: Vec<u8> = (0..128).collect();
        assert_eq!(crc16(&ramp), 0xE80A);
    }

    #[test]
    fn test_crc16_deterministic() {
        let data: Vec<u8> = (0..128).map(|i| (i * 7 + 3) as u8).collect();
        assert_eq!(crc16(&data), crc16(&data.clone()));
    }

    #[test]
    fn test_crc16_detects_bit_flips() {
        let data: Vec<u8> = (0..128).map(|i| (i * 31 + 11) as u8).collect();
        let reference = crc16(&data);

        for bit in 0..128 * 8 {
            let mut flipped = data.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert_ne!(crc16(&flipped), reference, "single flip at bit {}", bit);
        }

        // Double flips a byte apart, plus a far pair spanning the block
        for bit in 0..127 * 8 {
            let mut flipped = data.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            flipped[bit / 8 + 1] ^= 1 << (bit % 8);
            assert_ne!(crc16(&flipped), reference, "double flip at bit {}", bit);
        }
        let mut flipped = data.clone();
        flipped[0] ^= 0x80;
        flipped[127] ^= 0x01;
        assert_ne!(crc16(&flipped), reference);
    }

    #[test]
    fn test_checksum8_misses_cancelling_errors() {
        // Known weakness of checksum mode: +1 in one byte and -1 in another
        let mut data = [0x40u8; 128];
        let reference = checksum8(&data);
        data[3] += 1;
        data[90] -= 1;
        assert_eq!(checksum8(&data), reference);
        assert_ne!(crc16(&data), crc16(&[0x40u8; 128]));
    }
}
