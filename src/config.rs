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

use std::time::Duration;
use serialport::{DataBits, FlowControl, Parity, StopBits};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid data bits: {0}. Must be 5, 6, 7, or 8")]
    DataBits(u8),

    #[error("Invalid parity: {0}. Must be 'none', 'odd', or 'even'")]
    Parity(String),

    #[error("Invalid stop bits: {0}. Must be 1 or 2")]
    StopBits(u8),

    #[error("Invalid flow control: {0}. Must be 'none', 'software', or 'hardware'")]
    FlowControl(String),
}

/// Line settings applied once when the port is opened
#[derive(Debug, Clone)]
pub struct PortSettings {
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl PortSettings {
    pub fn parse(
        path: &str,
        baud_rate: u32,
        data_bits: u8,
        parity: &str,
        stop_bits: u8,
        flow_control: &str,
    ) -> Result<Self, ConfigError> {
        Ok(PortSettings {
            path: path.to_string(),
            baud_rate,
            data_bits: parse_data_bits(data_bits)?,
            parity: parse_parity(parity)?,
            stop_bits: parse_stop_bits(stop_bits)?,
            flow_control: parse_flow_control(flow_control)?,
        })
    }
}

/// Protocol timing. Timeouts bound every read the state machines make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Wait for a single control byte
    pub response_timeout: Duration,
    /// Wait for the remainder of a data frame after its SOH
    pub frame_timeout: Duration,
    /// Delay between bytes of an outgoing packet, for slow receivers
    pub byte_delay: Duration,
    /// Give up on the whole transfer after this long
    pub deadline: Option<Duration>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            response_timeout: Duration::from_secs(10),
            frame_timeout: Duration::from_secs(1),
            byte_delay: Duration::ZERO,
            deadline: None,
        }
    }
}

fn parse_data_bits(bits: u8) -> Result<DataBits, ConfigError> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(ConfigError::DataBits(bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, ConfigError> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(ConfigError::Parity(parity.to_string())),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, ConfigError> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(ConfigError::StopBits(bits)),
    }
}

fn parse_flow_control(flow: &str) -> Result<FlowControl, ConfigError> {
    match flow.to_lowercase().as_str() {
        "none" => Ok(FlowControl::None),
        "software" | "xonxoff" => Ok(FlowControl::Software),
        "hardware" | "rtscts" => Ok(FlowControl::Hardware),
        _ => Err(ConfigError::FlowControl(flow.to_string())),
    }
}
