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

// XMODEM protocol implementation
mod checksum;
mod config;
mod packet;
mod protocol;
mod receiver;
mod retry;
mod sender;
mod serial;
mod transfer;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use clap::{Parser, Subcommand, ValueEnum};
use tempfile::NamedTempFile;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use config::{PortSettings, TransferConfig};
use protocol::ErrorDetectionMode;
use serial::{RealSerialPort, Transport};
use transfer::TransferOutcome;

#[derive(Parser)]
#[command(name = "xmodem")]
#[command(about = "XMODEM file transfer over a serial line", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// Flow control (none, software, or hardware)
    #[arg(long, default_value = "none")]
    flow_control: String,

    /// Seconds to wait for each reply from the peer
    #[arg(long, default_value = "10", value_name = "SECS")]
    timeout: u64,

    /// Delay in milliseconds between sending each byte of a packet
    #[arg(long, default_value = "0", value_name = "MS")]
    byte_delay: u64,

    /// Give up on the whole transfer after this many seconds
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive a file
    Receive {
        /// Where to write the received file
        file: PathBuf,

        /// Error detection to request from the sender
        #[arg(short, long, value_enum, default_value = "crc")]
        mode: ModeArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    /// CRC-16
    Crc,
    /// 8-bit additive checksum
    Checksum,
}

impl From<ModeArg> for ErrorDetectionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Crc => ErrorDetectionMode::Crc16,
            ModeArg::Checksum => ErrorDetectionMode::Checksum,
        }
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let settings = match PortSettings::parse(
        &cli.port,
        cli.baud,
        cli.data_bits,
        &cli.parity,
        cli.stop_bits,
        &cli.flow_control,
    ) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let config = TransferConfig {
        response_timeout: Duration::from_secs(cli.timeout),
        byte_delay: Duration::from_millis(cli.byte_delay),
        deadline: cli.deadline.map(Duration::from_secs),
        ..TransferConfig::default()
    };

    info!("Opening serial port: {}", settings.path);
    info!(
        "Settings: {} baud, {:?}, {:?}, {:?}, {:?} flow control",
        settings.baud_rate, settings.data_bits, settings.parity, settings.stop_bits, settings.flow_control
    );

    let serial_port = match RealSerialPort::open(&settings) {
        Ok(port) => port,
        Err(e) => {
            error!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = match cli.command {
        Commands::Send { file } => {
            info!("Sending file: {}", file.display());
            send_file(Box::new(serial_port), &file, config)
        }
        Commands::Receive { file, mode } => {
            info!("Receiving to: {}", file.display());
            receive_file(Box::new(serial_port), &file, mode.into(), config)
        }
    };

    match outcome {
        TransferOutcome::Completed => info!("Transfer complete"),
        TransferOutcome::Aborted(reason) => {
            error!("Transfer aborted: {}", reason);
            std::process::exit(1);
        }
        TransferOutcome::TimedOut => {
            error!("Transfer timed out");
            std::process::exit(1);
        }
    }
}

fn send_file(serial_port: Box<dyn Transport>, file: &Path, config: TransferConfig) -> TransferOutcome {
    use sender::SenderFsm;

    let source = match File::open(file) {
        Ok(f) => f,
        Err(e) => {
            return TransferOutcome::Aborted(format!("cannot open {}: {}", file.display(), e));
        }
    };

    let fsm = SenderFsm::new(serial_port, Box::new(BufReader::new(source)), config);
    transfer::run(fsm, config.deadline)
}

/// Receives into a temporary file beside `file` and renames it into place
/// only once the transfer completes. An existing `file` is left untouched
/// by a failed transfer.
fn receive_file(
    serial_port: Box<dyn Transport>,
    file: &Path,
    mode: ErrorDetectionMode,
    config: TransferConfig,
) -> TransferOutcome {
    use receiver::ReceiverFsm;

    let dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let partial = match NamedTempFile::new_in(dir) {
        Ok(partial) => partial,
        Err(e) => {
            return TransferOutcome::Aborted(format!("cannot create {}: {}", file.display(), e));
        }
    };

    let sink = match partial.as_file().try_clone() {
        Ok(f) => f,
        Err(e) => {
            return TransferOutcome::Aborted(format!("cannot create {}: {}", file.display(), e));
        }
    };

    let fsm = ReceiverFsm::new(serial_port, Box::new(BufWriter::new(sink)), mode, config);
    let outcome = transfer::run(fsm, config.deadline);

    if outcome != TransferOutcome::Completed {
        debug!("Discarding partial download {}", partial.path().display());
        return outcome;
    }

    match partial.persist(file) {
        Ok(_) => outcome,
        Err(e) => TransferOutcome::Aborted(format!("cannot write {}: {}", file.display(), e.error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{ACK, EOT, NAK};
    use serial::MockSerialPort;

    fn frame(mode: ErrorDetectionMode, n: u8, data: &[u8]) -> Vec<Option<u8>> {
        packet::encode(mode, n, data).into_iter().map(Some).collect()
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_failed_receive_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("firmware.bin");
        std::fs::write(&target, b"previous image").unwrap();

        let mock_serial = Box::new(MockSerialPort::new(vec![], vec![b'C'; 6]));
        let outcome = receive_file(mock_serial, &target, ErrorDetectionMode::Crc16, TransferConfig::default());

        assert_eq!(outcome, TransferOutcome::Aborted("no SOH".to_string()));
        assert_eq!(std::fs::read(&target).unwrap(), b"previous image");
        assert_eq!(entries(dir.path()), 1);
    }

    #[test]
    fn test_failed_receive_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("new.bin");

        let mut responses = frame(ErrorDetectionMode::Checksum, 1, b"half");
        responses.push(Some(protocol::CAN));

        let mock_serial = Box::new(MockSerialPort::new(responses, vec![NAK, ACK]));
        let outcome = receive_file(mock_serial, &target, ErrorDetectionMode::Checksum, TransferConfig::default());

        assert_eq!(outcome, TransferOutcome::Aborted("cancelled by peer".to_string()));
        assert!(!target.exists());
        assert_eq!(entries(dir.path()), 0);
    }

    #[test]
    fn test_completed_receive_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("firmware.bin");
        std::fs::write(&target, b"previous image, longer than the new one").unwrap();

        let mut responses = frame(ErrorDetectionMode::Checksum, 1, b"new image");
        responses.push(Some(EOT));

        let mock_serial = Box::new(MockSerialPort::new(responses, vec![NAK, ACK, ACK]));
        let outcome = receive_file(mock_serial, &target, ErrorDetectionMode::Checksum, TransferConfig::default());

        assert_eq!(outcome, TransferOutcome::Completed);
        assert_eq!(std::fs::read(&target).unwrap(), b"new image");
        assert_eq!(entries(dir.path()), 1);
    }

    #[test]
    fn test_receive_into_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("absent").join("out.bin");

        let mock_serial = Box::new(MockSerialPort::new(vec![], vec![]));
        let outcome = receive_file(mock_serial, &target, ErrorDetectionMode::Crc16, TransferConfig::default());

        assert!(matches!(outcome, TransferOutcome::Aborted(reason) if reason.starts_with("cannot create")));
    }

    #[test]
    fn test_send_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mock_serial = Box::new(MockSerialPort::new(vec![], vec![]));
        let outcome = send_file(mock_serial, &dir.path().join("nope.bin"), TransferConfig::default());

        assert!(matches!(outcome, TransferOutcome::Aborted(reason) if reason.starts_with("cannot open")));
    }
}
