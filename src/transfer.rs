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

use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Outcome & Error Types
// ============================================================================

/// The single result every transfer attempt ends with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Aborted(String),
    TimedOut,
}

/// Terminal failures inside a state machine. `run` turns these into
/// `TransferOutcome::Aborted`.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("source error: {0}")]
    Source(#[source] std::io::Error),

    #[error("sink error: {0}")]
    Sink(#[source] std::io::Error),

    #[error("cancelled by peer")]
    PeerCancelled,

    #[error("no start signal")]
    NoStartSignal,

    #[error("retry budget exhausted")]
    RetryBudgetExhausted,

    #[error("EOT not acknowledged")]
    EotNotAcknowledged,

    #[error("no SOH")]
    NoSoh,

    #[error("connection lost mid-block")]
    ConnectionLost,
}

// ============================================================================
// Trait
// ============================================================================

pub enum Transition {
    Next(Box<dyn TransferState>),
    Finished(TransferOutcome),
}

/// One state of a sender or receiver. `step` consumes the state and hands
/// back its successor, so nothing is mutated across transitions.
pub trait TransferState: Send {
    fn name(&self) -> &'static str;

    fn step(self: Box<Self>) -> Result<Transition, TransferError>;

    /// Abandons the transfer from this state, telling the peer if it has
    /// already engaged.
    fn cancel(self: Box<Self>);
}

/// Type name of a state marker without its module path
pub fn state_name<S>() -> &'static str {
    let type_name = std::any::type_name::<S>();
    type_name.rsplit("::").next().unwrap_or(type_name)
}

// ============================================================================
// Runner
// ============================================================================

/// Steps a state machine to its terminal outcome. With a `deadline`, the
/// transfer is cancelled once that much time has passed; the check happens
/// between steps, so a step in progress finishes first.
pub fn run(mut state: Box<dyn TransferState>, deadline: Option<Duration>) -> TransferOutcome {
    let started = Instant::now();

    loop {
        if let Some(limit) = deadline {
            if started.elapsed() >= limit {
                warn!("Transfer deadline of {:?} passed in state {}", limit, state.name());
                state.cancel();
                return TransferOutcome::TimedOut;
            }
        }

        let name = state.name();
        match state.step() {
            Ok(Transition::Next(next)) => {
                if next.name() != name {
                    debug!("{} -> {}", name, next.name());
                }
                state = next;
            }
            Ok(Transition::Finished(outcome)) => {
                info!("Transfer finished: {:?}", outcome);
                return outcome;
            }
            Err(e) => {
                warn!("Transfer aborted in state {}: {}", name, e);
                return TransferOutcome::Aborted(e.to_string());
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use crate::config::TransferConfig;
    use crate::protocol::*;
    use crate::receiver::{ReceiverFsm, SharedSink};
    use crate::sender::SenderFsm;
    use crate::serial::{LoopbackPort, LossyPort, Transport};

    struct Countdown {
        remaining: u32,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl TransferState for Countdown {
        fn name(&self) -> &'static str {
            "Countdown"
        }

        fn step(self: Box<Self>) -> Result<Transition, TransferError> {
            self.log.lock().unwrap().push("step");
            if self.remaining == 0 {
                return Ok(Transition::Finished(TransferOutcome::Completed));
            }
            std::thread::sleep(Duration::from_millis(5));
            Ok(Transition::Next(Box::new(Countdown {
                remaining: self.remaining - 1,
                log: self.log,
            })))
        }

        fn cancel(self: Box<Self>) {
            self.log.lock().unwrap().push("cancel");
        }
    }

    struct Failing;

    impl TransferState for Failing {
        fn name(&self) -> &'static str {
            "Failing"
        }

        fn step(self: Box<Self>) -> Result<Transition, TransferError> {
            Err(TransferError::PeerCancelled)
        }

        fn cancel(self: Box<Self>) {}
    }

    fn test_config() -> TransferConfig {
        TransferConfig {
            response_timeout: Duration::from_millis(200),
            frame_timeout: Duration::from_millis(200),
            ..TransferConfig::default()
        }
    }

    fn sample_file(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 13 % 251) as u8).collect()
    }

    fn transfer_over<T: Transport + 'static>(
        sender_port: T,
        receiver_port: LoopbackPort,
        data: Vec<u8>,
        mode: ErrorDetectionMode,
    ) -> (TransferOutcome, TransferOutcome, Vec<u8>) {
        let config = test_config();
        let (sink, received) = SharedSink::new();

        let receiver = thread::spawn(move || {
            let fsm = ReceiverFsm::new(Box::new(receiver_port), Box::new(sink), mode, config);
            run(fsm, None)
        });
        let sender = thread::spawn(move || {
            let fsm = SenderFsm::new(Box::new(sender_port), Box::new(std::io::Cursor::new(data)), config);
            run(fsm, None)
        });

        let receiver_outcome = receiver.join().expect("receiver thread");
        let sender_outcome = sender.join().expect("sender thread");
        let output = received.lock().unwrap().clone();
        (sender_outcome, receiver_outcome, output)
    }

    #[test]
    fn test_state_name() {
        struct AwaitSomething;
        assert_eq!(state_name::<AwaitSomething>(), "AwaitSomething");
    }

    #[test]
    fn test_run_to_completion() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let outcome = run(Box::new(Countdown { remaining: 2, log: log.clone() }), None);
        assert_eq!(outcome, TransferOutcome::Completed);
        assert_eq!(*log.lock().unwrap(), vec!["step", "step", "step"]);
    }

    #[test]
    fn test_run_reports_error_as_abort() {
        let outcome = run(Box::new(Failing), None);
        assert_eq!(outcome, TransferOutcome::Aborted("cancelled by peer".to_string()));
    }

    #[test]
    fn test_run_deadline_cancels() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let state = Box::new(Countdown { remaining: 1000, log: log.clone() });
        let outcome = run(state, Some(Duration::from_millis(20)));
        assert_eq!(outcome, TransferOutcome::TimedOut);
        assert_eq!(log.lock().unwrap().last(), Some(&"cancel"));
    }

    #[test]
    fn test_checksum_transfer_over_loopback() {
        let data = sample_file(300);
        let (sender_port, receiver_port) = LoopbackPort::pair();

        let (sent, received, output) =
            transfer_over(sender_port, receiver_port, data.clone(), ErrorDetectionMode::Checksum);

        assert_eq!(sent, TransferOutcome::Completed);
        assert_eq!(received, TransferOutcome::Completed);
        assert_eq!(output, data);
    }

    #[test]
    fn test_crc_transfer_survives_dropped_replies() {
        let data = sample_file(300);
        let (sender_port, receiver_port) = LoopbackPort::pair();
        let lossy = LossyPort::new(sender_port, 3);

        let (_sent, received, output) =
            transfer_over(lossy, receiver_port, data.clone(), ErrorDetectionMode::Crc16);

        // The sixth reply is the ACK for EOT; once the receiver is done nobody
        // repeats it, so only the receiving side is guaranteed to complete.
        assert_eq!(received, TransferOutcome::Completed);
        assert_eq!(output, data);
    }

    #[test]
    fn test_multi_wrap_transfer_over_loopback() {
        // 300 blocks: block numbers wrap past 255 on both ends
        let data = sample_file(300 * BLOCK_SIZE - 7);
        let (sender_port, receiver_port) = LoopbackPort::pair();

        let (sent, received, output) =
            transfer_over(sender_port, receiver_port, data.clone(), ErrorDetectionMode::Crc16);

        assert_eq!(sent, TransferOutcome::Completed);
        assert_eq!(received, TransferOutcome::Completed);
        assert_eq!(output.len(), data.len());
        assert_eq!(output, data);
    }

    #[test]
    fn test_empty_file_over_loopback() {
        let (sender_port, receiver_port) = LoopbackPort::pair();

        let (sent, received, output) =
            transfer_over(sender_port, receiver_port, Vec::new(), ErrorDetectionMode::Checksum);

        assert_eq!(sent, TransferOutcome::Completed);
        assert_eq!(received, TransferOutcome::Completed);
        assert!(output.is_empty());
    }
}
