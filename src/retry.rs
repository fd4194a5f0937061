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

//! Bounded retries

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    attempts: u32,
}

impl RetryBudget {
    /// Block sends, block receives and the EOT handshake
    pub const BLOCK: RetryBudget = RetryBudget::new(10);

    /// Start signal and first SOH
    pub const NEGOTIATION: RetryBudget = RetryBudget::new(6);

    pub const fn new(attempts: u32) -> Self {
        RetryBudget { attempts }
    }
}

pub enum Attempt<T> {
    Done(T),
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("gave up after {attempts} attempts")]
pub struct Exhausted {
    pub attempts: u32,
}

/// Runs `op` until it yields `Attempt::Done` or the budget runs out.
///
/// `op` receives the 1-based attempt number. An `Err` from `op` stops
/// immediately without spending the rest of the budget.
pub fn attempt<T, E>(
    budget: RetryBudget,
    mut op: impl FnMut(u32) -> Result<Attempt<T>, E>,
) -> Result<Result<T, Exhausted>, E> {
    for n in 1..=budget.attempts {
        if let Attempt::Done(value) = op(n)? {
            return Ok(Ok(value));
        }
    }
    Ok(Err(Exhausted { attempts: budget.attempts }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_on_first_attempt() {
        let mut calls = 0;
        let result: Result<_, ()> = attempt(RetryBudget::BLOCK, |n| {
            calls += 1;
            Ok(Attempt::Done(n))
        });
        assert_eq!(result, Ok(Ok(1)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_done_after_retries() {
        let result: Result<_, ()> = attempt(RetryBudget::NEGOTIATION, |n| {
            if n < 4 { Ok(Attempt::Retry) } else { Ok(Attempt::Done("ok")) }
        });
        assert_eq!(result, Ok(Ok("ok")));
    }

    #[test]
    fn test_exhausted() {
        let mut calls = 0;
        let result: Result<Result<(), _>, ()> = attempt(RetryBudget::NEGOTIATION, |_| {
            calls += 1;
            Ok(Attempt::Retry)
        });
        assert_eq!(result, Ok(Err(Exhausted { attempts: 6 })));
        assert_eq!(calls, 6);
    }

    #[test]
    fn test_error_stops_immediately() {
        let mut calls = 0;
        let result: Result<Result<(), Exhausted>, &str> = attempt(RetryBudget::BLOCK, |n| {
            calls += 1;
            if n == 2 { Err("cancelled") } else { Ok(Attempt::Retry) }
        });
        assert_eq!(result, Err("cancelled"));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_zero_budget() {
        let result: Result<Result<(), _>, ()> = attempt(RetryBudget::new(0), |_| panic!("must not run"));
        assert_eq!(result, Ok(Err(Exhausted { attempts: 0 })));
    }
}
