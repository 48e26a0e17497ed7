//! Pure state derivation: the operating state of a valve is a function
//! of "now" and its Approved requests, nothing else.
//!
//! Tie-breaking when several Approved requests could apply:
//!   1. a window that currently brackets `now` beats any expired or
//!      future one;
//!   2. among bracketing (or among non-bracketing) candidates the most
//!      recently opened window wins;
//!   3. no Approved request at all forces Disabled.
//!
//! Malformed windows (open after close) are counted and excluded; they
//! must never drive a state or a command.

use crate::device::model::OperatingState;
use crate::request::model::{Request, RequestStatus};

/// Outcome of one derivation: the target state, the request that drives
/// it (None only for Disabled), and how many malformed rows were seen.
#[derive(Debug)]
pub struct Derivation<'a> {
    pub target: OperatingState,
    pub driving: Option<&'a Request>,
    pub malformed: usize,
}

pub fn derive_target<'a>(requests: &'a [Request], now_ms: u64) -> Derivation<'a> {
    let mut malformed = 0usize;
    let mut newest: Option<&Request> = None;
    let mut newest_bracketing: Option<&Request> = None;

    for r in requests {
        if r.status != RequestStatus::Approved {
            continue;
        }
        if !r.window_is_valid() {
            malformed += 1;
            continue;
        }
        if r.brackets(now_ms) {
            newest_bracketing = pick_newer(newest_bracketing, r);
        }
        newest = pick_newer(newest, r);
    }

    if let Some(active) = newest_bracketing {
        return Derivation {
            target: OperatingState::Active,
            driving: Some(active),
            malformed,
        };
    }

    match newest {
        None => Derivation {
            target: OperatingState::Disabled,
            driving: None,
            malformed,
        },
        Some(r) if r.is_upcoming(now_ms) => Derivation {
            target: OperatingState::Waiting,
            driving: Some(r),
            malformed,
        },
        Some(r) => {
            // not bracketing and not upcoming, so it must be expired
            debug_assert!(r.is_expired(now_ms));
            Derivation {
                target: OperatingState::Closed,
                driving: Some(r),
                malformed,
            }
        }
    }
}

fn pick_newer<'a>(current: Option<&'a Request>, candidate: &'a Request) -> Option<&'a Request> {
    match current {
        Some(c) if c.open_at_ms >= candidate.open_at_ms => Some(c),
        _ => Some(candidate),
    }
}
