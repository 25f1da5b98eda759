//! Shared time basis and deadline reconciliation
//!
//! All coordination timestamps are Unix milliseconds in the server's time
//! basis where available. Devices running the clients may disagree with the
//! server and with each other, and the push notification that opens an answer
//! window arrives with latency, so a host-issued deadline taken at face value
//! can be expired (or nearly so) the moment a client first sees it.
//!
//! [`RunClock`] implements the reconciliation rule: a client records the
//! local moment it first observed a question run and grants the participant a
//! full answer window from that moment, never less, while still converging on
//! the host's nominal deadline when clocks agree and propagation is fast.
//! The reconciled deadline affects input locking only; scoring eligibility is
//! always judged against the host's own authoritative deadline.

use crate::{constants, room::RunToken};

/// Milliseconds since the Unix epoch
pub type UnixMillis = i64;

/// Reads the local wall clock
pub fn local_now() -> UnixMillis {
    web_time::SystemTime::now()
        .duration_since(web_time::SystemTime::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

/// Measured difference between the server clock and the local clock
///
/// Positive when the server clock is ahead of this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockOffset {
    millis: i64,
}

impl ClockOffset {
    /// Derives the offset from simultaneous readings of both clocks
    pub fn between(server: UnixMillis, local: UnixMillis) -> Self {
        Self {
            millis: server - local,
        }
    }

    /// Maps a server-basis timestamp into the local time basis
    pub fn server_to_local(self, server_time: UnixMillis) -> UnixMillis {
        server_time - self.millis
    }
}

/// Computes the effective local answer deadline for one client
///
/// The effective deadline is the later of the offset-adjusted host deadline
/// and `received_at` plus the full answer window. Without a usable server
/// time reading there is no trustworthy offset, and the rule collapses to
/// receipt plus the window.
pub fn effective_deadline(
    host_deadline: Option<UnixMillis>,
    offset: Option<ClockOffset>,
    received_at: UnixMillis,
) -> UnixMillis {
    let full_window = received_at + constants::room::ANSWER_WINDOW_MS;
    match (host_deadline, offset) {
        (Some(deadline), Some(offset)) => full_window.max(offset.server_to_local(deadline)),
        _ => full_window,
    }
}

/// Per-run timing state held by a client
///
/// Created the moment a client first observes a new run token; superseded
/// wholesale when the token changes.
#[derive(Debug, Clone)]
pub struct RunClock {
    token: RunToken,
    received_at_ms: UnixMillis,
    effective_deadline_ms: UnixMillis,
}

impl RunClock {
    /// Starts the clock for a newly observed run
    ///
    /// # Arguments
    ///
    /// * `token` - The run token that just appeared
    /// * `host_deadline` - The host-issued deadline, server basis
    /// * `local_now` - This device's clock at the moment of observation
    /// * `server_now` - A server clock reading taken at the same moment, if
    ///   one is available
    pub fn begin(
        token: RunToken,
        host_deadline: Option<UnixMillis>,
        local_now: UnixMillis,
        server_now: Option<UnixMillis>,
    ) -> Self {
        let offset = server_now.map(|server| ClockOffset::between(server, local_now));
        Self {
            token,
            received_at_ms: local_now,
            effective_deadline_ms: effective_deadline(host_deadline, offset, local_now),
        }
    }

    /// The run this clock belongs to
    pub fn token(&self) -> &RunToken {
        &self.token
    }

    /// Local time at which the run was first observed
    pub fn received_at_ms(&self) -> UnixMillis {
        self.received_at_ms
    }

    /// The reconciled local deadline
    pub fn effective_deadline_ms(&self) -> UnixMillis {
        self.effective_deadline_ms
    }

    /// Whether the reconciled deadline has passed
    pub fn is_expired(&self, local_now: UnixMillis) -> bool {
        local_now > self.effective_deadline_ms
    }

    /// Milliseconds left on the countdown, clamped to zero
    pub fn remaining_ms(&self, local_now: UnixMillis) -> i64 {
        (self.effective_deadline_ms - local_now).max(0)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{constants::room::ANSWER_WINDOW_MS, question::QuestionId};

    fn token() -> RunToken {
        RunToken::issue(&QuestionId::new("q1"), 1)
    }

    #[test]
    fn offset_maps_server_times_into_local_basis() {
        // Server is 5 s ahead of this device
        let offset = ClockOffset::between(105_000, 100_000);
        assert_eq!(offset.server_to_local(115_000), 110_000);

        // Server is 5 s behind
        let offset = ClockOffset::between(95_000, 100_000);
        assert_eq!(offset.server_to_local(105_000), 110_000);
    }

    #[test]
    fn agreeing_clocks_converge_on_the_nominal_deadline() {
        // No skew, no propagation delay: the adjusted host deadline and the
        // local floor coincide.
        let offset = ClockOffset::between(100_000, 100_000);
        let deadline = effective_deadline(Some(100_000 + ANSWER_WINDOW_MS), Some(offset), 100_000);
        assert_eq!(deadline, 100_000 + ANSWER_WINDOW_MS);
    }

    #[test]
    fn late_delivery_still_grants_a_full_window() {
        // The snapshot arrived 4 s into the window; the local floor wins.
        let offset = ClockOffset::between(104_000, 104_000);
        let deadline = effective_deadline(Some(100_000 + ANSWER_WINDOW_MS), Some(offset), 104_000);
        assert_eq!(deadline, 104_000 + ANSWER_WINDOW_MS);
    }

    #[test]
    fn skewed_client_clock_is_corrected() {
        // Device clock runs 60 s behind the server; the host deadline maps
        // back into the device's basis instead of appearing already expired.
        let offset = ClockOffset::between(160_000, 100_000);
        let deadline = effective_deadline(Some(160_000 + ANSWER_WINDOW_MS), Some(offset), 100_000);
        assert_eq!(deadline, 100_000 + ANSWER_WINDOW_MS);
    }

    #[test]
    fn no_server_time_collapses_to_receipt_plus_window() {
        let deadline = effective_deadline(Some(1), None, 100_000);
        assert_eq!(deadline, 100_000 + ANSWER_WINDOW_MS);

        let deadline = effective_deadline(None, None, 100_000);
        assert_eq!(deadline, 100_000 + ANSWER_WINDOW_MS);
    }

    #[test]
    fn run_clock_expiry_and_remaining() {
        let clock = RunClock::begin(token(), Some(110_000), 100_000, Some(100_000));

        assert_eq!(clock.effective_deadline_ms(), 110_000);
        assert!(!clock.is_expired(110_000));
        assert!(clock.is_expired(110_001));
        assert_eq!(clock.remaining_ms(104_000), 6_000);
        assert_eq!(clock.remaining_ms(120_000), 0);
    }
}
