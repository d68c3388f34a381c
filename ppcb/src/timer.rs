//! Wait window and retransmission budget.
//!
//! Every receive on either side is bounded by [`RetransmitConfig::max_wait`].
//! On the retransmitting path (UDPR) a timed-out wait resends the last
//! unacknowledged package; [`Retransmitter`] counts consecutive timeouts and
//! decides when the budget is spent.  Plain UDP and TCP never retransmit, so
//! for them the first timeout is already final.

use std::time::Duration;

use tokio::time::Instant;

/// Seconds a single receive may block (`MAX_WAIT`).
pub const MAX_WAIT: Duration = Duration::from_secs(10);

/// Resends allowed per wait before giving up (`MAX_RETRANSMITS`).
pub const MAX_RETRANSMITS: u32 = 3;

/// Adjustable timeout parameters shared by client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitConfig {
    /// Upper bound on one receive attempt.
    pub max_wait: Duration,
    /// Resends per wait; the next timeout ends the session.
    pub max_retransmits: u32,
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        Self {
            max_wait: MAX_WAIT,
            max_retransmits: MAX_RETRANSMITS,
        }
    }
}

impl RetransmitConfig {
    /// Deadline for a wait that starts now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.max_wait
    }
}

/// What to do after a wait expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Resend the last package and wait again.
    Retransmit,
    /// The budget is spent; tear down.
    GiveUp,
}

/// Consecutive-timeout counter for one side of one session.
#[derive(Debug, Clone)]
pub struct Retransmitter {
    retransmitting: bool,
    max_retransmits: u32,
    timeouts: u32,
}

impl Retransmitter {
    /// `retransmitting` is `true` for UDPR; for every other mode the first
    /// timeout gives up.
    pub fn new(config: &RetransmitConfig, retransmitting: bool) -> Self {
        Self {
            retransmitting,
            max_retransmits: config.max_retransmits,
            timeouts: 0,
        }
    }

    /// Record one expired wait.
    ///
    /// UDPR resends up to `max_retransmits` times; the timeout after the
    /// last resend gives up.
    pub fn on_timeout(&mut self) -> Retry {
        self.timeouts += 1;
        if !self.retransmitting || self.timeouts > self.max_retransmits {
            Retry::GiveUp
        } else {
            Retry::Retransmit
        }
    }

    /// New progress was made; the budget starts over.
    ///
    /// Stale or duplicate acknowledgements must not call this.
    pub fn on_progress(&mut self) {
        self.timeouts = 0;
    }

    /// Consecutive timeouts seen since the last progress.
    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = RetransmitConfig::default();
        assert_eq!(cfg.max_wait, Duration::from_secs(10));
        assert_eq!(cfg.max_retransmits, 3);
    }

    #[test]
    fn udpr_resends_three_times_then_gives_up() {
        let mut r = Retransmitter::new(&RetransmitConfig::default(), true);
        for _ in 0..MAX_RETRANSMITS {
            assert_eq!(r.on_timeout(), Retry::Retransmit);
        }
        assert_eq!(r.on_timeout(), Retry::GiveUp);
        assert_eq!(r.timeouts(), 4);
    }

    #[test]
    fn plain_modes_give_up_immediately() {
        let mut r = Retransmitter::new(&RetransmitConfig::default(), false);
        assert_eq!(r.on_timeout(), Retry::GiveUp);
    }

    #[test]
    fn progress_resets_the_budget() {
        let mut r = Retransmitter::new(&RetransmitConfig::default(), true);
        r.on_timeout();
        r.on_timeout();
        r.on_progress();
        assert_eq!(r.timeouts(), 0);
        assert_eq!(r.on_timeout(), Retry::Retransmit);
        assert_eq!(r.on_timeout(), Retry::Retransmit);
        assert_eq!(r.on_timeout(), Retry::Retransmit);
        assert_eq!(r.on_timeout(), Retry::GiveUp);
    }

    #[test]
    fn custom_budget() {
        let cfg = RetransmitConfig {
            max_wait: Duration::from_millis(1),
            max_retransmits: 1,
        };
        let mut r = Retransmitter::new(&cfg, true);
        assert_eq!(r.on_timeout(), Retry::Retransmit);
        assert_eq!(r.on_timeout(), Retry::GiveUp);

        let none = RetransmitConfig {
            max_retransmits: 0,
            ..cfg
        };
        assert_eq!(Retransmitter::new(&none, true).on_timeout(), Retry::GiveUp);
    }
}
