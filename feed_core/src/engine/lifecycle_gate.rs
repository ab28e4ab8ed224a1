//! # Lifecycle Gate
//!
//! Decides when the presentation layer may treat the feed as live. The cover
//! screen is held until the first connection succeeds, then revealed once, and
//! (depending on [`CoverPolicy`]) raised again when the connection drops.
//!
//! ```text
//!  AwaitingFirstConnection --connected + intro done--> Revealing --reveal--> Ready
//!                                                        |                     |
//!                                     disconnected (RecoverOnDisconnect)       |
//!                                                        v                     |
//!                                                     Covered <----------------+
//!                                                        |
//!                                   connected + intro done --> Revealing
//! ```
//!
//! Every time the cover goes up it plays an intro of `GateTimeline::intro_ms`;
//! the reveal starts only once that intro has run *and* the connection is up.
//! The gate only observes connection signals and sequences its own deadlines.
//! It never holds back the connection or the store.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

/// Presentation state published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// Cover is up; no connection has succeeded yet.
    AwaitingFirstConnection,
    /// Connected; the one-shot reveal sequence is playing.
    Revealing,
    /// Cover is gone; the store's contents are live.
    Ready,
    /// Cover was raised again after a drop (or a stop) and waits for the
    /// connection to come back.
    Covered,
}

impl GateState {
    pub fn is_live(self) -> bool {
        self == GateState::Ready
    }

    pub fn is_covered(self) -> bool {
        matches!(self, GateState::AwaitingFirstConnection | GateState::Covered)
    }
}

/// Whether an unexpected disconnect raises the cover again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverPolicy {
    /// Cover until the first connection, reveal once, never re-cover.
    RevealOnce,
    /// Re-cover on every drop while revealing or ready.
    #[default]
    RecoverOnDisconnect,
}

/// Durations of the cover screen's sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateTimeline {
    /// Minimum time the cover stays up each time it is raised.
    pub intro_ms: u64,
    /// Length of the reveal sequence.
    pub reveal_ms: u64,
}

impl GateTimeline {
    pub fn intro(&self) -> Duration {
        Duration::from_millis(self.intro_ms)
    }

    pub fn reveal(&self) -> Duration {
        Duration::from_millis(self.reveal_ms)
    }
}

impl Default for GateTimeline {
    fn default() -> Self {
        Self {
            intro_ms: 0,
            reveal_ms: 2000,
        }
    }
}

pub struct LifecycleGate {
    policy: CoverPolicy,
    timeline: GateTimeline,
    state: GateState,
    armed: bool,
    connected: bool,
    ever_connected: bool,
    intro_until: Option<Instant>,
    reveal_until: Option<Instant>,
    publisher: watch::Sender<GateState>,
}

impl LifecycleGate {
    pub fn new(policy: CoverPolicy, timeline: GateTimeline) -> Self {
        let (publisher, _) = watch::channel(GateState::AwaitingFirstConnection);
        Self {
            policy,
            timeline,
            state: GateState::AwaitingFirstConnection,
            armed: false,
            connected: false,
            ever_connected: false,
            intro_until: None,
            reveal_until: None,
            publisher,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.publisher.subscribe()
    }

    /// Whether any connection has succeeded since the gate was created.
    pub fn has_connected(&self) -> bool {
        self.ever_connected
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Starts the sequencer. A covering gate begins its intro now.
    pub fn arm(&mut self, now: Instant) {
        if self.armed {
            return;
        }
        self.armed = true;
        if self.state.is_covered() {
            self.intro_until = Some(now + self.timeline.intro());
            self.try_reveal(now);
        }
    }

    pub fn on_connected(&mut self, now: Instant) {
        self.connected = true;
        self.ever_connected = true;
        if self.armed && self.state.is_covered() {
            self.try_reveal(now);
        }
    }

    pub fn on_disconnected(&mut self, now: Instant) {
        self.connected = false;
        if !self.armed {
            return;
        }
        let revealed = matches!(self.state, GateState::Revealing | GateState::Ready);
        if revealed && self.policy == CoverPolicy::RecoverOnDisconnect {
            self.reveal_until = None;
            self.intro_until = Some(now + self.timeline.intro());
            self.enter(GateState::Covered);
        }
    }

    /// Next instant at which [`LifecycleGate::on_timer`] has work to do.
    pub fn deadline(&self) -> Option<Instant> {
        if !self.armed {
            return None;
        }
        self.intro_until.or(self.reveal_until)
    }

    pub fn on_timer(&mut self, now: Instant) {
        if !self.armed {
            return;
        }
        if self.intro_until.is_some_and(|t| t <= now) {
            self.intro_until = None;
            self.try_reveal(now);
        }
        if self.reveal_until.is_some_and(|t| t <= now) {
            self.reveal_until = None;
            self.enter(GateState::Ready);
        }
    }

    /// Stops the sequencer. A revealed gate goes back under cover; nothing
    /// moves again until the next [`LifecycleGate::arm`].
    pub fn halt(&mut self) {
        self.armed = false;
        self.connected = false;
        self.intro_until = None;
        self.reveal_until = None;
        if !self.state.is_covered() {
            self.enter(GateState::Covered);
        }
    }

    fn try_reveal(&mut self, now: Instant) {
        let intro_done = self.intro_until.is_none_or(|t| t <= now);
        if !(self.connected && intro_done) {
            return;
        }
        self.intro_until = None;
        let reveal = self.timeline.reveal();
        if reveal.is_zero() {
            self.enter(GateState::Ready);
        } else {
            self.reveal_until = Some(now + reveal);
            self.enter(GateState::Revealing);
        }
    }

    fn enter(&mut self, next: GateState) {
        if self.state == next {
            return;
        }
        log::info!("Cover gate: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.publisher.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline(intro_ms: u64, reveal_ms: u64) -> GateTimeline {
        GateTimeline { intro_ms, reveal_ms }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn covers_until_first_connection_then_reveals_once() {
        let t0 = Instant::now();
        let mut gate = LifecycleGate::new(CoverPolicy::RecoverOnDisconnect, timeline(0, 1000));
        gate.arm(t0);
        assert_eq!(gate.state(), GateState::AwaitingFirstConnection);
        assert!(gate.deadline().is_none());

        gate.on_connected(t0 + ms(300));
        assert_eq!(gate.state(), GateState::Revealing);
        assert_eq!(gate.deadline(), Some(t0 + ms(1300)));

        gate.on_timer(t0 + ms(1300));
        assert_eq!(gate.state(), GateState::Ready);
        assert!(gate.state().is_live());
        assert!(gate.deadline().is_none());
    }

    #[test]
    fn reveal_waits_for_the_intro_to_finish() {
        let t0 = Instant::now();
        let mut gate = LifecycleGate::new(CoverPolicy::RecoverOnDisconnect, timeline(4500, 500));
        gate.arm(t0);
        gate.on_connected(t0 + ms(100));
        assert_eq!(gate.state(), GateState::AwaitingFirstConnection);
        assert_eq!(gate.deadline(), Some(t0 + ms(4500)));

        gate.on_timer(t0 + ms(4500));
        assert_eq!(gate.state(), GateState::Revealing);
        gate.on_timer(t0 + ms(5000));
        assert_eq!(gate.state(), GateState::Ready);
    }

    #[test]
    fn intro_finishing_first_waits_for_the_connection() {
        let t0 = Instant::now();
        let mut gate = LifecycleGate::new(CoverPolicy::RecoverOnDisconnect, timeline(1000, 0));
        gate.arm(t0);
        gate.on_timer(t0 + ms(1000));
        assert_eq!(gate.state(), GateState::AwaitingFirstConnection);
        assert!(gate.deadline().is_none());

        gate.on_connected(t0 + ms(7000));
        assert_eq!(gate.state(), GateState::Ready);
    }

    #[test]
    fn recover_policy_re_covers_on_drop_and_reveals_on_reconnect() {
        let t0 = Instant::now();
        let mut gate = LifecycleGate::new(CoverPolicy::RecoverOnDisconnect, timeline(0, 0));
        gate.arm(t0);
        gate.on_connected(t0);
        assert_eq!(gate.state(), GateState::Ready);

        gate.on_disconnected(t0 + ms(10));
        assert_eq!(gate.state(), GateState::Covered);
        assert!(gate.has_connected());

        gate.on_connected(t0 + ms(20));
        assert_eq!(gate.state(), GateState::Ready);
    }

    #[test]
    fn drop_during_reveal_re_covers_under_recover_policy() {
        let t0 = Instant::now();
        let mut gate = LifecycleGate::new(CoverPolicy::RecoverOnDisconnect, timeline(0, 1000));
        gate.arm(t0);
        gate.on_connected(t0);
        gate.on_disconnected(t0 + ms(200));
        assert_eq!(gate.state(), GateState::Covered);
        gate.on_timer(t0 + ms(1000));
        assert_eq!(gate.state(), GateState::Covered);
    }

    #[test]
    fn reveal_once_policy_ignores_later_drops() {
        let t0 = Instant::now();
        let mut gate = LifecycleGate::new(CoverPolicy::RevealOnce, timeline(0, 1000));
        gate.arm(t0);
        gate.on_connected(t0);
        gate.on_disconnected(t0 + ms(200));
        assert_eq!(gate.state(), GateState::Revealing);
        gate.on_timer(t0 + ms(1000));
        assert_eq!(gate.state(), GateState::Ready);
        gate.on_disconnected(t0 + ms(2000));
        assert_eq!(gate.state(), GateState::Ready);
    }

    #[test]
    fn unarmed_gate_ignores_signals_and_halt_stops_the_sequencer() {
        let t0 = Instant::now();
        let mut gate = LifecycleGate::new(CoverPolicy::RecoverOnDisconnect, timeline(0, 1000));
        gate.on_connected(t0);
        assert_eq!(gate.state(), GateState::AwaitingFirstConnection);

        gate.arm(t0);
        assert_eq!(gate.state(), GateState::Revealing);
        gate.halt();
        assert_eq!(gate.state(), GateState::Covered);
        assert!(gate.deadline().is_none());
        gate.on_timer(t0 + ms(5000));
        assert_eq!(gate.state(), GateState::Covered);
        gate.halt();
        assert!(!gate.is_armed());
    }

    #[test]
    fn subscribers_follow_state_entries() {
        let t0 = Instant::now();
        let mut gate = LifecycleGate::new(CoverPolicy::RecoverOnDisconnect, timeline(0, 0));
        let rx = gate.subscribe();
        gate.arm(t0);
        gate.on_connected(t0);
        assert_eq!(*rx.borrow(), GateState::Ready);
    }
}
