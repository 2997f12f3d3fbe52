// src/negotiation.rs
//
// The per-pair negotiation algorithm.
//
// Both peers of a pair run this same logic from their own perspective;
// correctness depends only on each side reacting to the signals it
// receives.  The collision rule is "receiver always yields": whichever
// side receives an offer while holding a pending local offer rolls its
// own offer back and accepts the incoming one.  The rule is purely local
// and needs no tie-break message; its price is that a superseded local
// offer is occasionally discarded, which is a cheap, stateless operation.
//
// Stale traffic (an answer after a rollback, a duplicated offer) is
// expected under reordered/duplicated relay delivery and is discarded
// with a debug log, never treated as an error.

use tracing::{debug, info, warn};

use crate::error::NegotiationError;
use crate::peer::{NegotiationState, PeerConnectionEntry};
use crate::relay::SignalRelay;
use crate::signal::{IceCandidateInit, SessionDescription, SignalPayload};

// ─── Verdict ────────────────────────────────────────────────────────────────

/// What the session should do with an entry after the controller ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Entry stays in the room's peer map.
    Continue,
    /// Negotiation failed beyond the retry budget; close and remove the
    /// entry and report the peer unreachable.
    Unreachable,
}

// ─── NegotiationController ──────────────────────────────────────────────────

/// Drives the offer/answer/ICE exchange for one entry at a time.  The
/// controller never adds or removes entries; it only mutates the entry it
/// was handed.
pub struct NegotiationController {
    failure_limit: u32,
}

impl NegotiationController {
    pub fn new(failure_limit: u32) -> Self {
        Self {
            failure_limit: failure_limit.max(1),
        }
    }

    // ── Triggering ──────────────────────────────────────────────────────

    /// React to a negotiation-needed kick (entry creation, local media
    /// replaced, a transceiver change).
    pub async fn negotiation_needed(
        &self,
        entry: &mut PeerConnectionEntry,
        relay: &dyn SignalRelay,
    ) -> Verdict {
        if entry.is_closed() {
            debug!(peer_id = %entry.remote_peer_id(), "negotiation kick on closed entry, ignoring");
            return Verdict::Continue;
        }
        if entry.is_negotiating || entry.state() != NegotiationState::Stable {
            debug!(
                peer_id = %entry.remote_peer_id(),
                state = %entry.state(),
                in_flight = entry.is_negotiating,
                "negotiation already in progress, skipping offer"
            );
            return Verdict::Continue;
        }

        let transport = entry.transport.clone();
        entry.is_negotiating = true;
        let result = async {
            let offer = transport.create_offer().await?;
            transport.set_local_description(offer.clone()).await?;
            Ok::<SessionDescription, NegotiationError>(offer)
        }
        .await;
        // The guard clears once the local-description step completed,
        // success or failure, so a future retrigger stays possible.
        entry.is_negotiating = false;

        let offer = match result {
            Ok(offer) => offer,
            Err(e) => {
                warn!(peer_id = %entry.remote_peer_id(), error = %e, "offer creation failed");
                return self.after_failure(entry);
            }
        };

        entry.transition(NegotiationState::HaveLocalOffer);
        debug!(peer_id = %entry.remote_peer_id(), "local offer applied, sending");

        if let Err(e) = relay
            .send_to_peer(entry.remote_peer_id(), SignalPayload::offer(&offer))
            .await
        {
            // The offer never left this process; undo it so a retrigger
            // can start clean instead of idling in have-local-offer.
            warn!(
                peer_id = %entry.remote_peer_id(),
                error = %e,
                "offer could not be relayed, rolling back"
            );
            if let Err(e) = transport.rollback_local().await {
                warn!(peer_id = %entry.remote_peer_id(), error = %e, "rollback after send failure failed");
            }
            entry.transition(NegotiationState::Stable);
            return self.after_failure(entry);
        }

        Verdict::Continue
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    /// Route an inbound signaling payload to the matching handler.
    pub async fn handle_signal(
        &self,
        entry: &mut PeerConnectionEntry,
        relay: &dyn SignalRelay,
        payload: SignalPayload,
    ) -> Verdict {
        match payload {
            SignalPayload::Offer { sdp } => {
                self.handle_offer(entry, relay, SessionDescription::offer(sdp))
                    .await
            }
            SignalPayload::Answer { sdp } => {
                self.handle_answer(entry, SessionDescription::answer(sdp))
                    .await
            }
            SignalPayload::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                self.handle_candidate(
                    entry,
                    IceCandidateInit {
                        candidate,
                        sdp_mid,
                        sdp_mline_index,
                    },
                )
                .await
            }
        }
    }

    // ── Receiving an offer ──────────────────────────────────────────────

    async fn handle_offer(
        &self,
        entry: &mut PeerConnectionEntry,
        relay: &dyn SignalRelay,
        offer: SessionDescription,
    ) -> Verdict {
        if entry.is_closed() {
            debug!(peer_id = %entry.remote_peer_id(), "offer for closed entry discarded");
            return Verdict::Continue;
        }

        let transport = entry.transport.clone();

        if entry.state() == NegotiationState::HaveLocalOffer {
            // Glare: both sides raced to initiate.  The receiver yields —
            // discard our pending offer and accept theirs from Stable.
            info!(
                peer_id = %entry.remote_peer_id(),
                "offer collision, rolling back pending local offer"
            );
            if let Err(e) = transport.rollback_local().await {
                warn!(peer_id = %entry.remote_peer_id(), error = %e, "collision rollback failed");
                return self.after_failure(entry);
            }
            entry.transition(NegotiationState::Stable);
            entry.is_negotiating = false;
        }

        if entry.state() != NegotiationState::Stable {
            debug!(
                peer_id = %entry.remote_peer_id(),
                state = %entry.state(),
                "offer discarded in non-accepting state"
            );
            return Verdict::Continue;
        }

        if let Err(e) = transport.set_remote_description(offer).await {
            warn!(peer_id = %entry.remote_peer_id(), error = %e, "applying remote offer failed");
            return self.after_failure(entry);
        }
        entry.transition(NegotiationState::HaveRemoteOffer);
        self.flush_candidates(entry).await;

        let answer = match async {
            let answer = transport.create_answer().await?;
            transport.set_local_description(answer.clone()).await?;
            Ok::<SessionDescription, NegotiationError>(answer)
        }
        .await
        {
            Ok(answer) => answer,
            Err(e) => {
                warn!(peer_id = %entry.remote_peer_id(), error = %e, "answer creation failed");
                // Abandon the attempt; return to Stable so the remote may
                // retry with a fresh offer.
                entry.transition(NegotiationState::Stable);
                return self.after_failure(entry);
            }
        };

        entry.transition(NegotiationState::Stable);
        entry.clear_failures();
        debug!(peer_id = %entry.remote_peer_id(), "remote offer answered");

        if let Err(e) = relay
            .send_to_peer(entry.remote_peer_id(), SignalPayload::answer(&answer))
            .await
        {
            // Locally complete; the remote side stays in have-local-offer
            // until its own retrigger.  Nothing more to do here.
            warn!(peer_id = %entry.remote_peer_id(), error = %e, "answer could not be relayed");
        }

        Verdict::Continue
    }

    // ── Receiving an answer ─────────────────────────────────────────────

    async fn handle_answer(
        &self,
        entry: &mut PeerConnectionEntry,
        answer: SessionDescription,
    ) -> Verdict {
        if entry.state() != NegotiationState::HaveLocalOffer {
            // Expected race: our offer was superseded by a rollback, or
            // the relay duplicated the message.
            debug!(
                peer_id = %entry.remote_peer_id(),
                state = %entry.state(),
                "stale answer discarded"
            );
            return Verdict::Continue;
        }

        let transport = entry.transport.clone();
        if let Err(e) = transport.set_remote_description(answer).await {
            warn!(peer_id = %entry.remote_peer_id(), error = %e, "applying answer failed");
            // Best effort: drop the dangling local offer so the pair can
            // renegotiate from Stable.
            if let Err(e) = transport.rollback_local().await {
                warn!(peer_id = %entry.remote_peer_id(), error = %e, "rollback after failed answer failed");
            }
            entry.transition(NegotiationState::Stable);
            return self.after_failure(entry);
        }

        entry.transition(NegotiationState::Stable);
        entry.clear_failures();
        self.flush_candidates(entry).await;
        debug!(peer_id = %entry.remote_peer_id(), "answer applied, negotiation complete");
        Verdict::Continue
    }

    // ── Receiving an ICE candidate ──────────────────────────────────────

    async fn handle_candidate(
        &self,
        entry: &mut PeerConnectionEntry,
        candidate: IceCandidateInit,
    ) -> Verdict {
        if entry.is_closed() {
            debug!(peer_id = %entry.remote_peer_id(), "candidate for closed entry discarded");
            return Verdict::Continue;
        }

        let transport = entry.transport.clone();
        if transport.has_remote_description().await {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                // Candidate failures don't count against the entry: the
                // pair can still connect over the remaining paths.
                warn!(peer_id = %entry.remote_peer_id(), error = %e, "ice candidate rejected");
            }
        } else {
            entry.buffer_candidate(candidate);
        }
        Verdict::Continue
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Unconditional transition to Closed; in-flight operations are
    /// abandoned and their eventual completion is ignored.
    pub async fn close(&self, entry: &mut PeerConnectionEntry) {
        if entry.is_closed() {
            return;
        }
        entry.transport.clone().close().await;
        entry.transition(NegotiationState::Closed);
        entry.is_negotiating = false;
        debug!(peer_id = %entry.remote_peer_id(), "entry closed");
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Flush buffered candidates right after a successful remote
    /// description application.
    async fn flush_candidates(&self, entry: &mut PeerConnectionEntry) {
        let pending = entry.take_pending_candidates();
        if pending.is_empty() {
            return;
        }
        debug!(
            peer_id = %entry.remote_peer_id(),
            count = pending.len(),
            "flushing buffered ice candidates"
        );
        let transport = entry.transport.clone();
        for candidate in pending {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                warn!(peer_id = %entry.remote_peer_id(), error = %e, "buffered ice candidate rejected");
            }
        }
    }

    fn after_failure(&self, entry: &mut PeerConnectionEntry) -> Verdict {
        let failures = entry.record_failure();
        if failures >= self.failure_limit {
            warn!(
                peer_id = %entry.remote_peer_id(),
                failures,
                "negotiation failure limit reached, reporting peer unreachable"
            );
            Verdict::Unreachable
        } else {
            Verdict::Continue
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::RelayError;
    use crate::peer::NegotiationState::*;
    use crate::relay::SignalRelay;
    use crate::signal::{RelayEvent, RelayStatus};
    use crate::transport::fake::FakeTransport;

    /// Relay double that records every outbound payload.
    struct CapturingRelay {
        peer_id: String,
        pub sent: Mutex<Vec<(String, SignalPayload)>>,
        pub fail_sends: std::sync::atomic::AtomicBool,
    }

    impl CapturingRelay {
        fn new(peer_id: &str) -> Self {
            Self {
                peer_id: peer_id.to_string(),
                sent: Mutex::new(Vec::new()),
                fail_sends: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn take_sent(&self) -> Vec<(String, SignalPayload)> {
            std::mem::take(&mut self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl SignalRelay for CapturingRelay {
        fn local_peer_id(&self) -> &str {
            &self.peer_id
        }
        fn status(&self) -> RelayStatus {
            RelayStatus::Connected
        }
        async fn join_room(&self, _room_id: &str) -> Result<(), RelayError> {
            Ok(())
        }
        async fn leave_room(&self, _room_id: &str) -> Result<(), RelayError> {
            Ok(())
        }
        async fn send_to_peer(
            &self,
            target_peer_id: &str,
            payload: SignalPayload,
        ) -> Result<(), RelayError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(RelayError::Disconnected);
            }
            self.sent
                .lock()
                .unwrap()
                .push((target_peer_id.to_string(), payload));
            Ok(())
        }
        async fn next_event(&self) -> Option<RelayEvent> {
            None
        }
    }

    fn controller() -> NegotiationController {
        NegotiationController::new(3)
    }

    fn candidate(n: u32) -> IceCandidateInit {
        IceCandidateInit {
            candidate: format!("candidate:{n} 1 udp 2130706431 192.0.2.1 54321 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    // ── Happy path ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn initiator_and_responder_complete_an_exchange() {
        let ctl = controller();
        let ta = FakeTransport::new("A");
        let tb = FakeTransport::new("B");
        let ra = CapturingRelay::new("A");
        let rb = CapturingRelay::new("B");
        let mut ea = PeerConnectionEntry::new("B", ta.clone(), true);
        let mut eb = PeerConnectionEntry::new("A", tb.clone(), false);

        assert_eq!(ctl.negotiation_needed(&mut ea, &ra).await, Verdict::Continue);
        assert_eq!(ea.state(), HaveLocalOffer);
        let (to, offer) = ra.take_sent().pop().unwrap();
        assert_eq!(to, "B");
        assert_eq!(offer.kind_str(), "offer");

        assert_eq!(ctl.handle_signal(&mut eb, &rb, offer).await, Verdict::Continue);
        assert_eq!(eb.state(), Stable);
        let (to, answer) = rb.take_sent().pop().unwrap();
        assert_eq!(to, "A");
        assert_eq!(answer.kind_str(), "answer");

        assert_eq!(ctl.handle_signal(&mut ea, &ra, answer).await, Verdict::Continue);
        assert_eq!(ea.state(), Stable);
        assert!(ta.remote.lock().unwrap().is_some());
        assert!(tb.remote.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn negotiation_kick_is_skipped_while_not_stable() {
        let ctl = controller();
        let ta = FakeTransport::new("A");
        let ra = CapturingRelay::new("A");
        let mut ea = PeerConnectionEntry::new("B", ta, true);

        ctl.negotiation_needed(&mut ea, &ra).await;
        assert_eq!(ra.take_sent().len(), 1);

        // Second kick while an offer is outstanding must not double-offer.
        ctl.negotiation_needed(&mut ea, &ra).await;
        assert!(ra.take_sent().is_empty());
        assert_eq!(ea.state(), HaveLocalOffer);
    }

    // ── Glare ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn glare_receiver_yields_and_one_offer_wins() {
        let ctl = controller();
        let ta = FakeTransport::new("A");
        let tb = FakeTransport::new("B");
        let ra = CapturingRelay::new("A");
        let rb = CapturingRelay::new("B");
        let mut ea = PeerConnectionEntry::new("B", ta.clone(), true);
        let mut eb = PeerConnectionEntry::new("A", tb.clone(), true);

        // Both sides fire before receiving anything.
        ctl.negotiation_needed(&mut ea, &ra).await;
        ctl.negotiation_needed(&mut eb, &rb).await;
        let (_, offer_a) = ra.take_sent().pop().unwrap();
        let (_, offer_b) = rb.take_sent().pop().unwrap();

        // A's offer reaches B first: B yields (rolls back) and answers.
        ctl.handle_signal(&mut eb, &rb, offer_a).await;
        assert_eq!(eb.state(), Stable);
        assert_eq!(tb.rollbacks.load(Ordering::SeqCst), 1);
        let (_, answer_b) = rb.take_sent().pop().unwrap();

        // B's answer reaches A before B's superseded offer: A's offer won.
        ctl.handle_signal(&mut ea, &ra, answer_b).await;
        assert_eq!(ea.state(), Stable);
        assert_eq!(ta.rollbacks.load(Ordering::SeqCst), 0);

        // B's old offer finally arrives: A accepts it as a fresh
        // renegotiation round and answers — no deadlock either way.
        ctl.handle_signal(&mut ea, &ra, offer_b).await;
        assert_eq!(ea.state(), Stable);
        let (_, answer_a) = ra.take_sent().pop().unwrap();
        ctl.handle_signal(&mut eb, &rb, answer_a).await;

        assert_eq!(ea.state(), Stable);
        assert_eq!(eb.state(), Stable);
    }

    #[tokio::test]
    async fn glare_simultaneous_delivery_converges_to_stable() {
        let ctl = controller();
        let ta = FakeTransport::new("A");
        let tb = FakeTransport::new("B");
        let ra = CapturingRelay::new("A");
        let rb = CapturingRelay::new("B");
        let mut ea = PeerConnectionEntry::new("B", ta.clone(), true);
        let mut eb = PeerConnectionEntry::new("A", tb.clone(), true);

        ctl.negotiation_needed(&mut ea, &ra).await;
        ctl.negotiation_needed(&mut eb, &rb).await;
        let (_, offer_a) = ra.take_sent().pop().unwrap();
        let (_, offer_b) = rb.take_sent().pop().unwrap();

        // Each side receives the other's offer while holding its own:
        // both yield, both answer.
        ctl.handle_signal(&mut ea, &ra, offer_b).await;
        ctl.handle_signal(&mut eb, &rb, offer_a).await;
        assert_eq!(ea.state(), Stable);
        assert_eq!(eb.state(), Stable);
        assert_eq!(ta.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(tb.rollbacks.load(Ordering::SeqCst), 1);

        // The crossing answers land after each side already rolled back:
        // stale, silently discarded, nobody deadlocks.
        let (_, answer_a) = ra.take_sent().pop().unwrap();
        let (_, answer_b) = rb.take_sent().pop().unwrap();
        ctl.handle_signal(&mut ea, &ra, answer_b).await;
        ctl.handle_signal(&mut eb, &rb, answer_a).await;

        assert_eq!(ea.state(), Stable);
        assert_eq!(eb.state(), Stable);
        assert!(ra.take_sent().is_empty());
        assert!(rb.take_sent().is_empty());
    }

    // ── Out-of-order ICE ────────────────────────────────────────────────

    #[tokio::test]
    async fn candidate_before_description_is_buffered_then_applied() {
        let ctl = controller();
        let tb = FakeTransport::new("B");
        let rb = CapturingRelay::new("B");
        let mut eb = PeerConnectionEntry::new("A", tb.clone(), false);

        ctl.handle_signal(&mut eb, &rb, SignalPayload::candidate(candidate(1)))
            .await;
        ctl.handle_signal(&mut eb, &rb, SignalPayload::candidate(candidate(2)))
            .await;
        assert!(tb.applied_candidates().is_empty());

        let offer = SignalPayload::offer(&SessionDescription::offer("v=0 A offer 0"));
        ctl.handle_signal(&mut eb, &rb, offer).await;

        let applied = tb.applied_candidates();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0], candidate(1));
        assert_eq!(applied[1], candidate(2));
    }

    #[tokio::test]
    async fn candidate_after_description_is_applied_directly() {
        let ctl = controller();
        let tb = FakeTransport::new("B");
        let rb = CapturingRelay::new("B");
        let mut eb = PeerConnectionEntry::new("A", tb.clone(), false);

        let offer = SignalPayload::offer(&SessionDescription::offer("v=0 A offer 0"));
        ctl.handle_signal(&mut eb, &rb, offer).await;
        ctl.handle_signal(&mut eb, &rb, SignalPayload::candidate(candidate(7)))
            .await;

        assert_eq!(tb.applied_candidates(), vec![candidate(7)]);
    }

    // ── Stale answers ───────────────────────────────────────────────────

    #[tokio::test]
    async fn stale_answer_in_stable_is_a_no_op() {
        let ctl = controller();
        let ta = FakeTransport::new("A");
        let ra = CapturingRelay::new("A");
        let mut ea = PeerConnectionEntry::new("B", ta.clone(), true);

        let verdict = ctl
            .handle_signal(
                &mut ea,
                &ra,
                SignalPayload::answer(&SessionDescription::answer("v=0 late answer")),
            )
            .await;

        assert_eq!(verdict, Verdict::Continue);
        assert_eq!(ea.state(), Stable);
        assert!(ta.remote.lock().unwrap().is_none());
        assert!(ra.take_sent().is_empty());
    }

    #[tokio::test]
    async fn duplicate_answer_is_discarded() {
        let ctl = controller();
        let ta = FakeTransport::new("A");
        let ra = CapturingRelay::new("A");
        let mut ea = PeerConnectionEntry::new("B", ta.clone(), true);

        ctl.negotiation_needed(&mut ea, &ra).await;
        let answer = SignalPayload::answer(&SessionDescription::answer("v=0 B answer"));
        ctl.handle_signal(&mut ea, &ra, answer.clone()).await;
        assert_eq!(ea.state(), Stable);

        // Same answer delivered again.
        ctl.handle_signal(&mut ea, &ra, answer).await;
        assert_eq!(ea.state(), Stable);
    }

    // ── Failure handling ────────────────────────────────────────────────

    #[tokio::test]
    async fn failed_offer_leaves_entry_stable_for_retrigger() {
        let ctl = controller();
        let ta = FakeTransport::new("A");
        let ra = CapturingRelay::new("A");
        let mut ea = PeerConnectionEntry::new("B", ta.clone(), true);

        ta.fail_next_local.store(true, Ordering::SeqCst);
        let verdict = ctl.negotiation_needed(&mut ea, &ra).await;
        assert_eq!(verdict, Verdict::Continue);
        assert_eq!(ea.state(), Stable);
        assert!(!ea.is_negotiating);
        assert!(ra.take_sent().is_empty());

        // A retrigger succeeds afterwards.
        ctl.negotiation_needed(&mut ea, &ra).await;
        assert_eq!(ea.state(), HaveLocalOffer);
    }

    #[tokio::test]
    async fn offer_send_failure_rolls_back_to_stable() {
        let ctl = controller();
        let ta = FakeTransport::new("A");
        let ra = CapturingRelay::new("A");
        let mut ea = PeerConnectionEntry::new("B", ta.clone(), true);

        ra.fail_sends.store(true, Ordering::SeqCst);
        ctl.negotiation_needed(&mut ea, &ra).await;

        assert_eq!(ea.state(), Stable);
        assert_eq!(ta.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_failures_report_peer_unreachable() {
        let ctl = NegotiationController::new(2);
        let ta = FakeTransport::new("A");
        let ra = CapturingRelay::new("A");
        let mut ea = PeerConnectionEntry::new("B", ta.clone(), true);

        ta.fail_next_local.store(true, Ordering::SeqCst);
        assert_eq!(ctl.negotiation_needed(&mut ea, &ra).await, Verdict::Continue);

        ta.fail_next_local.store(true, Ordering::SeqCst);
        assert_eq!(
            ctl.negotiation_needed(&mut ea, &ra).await,
            Verdict::Unreachable
        );
    }

    #[tokio::test]
    async fn success_resets_the_failure_budget() {
        let ctl = NegotiationController::new(2);
        let tb = FakeTransport::new("B");
        let rb = CapturingRelay::new("B");
        let mut eb = PeerConnectionEntry::new("A", tb.clone(), false);

        tb.fail_next_remote.store(true, Ordering::SeqCst);
        let offer = SignalPayload::offer(&SessionDescription::offer("v=0 A offer 0"));
        assert_eq!(
            ctl.handle_signal(&mut eb, &rb, offer.clone()).await,
            Verdict::Continue
        );

        // A clean exchange clears the count...
        ctl.handle_signal(&mut eb, &rb, offer.clone()).await;
        assert_eq!(eb.state(), Stable);

        // ...so one more failure is again below the limit.
        tb.fail_next_remote.store(true, Ordering::SeqCst);
        assert_eq!(ctl.handle_signal(&mut eb, &rb, offer).await, Verdict::Continue);
    }

    // ── Closing ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn close_is_terminal_and_signals_are_ignored_afterwards() {
        let ctl = controller();
        let ta = FakeTransport::new("A");
        let ra = CapturingRelay::new("A");
        let mut ea = PeerConnectionEntry::new("B", ta.clone(), true);

        ctl.negotiation_needed(&mut ea, &ra).await;
        ctl.close(&mut ea).await;
        assert!(ea.is_closed());
        assert!(ta.is_closed());

        ra.take_sent();
        ctl.handle_signal(
            &mut ea,
            &ra,
            SignalPayload::offer(&SessionDescription::offer("v=0 late offer")),
        )
        .await;
        ctl.handle_signal(&mut ea, &ra, SignalPayload::candidate(candidate(1)))
            .await;
        ctl.negotiation_needed(&mut ea, &ra).await;

        assert!(ea.is_closed());
        assert!(ra.take_sent().is_empty());

        // Closing again is a no-op.
        ctl.close(&mut ea).await;
        assert!(ea.is_closed());
    }
}
