//! Given-When-Then scenarios for the admission reducer.
//!
//! Each scenario builds its history through the reducer, then hands the
//! resulting ledger to [`ReducerTest`] for the command under test. The
//! history's changes are drained first, as if each command had committed in
//! its own unit of work.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use admission_core::environment::Clock;
use admission_core::error::AdmissionError;
use admission_core::ledger::EventLedger;
use admission_core::reducer::{
    AdmissionCommand, AdmissionEnvironment, AdmissionEvent, AdmissionReducer, Reducer,
};
use admission_core::types::{
    EntryId, PaymentId, PaymentStatus, TicketId, TicketStatus, UserId, WaitingListStatus,
};
use admission_testing::reducer_test::assertions;
use admission_testing::{ReducerTest, TestClock, fixtures};
use chrono::Duration;
use std::sync::Arc;

#[derive(Clone)]
struct Given {
    clock: Arc<TestClock>,
    env: AdmissionEnvironment,
    ledger: EventLedger,
    seq: i64,
}

impl Given {
    fn event(total_tickets: u32) -> Self {
        let clock = Arc::new(TestClock::default());
        Self {
            env: AdmissionEnvironment::new(clock.clone(), Duration::minutes(30)),
            clock,
            ledger: fixtures::ledger(total_tickets),
            seq: 0,
        }
    }

    fn send(&mut self, command: AdmissionCommand) {
        AdmissionReducer::new()
            .reduce(&mut self.ledger, command, &self.env)
            .expect("history command");
    }

    fn join(&mut self, user_id: UserId) -> EntryId {
        self.seq += 1;
        let entry_id = EntryId::new();
        self.send(AdmissionCommand::Join {
            entry_id,
            user_id,
            seq: self.seq,
        });
        entry_id
    }

    fn checkout(&mut self, user_id: UserId) -> PaymentId {
        let payment_id = PaymentId::new();
        self.send(AdmissionCommand::BeginCheckout {
            payment_id,
            user_id,
        });
        payment_id
    }

    fn fulfill(&mut self, payment_id: PaymentId) -> TicketId {
        let ticket_id = TicketId::new();
        self.send(fulfill(payment_id, ticket_id));
        ticket_id
    }

    fn when(mut self, command: AdmissionCommand) -> ReducerTest<AdmissionReducer> {
        self.ledger.take_changes();
        ReducerTest::new(AdmissionReducer::new())
            .with_env(self.env)
            .given_state(self.ledger)
            .when_command(command)
    }
}

fn fulfill(payment_id: PaymentId, ticket_id: TicketId) -> AdmissionCommand {
    AdmissionCommand::Fulfill {
        payment_id,
        ticket_id,
        payment_intent: Some("pi_test".into()),
    }
}

fn status(ledger: &EventLedger, entry_id: EntryId) -> WaitingListStatus {
    ledger.entry(entry_id).unwrap().status
}

fn is_invalid_state(error: &AdmissionError) {
    assert!(matches!(error, AdmissionError::InvalidState(_)), "{error:?}");
}

// ========== Offers and expiration ==========

#[test]
fn single_spot_expiry_cascades_to_next_user() {
    let mut given = Given::event(1);
    let (alice, bob) = (UserId::new(), UserId::new());
    let a = given.join(alice);
    let b = given.join(bob);
    assert_eq!(status(&given.ledger, a), WaitingListStatus::Offered);
    assert_eq!(status(&given.ledger, b), WaitingListStatus::Waiting);

    let expires_at = given.ledger.entry(a).unwrap().offer_expires_at.unwrap();
    assert_eq!(expires_at, given.clock.now() + Duration::minutes(30));
    given.clock.advance(Duration::minutes(30));

    given
        .when(AdmissionCommand::ExpireOffer { entry_id: a })
        .then_state(move |ledger| {
            assert_eq!(status(ledger, a), WaitingListStatus::Expired);
            assert_eq!(status(ledger, b), WaitingListStatus::Offered);

            let changes = ledger.clone().take_changes();
            assert_eq!(changes.completed, vec![a]);
            assert_eq!(changes.scheduled.len(), 1);
            assert_eq!(changes.scheduled[0].entry_id, b);
        })
        .then_events(move |events| {
            assert!(matches!(events[0], AdmissionEvent::OfferExpired { .. }));
            assert!(matches!(events[1], AdmissionEvent::OfferIssued { entry_id, .. } if entry_id == b));
        })
        .run();
}

#[test]
fn expiration_after_purchase_is_a_no_op() {
    let mut given = Given::event(1);
    let alice = UserId::new();
    let a = given.join(alice);
    let payment_id = given.checkout(alice);
    given.fulfill(payment_id);

    given
        .when(AdmissionCommand::ExpireOffer { entry_id: a })
        .then_state(move |ledger| {
            assert_eq!(status(ledger, a), WaitingListStatus::Purchased);
        })
        .then_events(move |events| {
            assert_eq!(
                events,
                &[AdmissionEvent::ExpirationSkipped {
                    entry_id: a,
                    status: Some(WaitingListStatus::Purchased)
                }]
            );
        })
        .run();
}

#[test]
fn release_requires_owner_and_offer() {
    let mut given = Given::event(1);
    let (alice, bob) = (UserId::new(), UserId::new());
    let a = given.join(alice);
    let b = given.join(bob);

    given
        .clone()
        .when(AdmissionCommand::ReleaseOffer {
            entry_id: a,
            user_id: bob,
        })
        .then_error(is_invalid_state)
        .run();

    given
        .clone()
        .when(AdmissionCommand::ReleaseOffer {
            entry_id: b,
            user_id: bob,
        })
        .then_error(is_invalid_state)
        .run();

    given
        .when(AdmissionCommand::ReleaseOffer {
            entry_id: a,
            user_id: alice,
        })
        .then_state(move |ledger| {
            assert_eq!(status(ledger, a), WaitingListStatus::Expired);
            assert_eq!(status(ledger, b), WaitingListStatus::Offered);
        })
        .then_events(|events| assertions::assert_offers_issued(events, 1))
        .run();
}

#[test]
fn second_join_is_rejected_until_released() {
    let mut given = Given::event(1);
    let alice = UserId::new();
    let a = given.join(alice);

    given
        .clone()
        .when(AdmissionCommand::Join {
            entry_id: EntryId::new(),
            user_id: alice,
            seq: 99,
        })
        .then_error(is_invalid_state)
        .run();

    given.send(AdmissionCommand::ReleaseOffer {
        entry_id: a,
        user_id: alice,
    });
    let rejoined = EntryId::new();
    given
        .when(AdmissionCommand::Join {
            entry_id: rejoined,
            user_id: alice,
            seq: 99,
        })
        .then_state(move |ledger| {
            assert_eq!(status(ledger, rejoined), WaitingListStatus::Offered);
            assert_eq!(status(ledger, a), WaitingListStatus::Expired);
        })
        .run();
}

#[test]
fn checkout_needs_live_offer() {
    let mut given = Given::event(1);
    let alice = UserId::new();
    given.join(alice);
    given.clock.advance(Duration::minutes(31));

    given
        .when(AdmissionCommand::BeginCheckout {
            payment_id: PaymentId::new(),
            user_id: alice,
        })
        .then_error(is_invalid_state)
        .run();
}

// ========== Fulfillment ==========

#[test]
fn duplicate_fulfillment_issues_one_ticket() {
    let mut given = Given::event(2);
    let alice = UserId::new();
    given.join(alice);
    let payment_id = given.checkout(alice);
    given.fulfill(payment_id);

    given
        .when(fulfill(payment_id, TicketId::new()))
        .then_state(move |ledger| {
            assert_eq!(ledger.tickets().len(), 1);
            assert_eq!(
                ledger.payment(payment_id).unwrap().payment_intent.as_deref(),
                Some("pi_test")
            );
        })
        .then_events(move |events| {
            assert_eq!(events, &[AdmissionEvent::FulfillmentSkipped { payment_id }]);
        })
        .run();
}

#[test]
fn late_payment_is_honoured_and_flagged() {
    let mut given = Given::event(1);
    let (alice, bob) = (UserId::new(), UserId::new());
    let a = given.join(alice);
    let b = given.join(bob);
    let payment_id = given.checkout(alice);
    given.clock.advance(Duration::minutes(30));
    given.send(AdmissionCommand::ExpireOffer { entry_id: a });
    assert_eq!(status(&given.ledger, b), WaitingListStatus::Offered);

    given
        .when(fulfill(payment_id, TicketId::new()))
        .then_state(move |ledger| {
            assert_eq!(ledger.tickets().len(), 1);
            assert_eq!(status(ledger, a), WaitingListStatus::Expired);
        })
        .then_events(|events| {
            assert!(
                events
                    .iter()
                    .any(|event| matches!(event, AdmissionEvent::CapacityExceeded { available: -1 }))
            );
        })
        .run();
}

// ========== Capacity changes ==========

#[test]
fn growing_capacity_offers_in_seq_order() {
    let mut given = Given::event(0);
    let entries: Vec<EntryId> = (0..4).map(|_| given.join(UserId::new())).collect();

    given
        .when(AdmissionCommand::UpdateEvent {
            total_tickets: 2,
            price_cents: fixtures::PRICE_CENTS,
        })
        .then_state(move |ledger| {
            assert_eq!(ledger.event().total_tickets, 2);
            assert_eq!(status(ledger, entries[0]), WaitingListStatus::Offered);
            assert_eq!(status(ledger, entries[1]), WaitingListStatus::Offered);
            assert_eq!(status(ledger, entries[2]), WaitingListStatus::Waiting);
            assert_eq!(status(ledger, entries[3]), WaitingListStatus::Waiting);
            assert_eq!(ledger.clone().take_changes().event.unwrap().total_tickets, 2);
        })
        .then_events(|events| {
            assert!(matches!(events[0], AdmissionEvent::EventUpdated { total_tickets: 2, .. }));
            assertions::assert_offers_issued(events, 2);
        })
        .run();
}

#[test]
fn capacity_cannot_drop_below_live_offers() {
    let mut given = Given::event(3);
    for _ in 0..3 {
        given.join(UserId::new());
    }
    let now = given.clock.now();

    given
        .when(AdmissionCommand::UpdateEvent {
            total_tickets: 1,
            price_cents: fixtures::PRICE_CENTS,
        })
        .then_state(move |ledger| {
            assert_eq!(ledger.event().total_tickets, 3);
            assert_eq!(ledger.capacity(now).active_offers, 3);
        })
        .then_error(is_invalid_state)
        .run();
}

#[test]
fn capacity_is_frozen_once_tickets_are_sold() {
    let mut given = Given::event(2);
    let alice = UserId::new();
    given.join(alice);
    let payment_id = given.checkout(alice);
    given.fulfill(payment_id);

    given
        .clone()
        .when(AdmissionCommand::UpdateEvent {
            total_tickets: 5,
            price_cents: fixtures::PRICE_CENTS,
        })
        .then_error(is_invalid_state)
        .run();

    given
        .when(AdmissionCommand::UpdateEvent {
            total_tickets: 2,
            price_cents: 9_900,
        })
        .then_state(|ledger| assert_eq!(ledger.event().price_cents, 9_900))
        .then_events(|events| assertions::assert_offers_issued(events, 0))
        .run();
}

// ========== Cancellation ==========

#[test]
fn cancellation_requires_every_ticket_refunded() {
    let mut given = Given::event(2);
    let (alice, bob) = (UserId::new(), UserId::new());
    given.join(alice);
    given.join(bob);
    let pa = given.checkout(alice);
    let pb = given.checkout(bob);
    let ta = given.fulfill(pa);
    let tb = given.fulfill(pb);

    given
        .clone()
        .when(AdmissionCommand::CompleteCancellation { refunded: vec![ta] })
        .then_error(move |error| {
            assert_eq!(
                error,
                &AdmissionError::PartialBatchFailure {
                    failed_tickets: vec![tb]
                }
            );
        })
        .run();

    given
        .when(AdmissionCommand::CompleteCancellation {
            refunded: vec![ta, tb],
        })
        .then_state(move |ledger| {
            assert!(ledger.event().cancelled);
            assert_eq!(ledger.payment(pa).unwrap().status, PaymentStatus::Refunded);
            assert!(
                ledger
                    .tickets()
                    .iter()
                    .all(|ticket| ticket.status == TicketStatus::Refunded)
            );
        })
        .run();
}

#[test]
fn cancellation_voids_pending_checkouts() {
    let mut given = Given::event(1);
    let alice = UserId::new();
    given.join(alice);
    let payment_id = given.checkout(alice);

    given
        .when(AdmissionCommand::CompleteCancellation { refunded: Vec::new() })
        .then_state(move |ledger| {
            assert_eq!(ledger.payment(payment_id).unwrap().status, PaymentStatus::Cancelled);
            assert!(ledger.pending_payments().is_empty());
        })
        .then_events(move |events| {
            assert_eq!(
                events,
                &[AdmissionEvent::EventCancelled {
                    refunded: Vec::new(),
                    voided: vec![payment_id]
                }]
            );
        })
        .run();
}

#[test]
fn confirmation_after_cancellation_issues_no_ticket() {
    let mut given = Given::event(1);
    let alice = UserId::new();
    given.join(alice);
    let payment_id = given.checkout(alice);
    given.send(AdmissionCommand::CompleteCancellation { refunded: Vec::new() });

    given
        .when(AdmissionCommand::Fulfill {
            payment_id,
            ticket_id: TicketId::new(),
            payment_intent: Some("pi_late".into()),
        })
        .then_state(move |ledger| {
            assert!(ledger.tickets().is_empty());
            let payment = ledger.payment(payment_id).unwrap();
            assert_eq!(payment.status, PaymentStatus::Cancelled);
            assert_eq!(payment.payment_intent.as_deref(), Some("pi_late"));
        })
        .then_events(move |events| {
            assert_eq!(
                events,
                &[AdmissionEvent::PaymentVoided {
                    payment_id,
                    payment_intent: Some("pi_late".into())
                }]
            );
        })
        .run();
}

#[test]
fn cancelled_event_rejects_joins_and_capacity_changes() {
    let mut given = Given::event(1);
    given.send(AdmissionCommand::CompleteCancellation { refunded: Vec::new() });

    given
        .clone()
        .when(AdmissionCommand::Join {
            entry_id: EntryId::new(),
            user_id: UserId::new(),
            seq: 1,
        })
        .then_error(is_invalid_state)
        .run();

    given
        .when(AdmissionCommand::UpdateEvent {
            total_tickets: 10,
            price_cents: fixtures::PRICE_CENTS,
        })
        .then_error(is_invalid_state)
        .run();
}
