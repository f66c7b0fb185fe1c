//! Property tests for the admission reducer.
//!
//! Random interleavings of join, time passing, expiration, release, purchase
//! and manual queue processing must never put more offers and purchases in
//! flight than the event has tickets, and terminal entries must stay terminal.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use admission_core::environment::Clock;
use admission_core::ledger::EventLedger;
use admission_core::reducer::{AdmissionCommand, AdmissionEnvironment, AdmissionReducer, Reducer};
use admission_core::types::{
    EntryId, EventId, EventInfo, PaymentId, TicketId, UserId, WaitingListStatus,
};
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct ManualClock(Mutex<DateTime<Utc>>);

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Debug, Clone)]
enum Op {
    Join(usize),
    Advance(i64),
    FireDue,
    Release(usize),
    Purchase(usize),
    Process,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..8usize).prop_map(Op::Join),
        2 => (1..45i64).prop_map(Op::Advance),
        2 => Just(Op::FireDue),
        1 => (0..8usize).prop_map(Op::Release),
        2 => (0..8usize).prop_map(Op::Purchase),
        1 => Just(Op::Process),
    ]
}

struct Model {
    clock: Arc<ManualClock>,
    env: AdmissionEnvironment,
    ledger: EventLedger,
    users: Vec<UserId>,
    seq: i64,
}

impl Model {
    fn new(capacity: u32) -> Self {
        let clock = Arc::new(ManualClock(Mutex::new(Utc::now())));
        Self {
            env: AdmissionEnvironment::new(clock.clone(), Duration::minutes(30)),
            clock,
            ledger: EventLedger::empty(EventInfo::new(EventId::new(), capacity)),
            users: (0..8).map(|_| UserId::new()).collect(),
            seq: 0,
        }
    }

    /// Runs a command the way the runtime does: rejected commands leave no trace.
    fn send(&mut self, command: AdmissionCommand) -> bool {
        let mut working = self.ledger.clone();
        match AdmissionReducer::new().reduce(&mut working, command, &self.env) {
            Ok(_) => {
                self.ledger = working;
                true
            }
            Err(_) => false,
        }
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Join(user) => {
                self.seq += 1;
                let user_id = self.users[user];
                self.send(AdmissionCommand::Join {
                    entry_id: EntryId::new(),
                    user_id,
                    seq: self.seq,
                });
            }
            Op::Advance(minutes) => {
                let mut now = self.clock.0.lock().unwrap();
                *now += Duration::minutes(minutes);
            }
            Op::FireDue => {
                let now = self.clock.now();
                let due: Vec<EntryId> = self
                    .ledger
                    .entries()
                    .iter()
                    .filter(|entry| entry.status == WaitingListStatus::Offered)
                    .filter(|entry| entry.offer_expires_at.is_some_and(|at| at <= now))
                    .map(|entry| entry.id)
                    .collect();
                for entry_id in due {
                    self.send(AdmissionCommand::ExpireOffer { entry_id });
                }
            }
            Op::Release(user) => {
                let user_id = self.users[user];
                if let Some(entry_id) = self.ledger.offered_entry_for(user_id).map(|e| e.id) {
                    self.send(AdmissionCommand::ReleaseOffer { entry_id, user_id });
                }
            }
            Op::Purchase(user) => {
                let payment_id = PaymentId::new();
                if self.send(AdmissionCommand::BeginCheckout {
                    payment_id,
                    user_id: self.users[user],
                }) {
                    assert!(self.send(AdmissionCommand::Fulfill {
                        payment_id,
                        ticket_id: TicketId::new(),
                        payment_intent: None,
                    }));
                }
            }
            Op::Process => {
                self.send(AdmissionCommand::IssueOffers);
            }
        }
    }
}

proptest! {
    #[test]
    fn offers_and_purchases_never_exceed_capacity(
        capacity in 0u32..4,
        ops in prop::collection::vec(op(), 1..80),
    ) {
        let mut model = Model::new(capacity);
        let mut terminal: HashMap<EntryId, WaitingListStatus> = HashMap::new();

        for op in &ops {
            model.apply(op);

            let snapshot = model.ledger.capacity(model.clock.now());
            prop_assert!(
                i64::from(snapshot.purchased) + i64::from(snapshot.active_offers)
                    <= i64::from(capacity),
                "capacity exceeded after {:?}: {:?}", op, snapshot
            );

            for entry in model.ledger.entries() {
                if let Some(previous) = terminal.get(&entry.id) {
                    prop_assert_eq!(*previous, entry.status);
                } else if entry.status.is_terminal() {
                    terminal.insert(entry.id, entry.status);
                }
            }

            for user_id in &model.users {
                let live = model
                    .ledger
                    .entries()
                    .iter()
                    .filter(|e| e.user_id == *user_id && e.status != WaitingListStatus::Expired)
                    .count();
                prop_assert!(live <= 1);
            }
        }
    }

    #[test]
    fn offers_are_issued_in_join_order(
        capacity in 1u32..4,
        joins in 1usize..8,
    ) {
        let mut model = Model::new(capacity);
        for user in 0..joins {
            model.apply(&Op::Join(user));
        }

        let statuses: Vec<WaitingListStatus> =
            model.ledger.entries().iter().map(|e| e.status).collect();
        let offered = statuses.iter().take_while(|s| **s == WaitingListStatus::Offered).count();

        prop_assert_eq!(offered, joins.min(capacity as usize));
        prop_assert!(statuses[offered..].iter().all(|s| *s == WaitingListStatus::Waiting));
    }
}
