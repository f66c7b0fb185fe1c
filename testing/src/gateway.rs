//! Recording payment gateway with failure injection.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use admission_core::gateway::{
    CheckoutSession, CheckoutSessionRequest, GatewayError, GatewayFuture, GatewayResult,
    PaymentGateway, RefundRequest,
};
use admission_core::types::SessionRef;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct State {
    checkouts: Vec<CheckoutSessionRequest>,
    intents: HashMap<SessionRef, String>,
    refunds: Vec<RefundRequest>,
    refund_ids: HashMap<String, String>,
    checkout_failures: VecDeque<GatewayError>,
    refund_failures: HashMap<String, GatewayError>,
    intent_lookups: usize,
    next_id: u64,
}

/// In-memory stand-in for the hosted payment provider.
///
/// Sessions are numbered `cs_test_1`, `cs_test_2`, ... and each gets the
/// payment intent `pi_test_<n>`. Refunds are idempotent per idempotency key.
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    state: Arc<Mutex<State>>,
}

impl MockPaymentGateway {
    /// Create a gateway that accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues errors returned by the next checkout-session calls, in order.
    pub fn fail_checkouts(&self, errors: impl IntoIterator<Item = GatewayError>) {
        self.state.lock().unwrap().checkout_failures.extend(errors);
    }

    /// Rejects every refund for `payment_intent` with `error`.
    pub fn fail_refunds_for(&self, payment_intent: impl Into<String>, error: GatewayError) {
        self.state
            .lock()
            .unwrap()
            .refund_failures
            .insert(payment_intent.into(), error);
    }

    /// Lets refunds for `payment_intent` succeed again.
    pub fn heal_refunds_for(&self, payment_intent: &str) {
        self.state.lock().unwrap().refund_failures.remove(payment_intent);
    }

    /// Every checkout-session request received
    #[must_use]
    pub fn checkouts(&self) -> Vec<CheckoutSessionRequest> {
        self.state.lock().unwrap().checkouts.clone()
    }

    /// Every refund request received, including rejected ones
    #[must_use]
    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.state.lock().unwrap().refunds.clone()
    }

    /// Distinct refunds that went through
    #[must_use]
    pub fn completed_refunds(&self) -> usize {
        self.state.lock().unwrap().refund_ids.len()
    }

    /// Number of payment-intent lookups
    #[must_use]
    pub fn intent_lookups(&self) -> usize {
        self.state.lock().unwrap().intent_lookups
    }

    /// The payment intent the provider assigned to a session
    #[must_use]
    pub fn intent_for(&self, session_ref: &SessionRef) -> Option<String> {
        self.state.lock().unwrap().intents.get(session_ref).cloned()
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> GatewayFuture<CheckoutSession> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock().unwrap();
            state.checkouts.push(request);
            if let Some(error) = state.checkout_failures.pop_front() {
                return Err(error);
            }

            state.next_id += 1;
            let n = state.next_id;
            let session_ref = SessionRef::new(format!("cs_test_{n}"));
            state.intents.insert(session_ref.clone(), format!("pi_test_{n}"));
            Ok(CheckoutSession {
                url: format!("https://checkout.test/pay/{session_ref}"),
                session_ref,
            })
        })
    }

    fn retrieve_payment_intent(&self, session_ref: &SessionRef) -> GatewayFuture<String> {
        let state = Arc::clone(&self.state);
        let session_ref = session_ref.clone();
        Box::pin(async move {
            let mut state = state.lock().unwrap();
            state.intent_lookups += 1;
            state
                .intents
                .get(&session_ref)
                .cloned()
                .ok_or_else(|| GatewayError::Rejected(format!("no such session: {session_ref}")))
        })
    }

    fn refund(&self, request: RefundRequest) -> GatewayFuture<String> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock().unwrap();
            state.refunds.push(request.clone());
            if let Some(error) = state.refund_failures.get(&request.payment_intent) {
                return GatewayResult::Err(error.clone());
            }

            let next = state.refund_ids.len() + 1;
            let refund_id = state
                .refund_ids
                .entry(request.idempotency_key)
                .or_insert_with(|| format!("re_test_{next}"))
                .clone();
            Ok(refund_id)
        })
    }
}
