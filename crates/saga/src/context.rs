//! Per-invocation view of a saga instance handed to saga logic.

use bus::{Contract, Envelope, MessageContext};
use saga_store::{InstanceId, SagaInstance, SagaState};
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;

use crate::error::SagaFailure;
use crate::id_extractor::SAGA_ID_HEADER;

/// Terminal outcome requested by saga logic.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Completed(serde_json::Value),
    Failed(String),
}

/// Mutable access to one instance while its lock is held.
///
/// Saga logic reads and updates the process state here, queues outbound
/// messages and signals completion. The handler persists the result once
/// the logic returns.
pub struct SagaContext<'a> {
    instance: &'a mut SagaInstance,
    delivery: &'a MessageContext,
    outcome: Option<Outcome>,
}

impl<'a> SagaContext<'a> {
    pub(crate) fn new(instance: &'a mut SagaInstance, delivery: &'a MessageContext) -> Self {
        Self {
            instance,
            delivery,
            outcome: None,
        }
    }

    pub(crate) fn into_outcome(self) -> Option<Outcome> {
        self.outcome
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance.id
    }

    pub fn parent_id(&self) -> Option<&InstanceId> {
        self.instance.parent_id.as_ref()
    }

    pub fn status(&self) -> SagaState {
        self.instance.status
    }

    /// The raw process state.
    pub fn payload(&self) -> &serde_json::Value {
        &self.instance.payload
    }

    /// Replaces the raw process state.
    pub fn set_payload(&mut self, payload: serde_json::Value) {
        self.instance.payload = payload;
    }

    /// Decodes the process state into a typed value.
    pub fn state<T: DeserializeOwned>(&self) -> Result<T, SagaFailure> {
        Ok(serde_json::from_value(self.instance.payload.clone())?)
    }

    /// Replaces the process state with a typed value.
    pub fn set_state<T: Serialize>(&mut self, state: &T) -> Result<(), SagaFailure> {
        self.instance.payload = serde_json::to_value(state)?;
        Ok(())
    }

    /// The message being processed.
    pub fn message(&self) -> &Envelope {
        self.delivery.message()
    }

    /// Decodes the message being processed.
    pub fn decode<T: Contract>(&self) -> Result<T, SagaFailure> {
        Ok(self.delivery.message().decode()?)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.delivery.cancellation()
    }

    /// Queues an outbound message.
    ///
    /// Messages are only sent if processing succeeds.
    pub fn send(&self, envelope: Envelope) {
        self.delivery.send(envelope);
    }

    /// Queues a contract addressed back to this instance via the `saga-id`
    /// header, so replies reach the same instance.
    pub fn send_contract<T: Contract>(&self, message: &T) -> Result<(), SagaFailure> {
        let envelope =
            Envelope::from_contract(message)?.with_header(SAGA_ID_HEADER, self.instance.id.as_str());
        self.delivery.send(envelope);
        Ok(())
    }

    /// Marks the process as successfully finished with `result`.
    pub fn complete(&mut self, result: serde_json::Value) {
        self.outcome = Some(Outcome::Completed(result));
    }

    /// Marks the process as failed without compensation.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.outcome = Some(Outcome::Failed(reason.into()));
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Completed(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Order {
        paid: bool,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Shipped;

    impl Contract for Shipped {
        const KIND: &'static str = "orders.OrderShipped";
    }

    fn delivery() -> MessageContext {
        MessageContext::new(Envelope::builder().kind("orders.OrderPaid").build())
    }

    #[test]
    fn typed_state_round_trips() {
        let mut instance = SagaInstance::new(
            InstanceId::from("1"),
            "OrderSaga",
            serde_json::json!({"paid": false}),
        );
        let delivery = delivery();
        let mut ctx = SagaContext::new(&mut instance, &delivery);

        let mut order: Order = ctx.state().unwrap();
        order.paid = true;
        ctx.set_state(&order).unwrap();
        assert!(ctx.into_outcome().is_none());

        assert_eq!(instance.payload, serde_json::json!({"paid": true}));
    }

    #[test]
    fn complete_and_fail_set_outcome() {
        let mut instance = SagaInstance::new(InstanceId::from("1"), "OrderSaga", serde_json::Value::Null);
        let delivery = delivery();

        let mut ctx = SagaContext::new(&mut instance, &delivery);
        ctx.complete(serde_json::json!({"ok": true}));
        assert!(ctx.is_completed());
        assert_eq!(
            ctx.into_outcome(),
            Some(Outcome::Completed(serde_json::json!({"ok": true})))
        );

        let mut ctx = SagaContext::new(&mut instance, &delivery);
        ctx.fail("out of stock");
        assert_eq!(ctx.into_outcome(), Some(Outcome::Failed("out of stock".into())));
    }

    #[test]
    fn send_contract_addresses_this_instance() {
        let mut instance = SagaInstance::new(InstanceId::from("9"), "OrderSaga", serde_json::Value::Null);
        let delivery = delivery();
        let ctx = SagaContext::new(&mut instance, &delivery);

        ctx.send_contract(&Shipped).unwrap();

        let outbox = delivery.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].header(SAGA_ID_HEADER), Some("9"));
    }

    #[test]
    fn wrong_state_shape_is_a_failure() {
        let mut instance =
            SagaInstance::new(InstanceId::from("1"), "OrderSaga", serde_json::json!([1, 2]));
        let delivery = delivery();
        let ctx = SagaContext::new(&mut instance, &delivery);
        assert!(ctx.state::<Order>().is_err());
    }
}
