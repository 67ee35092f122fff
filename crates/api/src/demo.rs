//! Demo order saga served by the host.
//!
//! `OrderSaga` waits for payment and shipment of one order:
//! `OrderPaid` keeps it running, `OrderShipped` completes it with the
//! order summary. Compensation records the refund and fails the saga.

use async_trait::async_trait;
use bus::{Contract, KnownTypesRegistry, SchemeError, TypeKey};
use saga::{Saga, SagaContext, SagaFailure};
use serde::{Deserialize, Serialize};

pub const ORDER_SAGA: &str = "OrderSaga";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderPaid {
    pub amount_cents: u64,
}

impl Contract for OrderPaid {
    const KIND: &'static str = "orders.OrderPaid";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderShipped {
    pub tracking_number: String,
}

impl Contract for OrderShipped {
    const KIND: &'static str = "orders.OrderShipped";
}

/// Registers the demo contracts in the scheme.
pub fn register_contracts(scheme: &KnownTypesRegistry) -> Result<(), SchemeError> {
    scheme.register::<OrderPaid>()?;
    scheme.register::<OrderShipped>()
}

/// Progress of one order, stored as the instance payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderProgress {
    #[serde(default)]
    pub order: serde_json::Value,
    pub paid_cents: Option<u64>,
    pub tracking_number: Option<String>,
    pub refund_reason: Option<String>,
}

pub struct OrderSaga;

#[async_trait]
impl Saga for OrderSaga {
    fn saga_type(&self) -> &str {
        ORDER_SAGA
    }

    fn event_handlers(&self) -> Vec<TypeKey> {
        vec![OrderPaid::type_key(), OrderShipped::type_key()]
    }

    async fn start(&self, ctx: &mut SagaContext<'_>) -> Result<(), SagaFailure> {
        let progress = OrderProgress {
            order: ctx.payload().clone(),
            ..OrderProgress::default()
        };
        ctx.set_state(&progress)
    }

    async fn handle(&self, event_type: &TypeKey, ctx: &mut SagaContext<'_>) -> Result<(), SagaFailure> {
        let mut progress: OrderProgress = ctx.state()?;

        match event_type.as_str() {
            OrderPaid::KIND => {
                let paid: OrderPaid = ctx.decode()?;
                progress.paid_cents = Some(paid.amount_cents);
                ctx.set_state(&progress)?;
            }
            OrderShipped::KIND => {
                let shipped: OrderShipped = ctx.decode()?;
                progress.tracking_number = Some(shipped.tracking_number);
                ctx.set_state(&progress)?;
                ctx.complete(serde_json::to_value(&progress)?);
            }
            other => return Err(SagaFailure::new(format!("OrderSaga cannot handle {other}"))),
        }

        tracing::debug!(instance_id = %ctx.instance_id(), kind = %event_type, "order progressed");
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SagaContext<'_>, reason: &str) -> Result<(), SagaFailure> {
        let mut progress: OrderProgress = ctx.state()?;
        progress.refund_reason = Some(reason.to_string());
        ctx.set_state(&progress)?;
        ctx.fail(format!("compensated: {reason}"));
        Ok(())
    }
}
