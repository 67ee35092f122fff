//! Lifecycle messages exchanged with the saga component.
//!
//! Commands drive an instance from outside; events report its completion.
//! Every saga endpoint carries all five.

use bus::{Contract, KnownTypesRegistry, SchemeError, TypeKey};
use saga_store::InstanceId;
use serde::{Deserialize, Serialize};

/// Starts a new instance of a saga type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartSagaCommand {
    /// Type key of the saga to start.
    pub saga_type: String,

    /// Instance id to use. When absent, the id of the Start message is used.
    #[serde(default)]
    pub instance_id: Option<InstanceId>,

    /// Instance that started this one, if any.
    #[serde(default)]
    pub parent_id: Option<InstanceId>,

    /// Initial process state.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl StartSagaCommand {
    pub fn new(saga_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            saga_type: saga_type.into(),
            instance_id: None,
            parent_id: None,
            payload,
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<InstanceId>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<InstanceId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

impl Contract for StartSagaCommand {
    const KIND: &'static str = "saga.StartSagaCommand";
}

/// Resumes an instance after a crash or a redelivery gap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoverSagaCommand {
    pub instance_id: InstanceId,
}

impl RecoverSagaCommand {
    pub fn new(instance_id: impl Into<InstanceId>) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }
}

impl Contract for RecoverSagaCommand {
    const KIND: &'static str = "saga.RecoverSagaCommand";
}

/// Triggers the compensating logic of a running instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompensateSagaCommand {
    pub instance_id: InstanceId,
    pub reason: String,
}

impl CompensateSagaCommand {
    pub fn new(instance_id: impl Into<InstanceId>, reason: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            reason: reason.into(),
        }
    }
}

impl Contract for CompensateSagaCommand {
    const KIND: &'static str = "saga.CompensateSagaCommand";
}

/// Emitted when an instance reaches `Completed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SagaCompletedEvent {
    pub instance_id: InstanceId,
    pub result: serde_json::Value,
}

impl Contract for SagaCompletedEvent {
    const KIND: &'static str = "saga.SagaCompletedEvent";
}

/// Emitted, addressed to the parent, when a child instance completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SagaChildCompletedEvent {
    pub parent_instance_id: InstanceId,
    pub child_instance_id: InstanceId,
    pub result: serde_json::Value,
}

impl Contract for SagaChildCompletedEvent {
    const KIND: &'static str = "saga.SagaChildCompletedEvent";
}

/// The lifecycle command types served by the control handler.
pub fn lifecycle_commands() -> [TypeKey; 3] {
    [
        StartSagaCommand::type_key(),
        RecoverSagaCommand::type_key(),
        CompensateSagaCommand::type_key(),
    ]
}

/// Every lifecycle contract, commands first.
pub fn lifecycle_contracts() -> [TypeKey; 5] {
    [
        StartSagaCommand::type_key(),
        RecoverSagaCommand::type_key(),
        CompensateSagaCommand::type_key(),
        SagaCompletedEvent::type_key(),
        SagaChildCompletedEvent::type_key(),
    ]
}

/// Registers the lifecycle contracts in a scheme registry.
///
/// Needed before boot when a saga handles `SagaChildCompletedEvent`.
pub fn register_lifecycle_contracts(scheme: &KnownTypesRegistry) -> Result<(), SchemeError> {
    scheme.register::<StartSagaCommand>()?;
    scheme.register::<RecoverSagaCommand>()?;
    scheme.register::<CompensateSagaCommand>()?;
    scheme.register::<SagaCompletedEvent>()?;
    scheme.register::<SagaChildCompletedEvent>()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::{Envelope, SchemeRegistry};

    #[test]
    fn start_command_defaults_optional_fields() {
        let cmd: StartSagaCommand =
            serde_json::from_value(serde_json::json!({"saga_type": "OrderSaga"})).unwrap();
        assert_eq!(cmd.saga_type, "OrderSaga");
        assert!(cmd.instance_id.is_none());
        assert!(cmd.parent_id.is_none());
        assert!(cmd.payload.is_null());
    }

    #[test]
    fn commands_travel_in_envelopes() {
        let cmd = CompensateSagaCommand::new("1", "payment declined");
        let envelope = Envelope::from_contract(&cmd).unwrap();
        assert_eq!(envelope.kind.as_str(), "saga.CompensateSagaCommand");
        assert_eq!(envelope.decode::<CompensateSagaCommand>().unwrap(), cmd);
    }

    #[test]
    fn lifecycle_contracts_register_in_scheme() {
        let scheme = KnownTypesRegistry::new();
        register_lifecycle_contracts(&scheme).unwrap();
        for kind in lifecycle_contracts() {
            assert!(scheme.resolve(&kind).is_ok(), "{kind} not registered");
        }
        assert_eq!(scheme.len(), 5);
    }
}
