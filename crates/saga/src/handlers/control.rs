use std::sync::Arc;

use async_trait::async_trait;
use bus::{Contract, HandlerError, MessageContext, MessageHandler};
use saga_store::{InstanceId, SagaInstance, SagaState};

use super::{HandlerCore, emit_completion, settle};
use crate::context::SagaContext;
use crate::contracts::{CompensateSagaCommand, RecoverSagaCommand, StartSagaCommand};
use crate::error::{Result, SagaError};
use crate::saga::Saga;

/// Serves the lifecycle commands that drive instances from outside.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──┬──────────────────────────► Completed
///                          └──► Compensating ──┬──► Failed
///                                              └──► Completed
/// ```
///
/// Start and Recover are idempotent so that redelivered commands succeed.
pub struct ControlHandler {
    core: Arc<HandlerCore>,
}

impl ControlHandler {
    pub(crate) fn new(core: Arc<HandlerCore>) -> Self {
        Self { core }
    }

    /// Handles one lifecycle command.
    #[tracing::instrument(skip(self, ctx), fields(kind = %ctx.message().kind, message_id = %ctx.message().id))]
    pub async fn handle_command(&self, ctx: &MessageContext) -> Result<()> {
        let message = ctx.message();
        metrics::counter!("saga_commands_total", "command" => message.kind.to_string()).increment(1);

        match message.kind.as_str() {
            StartSagaCommand::KIND => self.start(ctx, message.decode()?).await,
            RecoverSagaCommand::KIND => self.recover(ctx, message.decode()?).await,
            CompensateSagaCommand::KIND => self.compensate(ctx, message.decode()?).await,
            _ => Err(SagaError::UnsupportedCommand(message.kind.clone())),
        }
    }

    async fn start(&self, ctx: &MessageContext, cmd: StartSagaCommand) -> Result<()> {
        let saga = self
            .core
            .registry
            .get(&cmd.saga_type)
            .ok_or_else(|| SagaError::UnknownSagaType(cmd.saga_type.clone()))?;
        // Derived from the message id so a redelivered Start finds its instance.
        let id = cmd
            .instance_id
            .clone()
            .unwrap_or_else(|| InstanceId::from(ctx.message().id.to_string()));

        let lock = self.core.lock(&id, ctx.cancellation()).await?;
        let result = self.start_locked(ctx, saga.as_ref(), id, cmd).await;
        self.core.unlock(lock, result).await
    }

    async fn start_locked(
        &self,
        ctx: &MessageContext,
        saga: &dyn Saga,
        id: InstanceId,
        cmd: StartSagaCommand,
    ) -> Result<()> {
        let existing = self.core.store.load(&id).await?;
        if let Some(existing) = &existing
            && !existing.status.can_start()
        {
            tracing::debug!(instance_id = %id, status = %existing.status, "saga already started");
            return Ok(());
        }

        let mut instance = existing.unwrap_or_else(|| {
            SagaInstance::new(id, cmd.saga_type, cmd.payload).with_parent(cmd.parent_id)
        });

        let mut saga_ctx = SagaContext::new(&mut instance, ctx);
        saga.start(&mut saga_ctx).await?;
        let outcome = saga_ctx.into_outcome();

        let completed = settle(&mut instance, outcome);
        if instance.status == SagaState::NotStarted {
            instance.status = SagaState::Running;
        }
        instance.record(ctx.message().id, ctx.message().kind.clone());
        self.core.save(&mut instance).await?;

        tracing::info!(instance_id = %instance.id, saga_type = %instance.saga_type, status = %instance.status, "saga started");
        if let Some(result) = completed {
            emit_completion(ctx, &instance, result)?;
        }
        Ok(())
    }

    async fn recover(&self, ctx: &MessageContext, cmd: RecoverSagaCommand) -> Result<()> {
        let lock = self.core.lock(&cmd.instance_id, ctx.cancellation()).await?;
        let result = self.recover_locked(ctx, &cmd.instance_id).await;
        self.core.unlock(lock, result).await
    }

    async fn recover_locked(&self, ctx: &MessageContext, id: &InstanceId) -> Result<()> {
        let mut instance = self.core.load(id).await?;
        if instance.is_terminal() {
            tracing::debug!(instance_id = %id, status = %instance.status, "recover on finished saga ignored");
            return Ok(());
        }
        if !instance.status.can_recover() {
            return Err(SagaError::InvalidTransition {
                instance_id: id.clone(),
                command: RecoverSagaCommand::type_key(),
                state: instance.status,
            });
        }
        let saga = self.saga_for(&instance)?;

        match instance.status {
            SagaState::Compensating => {
                let reason = instance.compensation_reason.clone().unwrap_or_default();
                tracing::info!(instance_id = %id, %reason, "resuming compensation");
                self.run_compensation(ctx, saga.as_ref(), instance, &reason)
                    .await
            }
            // Running
            _ => {
                let before = instance.clone();
                let mut saga_ctx = SagaContext::new(&mut instance, ctx);
                let recovered = saga.recover(&mut saga_ctx).await;
                let outcome = saga_ctx.into_outcome();

                if let Err(failure) = recovered {
                    instance.last_error = Some(failure.to_string());
                    self.core.save(&mut instance).await?;
                    return Err(failure.into());
                }
                if outcome.is_none() && instance == before {
                    tracing::debug!(instance_id = %id, "recovered without changes");
                    return Ok(());
                }

                let completed = settle(&mut instance, outcome);
                instance.record(ctx.message().id, ctx.message().kind.clone());
                self.core.save(&mut instance).await?;
                if let Some(result) = completed {
                    emit_completion(ctx, &instance, result)?;
                }
                Ok(())
            }
        }
    }

    async fn compensate(&self, ctx: &MessageContext, cmd: CompensateSagaCommand) -> Result<()> {
        let lock = self.core.lock(&cmd.instance_id, ctx.cancellation()).await?;
        let result = self.compensate_locked(ctx, cmd).await;
        self.core.unlock(lock, result).await
    }

    async fn compensate_locked(&self, ctx: &MessageContext, cmd: CompensateSagaCommand) -> Result<()> {
        let mut instance = self.core.load(&cmd.instance_id).await?;
        if !instance.status.can_compensate() {
            return Err(SagaError::InvalidTransition {
                instance_id: cmd.instance_id,
                command: CompensateSagaCommand::type_key(),
                state: instance.status,
            });
        }
        let saga = self.saga_for(&instance)?;

        instance.status = SagaState::Compensating;
        instance.compensation_reason = Some(cmd.reason.clone());
        tracing::info!(instance_id = %instance.id, reason = %cmd.reason, "compensating saga");
        self.run_compensation(ctx, saga.as_ref(), instance, &cmd.reason)
            .await
    }

    /// Invokes compensation on a `Compensating` instance and persists the
    /// result. A failed compensation leaves the instance `Compensating`.
    async fn run_compensation(
        &self,
        ctx: &MessageContext,
        saga: &dyn Saga,
        mut instance: SagaInstance,
        reason: &str,
    ) -> Result<()> {
        let mut saga_ctx = SagaContext::new(&mut instance, ctx);
        let compensated = saga.compensate(&mut saga_ctx, reason).await;
        let outcome = saga_ctx.into_outcome();

        if let Err(failure) = compensated {
            tracing::warn!(instance_id = %instance.id, error = %failure, "compensation failed");
            instance.last_error = Some(failure.to_string());
            instance.updated_at = chrono::Utc::now();
            self.core.save(&mut instance).await?;
            return Err(failure.into());
        }

        let completed = match settle(&mut instance, outcome) {
            Some(result) => Some(result),
            None => {
                instance.status = SagaState::Failed;
                None
            }
        };
        instance.record(ctx.message().id, ctx.message().kind.clone());
        self.core.save(&mut instance).await?;

        tracing::info!(instance_id = %instance.id, status = %instance.status, "compensation finished");
        if let Some(result) = completed {
            emit_completion(ctx, &instance, result)?;
        }
        Ok(())
    }

    fn saga_for(&self, instance: &SagaInstance) -> Result<Arc<dyn Saga>> {
        self.core
            .registry
            .get(&instance.saga_type)
            .ok_or_else(|| SagaError::UnknownSagaType(instance.saga_type.clone()))
    }
}

#[async_trait]
impl MessageHandler for ControlHandler {
    async fn handle(&self, ctx: &MessageContext) -> std::result::Result<(), HandlerError> {
        self.handle_command(ctx).await.map_err(|err| {
            metrics::counter!("saga_handler_errors_total", "handler" => "control").increment(1);
            err.into()
        })
    }
}
