//! Concurrent, fail-fast start/stop across several VMs.
//!
//! Every VM gets its own unit of work (fetch, check, act) and all units run
//! concurrently on the calling task. The first unit to fail cancels a token
//! shared by the batch so siblings stop at their next repository call.
//! Effects that already completed are not rolled back.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;

use crate::error::GceError;
use crate::repository::VmRepository;
use crate::vm::{Vm, VmRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Start,
    Stop,
}

impl BatchAction {
    pub fn verb(self) -> &'static str {
        match self {
            BatchAction::Start => "start",
            BatchAction::Stop => "stop",
        }
    }

    pub fn past_participle(self) -> &'static str {
        match self {
            BatchAction::Start => "started",
            BatchAction::Stop => "stopped",
        }
    }

    /// Whether `vm` is in a state this action may be applied to.
    pub fn permits(self, vm: &Vm) -> bool {
        match self {
            BatchAction::Start => vm.can_start(),
            BatchAction::Stop => vm.can_stop(),
        }
    }
}

pub struct BatchExecutor {
    repo: Arc<dyn VmRepository>,
}

impl BatchExecutor {
    pub fn new(repo: Arc<dyn VmRepository>) -> Self {
        Self { repo }
    }

    /// Apply `action` to every VM concurrently.
    ///
    /// Waits for all units to finish and returns the first error observed.
    /// Errors from units that fail afterwards (usually cancellations caused
    /// by the first failure) are only logged at debug level.
    pub async fn execute(
        &self,
        ctx: &CancellationToken,
        vms: &[VmRef],
        action: BatchAction,
    ) -> Result<(), GceError> {
        let batch = ctx.child_token();

        let mut units: FuturesUnordered<_> = vms
            .iter()
            .map(|vm| self.run_unit(&batch, vm, action))
            .collect();

        let mut first_error = None;
        while let Some(result) = units.next().await {
            let Err(err) = result else { continue };
            if first_error.is_none() {
                batch.cancel();
                first_error = Some(err);
            } else {
                tracing::debug!(error = %err, "discarding error from batch sibling");
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn run_unit(
        &self,
        ctx: &CancellationToken,
        vm_ref: &VmRef,
        action: BatchAction,
    ) -> Result<(), GceError> {
        let name = &vm_ref.name;

        // Fresh state per unit, checked right before acting.
        let vm = match self.repo.find_by_name(ctx, vm_ref).await {
            Ok(Some(vm)) => vm,
            Ok(None) => return Err(GceError::NotFound { name: name.clone() }),
            Err(source) => {
                return Err(GceError::FindFailed {
                    name: name.clone(),
                    source: Box::new(source),
                });
            }
        };

        if !action.permits(&vm) {
            return Err(GceError::PreconditionFailed {
                name: name.clone(),
                action,
                status: vm.status,
            });
        }

        let result = match action {
            BatchAction::Start => self.repo.start(ctx, &vm).await,
            BatchAction::Stop => self.repo.stop(ctx, &vm).await,
        };
        result.map_err(|source| GceError::ActionFailed {
            name: name.clone(),
            action,
            source: Box::new(source),
        })?;

        tracing::info!(vm = %name, "VM {}", action.past_participle());
        Ok(())
    }
}
