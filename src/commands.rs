//! Single-VM and listing commands built on a [`VmRepository`].
//!
//! Start/stop of several VMs goes through [`crate::batch::BatchExecutor`];
//! everything else here acts on one VM or reads the whole inventory.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::GceError;
use crate::repository::VmRepository;
use crate::uptime::uptime_display;
use crate::vm::{Vm, VmRef};

/// A fetched VM together with its rendered uptime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmListItem {
    pub vm: Vm,
    pub uptime: String,
}

impl VmListItem {
    pub fn new(vm: Vm, now: DateTime<Utc>) -> Self {
        let uptime = uptime_display(&vm, now);
        Self { vm, uptime }
    }
}

/// Every configured VM that could be fetched.
pub async fn list_vms(
    repo: &dyn VmRepository,
    ctx: &CancellationToken,
    now: DateTime<Utc>,
) -> Result<Vec<VmListItem>, GceError> {
    let vms = repo.find_all(ctx).await?;
    Ok(vms.into_iter().map(|vm| VmListItem::new(vm, now)).collect())
}

pub async fn describe_vm(
    repo: &dyn VmRepository,
    ctx: &CancellationToken,
    vm: &VmRef,
    now: DateTime<Utc>,
) -> Result<VmListItem, GceError> {
    let vm = find(repo, ctx, vm).await?;
    Ok(VmListItem::new(vm, now))
}

/// Change the machine type of a VM that is not running.
pub async fn update_machine_type(
    repo: &dyn VmRepository,
    ctx: &CancellationToken,
    vm: &VmRef,
    machine_type: &str,
) -> Result<(), GceError> {
    let vm = find(repo, ctx, vm).await?;
    if vm.can_stop() {
        return Err(GceError::MustBeStopped {
            name: vm.name().to_string(),
            status: vm.status,
        });
    }
    repo.update_machine_type(ctx, &vm, machine_type).await
}

pub async fn set_schedule_policy(
    repo: &dyn VmRepository,
    ctx: &CancellationToken,
    vm: &VmRef,
    policy: &str,
) -> Result<(), GceError> {
    let vm = find(repo, ctx, vm).await?;
    repo.set_schedule_policy(ctx, &vm, policy).await
}

pub async fn unset_schedule_policy(
    repo: &dyn VmRepository,
    ctx: &CancellationToken,
    vm: &VmRef,
    policy: &str,
) -> Result<(), GceError> {
    let vm = find(repo, ctx, vm).await?;
    repo.unset_schedule_policy(ctx, &vm, policy).await
}

async fn find(
    repo: &dyn VmRepository,
    ctx: &CancellationToken,
    vm: &VmRef,
) -> Result<Vm, GceError> {
    repo.find_by_name(ctx, vm)
        .await?
        .ok_or_else(|| GceError::NotFound {
            name: vm.name.clone(),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::TimeDelta;

    use super::*;
    use crate::repository::mock::MockRepository;
    use crate::uptime::UPTIME_UNAVAILABLE;
    use crate::vm::Status;
    use crate::vm::tests::test_vm;

    #[tokio::test]
    async fn list_renders_uptime_per_vm() {
        let now = Utc::now();
        let mut running = test_vm("web", Status::Running);
        running.last_start_time = Some(now - TimeDelta::seconds(45));
        let repo = MockRepository::new(vec![running, test_vm("db", Status::Terminated)]);

        let items = list_vms(&repo, &CancellationToken::new(), now).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].vm.name(), "web");
        assert_eq!(items[0].uptime, "45s");
        assert_eq!(items[1].uptime, UPTIME_UNAVAILABLE);
    }

    #[tokio::test]
    async fn list_skips_vms_that_fail_to_fetch() {
        let repo = MockRepository::new(vec![
            test_vm("a", Status::Running),
            test_vm("b", Status::Running),
        ])
        .fail_find("a");

        let items = list_vms(&repo, &CancellationToken::new(), Utc::now())
            .await
            .unwrap();
        let names: Vec<&str> = items.iter().map(|i| i.vm.name()).collect();
        assert_eq!(names, ["b"]);
    }

    #[tokio::test]
    async fn describe_missing_vm_is_not_found() {
        let repo = MockRepository::new(Vec::new());
        let err = describe_vm(
            &repo,
            &CancellationToken::new(),
            &VmRef::new("ghost", "p", "z-a"),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn machine_type_change_requires_non_running_vm() {
        let repo = MockRepository::new(vec![test_vm("web", Status::Running)]);
        let err = update_machine_type(
            &repo,
            &CancellationToken::new(),
            &repo.reference("web"),
            "e2-small",
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "VM web must be stopped before changing machine type (current status: RUNNING)"
        );
        assert_eq!(repo.machine_type_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn machine_type_change_on_stopped_vm() {
        let repo = MockRepository::new(vec![test_vm("db", Status::Terminated)]);
        update_machine_type(
            &repo,
            &CancellationToken::new(),
            &repo.reference("db"),
            "n2-standard-2",
        )
        .await
        .unwrap();

        assert_eq!(repo.machine_type_of("db").as_deref(), Some("n2-standard-2"));
    }

    #[tokio::test]
    async fn schedule_policy_attach_and_detach() {
        let repo = MockRepository::new(vec![test_vm("web", Status::Running)]);
        let ctx = CancellationToken::new();
        let vm = repo.reference("web");

        set_schedule_policy(&repo, &ctx, &vm, "office-hours")
            .await
            .unwrap();
        unset_schedule_policy(&repo, &ctx, &vm, "office-hours")
            .await
            .unwrap();

        assert_eq!(
            *repo.policies.lock().unwrap(),
            [
                ("web".to_string(), "office-hours".to_string(), true),
                ("web".to_string(), "office-hours".to_string(), false),
            ]
        );
    }
}
