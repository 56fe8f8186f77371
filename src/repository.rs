//! VM persistence boundary and its Compute Engine adapter.
//!
//! [`VmRepository`] is what the batch executor and the commands talk to.
//! [`GceRepository`] implements it on top of any [`ComputeApi`], turning
//! provider instances into [`Vm`] snapshots and blocking on the zone
//! operation behind every mutation.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::backend::{ComputeApi, Instance, InstanceSchedulePolicy, OperationHandle};
use crate::error::GceError;
use crate::polling::{cancellable, wait_for_operation};
use crate::progress::{TickSink, run_with_progress};
use crate::vm::{NO_SCHEDULE_POLICY, Status, Vm, VmRef};

/// Machine type reported when the instance URI does not name one.
pub const UNKNOWN_MACHINE_TYPE: &str = "UNKNOWN";

static MACHINE_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"machineTypes/([^/]+)").expect("valid regex"));
static PROJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"projects/([^/]+)/").expect("valid regex"));

/// Every method takes the cancellation context first. Mutations return
/// once the provider reports the change finished.
#[async_trait]
pub trait VmRepository: Send + Sync {
    async fn find_by_name(
        &self,
        ctx: &CancellationToken,
        vm: &VmRef,
    ) -> Result<Option<Vm>, GceError>;

    /// Every configured VM, in configuration order. VMs that cannot be
    /// fetched are logged and left out.
    async fn find_all(&self, ctx: &CancellationToken) -> Result<Vec<Vm>, GceError>;

    async fn start(&self, ctx: &CancellationToken, vm: &Vm) -> Result<(), GceError>;

    async fn stop(&self, ctx: &CancellationToken, vm: &Vm) -> Result<(), GceError>;

    async fn update_machine_type(
        &self,
        ctx: &CancellationToken,
        vm: &Vm,
        machine_type: &str,
    ) -> Result<(), GceError>;

    async fn set_schedule_policy(
        &self,
        ctx: &CancellationToken,
        vm: &Vm,
        policy: &str,
    ) -> Result<(), GceError>;

    async fn unset_schedule_policy(
        &self,
        ctx: &CancellationToken,
        vm: &Vm,
        policy: &str,
    ) -> Result<(), GceError>;
}

// ── Compute Engine adapter ────────────────────────────────

pub struct GceRepository<A> {
    api: A,
    inventory: Vec<VmRef>,
    tick_sink: Option<Arc<dyn TickSink>>,
}

impl<A: ComputeApi> GceRepository<A> {
    /// `inventory` is the set of VMs `find_all` reports on.
    pub fn new(api: A, inventory: Vec<VmRef>) -> Self {
        Self {
            api,
            inventory,
            tick_sink: None,
        }
    }

    /// Tick `sink` once per second while waiting on operations.
    pub fn with_tick_sink(mut self, sink: Arc<dyn TickSink>) -> Self {
        self.tick_sink = Some(sink);
        self
    }

    async fn fetch(&self, ctx: &CancellationToken, vm: &VmRef) -> Result<Vm, GceError> {
        let instance = cancellable(ctx, self.api.get_instance(vm))
            .await
            .map_err(|e| GceError::provider("failed to get instance", e))?;
        self.to_vm(ctx, vm, instance).await
    }

    async fn to_vm(
        &self,
        ctx: &CancellationToken,
        requested: &VmRef,
        instance: Instance,
    ) -> Result<Vm, GceError> {
        let project = project_from_self_link(&instance.self_link)?;
        let zone = if instance.zone.is_empty() {
            requested.zone.clone()
        } else {
            last_segment(&instance.zone).to_string()
        };
        let name = if instance.name.is_empty() {
            requested.name.clone()
        } else {
            instance.name.clone()
        };

        let schedule_policy = self
            .schedule_policy(ctx, &project, &zone, &instance.resource_policies)
            .await?;

        let mut vm = Vm::new(VmRef::new(name, project, zone));
        vm.status = Status::from_provider(&instance.status);
        vm.machine_type = machine_type_from_uri(&instance.machine_type);
        vm.schedule_policy = schedule_policy;
        vm.last_start_time = parse_timestamp(&instance.last_start_timestamp);
        Ok(vm)
    }

    /// First attached policy with an instance schedule, as `name(cron)`.
    async fn schedule_policy(
        &self,
        ctx: &CancellationToken,
        project: &str,
        zone: &str,
        policies: &[String],
    ) -> Result<String, GceError> {
        if policies.is_empty() {
            return Ok(NO_SCHEDULE_POLICY.to_string());
        }
        let region = region_of(zone)?;

        for uri in policies {
            let name = last_segment(uri);
            match cancellable(ctx, self.api.get_resource_policy(project, &region, name)).await {
                Ok(policy) => {
                    if let Some(schedule) = &policy.instance_schedule_policy {
                        return Ok(describe_schedule(name, schedule));
                    }
                }
                Err(GceError::Cancelled) => return Err(GceError::Cancelled),
                Err(err) => {
                    tracing::warn!(policy = name, error = %err, "failed to get resource policy");
                }
            }
        }
        Ok(NO_SCHEDULE_POLICY.to_string())
    }

    /// Block until `handle` finishes, ticking the sink if one is set.
    async fn wait_for(
        &self,
        ctx: &CancellationToken,
        handle: &OperationHandle,
        context: &str,
    ) -> Result<(), GceError> {
        let result = match &self.tick_sink {
            Some(sink) => {
                run_with_progress(ctx, &**sink, |ctx| async move {
                    wait_for_operation(&self.api, &ctx, handle).await
                })
                .await
            }
            None => wait_for_operation(&self.api, ctx, handle).await,
        };
        result.map_err(|e| GceError::provider(context, e))
    }
}

#[async_trait]
impl<A: ComputeApi> VmRepository for GceRepository<A> {
    async fn find_by_name(
        &self,
        ctx: &CancellationToken,
        vm: &VmRef,
    ) -> Result<Option<Vm>, GceError> {
        self.fetch(ctx, vm).await.map(Some)
    }

    async fn find_all(&self, ctx: &CancellationToken) -> Result<Vec<Vm>, GceError> {
        let results = join_all(self.inventory.iter().map(|vm| self.fetch(ctx, vm))).await;

        let mut vms = Vec::with_capacity(results.len());
        for (vm_ref, result) in self.inventory.iter().zip(results) {
            match result {
                Ok(vm) => vms.push(vm),
                Err(GceError::Cancelled) => return Err(GceError::Cancelled),
                Err(err) => {
                    tracing::error!(vm = %vm_ref.name, error = %err, "failed to fetch VM");
                }
            }
        }
        Ok(vms)
    }

    async fn start(&self, ctx: &CancellationToken, vm: &Vm) -> Result<(), GceError> {
        tracing::info!(vm = vm.name(), zone = vm.zone(), "starting instance");
        let handle = cancellable(ctx, self.api.start_instance(vm.reference()))
            .await
            .map_err(|e| GceError::provider("failed to start instance", e))?;
        self.wait_for(ctx, &handle, "failed to wait for start operation")
            .await
    }

    async fn stop(&self, ctx: &CancellationToken, vm: &Vm) -> Result<(), GceError> {
        tracing::info!(vm = vm.name(), zone = vm.zone(), "stopping instance");
        let handle = cancellable(ctx, self.api.stop_instance(vm.reference()))
            .await
            .map_err(|e| GceError::provider("failed to stop instance", e))?;
        self.wait_for(ctx, &handle, "failed to wait for stop operation")
            .await
    }

    async fn update_machine_type(
        &self,
        ctx: &CancellationToken,
        vm: &Vm,
        machine_type: &str,
    ) -> Result<(), GceError> {
        tracing::info!(vm = vm.name(), machine_type, "setting machine type");
        let url = machine_type_url(vm.zone(), machine_type);
        let handle = cancellable(ctx, self.api.set_machine_type(vm.reference(), &url))
            .await
            .map_err(|e| GceError::provider("failed to set machine type", e))?;
        self.wait_for(ctx, &handle, "failed to wait for set machine type operation")
            .await
    }

    async fn set_schedule_policy(
        &self,
        ctx: &CancellationToken,
        vm: &Vm,
        policy: &str,
    ) -> Result<(), GceError> {
        tracing::info!(vm = vm.name(), policy, "attaching schedule policy");
        let links = [policy_link(vm.project(), &region_of(vm.zone())?, policy)];
        let handle = cancellable(ctx, self.api.add_resource_policies(vm.reference(), &links))
            .await
            .map_err(|e| GceError::provider("failed to add resource policy", e))?;
        self.wait_for(ctx, &handle, "failed to wait for add resource policy operation")
            .await
    }

    async fn unset_schedule_policy(
        &self,
        ctx: &CancellationToken,
        vm: &Vm,
        policy: &str,
    ) -> Result<(), GceError> {
        tracing::info!(vm = vm.name(), policy, "detaching schedule policy");
        let links = [policy_link(vm.project(), &region_of(vm.zone())?, policy)];
        let handle = cancellable(
            ctx,
            self.api.remove_resource_policies(vm.reference(), &links),
        )
        .await
        .map_err(|e| GceError::provider("failed to remove resource policy", e))?;
        self.wait_for(
            ctx,
            &handle,
            "failed to wait for remove resource policy operation",
        )
        .await
    }
}

// ── resource URIs ─────────────────────────────────────────

pub fn machine_type_from_uri(uri: &str) -> String {
    MACHINE_TYPE_RE
        .captures(uri)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_MACHINE_TYPE.to_string())
}

pub fn project_from_self_link(uri: &str) -> Result<String, GceError> {
    PROJECT_RE
        .captures(uri)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| GceError::ResourceUri {
            what: "project".into(),
            uri: uri.to_string(),
        })
}

pub fn last_segment(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

/// `us-central1-a` → `us-central1`.
pub fn region_of(zone: &str) -> Result<String, GceError> {
    let zone = last_segment(zone);
    match zone.rsplit_once('-') {
        Some((region, _)) if !region.is_empty() => Ok(region.to_string()),
        _ => Err(GceError::ResourceUri {
            what: "region".into(),
            uri: zone.to_string(),
        }),
    }
}

pub fn policy_link(project: &str, region: &str, policy: &str) -> String {
    format!("projects/{project}/regions/{region}/resourcePolicies/{policy}")
}

pub fn machine_type_url(zone: &str, machine_type: &str) -> String {
    format!("zones/{zone}/machineTypes/{machine_type}")
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn describe_schedule(name: &str, policy: &InstanceSchedulePolicy) -> String {
    let cron = [&policy.vm_stop_schedule, &policy.vm_start_schedule]
        .into_iter()
        .flatten()
        .map(|s| s.schedule.as_str())
        .find(|s| !s.is_empty());
    match cron {
        Some(cron) => format!("{name}({cron})"),
        None => name.to_string(),
    }
}

// ── test double ───────────────────────────────────────────
