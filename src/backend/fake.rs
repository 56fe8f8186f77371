//! In-memory [`ComputeApi`] for adapter and polling tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{
    ComputeApi, Instance, Operation, OperationErrorItem, OperationErrors, OperationHandle,
    ResourcePolicy,
};
use crate::error::GceError;
use crate::vm::VmRef;

pub struct FakeCompute {
    instances: Mutex<HashMap<String, Instance>>,
    policies: Mutex<HashMap<String, ResourcePolicy>>,
    pending_rounds: AtomicUsize,
    operation_error: Option<(String, String)>,
    fail_waits: bool,
    /// `"{call} {vm}"` for every mutating call, in order.
    pub calls: Mutex<Vec<String>>,
    /// Bodies passed to mutating calls (machine-type URL or policy links).
    pub payloads: Mutex<Vec<String>>,
    pub wait_calls: AtomicUsize,
    pub policy_calls: AtomicUsize,
}

impl FakeCompute {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            policies: Mutex::new(HashMap::new()),
            pending_rounds: AtomicUsize::new(0),
            operation_error: None,
            fail_waits: false,
            calls: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
            wait_calls: AtomicUsize::new(0),
            policy_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_instance(self, instance: Instance) -> Self {
        self.instances
            .lock()
            .unwrap()
            .insert(instance.name.clone(), instance);
        self
    }

    /// Register a policy under its short name.
    pub fn with_policy(self, policy: ResourcePolicy) -> Self {
        self.policies
            .lock()
            .unwrap()
            .insert(policy.name.clone(), policy);
        self
    }

    /// Number of wait rounds that report RUNNING before DONE.
    pub fn with_pending_rounds(self, rounds: usize) -> Self {
        self.pending_rounds.store(rounds, Ordering::SeqCst);
        self
    }

    pub fn with_operation_error(mut self, code: &str, message: &str) -> Self {
        self.operation_error = Some((code.to_string(), message.to_string()));
        self
    }

    pub fn fail_waits(mut self) -> Self {
        self.fail_waits = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }

    fn record(&self, call: &str, vm: &VmRef, payload: Option<String>) -> OperationHandle {
        self.calls.lock().unwrap().push(format!("{call} {}", vm.name));
        if let Some(payload) = payload {
            self.payloads.lock().unwrap().push(payload);
        }
        OperationHandle {
            project: vm.project.clone(),
            zone: vm.zone.clone(),
            name: format!("operation-{call}-{}", vm.name),
        }
    }

    fn not_found(what: &str) -> GceError {
        GceError::Api {
            status: 404,
            message: format!("The resource '{what}' was not found"),
        }
    }
}

/// Instance JSON-equivalent as the API would report it for `vm`.
pub fn instance(vm: &VmRef, status: &str, machine_type: &str) -> Instance {
    let base = "https://www.googleapis.com/compute/v1";
    Instance {
        name: vm.name.clone(),
        status: status.to_string(),
        machine_type: format!(
            "{base}/projects/{}/zones/{}/machineTypes/{machine_type}",
            vm.project, vm.zone
        ),
        self_link: format!(
            "{base}/projects/{}/zones/{}/instances/{}",
            vm.project, vm.zone, vm.name
        ),
        zone: format!("{base}/projects/{}/zones/{}", vm.project, vm.zone),
        ..Instance::default()
    }
}

#[async_trait]
impl ComputeApi for FakeCompute {
    async fn get_instance(&self, vm: &VmRef) -> Result<Instance, GceError> {
        self.instances
            .lock()
            .unwrap()
            .get(&vm.name)
            .cloned()
            .ok_or_else(|| Self::not_found(&vm.name))
    }

    async fn start_instance(&self, vm: &VmRef) -> Result<OperationHandle, GceError> {
        Ok(self.record("start", vm, None))
    }

    async fn stop_instance(&self, vm: &VmRef) -> Result<OperationHandle, GceError> {
        Ok(self.record("stop", vm, None))
    }

    async fn set_machine_type(
        &self,
        vm: &VmRef,
        machine_type_url: &str,
    ) -> Result<OperationHandle, GceError> {
        Ok(self.record("setMachineType", vm, Some(machine_type_url.to_string())))
    }

    async fn add_resource_policies(
        &self,
        vm: &VmRef,
        policies: &[String],
    ) -> Result<OperationHandle, GceError> {
        Ok(self.record("addResourcePolicies", vm, Some(policies.join(","))))
    }

    async fn remove_resource_policies(
        &self,
        vm: &VmRef,
        policies: &[String],
    ) -> Result<OperationHandle, GceError> {
        Ok(self.record("removeResourcePolicies", vm, Some(policies.join(","))))
    }

    async fn get_resource_policy(
        &self,
        _project: &str,
        _region: &str,
        name: &str,
    ) -> Result<ResourcePolicy, GceError> {
        self.policy_calls.fetch_add(1, Ordering::SeqCst);
        self.policies
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Self::not_found(name))
    }

    async fn wait_operation(&self, handle: &OperationHandle) -> Result<Operation, GceError> {
        self.wait_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_waits {
            return Err(GceError::Api {
                status: 500,
                message: "backend error".into(),
            });
        }

        let pending = self
            .pending_rounds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let status = if pending { "RUNNING" } else { "DONE" };

        let error = match (&self.operation_error, pending) {
            (Some((code, message)), false) => Some(OperationErrors {
                errors: vec![OperationErrorItem {
                    code: code.clone(),
                    message: message.clone(),
                }],
            }),
            _ => None,
        };

        Ok(Operation {
            name: handle.name.clone(),
            status: status.to_string(),
            error,
            ..Operation::default()
        })
    }
}
