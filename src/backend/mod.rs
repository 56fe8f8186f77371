//! Compute Engine API surface consumed by the repository adapter.
//!
//! [`ComputeApi`] is the black-box provider client: one method per REST call
//! the tool needs. The wire structs mirror the JSON resources the API returns,
//! keeping only the fields this crate reads.

pub mod rest;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use facet::Facet;

use crate::error::GceError;
use crate::vm::VmRef;

/// Zone operation status that marks completion.
pub const OPERATION_DONE: &str = "DONE";

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Instance {
    pub name: String,
    pub status: String,
    #[facet(rename = "machineType")]
    pub machine_type: String,
    #[facet(rename = "selfLink")]
    pub self_link: String,
    pub zone: String,
    #[facet(rename = "lastStartTimestamp")]
    pub last_start_timestamp: String,
    #[facet(rename = "resourcePolicies")]
    pub resource_policies: Vec<String>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Operation {
    pub name: String,
    pub status: String,
    pub error: Option<OperationErrors>,
    #[facet(rename = "httpErrorMessage")]
    pub http_error_message: String,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct OperationErrors {
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct OperationErrorItem {
    pub code: String,
    pub message: String,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OPERATION_DONE
    }

    /// Provider-reported failure of a finished operation, if any.
    pub fn failure(&self) -> Option<String> {
        let errors = self.error.as_ref().map(|e| e.errors.as_slice()).unwrap_or(&[]);
        if errors.is_empty() {
            return (!self.http_error_message.is_empty())
                .then(|| self.http_error_message.clone());
        }
        let messages: Vec<String> = errors
            .iter()
            .map(|e| {
                if e.code.is_empty() {
                    e.message.clone()
                } else {
                    format!("{}: {}", e.code, e.message)
                }
            })
            .collect();
        Some(messages.join("; "))
    }
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct ResourcePolicy {
    pub name: String,
    #[facet(rename = "instanceSchedulePolicy")]
    pub instance_schedule_policy: Option<InstanceSchedulePolicy>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct InstanceSchedulePolicy {
    #[facet(rename = "vmStartSchedule")]
    pub vm_start_schedule: Option<Schedule>,
    #[facet(rename = "vmStopSchedule")]
    pub vm_stop_schedule: Option<Schedule>,
    #[facet(rename = "timeZone")]
    pub time_zone: String,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Schedule {
    pub schedule: String,
}

/// Handle to an in-flight zone operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl OperationHandle {
    pub fn for_vm(vm: &VmRef, operation: &Operation) -> Self {
        Self {
            project: vm.project.clone(),
            zone: vm.zone.clone(),
            name: operation.name.clone(),
        }
    }
}

#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn get_instance(&self, vm: &VmRef) -> Result<Instance, GceError>;

    async fn start_instance(&self, vm: &VmRef) -> Result<OperationHandle, GceError>;

    async fn stop_instance(&self, vm: &VmRef) -> Result<OperationHandle, GceError>;

    /// `machine_type_url` is the zonal form `zones/{zone}/machineTypes/{type}`.
    async fn set_machine_type(
        &self,
        vm: &VmRef,
        machine_type_url: &str,
    ) -> Result<OperationHandle, GceError>;

    async fn add_resource_policies(
        &self,
        vm: &VmRef,
        policies: &[String],
    ) -> Result<OperationHandle, GceError>;

    async fn remove_resource_policies(
        &self,
        vm: &VmRef,
        policies: &[String],
    ) -> Result<OperationHandle, GceError>;

    async fn get_resource_policy(
        &self,
        project: &str,
        region: &str,
        name: &str,
    ) -> Result<ResourcePolicy, GceError>;

    /// One long-poll round; returns the operation as the provider sees it
    /// now, which may not be done yet.
    async fn wait_operation(&self, handle: &OperationHandle) -> Result<Operation, GceError>;
}

pub fn create_backend() -> Result<rest::RestBackend, GceError> {
    rest::RestBackend::from_env()
}
