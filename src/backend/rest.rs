use std::time::Duration;

use async_trait::async_trait;
use facet::Facet;
use tokio::sync::OnceCell;

use super::{ComputeApi, Instance, Operation, OperationHandle, ResourcePolicy};
use crate::error::GceError;
use crate::vm::VmRef;

pub const DEFAULT_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

pub const ENDPOINT_ENV: &str = "GCECTL_COMPUTE_ENDPOINT";

/// Checked in order before falling back to `gcloud`.
pub const TOKEN_ENVS: [&str; 2] = ["GCECTL_ACCESS_TOKEN", "CLOUDSDK_AUTH_ACCESS_TOKEN"];

// operations/{op}/wait blocks server-side for up to two minutes
const REQUEST_TIMEOUT: Duration = Duration::from_secs(150);

// ── wire bodies ───────────────────────────────────────────

#[derive(Debug, Facet)]
struct MachineTypeRequest {
    #[facet(rename = "machineType")]
    machine_type: String,
}

#[derive(Debug, Facet)]
struct ResourcePoliciesRequest {
    #[facet(rename = "resourcePolicies")]
    resource_policies: Vec<String>,
}

#[derive(Debug, Default, Facet)]
#[facet(default)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Default, Facet)]
#[facet(default)]
struct ErrorBody {
    message: String,
}

// ── client ────────────────────────────────────────────────

/// Compute Engine v1 REST client authenticated with an OAuth bearer token.
pub struct RestBackend {
    client: reqwest::Client,
    endpoint: String,
    token: OnceCell<String>,
}

impl RestBackend {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, GceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| GceError::Http {
                context: "failed to build HTTP client".into(),
                source,
            })?;
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            endpoint,
            token: OnceCell::new(),
        })
    }

    /// Endpoint from `GCECTL_COMPUTE_ENDPOINT`, else the public API.
    pub fn from_env() -> Result<Self, GceError> {
        let endpoint = std::env::var(ENDPOINT_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self::new(endpoint)
    }

    fn instance_url(&self, vm: &VmRef) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances/{}",
            self.endpoint, vm.project, vm.zone, vm.name
        )
    }

    async fn access_token(&self) -> Result<&str, GceError> {
        let token = self
            .token
            .get_or_try_init(|| async {
                match token_from_env(|key| std::env::var(key).ok()) {
                    Some(token) => Ok(token),
                    None => token_from_gcloud().await,
                }
            })
            .await?;
        Ok(token.as_str())
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<String, GceError> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| GceError::Http {
                context: format!("{context}: request failed"),
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| GceError::Http {
            context: format!("{context}: failed to read response"),
            source,
        })?;

        if !status.is_success() {
            return Err(GceError::Api {
                status: status.as_u16(),
                message: api_error_message(&body, status.canonical_reason()),
            });
        }
        Ok(body)
    }

    async fn get(&self, url: &str, context: &str) -> Result<String, GceError> {
        tracing::debug!(url, "GET");
        self.send(self.client.get(url), context).await
    }

    async fn post(&self, url: &str, body: String, context: &str) -> Result<String, GceError> {
        tracing::debug!(url, "POST");
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        self.send(request, context).await
    }

    /// POST an instance action and decode the returned zone operation.
    async fn instance_action(
        &self,
        vm: &VmRef,
        action: &str,
        body: String,
    ) -> Result<OperationHandle, GceError> {
        let url = format!("{}/{action}", self.instance_url(vm));
        let text = self.post(&url, body, action).await?;
        let operation: Operation =
            facet_json::from_str(&text).map_err(|e| decode_error("operation", e))?;
        Ok(OperationHandle::for_vm(vm, &operation))
    }
}

#[async_trait]
impl ComputeApi for RestBackend {
    async fn get_instance(&self, vm: &VmRef) -> Result<Instance, GceError> {
        let text = self.get(&self.instance_url(vm), "get instance").await?;
        facet_json::from_str::<Instance>(&text).map_err(|e| decode_error("instance", e))
    }

    async fn start_instance(&self, vm: &VmRef) -> Result<OperationHandle, GceError> {
        self.instance_action(vm, "start", String::new()).await
    }

    async fn stop_instance(&self, vm: &VmRef) -> Result<OperationHandle, GceError> {
        self.instance_action(vm, "stop", String::new()).await
    }

    async fn set_machine_type(
        &self,
        vm: &VmRef,
        machine_type_url: &str,
    ) -> Result<OperationHandle, GceError> {
        let body = encode(&MachineTypeRequest {
            machine_type: machine_type_url.to_string(),
        })?;
        self.instance_action(vm, "setMachineType", body).await
    }

    async fn add_resource_policies(
        &self,
        vm: &VmRef,
        policies: &[String],
    ) -> Result<OperationHandle, GceError> {
        let body = encode(&ResourcePoliciesRequest {
            resource_policies: policies.to_vec(),
        })?;
        self.instance_action(vm, "addResourcePolicies", body).await
    }

    async fn remove_resource_policies(
        &self,
        vm: &VmRef,
        policies: &[String],
    ) -> Result<OperationHandle, GceError> {
        let body = encode(&ResourcePoliciesRequest {
            resource_policies: policies.to_vec(),
        })?;
        self.instance_action(vm, "removeResourcePolicies", body).await
    }

    async fn get_resource_policy(
        &self,
        project: &str,
        region: &str,
        name: &str,
    ) -> Result<ResourcePolicy, GceError> {
        let url = format!(
            "{}/projects/{project}/regions/{region}/resourcePolicies/{name}",
            self.endpoint
        );
        let text = self.get(&url, "get resource policy").await?;
        facet_json::from_str::<ResourcePolicy>(&text)
            .map_err(|e| decode_error("resource policy", e))
    }

    async fn wait_operation(&self, handle: &OperationHandle) -> Result<Operation, GceError> {
        let url = format!(
            "{}/projects/{}/zones/{}/operations/{}/wait",
            self.endpoint, handle.project, handle.zone, handle.name
        );
        let text = self.post(&url, String::new(), "wait operation").await?;
        facet_json::from_str::<Operation>(&text).map_err(|e| decode_error("operation", e))
    }
}

// ── helpers ───────────────────────────────────────────────

fn encode<'f, T: Facet<'f>>(body: &T) -> Result<String, GceError> {
    facet_json::to_string(body).map_err(|e| GceError::Decode {
        what: "request body".into(),
        message: e.to_string(),
    })
}

fn decode_error(what: &str, err: impl std::fmt::Display) -> GceError {
    GceError::Decode {
        what: what.to_string(),
        message: err.to_string(),
    }
}

/// Message from a Google API error envelope, falling back to the raw body.
fn api_error_message(body: &str, reason: Option<&str>) -> String {
    if let Ok(envelope) = facet_json::from_str::<ErrorEnvelope>(body)
        && let Some(error) = envelope.error
        && !error.message.is_empty()
    {
        return error.message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        reason.unwrap_or("unknown error").to_string()
    } else {
        trimmed.to_string()
    }
}

fn token_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    TOKEN_ENVS
        .iter()
        .filter_map(|key| lookup(key))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

async fn token_from_gcloud() -> Result<String, GceError> {
    tracing::debug!("requesting access token from gcloud");
    let output = tokio::process::Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .map_err(|e| GceError::Auth {
            message: format!("failed to run gcloud: {e}"),
        })?;

    if !output.status.success() {
        return Err(GceError::Auth {
            message: format!(
                "gcloud exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(GceError::Auth {
            message: "gcloud printed an empty token".into(),
        });
    }
    Ok(token)
}
