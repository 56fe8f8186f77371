//! Shared vocabulary for Compute Engine instances.
//!
//! A [`Vm`] is a snapshot built by a repository fetch. Its identity
//! ([`VmRef`]) is fixed at construction; everything else reflects what the
//! provider reported at fetch time.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

/// Schedule policy value used when no instance schedule is attached.
pub const NO_SCHEDULE_POLICY: &str = "#NONE";

/// `{name, project, zone}` composite key of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VmRef {
    pub name: String,
    pub project: String,
    pub zone: String,
}

impl VmRef {
    pub fn new(
        name: impl Into<String>,
        project: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            project: project.into(),
            zone: zone.into(),
        }
    }
}

impl fmt::Display for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.name, self.project, self.zone)
    }
}

/// Operational state of an instance as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Anything the provider reports outside the modelled set
    /// (STOPPING, STAGING, SUSPENDED, ...).
    #[default]
    Unknown,
    Running,
    Stopped,
    Terminated,
    Provisioning,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Unknown,
        Status::Running,
        Status::Stopped,
        Status::Terminated,
        Status::Provisioning,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Unknown => "UNKNOWN",
            Status::Running => "RUNNING",
            Status::Stopped => "STOPPED",
            Status::Terminated => "TERMINATED",
            Status::Provisioning => "PROVISIONING",
        }
    }

    /// Map a provider status string. Never fails: unrecognized values
    /// degrade to [`Status::Unknown`].
    pub fn from_provider(s: &str) -> Self {
        match s {
            "RUNNING" => Status::Running,
            "STOPPED" => Status::Stopped,
            "TERMINATED" => Status::Terminated,
            "PROVISIONING" => Status::Provisioning,
            _ => Status::Unknown,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UptimeError {
    #[error("VM is not running")]
    NotRunning,
    #[error("VM start time is not available")]
    NoStartTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vm {
    reference: VmRef,
    pub status: Status,
    pub machine_type: String,
    pub schedule_policy: String,
    pub last_start_time: Option<DateTime<Utc>>,
}

impl Vm {
    /// A VM with the given identity and no provider-reported attributes yet.
    pub fn new(reference: VmRef) -> Self {
        Self {
            reference,
            status: Status::Unknown,
            machine_type: String::new(),
            schedule_policy: NO_SCHEDULE_POLICY.to_string(),
            last_start_time: None,
        }
    }

    pub fn reference(&self) -> &VmRef {
        &self.reference
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }

    pub fn project(&self) -> &str {
        &self.reference.project
    }

    pub fn zone(&self) -> &str {
        &self.reference.zone
    }

    /// Only STOPPED and TERMINATED instances may be started.
    pub fn can_start(&self) -> bool {
        matches!(self.status, Status::Stopped | Status::Terminated)
    }

    pub fn can_stop(&self) -> bool {
        self.status == Status::Running
    }

    /// Time since the last start. Negative when `now` precedes the start
    /// time; no clamping is applied.
    pub fn uptime(&self, now: DateTime<Utc>) -> Result<TimeDelta, UptimeError> {
        if self.status != Status::Running {
            return Err(UptimeError::NotRunning);
        }
        let started = self.last_start_time.ok_or(UptimeError::NoStartTime)?;
        Ok(now - started)
    }
}
