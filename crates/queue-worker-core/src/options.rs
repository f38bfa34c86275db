//! Runtime execution options and the sparse overrides a worker config may carry.
//!
//! The runtime owns a fully-determined [`RuntimeOptions`] value. Configuration only
//! ever supplies a [`WorkerOverrides`], and [`RuntimeOptions::overlay`] merges the two.
//! A field that is unset, zero or `false` in the overrides never touches the default.

use crate::error::AssemblyError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Optional knobs from configuration. `None` means "keep the runtime default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_context: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_workflow_task_executions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_activity_task_polls: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_workflow_task_polls: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cached_workflows: Option<usize>,
}

fn truthy(value: Option<usize>) -> Option<usize> {
    value.filter(|v| *v > 0)
}

impl WorkerOverrides {
    /// Drop falsy values so that `Some(0)` and `Some(false)` read as unset.
    pub fn normalized(self) -> Self {
        WorkerOverrides {
            reuse_context: self.reuse_context.filter(|v| *v),
            max_concurrent_workflow_task_executions: truthy(
                self.max_concurrent_workflow_task_executions,
            ),
            max_concurrent_activity_task_polls: truthy(self.max_concurrent_activity_task_polls),
            max_concurrent_workflow_task_polls: truthy(self.max_concurrent_workflow_task_polls),
            max_cached_workflows: truthy(self.max_cached_workflows),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.normalized() == WorkerOverrides::default()
    }
}

/// Fully-determined options the runtime executes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeOptions {
    pub reuse_context: bool,
    pub max_concurrent_workflow_task_executions: usize,
    pub max_concurrent_activity_task_executions: usize,
    pub max_concurrent_activity_task_polls: usize,
    pub max_concurrent_workflow_task_polls: usize,
    /// 0 disables the workflow cache
    pub max_cached_workflows: usize,
    pub default_activity_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub shutdown_grace_time: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl RuntimeOptions {
    pub const DEFAULT: Self = Self {
        reuse_context: false,
        max_concurrent_workflow_task_executions: 40,
        max_concurrent_activity_task_executions: 100,
        max_concurrent_activity_task_polls: 5,
        max_concurrent_workflow_task_polls: 5,
        max_cached_workflows: 1000,
        default_activity_timeout: Duration::from_secs(300),
        heartbeat_interval: Duration::from_secs(15),
        shutdown_grace_time: Duration::from_secs(60),
    };

    /// Merge sparse overrides on top of `self`. Pure: `self` is not modified.
    pub fn overlay(self, overrides: &WorkerOverrides) -> Self {
        let o = overrides.normalized();
        RuntimeOptions {
            reuse_context: o.reuse_context.unwrap_or(self.reuse_context),
            max_concurrent_workflow_task_executions: o
                .max_concurrent_workflow_task_executions
                .unwrap_or(self.max_concurrent_workflow_task_executions),
            max_concurrent_activity_task_polls: o
                .max_concurrent_activity_task_polls
                .unwrap_or(self.max_concurrent_activity_task_polls),
            max_concurrent_workflow_task_polls: o
                .max_concurrent_workflow_task_polls
                .unwrap_or(self.max_concurrent_workflow_task_polls),
            max_cached_workflows: o.max_cached_workflows.unwrap_or(self.max_cached_workflows),
            ..self
        }
    }

    /// Reject combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<(), AssemblyError> {
        let positive = [
            (
                "max_concurrent_workflow_task_executions",
                self.max_concurrent_workflow_task_executions,
            ),
            (
                "max_concurrent_activity_task_executions",
                self.max_concurrent_activity_task_executions,
            ),
            ("max_concurrent_activity_task_polls", self.max_concurrent_activity_task_polls),
            ("max_concurrent_workflow_task_polls", self.max_concurrent_workflow_task_polls),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AssemblyError::InvalidBound {
                    name,
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        if self.max_concurrent_workflow_task_polls > self.max_concurrent_workflow_task_executions {
            return Err(AssemblyError::InvalidBound {
                name: "max_concurrent_workflow_task_polls",
                reason: format!(
                    "{} exceeds max_concurrent_workflow_task_executions ({})",
                    self.max_concurrent_workflow_task_polls,
                    self.max_concurrent_workflow_task_executions
                ),
            });
        }

        if self.max_concurrent_activity_task_polls > self.max_concurrent_activity_task_executions {
            return Err(AssemblyError::InvalidBound {
                name: "max_concurrent_activity_task_polls",
                reason: format!(
                    "{} exceeds max_concurrent_activity_task_executions ({})",
                    self.max_concurrent_activity_task_polls,
                    self.max_concurrent_activity_task_executions
                ),
            });
        }

        Ok(())
    }
}
