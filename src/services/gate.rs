use futures::future::join_all;
use serde::Serialize;

use crate::error::AppError;
use crate::models::device::DeviceStatus;
use crate::services::devices::DeviceClient;

/// The aggregate allow/deny decision for one gate evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecision {
    /// Whether access is allowed.
    pub allow: bool,
    /// The unhealthy devices, with their individual reasons.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unhealthy: Vec<DeviceStatus>,
    /// Why access is blocked, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            allow: true,
            unhealthy: Vec::new(),
            reason: None,
        }
    }

    fn block(unhealthy: Vec<DeviceStatus>, reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            unhealthy,
            reason: Some(reason.into()),
        }
    }
}

/// What one inventory fetch produced, before the policy is applied.
pub(crate) enum FetchOutcome {
    /// The service reports the inventory feature administratively off.
    Disabled,
    /// The service is configured but could not be queried.
    Unavailable(String),
    /// Per-device verdicts for the whole fleet.
    Statuses(Vec<DeviceStatus>),
}

/// Evaluates the device-health gate.
///
/// Fresh on every call: one list call, then one status call per device,
/// all awaited so the full diagnostic set is available — no caching and
/// no short-circuit on the first unhealthy device.
pub async fn evaluate(client: Option<&DeviceClient>) -> GateDecision {
    let Some(client) = client else {
        // The gate is an optional feature; absent configuration means
        // there is nothing to gate on.
        return GateDecision::allow();
    };

    let outcome = match client.list_devices().await {
        Err(AppError::DeviceServiceDisabled) => FetchOutcome::Disabled,
        Err(e) => FetchOutcome::Unavailable(e.to_string()),
        Ok(devices) => {
            let checks = devices.iter().map(|d| client.check_device_status(&d.id));
            FetchOutcome::Statuses(join_all(checks).await)
        }
    };

    decide(outcome)
}

/// The gate policy table, in one place.
///
/// Feature disabled ⇒ allow; service erroring ⇒ block (fail closed);
/// empty fleet ⇒ allow; any unhealthy device ⇒ block with the full
/// unhealthy list attached.
pub(crate) fn decide(outcome: FetchOutcome) -> GateDecision {
    match outcome {
        FetchOutcome::Disabled => {
            tracing::info!("Device gate: inventory feature disabled, allowing");
            GateDecision::allow()
        }
        FetchOutcome::Unavailable(reason) => {
            tracing::error!("❌ Device gate: service unavailable, blocking: {}", reason);
            GateDecision::block(
                Vec::new(),
                format!("device service unavailable: {}", reason),
            )
        }
        FetchOutcome::Statuses(statuses) => {
            let total = statuses.len();
            let unhealthy: Vec<DeviceStatus> =
                statuses.into_iter().filter(|s| !s.healthy).collect();
            if unhealthy.is_empty() {
                tracing::debug!("✅ Device gate: {} device(s) healthy", total);
                GateDecision::allow()
            } else {
                tracing::warn!(
                    "❌ Device gate: {}/{} device(s) unhealthy",
                    unhealthy.len(),
                    total
                );
                GateDecision::block(unhealthy, "unhealthy devices present")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(id: &str, healthy: bool) -> DeviceStatus {
        DeviceStatus {
            device_id: id.to_string(),
            status: if healthy { "accepted" } else { "pending" }.to_string(),
            healthy,
            last_seen: None,
            time_since_update_ms: None,
            reason: (!healthy).then(|| "status: pending (must be \"accepted\")".to_string()),
        }
    }

    #[tokio::test]
    async fn unconfigured_service_allows() {
        assert!(evaluate(None).await.allow);
    }

    #[test]
    fn disabled_feature_allows() {
        assert!(decide(FetchOutcome::Disabled).allow);
    }

    #[test]
    fn unreachable_service_blocks() {
        let decision = decide(FetchOutcome::Unavailable("connect timeout".to_string()));
        assert!(!decision.allow);
        assert!(decision.reason.unwrap().contains("unavailable"));
        assert!(decision.unhealthy.is_empty());
    }

    #[test]
    fn empty_fleet_allows() {
        assert!(decide(FetchOutcome::Statuses(Vec::new())).allow);
    }

    #[test]
    fn all_healthy_allows() {
        let statuses = (0..5).map(|i| status(&format!("dev-{}", i), true)).collect();
        assert!(decide(FetchOutcome::Statuses(statuses)).allow);
    }

    #[test]
    fn one_unhealthy_among_ten_blocks_and_lists_exactly_it() {
        let mut statuses: Vec<DeviceStatus> =
            (0..9).map(|i| status(&format!("dev-{}", i), true)).collect();
        statuses.insert(4, status("dev-bad", false));

        let decision = decide(FetchOutcome::Statuses(statuses));
        assert!(!decision.allow);
        assert_eq!(decision.unhealthy.len(), 1);
        assert_eq!(decision.unhealthy[0].device_id, "dev-bad");
        assert!(decision.unhealthy[0].reason.is_some());
    }
}
