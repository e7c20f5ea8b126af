use std::time::Duration;

use chrono::{DateTime, Utc};
use http::StatusCode;
use zeroize::Zeroizing;

use crate::config::DeviceServiceConfig;
use crate::error::{AppError, Result};
use crate::models::device::{Device, DeviceStatus};

/// Timeout for device-management API round trips.
const DEVICE_TIMEOUT_SECS: u64 = 15;
/// Shorter timeout for the availability probe.
const HEALTH_TIMEOUT_SECS: u64 = 5;
/// A device must have reported within this window to count as healthy.
const RECENCY_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Client for the external device-management inventory API.
pub struct DeviceClient {
    http: reqwest::Client,
    inventory_url: String,
    api_token: Zeroizing<String>,
}

impl DeviceClient {
    /// Creates a new client for the configured device service.
    pub fn new(config: &DeviceServiceConfig, allow_insecure_tls: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEVICE_TIMEOUT_SECS))
            .danger_accept_invalid_certs(allow_insecure_tls)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            inventory_url: format!("{}/api/management/v1/inventory", config.server_url),
            api_token: config.api_token.clone(),
        })
    }

    /// Lists every device in the inventory.
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let response = self
            .http
            .get(format!("{}/devices", self.inventory_url))
            .bearer_auth(self.api_token.as_str())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::PAYMENT_REQUIRED {
            // The management API answers 402 when the inventory feature
            // is switched off for the tenant.
            return Err(AppError::DeviceServiceDisabled);
        }
        if !status.is_success() {
            return Err(AppError::DeviceService(format!(
                "inventory list returned {}",
                status
            )));
        }

        Ok(response.json::<Vec<Device>>().await?)
    }

    /// Fetches a single device. Unknown ids are `None`, not an error.
    pub async fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        let response = self
            .http
            .get(format!("{}/devices/{}", self.inventory_url, device_id))
            .bearer_auth(self.api_token.as_str())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::PAYMENT_REQUIRED {
            return Err(AppError::DeviceServiceDisabled);
        }
        if !status.is_success() {
            return Err(AppError::DeviceService(format!(
                "inventory fetch for {} returned {}",
                device_id, status
            )));
        }

        Ok(Some(response.json::<Device>().await?))
    }

    /// Computes the current health verdict for one device.
    ///
    /// Fetch failures fold into an unhealthy verdict with a diagnostic
    /// reason; absence of data is never treated as healthy.
    pub async fn check_device_status(&self, device_id: &str) -> DeviceStatus {
        match self.get_device(device_id).await {
            Ok(Some(device)) => evaluate_device(&device, Utc::now()),
            Ok(None) => DeviceStatus {
                device_id: device_id.to_string(),
                status: "not_found".to_string(),
                healthy: false,
                last_seen: None,
                time_since_update_ms: None,
                reason: Some("device not found in inventory".to_string()),
            },
            Err(e) => {
                tracing::error!("❌ Status check failed for device {}: {}", device_id, e);
                DeviceStatus {
                    device_id: device_id.to_string(),
                    status: "error".to_string(),
                    healthy: false,
                    last_seen: None,
                    time_since_update_ms: None,
                    reason: Some(format!("failed to fetch device: {}", e)),
                }
            }
        }
    }

    /// Probes whether the device service is reachable.
    ///
    /// Authentication failures mean unavailable; any other error is
    /// assumed to be a routing or configuration wrinkle on an otherwise
    /// reachable server.
    pub async fn server_health(&self) -> bool {
        let response = self
            .http
            .get(format!("{}/devices", self.inventory_url))
            .bearer_auth(self.api_token.as_str())
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    tracing::error!("Device service authentication failed: {}", status);
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                tracing::warn!("Device service health probe failed: {}", e);
                false
            }
        }
    }
}

/// Applies the per-device health predicate at `now`.
///
/// A device is healthy iff its resolved status is `accepted` and its
/// resolved update timestamp falls within the 24-hour recency window.
pub fn evaluate_device(device: &Device, now: DateTime<Utc>) -> DeviceStatus {
    let status = device.resolved_status().unwrap_or("unknown").to_string();

    let updated_raw = device.resolved_updated_ts();
    let updated = updated_raw.and_then(|ts| DateTime::parse_from_rfc3339(ts).ok());

    let Some(updated) = updated else {
        return DeviceStatus {
            device_id: device.id.clone(),
            status,
            healthy: false,
            last_seen: updated_raw.map(str::to_string),
            time_since_update_ms: None,
            reason: Some("no timestamp available".to_string()),
        };
    };

    let elapsed_ms = (now - updated.with_timezone(&Utc)).num_milliseconds();
    let accepted = status == "accepted";
    let recent = elapsed_ms < RECENCY_WINDOW_MS;
    let healthy = accepted && recent;

    let reason = if healthy {
        None
    } else {
        let mut reasons = Vec::new();
        if !accepted {
            reasons.push(format!(r#"status: {} (must be "accepted")"#, status));
        }
        if !recent {
            reasons.push(format!(
                "last update {} ago (must be within 24 hours)",
                format_time_ago(elapsed_ms)
            ));
        }
        Some(reasons.join("; "))
    };

    DeviceStatus {
        device_id: device.id.clone(),
        status,
        healthy,
        last_seen: updated_raw.map(str::to_string),
        time_since_update_ms: Some(elapsed_ms),
        reason,
    }
}

/// Renders an elapsed duration for diagnostic messages.
fn format_time_ago(ms: i64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    let (count, unit) = if days > 0 {
        (days, "day")
    } else if hours > 0 {
        (hours, "hour")
    } else if minutes > 0 {
        (minutes, "minute")
    } else {
        (seconds, "second")
    };

    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn device_json(status: &str, updated: Option<DateTime<Utc>>) -> Device {
        let updated_field = updated
            .map(|ts| format!(r#","updated_ts":"{}""#, ts.to_rfc3339()))
            .unwrap_or_default();
        let json = format!(r#"{{"id":"dev-1","status":"{}"{}}}"#, status, updated_field);
        sonic_rs::from_str(&json).unwrap()
    }

    #[test]
    fn accepted_and_recent_is_healthy() {
        let now = Utc::now();
        let updated = now - ChronoDuration::hours(23) - ChronoDuration::minutes(59);
        let verdict = evaluate_device(&device_json("accepted", Some(updated)), now);
        assert!(verdict.healthy);
        assert!(verdict.reason.is_none());
        assert_eq!(verdict.status, "accepted");
    }

    #[test]
    fn accepted_but_stale_is_unhealthy() {
        let now = Utc::now();
        let updated = now - ChronoDuration::hours(24) - ChronoDuration::minutes(1);
        let verdict = evaluate_device(&device_json("accepted", Some(updated)), now);
        assert!(!verdict.healthy);
        let reason = verdict.reason.unwrap();
        assert!(reason.contains("last update"), "reason was: {}", reason);
        assert!(reason.contains("24 hours"), "reason was: {}", reason);
    }

    #[test]
    fn pending_is_unhealthy_regardless_of_recency() {
        let now = Utc::now();
        let verdict = evaluate_device(
            &device_json("pending", Some(now - ChronoDuration::minutes(5))),
            now,
        );
        assert!(!verdict.healthy);
        assert!(verdict.reason.unwrap().contains("pending"));
    }

    #[test]
    fn missing_timestamp_is_unhealthy() {
        let now = Utc::now();
        let verdict = evaluate_device(&device_json("accepted", None), now);
        assert!(!verdict.healthy);
        assert_eq!(verdict.reason.as_deref(), Some("no timestamp available"));
        assert!(verdict.time_since_update_ms.is_none());
    }

    #[test]
    fn unparseable_timestamp_counts_as_missing() {
        let device: Device = sonic_rs::from_str(
            r#"{"id":"dev-1","status":"accepted","updated_ts":"yesterday-ish"}"#,
        )
        .unwrap();
        let verdict = evaluate_device(&device, Utc::now());
        assert!(!verdict.healthy);
        assert_eq!(verdict.reason.as_deref(), Some("no timestamp available"));
    }

    #[test]
    fn status_and_timestamp_fall_back_to_attributes() {
        let now = Utc::now();
        let updated = (now - ChronoDuration::hours(1)).to_rfc3339();
        let json = format!(
            r#"{{"id":"dev-2","attributes":[
                {{"name":"status","value":"accepted","scope":"identity"}},
                {{"name":"updated_ts","value":"{}","scope":"system"}},
                {{"name":"mem_total_kb","value":1024000}}
            ]}}"#,
            updated
        );
        let device: Device = sonic_rs::from_str(&json).unwrap();
        let verdict = evaluate_device(&device, now);
        assert!(verdict.healthy);
        assert_eq!(verdict.status, "accepted");
        assert_eq!(verdict.last_seen.as_deref(), Some(updated.as_str()));
    }

    #[test]
    fn top_level_status_wins_over_attributes() {
        let now = Utc::now();
        let updated = (now - ChronoDuration::hours(1)).to_rfc3339();
        let json = format!(
            r#"{{"id":"dev-3","status":"rejected","updated_ts":"{}",
                "attributes":[{{"name":"status","value":"accepted"}}]}}"#,
            updated
        );
        let device: Device = sonic_rs::from_str(&json).unwrap();
        let verdict = evaluate_device(&device, now);
        assert!(!verdict.healthy);
        assert_eq!(verdict.status, "rejected");
    }

    #[test]
    fn time_ago_rendering() {
        assert_eq!(format_time_ago(30 * 1000), "30 seconds");
        assert_eq!(format_time_ago(60 * 1000), "1 minute");
        assert_eq!(format_time_ago(2 * 60 * 60 * 1000), "2 hours");
        assert_eq!(format_time_ago(3 * 24 * 60 * 60 * 1000), "3 days");
    }
}
