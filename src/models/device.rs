use serde::{Deserialize, Serialize};

/// A single inventory attribute as reported by the device-management API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAttribute {
    /// The attribute name.
    pub name: String,
    /// The attribute value.
    pub value: AttributeValue,
    /// The attribute scope, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// An attribute value from the inventory API.
///
/// The API reports values as strings, numbers, or lists depending on the
/// attribute; the variants here cover all observed shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    Text(String),
    /// A numeric value.
    Number(f64),
    /// A list of values.
    Many(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Returns the value as a string slice when it is textual.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A device record from the inventory API.
///
/// The API is loosely typed: `status` and the timestamps may appear as
/// top-level fields or only inside `attributes`. Resolution order is
/// top-level first, attributes second; see the accessors below.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    /// The device identifier.
    pub id: String,
    /// Admission status, when reported at the top level.
    #[serde(default)]
    pub status: Option<String>,
    /// Creation timestamp, when reported at the top level.
    #[serde(default)]
    pub created_ts: Option<String>,
    /// Last-update timestamp, when reported at the top level.
    #[serde(default)]
    pub updated_ts: Option<String>,
    /// Inventory attributes.
    #[serde(default)]
    pub attributes: Option<Vec<DeviceAttribute>>,
}

impl Device {
    /// Looks up a textual attribute by name.
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .as_deref()?
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.value.as_str())
    }

    /// Resolves the admission status: top-level field first, attributes
    /// fallback second.
    pub fn resolved_status(&self) -> Option<&str> {
        self.status.as_deref().or_else(|| self.attribute("status"))
    }

    /// Resolves the last-update timestamp with the same order.
    pub fn resolved_updated_ts(&self) -> Option<&str> {
        self.updated_ts
            .as_deref()
            .or_else(|| self.attribute("updated_ts"))
    }

    /// Resolves the creation timestamp with the same order.
    pub fn resolved_created_ts(&self) -> Option<&str> {
        self.created_ts
            .as_deref()
            .or_else(|| self.attribute("created_ts"))
    }
}

/// A per-device health verdict.
///
/// Derived, never stored: recomputed from the inventory on every gate
/// evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// The device identifier.
    pub device_id: String,
    /// The resolved admission status.
    pub status: String,
    /// Whether the device counts as healthy.
    pub healthy: bool,
    /// The resolved last-update timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    /// Milliseconds elapsed since the last update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_since_update_ms: Option<i64>,
    /// Why the device is unhealthy, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
