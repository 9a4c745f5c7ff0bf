//! Data models shared by every stage of the alert engine.
//!
//! Readings arrive from the external feed as loosely typed JSON maps
//! ([`RawReading`]) and are narrowed into [`Reading`], which only ever holds
//! finite numeric values for known parameters. Everything downstream
//! (evaluation, alerts, notification requests, delivery records) is defined
//! here so the pipeline modules only depend on their parent module.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Water-quality parameters the engine knows how to classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Ph,
    Temperature,
    Turbidity,
    Salinity,
    /// Binary-ish weather indicator: 0 = none, 1 = light, 2 = heavy.
    Raining,
}

impl Parameter {
    /// Numeric parameters evaluated against a threshold range.
    pub const MEASURED: [Parameter; 4] = [
        Parameter::Ph,
        Parameter::Temperature,
        Parameter::Turbidity,
        Parameter::Salinity,
    ];

    /// Map a feed key onto a parameter. Feed keys are case-insensitive and
    /// the firmware reports rain as `isRaining`.
    pub fn from_key(key: &str) -> Option<Self> {
        // ---
        match key.to_ascii_lowercase().as_str() {
            "ph" => Some(Parameter::Ph),
            "temperature" | "temp" => Some(Parameter::Temperature),
            "turbidity" => Some(Parameter::Turbidity),
            "salinity" => Some(Parameter::Salinity),
            "israining" | "raining" | "is_raining" => Some(Parameter::Raining),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::Ph => "ph",
            Parameter::Temperature => "temperature",
            Parameter::Turbidity => "turbidity",
            Parameter::Salinity => "salinity",
            Parameter::Raining => "raining",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Parameter::Ph => "pH",
            Parameter::Temperature => "Temperature",
            Parameter::Turbidity => "Turbidity",
            Parameter::Salinity => "Salinity",
            Parameter::Raining => "Rain",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Parameter::Ph => "",
            Parameter::Temperature => "°C",
            Parameter::Turbidity => " NTU",
            Parameter::Salinity => " ppt",
            Parameter::Raining => "",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw reading as delivered by the sensor feed.
///
/// Values are kept as JSON so that non-numeric garbage from the device can be
/// dropped per-parameter instead of failing the whole sample.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawReading {
    // ---
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// One immutable sensor sample with only finite numeric values retained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    // ---
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<Parameter, f64>,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// Builder used by tests and the HTTP layer.
    pub fn with(mut self, parameter: Parameter, value: f64) -> Self {
        // ---
        if value.is_finite() {
            self.values.insert(parameter, value);
        }
        self
    }

    pub fn get(&self, parameter: Parameter) -> Option<f64> {
        self.values.get(&parameter).copied()
    }
}

impl From<RawReading> for Reading {
    /// Narrow a raw sample. Unknown keys, non-numeric values, and NaN or
    /// infinite numbers are dropped; numeric strings are accepted.
    fn from(raw: RawReading) -> Self {
        // ---
        let mut reading = Reading::new(raw.timestamp);
        for (key, value) in raw.values {
            let Some(parameter) = Parameter::from_key(&key) else {
                continue;
            };
            let number = match &value {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            if let Some(v) = number {
                reading = reading.with(parameter, v);
            }
        }
        reading
    }
}

// ---

/// Result class of a threshold evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Normal,
    Warning,
    Critical,
}

/// Which side of the acceptable range a value fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Low,
    High,
    None,
}

/// Derived classification of one parameter value. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    // ---
    pub parameter: Parameter,
    pub numeric_value: f64,
    pub status: Status,
    pub direction: Direction,
    /// Warning that sits within the near-boundary margin of the breached bound.
    pub approaching: bool,
    /// The bound that was breached, if any.
    pub threshold: Option<f64>,
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Info,
    Warning,
    Error,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Info => "info",
            AlertType::Warning => "warning",
            AlertType::Error => "error",
        }
    }
}

/// Ordinal alert importance, distinct from evaluation [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central alert entity.
///
/// A repeat of the same signature and severity inside the dedup window bumps
/// `occurrence_count` and `timestamp` on the existing entity rather than
/// creating a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    // ---
    pub id: String,
    pub parameter: Parameter,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub value: f64,
    pub threshold: Option<f64>,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub occurrence_count: u32,
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPreference {
    /// Remote push first, local fallback on failure or missing token.
    #[default]
    RemoteFirst,
    /// Present on-device only.
    LocalOnly,
}

/// Ephemeral request handed to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    // ---
    pub id: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub category_id: String,
    pub priority: Priority,
    pub channel_preference: ChannelPreference,
    /// Severity of the originating alert; `None` for reminders.
    pub severity: Option<Severity>,
}

impl NotificationRequest {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        category_id: impl Into<String>,
    ) -> Self {
        // ---
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            body: body.into(),
            data: serde_json::Value::Null,
            category_id: category_id.into(),
            priority: Priority::Normal,
            channel_preference: ChannelPreference::RemoteFirst,
            severity: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_channel_preference(mut self, preference: ChannelPreference) -> Self {
        self.channel_preference = preference;
        self
    }

    /// Build the user-facing request for a fired alert.
    pub fn from_alert(alert: &Alert) -> Self {
        // ---
        let priority = if alert.severity >= Severity::High {
            Priority::High
        } else {
            Priority::Normal
        };

        let mut request = Self::new(alert.title.clone(), alert.message.clone(), "water_alert")
            .with_priority(priority)
            .with_data(serde_json::json!({
                "alertId": alert.id,
                "parameter": alert.parameter,
                "type": alert.alert_type,
                "severity": alert.severity,
                "value": alert.value,
                "threshold": alert.threshold,
                "signature": alert.signature,
            }));
        request.severity = Some(alert.severity);
        request
    }
}

// ---

/// Delivery channel an outcome was recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Remote,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
}

/// Append-only delivery bookkeeping owned by the health monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    // ---
    pub notification_id: String,
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
    pub severity: Option<Severity>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_raw_reading(json: serde_json::Value) -> RawReading {
        // ---
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_raw_reading_drops_non_numeric_values() {
        // ---
        let raw = create_test_raw_reading(serde_json::json!({
            "timestamp": "2025-03-26T18:45:00Z",
            "pH": 7.2,
            "temperature": "not-a-number",
            "turbidity": null,
            "salinity": "3.5",
            "isRaining": 1,
            "firmware": "1.0.4"
        }));

        let reading = Reading::from(raw);

        assert_eq!(reading.get(Parameter::Ph), Some(7.2));
        assert_eq!(reading.get(Parameter::Temperature), None);
        assert_eq!(reading.get(Parameter::Turbidity), None);
        assert_eq!(reading.get(Parameter::Salinity), Some(3.5));
        assert_eq!(reading.get(Parameter::Raining), Some(1.0));
        assert_eq!(reading.values.len(), 3);
    }

    #[test]
    fn test_reading_builder_rejects_nan() {
        // ---
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let reading = Reading::new(ts)
            .with(Parameter::Ph, f64::NAN)
            .with(Parameter::Temperature, f64::INFINITY)
            .with(Parameter::Salinity, 1.0);

        assert_eq!(reading.values.len(), 1);
    }

    #[test]
    fn test_request_priority_follows_severity() {
        // ---
        let mut alert = Alert {
            id: "a1".to_string(),
            parameter: Parameter::Ph,
            alert_type: AlertType::Error,
            severity: Severity::Critical,
            title: "pH critically high".to_string(),
            message: "pH is 9.2".to_string(),
            value: 9.2,
            threshold: Some(9.0),
            signature: "ph|error|pH critically high|9.20".to_string(),
            timestamp: Utc::now(),
            occurrence_count: 1,
        };

        let request = NotificationRequest::from_alert(&alert);
        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.severity, Some(Severity::Critical));
        assert_eq!(request.data["alertId"], "a1");
        assert_eq!(request.channel_preference, ChannelPreference::RemoteFirst);

        alert.severity = Severity::Medium;
        assert_eq!(NotificationRequest::from_alert(&alert).priority, Priority::Normal);
    }
}
