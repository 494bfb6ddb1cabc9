//! Usage reports and the serialized rows fed into the buffer

use serde::{Deserialize, Serialize};

/// One executed operation as reported by a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub duration_ns: u64,
    pub ok: bool,
    #[serde(default)]
    pub errors_total: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// Operation body and the schema coordinates it touches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub operation_hash: String,
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub body: String,
    #[serde(default)]
    pub coordinates: Vec<String>,
    /// Milliseconds since the Unix epoch after which the row may be dropped
    pub expires_at: u64,
}

/// A message from the usage stream, scoped to one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub target: String,
    #[serde(default)]
    pub operations: Vec<OperationRecord>,
    #[serde(default)]
    pub registry: Vec<RegistryRecord>,
}

/// Pre-serialized rows for both categories of the batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageRecord {
    pub operations_payloads: Vec<String>,
    pub registry_payloads: Vec<String>,
}

#[derive(Serialize)]
struct Row<'a, T> {
    target: &'a str,
    #[serde(flatten)]
    record: &'a T,
}

impl UsageReport {
    /// Parse one JSON-encoded report
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Render each record as a JSON row tagged with the report's target
    pub fn to_record(&self) -> Result<UsageRecord, serde_json::Error> {
        let target = self.target.as_str();
        let operations_payloads = self
            .operations
            .iter()
            .map(|record| serde_json::to_string(&Row { target, record }))
            .collect::<Result<Vec<_>, _>>()?;
        let registry_payloads = self
            .registry
            .iter()
            .map(|record| serde_json::to_string(&Row { target, record }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(UsageRecord {
            operations_payloads,
            registry_payloads,
        })
    }
}

impl UsageRecord {
    pub fn new(operations_payloads: Vec<String>, registry_payloads: Vec<String>) -> Self {
        Self {
            operations_payloads,
            registry_payloads,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations_payloads.is_empty() && self.registry_payloads.is_empty()
    }
}
