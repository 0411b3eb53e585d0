//! Wire types for the fleet backend contract

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};

/// Host record as served by the backend. Passwords are masked
/// server-side and never round-trip through the console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    /// Display label for the host
    pub comment: String,
    pub address: String,
    pub username: String,
    pub port: u16,
    /// Credential reference: "password" or "key"
    #[serde(default = "default_auth_kind")]
    pub auth_kind: String,
}

fn default_auth_kind() -> String {
    "password".to_string()
}

/// Payload for creating or updating a host record.
#[derive(Debug, Clone, Serialize)]
pub struct HostPayload {
    pub comment: String,
    pub address: String,
    pub username: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Which hosts an operation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    /// Every known host
    All,
    /// An explicit, non-empty id set
    Hosts(Vec<i64>),
}

impl TargetSelector {
    pub fn is_empty(&self) -> bool {
        matches!(self, TargetSelector::Hosts(ids) if ids.is_empty())
    }
}

// The backend accepts either the literal string "all" or an id array.
impl Serialize for TargetSelector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            TargetSelector::All => serializer.serialize_str("all"),
            TargetSelector::Hosts(ids) => ids.serialize(serializer),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecuteRequest {
    pub command: String,
    pub hosts: TargetSelector,
}

#[derive(Debug, Serialize)]
pub struct PlaybookRequest {
    pub playbook: String,
    /// `All` is encoded as an empty id list
    pub host_ids: Vec<i64>,
}

/// Generic `{success, message}` acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct WsTokenResponse {
    pub token: String,
}

/// Per-host upload outcome as reported by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadDetails {
    #[serde(default)]
    pub succeeded: Vec<String>,
    /// host -> error message
    #[serde(default)]
    pub failed: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: UploadDetails,
}

/// Host tallies from a playbook run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybookSummary {
    #[serde(default)]
    pub success: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
    #[serde(default)]
    pub unreachable: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlaybookResponse {
    pub success: bool,
    #[serde(default)]
    pub return_code: i32,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub summary: PlaybookSummary,
}

/// Remote directory entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
}

/// Entry in a remote directory listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

#[derive(Debug, Deserialize)]
pub struct ListResponse {
    pub success: bool,
    #[serde(default)]
    pub files: Vec<DirEntry>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadResponse {
    pub success: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_all_serializes_as_string() {
        let request = ExecuteRequest {
            command: "uptime".to_string(),
            hosts: TargetSelector::All,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["hosts"], "all");
    }

    #[test]
    fn test_selector_hosts_serializes_as_array() {
        let request = ExecuteRequest {
            command: "uptime".to_string(),
            hosts: TargetSelector::Hosts(vec![3, 7]),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["hosts"], serde_json::json!([3, 7]));
    }

    #[test]
    fn test_dir_entry_kind_wire_names() {
        let entry: DirEntry =
            serde_json::from_str(r#"{"name":"etc","type":"directory"}"#).unwrap();
        assert_eq!(entry.kind, EntryKind::Directory);

        let entry: DirEntry = serde_json::from_str(r#"{"name":"a.txt","type":"file"}"#).unwrap();
        assert_eq!(entry.kind, EntryKind::File);
    }

    #[test]
    fn test_upload_response_defaults() {
        let response: UploadResponse =
            serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(response.details.succeeded.is_empty());
        assert!(response.details.failed.is_empty());
    }
}
