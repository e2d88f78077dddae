use super::patch::{PatchRequest, PatchResult};
use crate::core::{DocumentId, Etag};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One command of a multi-document batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Method", rename_all = "UPPERCASE")]
pub enum BatchCommand {
    Put {
        #[serde(rename = "Key")]
        key: DocumentId,
        #[serde(rename = "Etag", default)]
        etag: Option<Etag>,
        #[serde(rename = "Document")]
        document: JsonValue,
        #[serde(rename = "Metadata", default)]
        metadata: JsonValue,
    },
    Delete {
        #[serde(rename = "Key")]
        key: DocumentId,
        #[serde(rename = "Etag", default)]
        etag: Option<Etag>,
    },
    Patch {
        #[serde(rename = "Key")]
        key: DocumentId,
        #[serde(rename = "Etag", default)]
        etag: Option<Etag>,
        #[serde(rename = "Patches")]
        patches: Vec<PatchRequest>,
    },
}

impl BatchCommand {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Put { .. } => "PUT",
            Self::Delete { .. } => "DELETE",
            Self::Patch { .. } => "PATCH",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } | Self::Patch { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchResult {
    pub method: String,
    pub key: DocumentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<Etag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_result: Option<PatchResult>,
}

impl BatchResult {
    pub(crate) fn new(command: &BatchCommand) -> Self {
        Self {
            method: command.method().to_string(),
            key: command.key().to_string(),
            etag: None,
            deleted: None,
            patch_result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_commands_decode_by_method() {
        let commands: Vec<BatchCommand> = serde_json::from_value(json!([
            {"Method": "PUT", "Key": "users/1", "Document": {"Name": "Oren"}},
            {"Method": "DELETE", "Key": "users/2", "Etag": "0000000000000002"},
            {"Method": "PATCH", "Key": "users/3", "Patches": [{"Type": "Unset", "Name": "Age"}]},
        ]))
        .unwrap();

        assert_eq!(commands[0].method(), "PUT");
        assert_eq!(
            commands[1],
            BatchCommand::Delete {
                key: "users/2".into(),
                etag: Some(Etag(2)),
            }
        );
        assert_eq!(commands[2].key(), "users/3");
    }
}
