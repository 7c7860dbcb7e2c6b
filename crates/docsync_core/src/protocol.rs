//! REST wire protocol bodies.
//!
//! The default sync transport is two POST endpoints, `{base}/pull` and
//! `{base}/push`, exchanging JSON bodies with base64-encoded payloads. A
//! client with no prior checkpoint receives a snapshot; afterwards it
//! receives incremental updates since `dateLastSynced`. Payloads are opaque
//! to the server; it is a byte log, not a CRDT peer.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{DocsyncError, Result};

/// Encode a payload for the wire.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a wire payload.
pub fn decode_base64(value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| DocsyncError::Decode(format!("invalid base64 payload: {e}")))
}

/// Body of `POST {base}/pull`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestBody {
    /// One entry per document being pulled.
    pub documents: Vec<PullRequestDoc>,
}

/// Per-document pull request entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestDoc {
    /// Document id.
    pub id: String,
    /// The client's checkpoint from the previous pull/push, or `None` on
    /// the very first contact.
    pub last_synced: Option<String>,
    /// Ask the server for a snapshot instead of incremental updates.
    pub request_snapshot: bool,
    /// Base64 state vector; omitted on a snapshot request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_vector: Option<String>,
}

/// Body of the `POST {base}/pull` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponseBody {
    /// One entry per requested document.
    pub documents: Vec<PullResponseDoc>,
}

/// Per-document pull response entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponseDoc {
    /// Document id.
    pub id: String,
    /// Base64 snapshot blob, present on snapshot responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    /// Base64 incremental updates since the client's checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<Vec<String>>,
    /// The new checkpoint to persist.
    pub date_last_synced: Option<String>,
}

/// Body of `POST {base}/push`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequestBody {
    /// One entry per document being pushed.
    pub documents: Vec<PushRequestDoc>,
}

/// Per-document push request entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequestDoc {
    /// Document id.
    pub id: String,
    /// Base64 payload.
    pub update: String,
    /// True when the payload is a full-state snapshot, for backends that
    /// store snapshots separately from the incremental log.
    pub is_snapshot: bool,
    /// The client's current checkpoint.
    pub last_synced: Option<String>,
}

/// Body of the `POST {base}/push` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponseBody {
    /// One entry per pushed document.
    pub documents: Vec<PushResponseDoc>,
}

/// Per-document push response entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponseDoc {
    /// Document id.
    pub id: String,
    /// The new checkpoint to persist.
    pub date_last_synced: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_round_trip() {
        let payload = vec![0u8, 1, 2, 254, 255];
        let encoded = encode_base64(&payload);
        assert_eq!(decode_base64(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_base64("not base64!!!"),
            Err(DocsyncError::Decode(_))
        ));
    }

    #[test]
    fn test_pull_request_field_names() {
        let body = PullRequestBody {
            documents: vec![PullRequestDoc {
                id: "d1".into(),
                last_synced: None,
                request_snapshot: true,
                state_vector: None,
            }],
        };

        let json = serde_json::to_value(&body).unwrap();
        let doc = &json["documents"][0];
        assert_eq!(doc["id"], "d1");
        assert_eq!(doc["lastSynced"], serde_json::Value::Null);
        assert_eq!(doc["requestSnapshot"], true);
        // Omitted, not null, when absent.
        assert!(doc.get("stateVector").is_none());
    }

    #[test]
    fn test_pull_response_parses() {
        let json = r#"{
            "documents": [{
                "id": "d1",
                "snapshot": "AQI=",
                "updates": ["AwQ="],
                "dateLastSynced": "2026-07-01T12:00:00Z"
            }]
        }"#;

        let body: PullResponseBody = serde_json::from_str(json).unwrap();
        let doc = &body.documents[0];
        assert_eq!(decode_base64(doc.snapshot.as_ref().unwrap()).unwrap(), vec![1, 2]);
        assert_eq!(
            decode_base64(&doc.updates.as_ref().unwrap()[0]).unwrap(),
            vec![3, 4]
        );
        assert_eq!(doc.date_last_synced.as_deref(), Some("2026-07-01T12:00:00Z"));
    }

    #[test]
    fn test_pull_response_without_payload_parses() {
        let json = r#"{"documents": [{"id": "d1", "dateLastSynced": null}]}"#;
        let body: PullResponseBody = serde_json::from_str(json).unwrap();
        let doc = &body.documents[0];
        assert!(doc.snapshot.is_none());
        assert!(doc.updates.is_none());
    }

    #[test]
    fn test_push_request_field_names() {
        let body = PushRequestBody {
            documents: vec![PushRequestDoc {
                id: "d1".into(),
                update: encode_base64(b"blob"),
                is_snapshot: true,
                last_synced: Some("t0".into()),
            }],
        };

        let json = serde_json::to_value(&body).unwrap();
        let doc = &json["documents"][0];
        assert_eq!(doc["isSnapshot"], true);
        assert_eq!(doc["lastSynced"], "t0");
        assert_eq!(doc["update"], encode_base64(b"blob"));
    }
}
