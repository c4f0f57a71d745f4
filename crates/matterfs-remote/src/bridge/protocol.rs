//! Wire protocol between the mount manager and the filesystem bridge.
//!
//! Each OS filesystem callback is serialized as a `{type, id, ...}` request
//! line; the mount manager answers with a `{id, reply | error}` line.
//! Requests may be answered out of order; ids correlate the pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use matterfs_core::DriveError;

/// Per-request timeout enforced by the bridge client. A stuck bridge
/// surfaces as `IoError` rather than hanging the caller.
pub const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// POSIX errno-like error codes, mapped 1:1 from `DriveError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    IoError,
    AccessDenied,
    Exists,
    NotADirectory,
    IsADirectory,
    NoSpace,
    NotEmpty,
    BadHandle,
}

/// Error payload carried in a bridge response.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct BridgeError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&DriveError> for ErrorCode {
    fn from(e: &DriveError) -> Self {
        match e {
            DriveError::NotFound(_) | DriveError::NotCached(_) => ErrorCode::NotFound,
            DriveError::AccessDenied(_) => ErrorCode::AccessDenied,
            DriveError::Exists(_) => ErrorCode::Exists,
            DriveError::NotADirectory(_) => ErrorCode::NotADirectory,
            DriveError::IsADirectory(_) => ErrorCode::IsADirectory,
            DriveError::NotEmpty(_) => ErrorCode::NotEmpty,
            DriveError::BadHandle(_) => ErrorCode::BadHandle,
            DriveError::CacheFull { .. } => ErrorCode::NoSpace,
            _ => ErrorCode::IoError,
        }
    }
}

impl From<DriveError> for BridgeError {
    fn from(e: DriveError) -> Self {
        BridgeError {
            code: ErrorCode::from(&e),
            message: e.to_string(),
        }
    }
}

/// Filesystem operation requested by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeOp {
    Getattr { path: String },
    Readdir { path: String },
    Open { path: String, write: bool },
    Read { handle: u64, offset: u64, len: u64 },
    Write { handle: u64, offset: u64, data: Vec<u8> },
    Create { path: String },
    Unlink { path: String },
    Mkdir { path: String },
    Rmdir { path: String },
    Rename { from: String, to: String },
    Release { handle: u64 },
}

/// One request line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: u64,
    #[serde(flatten)]
    pub op: BridgeOp,
}

/// Attribute payload for getattr.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrDto {
    pub size: u64,
    pub is_dir: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
}

/// Directory entry payload for readdir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntryDto {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Successful reply payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeReply {
    Attr { attr: AttrDto },
    Entries { entries: Vec<DirEntryDto> },
    Handle { handle: u64 },
    Data { data: Vec<u8> },
    Written { written: u64 },
    Unit,
}

/// One response line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<BridgeReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BridgeError>,
}

impl BridgeResponse {
    pub fn ok(id: u64, reply: BridgeReply) -> Self {
        BridgeResponse {
            id,
            reply: Some(reply),
            error: None,
        }
    }

    pub fn err(id: u64, error: BridgeError) -> Self {
        BridgeResponse {
            id,
            reply: None,
            error: Some(error),
        }
    }

    /// Unpack into a result the client can hand back to the OS layer.
    pub fn into_result(self) -> Result<BridgeReply, BridgeError> {
        match (self.reply, self.error) {
            (Some(reply), None) => Ok(reply),
            (_, Some(error)) => Err(error),
            (None, None) => Err(BridgeError {
                code: ErrorCode::IoError,
                message: "empty response".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let req = BridgeRequest {
            id: 7,
            op: BridgeOp::Open {
                path: "/Acme/brief.docx".to_string(),
                write: true,
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"open\""));
        assert!(json.contains("\"id\":7"));

        let back: BridgeRequest = serde_json::from_str(&json).unwrap();
        assert!(matches!(back.op, BridgeOp::Open { write: true, .. }));
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = BridgeResponse::ok(3, BridgeReply::Written { written: 128 });
        let json = serde_json::to_string(&resp).unwrap();
        let back: BridgeResponse = serde_json::from_str(&json).unwrap();
        match back.into_result().unwrap() {
            BridgeReply::Written { written } => assert_eq!(written, 128),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_error_code_mapping() {
        let cases = [
            (DriveError::NotFound("/x".into()), ErrorCode::NotFound),
            (DriveError::NotCached("d".into()), ErrorCode::NotFound),
            (DriveError::AccessDenied("/".into()), ErrorCode::AccessDenied),
            (DriveError::Exists("/x".into()), ErrorCode::Exists),
            (DriveError::NotADirectory("/x".into()), ErrorCode::NotADirectory),
            (DriveError::IsADirectory("/x".into()), ErrorCode::IsADirectory),
            (DriveError::NotEmpty("/x".into()), ErrorCode::NotEmpty),
            (DriveError::BadHandle(9), ErrorCode::BadHandle),
            (DriveError::CacheFull { needed: 1, max: 0 }, ErrorCode::NoSpace),
            (DriveError::Config("x".into()), ErrorCode::IoError),
        ];
        for (err, code) in cases {
            assert_eq!(ErrorCode::from(&err), code, "{:?}", err);
        }
    }

    #[test]
    fn test_empty_response_is_error() {
        let resp = BridgeResponse {
            id: 1,
            reply: None,
            error: None,
        };
        assert!(resp.into_result().is_err());
    }
}
