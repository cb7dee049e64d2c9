//! Wire-level types shared across the storage client surface

use serde::{Deserialize, Serialize};

/// One page of an object listing.
///
/// `truncated` mirrors the provider's `IsTruncated` flag: more keys exist
/// under the same prefix than this page carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub truncated: bool,
}

impl ListPage {
    pub fn new(keys: Vec<String>, truncated: bool) -> Self {
        Self { keys, truncated }
    }
}

/// Result of a bulk delete. The provider can partially succeed, reporting
/// per-key failures alongside deleted keys in the same 200 response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteFailure>,
}

/// A per-key failure inside an otherwise successful bulk delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFailure {
    pub key: String,
    pub code: String,
    pub message: String,
}

/// Credentials consumed by URL signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    pub region: String,
}

/// HTTP method a pre-signed URL is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMethod {
    Get,
    Put,
}

impl SignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignMethod::Get => "GET",
            SignMethod::Put => "PUT",
        }
    }
}
