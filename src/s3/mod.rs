//! Wire-level storage capability surface.
//!
//! The adapter core never talks HTTP directly; it consumes the
//! [`StorageClient`] trait, which models exactly the bucket and object
//! operations the underlying store exposes. [`client::S3Client`] is the real
//! implementation; tests substitute an in-memory one.

pub mod client;
pub mod signer;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use client::S3Client;
pub use types::{Credentials, DeleteFailure, DeleteOutcome, ListPage, SignMethod};

/// Storage client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Non-success response from the provider, with the error code parsed
    /// out of the XML body when one was present.
    #[error("{code}: {message}")]
    Response {
        status: u16,
        code: String,
        message: String,
    },
}

impl From<quick_xml::Error> for ClientError {
    fn from(err: quick_xml::Error) -> Self {
        ClientError::XmlParse(err.to_string())
    }
}

impl From<hyper_util::client::legacy::Error> for ClientError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl ClientError {
    /// HTTP status of the provider response, when this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Missing bucket or missing key class of failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::Response { status, code, .. } => {
                *status == 404
                    || code == "NoSuchKey"
                    || code == "NoSuchBucket"
                    || code == "NotFound"
            }
            _ => false,
        }
    }

    /// Specifically a missing object key (`NoSuchKey`), as opposed to a
    /// missing bucket or any other 404.
    pub fn is_missing_key(&self) -> bool {
        match self {
            ClientError::Response { code, message, .. } => {
                code == "NoSuchKey" || message.contains("NoSuchKey")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// The operations the adapter consumes from the underlying store.
///
/// Mirrors the provider's own surface one-to-one; no namespace logic lives
/// at this level.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Existence check. A missing bucket is reported as a not-found class
    /// [`ClientError::Response`], not as `Ok`.
    async fn head_bucket(&self, bucket: &str) -> Result<()>;

    async fn list_buckets(&self) -> Result<Vec<String>>;

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Bulk delete. Implementations treat an empty key list as a no-op and
    /// never submit an empty delete request to the wire.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteOutcome>;

    /// One page of keys under `prefix`. Pagination is the caller's problem;
    /// the page reports `truncated` when more keys remain.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<ListPage>;

    /// Pre-signed URL for a single object, bound to `method` and valid for
    /// `expires_secs`. Does not verify the object exists.
    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        method: SignMethod,
        expires_secs: u64,
        credentials: &Credentials,
    ) -> Result<String>;
}

/// Capability for acquiring signing credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(&self) -> Result<Credentials>;
}

/// Provider backed by fixed credentials handed in at construction.
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}
