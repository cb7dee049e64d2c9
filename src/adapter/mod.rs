//! The namespaced storage adapter: public bucket and object operations.
//!
//! Namespaces are emulated: every logical bucket is a key prefix inside one
//! shared underlying bucket, with existence tracked in the metadata
//! document. Every public operation validates names first, then checks the
//! namespace against metadata, then touches the underlying store, and
//! returns either its success value or a normalized [`StorageError`] -
//! nothing panics or leaks raw provider failures across this boundary.

mod eraser;
mod name;

use std::sync::Arc;

use anyhow::Result as AnyResult;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::config::Config;
use crate::error::StorageError;
use crate::meta::MetaStore;
use crate::s3::{
    CredentialProvider, Credentials, S3Client, SignMethod, StaticCredentials, StorageClient,
};

use name::check_name;

/// Prefix of the shared underlying bucket; the deployment identifier is
/// appended to it.
pub const BUCKET_NAMESPACE_PREFIX: &str = "storage-namespaced";

/// Default expiry for pre-signed PUT URLs.
pub const DEFAULT_PUT_URL_EXPIRY_SECS: u64 = 300;

/// Default expiry for pre-signed GET URLs.
pub const DEFAULT_GET_URL_EXPIRY_SECS: u64 = 3600;

/// How bytes reach the store on a put.
pub enum PutPayload {
    /// Buffer the reader fully into memory, then upload in one request.
    Inline(Box<dyn AsyncRead + Send + Unpin>),
    /// Skip the transfer; hand back a pre-signed PUT URL and let the caller
    /// upload out-of-band.
    SignedUrl,
}

impl PutPayload {
    /// Inline payload from anything readable.
    pub fn inline(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        PutPayload::Inline(Box::new(reader))
    }
}

/// Acknowledgment of a put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutResponse {
    Stored,
    SignedUrl(String),
}

/// How bytes come back on a get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetMode {
    Inline,
    SignedUrl,
}

/// Result of a get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetResponse {
    Body(Bytes),
    SignedUrl(String),
}

/// The adapter. One instance per deployment; construction derives the shared
/// bucket name from the deployment prefix, and all state beyond
/// configuration lives in the underlying store.
pub struct StorageAdapter {
    client: Arc<dyn StorageClient>,
    credentials: Arc<dyn CredentialProvider>,
    meta: MetaStore,
    bucket: String,
    put_url_expiry_secs: u64,
    get_url_expiry_secs: u64,
}

impl StorageAdapter {
    /// Build an adapter over an injected client and credential capability.
    ///
    /// `prefix` identifies the deployment and must be 1-32 characters.
    pub fn new(
        prefix: &str,
        client: Arc<dyn StorageClient>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> AnyResult<Self> {
        if prefix.is_empty() || prefix.len() > 32 {
            anyhow::bail!("bucket prefix must be a string of 1-32 characters");
        }

        let bucket = format!("{}-{}", BUCKET_NAMESPACE_PREFIX, prefix);
        let meta = MetaStore::new(client.clone(), bucket.clone());

        Ok(Self {
            client,
            credentials,
            meta,
            bucket,
            put_url_expiry_secs: DEFAULT_PUT_URL_EXPIRY_SECS,
            get_url_expiry_secs: DEFAULT_GET_URL_EXPIRY_SECS,
        })
    }

    /// Build an adapter with a real S3 client from deployment configuration.
    pub fn from_config(config: &Config) -> AnyResult<Self> {
        config.validate()?;

        let client = S3Client::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            Some(config.region.clone()),
            config.endpoint.clone(),
        );
        let credentials = StaticCredentials::new(Credentials {
            access_key_id: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            session_token: None,
            region: config.region.clone(),
        });

        Ok(Self::new(
            &config.bucket_prefix,
            Arc::new(client),
            Arc::new(credentials),
        )?
        .with_signed_url_expiry(
            config.signed_urls.put_expiry_secs,
            config.signed_urls.get_expiry_secs,
        ))
    }

    /// Override the signed-URL expirations.
    pub fn with_signed_url_expiry(mut self, put_secs: u64, get_secs: u64) -> Self {
        self.put_url_expiry_secs = put_secs;
        self.get_url_expiry_secs = get_secs;
        self
    }

    /// Name of the shared underlying bucket.
    pub fn underlying_bucket(&self) -> &str {
        &self.bucket
    }

    /// Create a namespace. Fails with 409 when a live namespace of the same
    /// name exists; recreating a soft-deleted one succeeds and revives it.
    pub async fn make_bucket(&self, name: &str) -> Result<(), StorageError> {
        check_name(name)?;

        let _guard = self.meta.lock().await;
        let mut doc = self.meta.get_meta().await?;
        if doc.namespace_exists(name) {
            return Err(StorageError::conflict("bucket already exists"));
        }

        doc.insert_namespace(name);
        self.meta.save_meta(&doc).await?;
        debug!(namespace = %name, "namespace created");
        Ok(())
    }

    /// Remove a namespace: erase every object under its prefix, then stamp
    /// the metadata entry as soft-deleted.
    ///
    /// Not atomic. When the eraser fails partway, already-deleted objects
    /// stay deleted and the metadata is left untouched, so the namespace
    /// remains live and removal can be retried.
    pub async fn remove_bucket(&self, name: &str) -> Result<(), StorageError> {
        check_name(name)?;

        let _guard = self.meta.lock().await;
        let mut doc = self.meta.get_meta().await?;
        if !doc.namespace_exists(name) {
            return Err(StorageError::not_found("bucket does not exist"));
        }

        eraser::erase_prefix(self.client.as_ref(), &self.bucket, name).await?;

        doc.mark_deleted(name);
        self.meta.save_meta(&doc).await?;
        debug!(namespace = %name, "namespace removed");
        Ok(())
    }

    /// Names of all live namespaces, order not guaranteed.
    pub async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let doc = self.meta.get_meta().await?;
        Ok(doc.live_namespaces())
    }

    /// Store an object inside a namespace, or mint a pre-signed PUT URL.
    ///
    /// Signed-URL mode never verifies that the upload happens; the caller
    /// owns the out-of-band transfer.
    pub async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        payload: PutPayload,
    ) -> Result<PutResponse, StorageError> {
        check_name(bucket)?;
        check_name(object)?;
        self.require_namespace(bucket).await?;

        let key = object_key(bucket, object);
        match payload {
            PutPayload::Inline(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await?;
                self.client
                    .put_object(&self.bucket, &key, Bytes::from(buf))
                    .await?;
                Ok(PutResponse::Stored)
            }
            PutPayload::SignedUrl => {
                let credentials = self.credentials.get_credentials().await?;
                let url = self
                    .client
                    .signed_url(
                        &self.bucket,
                        &key,
                        SignMethod::Put,
                        self.put_url_expiry_secs,
                        &credentials,
                    )
                    .await?;
                Ok(PutResponse::SignedUrl(url))
            }
        }
    }

    /// Fetch an object's bytes, or mint a pre-signed GET URL.
    ///
    /// Inline mode maps a missing key to 404; signed-URL mode cannot know
    /// whether the object exists and does not try.
    pub async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        mode: GetMode,
    ) -> Result<GetResponse, StorageError> {
        check_name(bucket)?;
        check_name(object)?;
        self.require_namespace(bucket).await?;

        let key = object_key(bucket, object);
        match mode {
            GetMode::Inline => match self.client.get_object(&self.bucket, &key).await {
                Ok(body) => Ok(GetResponse::Body(body)),
                Err(err) if err.is_missing_key() => {
                    Err(StorageError::not_found("object not found"))
                }
                Err(err) => Err(err.into()),
            },
            GetMode::SignedUrl => {
                let credentials = self.credentials.get_credentials().await?;
                let url = self
                    .client
                    .signed_url(
                        &self.bucket,
                        &key,
                        SignMethod::Get,
                        self.get_url_expiry_secs,
                        &credentials,
                    )
                    .await?;
                Ok(GetResponse::SignedUrl(url))
            }
        }
    }

    /// Delete an object. Succeeds even when the key never existed; the
    /// underlying delete is idempotent.
    pub async fn remove_object(&self, bucket: &str, object: &str) -> Result<(), StorageError> {
        check_name(bucket)?;
        check_name(object)?;
        self.require_namespace(bucket).await?;

        let key = object_key(bucket, object);
        self.client.delete_object(&self.bucket, &key).await?;
        Ok(())
    }

    /// Keys under `prefix` inside a namespace - first listing page only.
    ///
    /// Truncation is deliberately not followed here, unlike deletion:
    /// existing callers depend on first-page semantics for large
    /// namespaces.
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>, StorageError> {
        check_name(bucket)?;
        check_name(prefix)?;
        self.require_namespace(bucket).await?;

        let page = self
            .client
            .list_objects(&self.bucket, &object_key(bucket, prefix))
            .await?;
        Ok(page.keys)
    }

    async fn require_namespace(&self, bucket: &str) -> Result<(), StorageError> {
        let doc = self.meta.get_meta().await?;
        if !doc.namespace_exists(bucket) {
            return Err(StorageError::not_found("bucket does not exist"));
        }
        Ok(())
    }
}

/// Join a namespace and an object key into the underlying store key.
fn object_key(namespace: &str, object: &str) -> String {
    let object = object.trim_start_matches('/');
    if object.is_empty() {
        namespace.to_string()
    } else {
        format!("{}/{}", namespace, object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_join() {
        assert_eq!(object_key("fizz", "avatar.png"), "fizz/avatar.png");
        assert_eq!(object_key("fizz", "/avatar.png"), "fizz/avatar.png");
        assert_eq!(object_key("fizz", ""), "fizz");
        assert_eq!(object_key("fizz", "a/b/c.txt"), "fizz/a/b/c.txt");
    }
}
