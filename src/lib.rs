//! s3ns - Namespaced object storage over a single shared S3 bucket
//!
//! Callers see independent logical buckets; physically every object lives in
//! one underlying bucket under a `<namespace>/<object>` key prefix. Namespace
//! existence and soft-deletion are tracked in a single `meta.json` document
//! stored alongside the objects, because S3 itself has no namespace concept.

pub mod adapter;
pub mod config;
pub mod error;
pub mod meta;
pub mod s3;

pub use adapter::{GetMode, GetResponse, PutPayload, PutResponse, StorageAdapter};
pub use config::Config;
pub use error::StorageError;
