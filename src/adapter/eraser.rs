//! Paginated prefix deletion

use tracing::{debug, warn};

use crate::s3::{Result, StorageClient};

/// Delete every object under `prefix`, one listing page at a time.
///
/// An empty page returns success without ever submitting an empty bulk
/// delete. A truncated page loops on the same prefix: each pass removes the
/// keys it just listed, so the remaining set strictly shrinks and the loop
/// terminates once the listing catches up with the deletions. Failures
/// propagate mid-flight with no rollback - already-deleted objects stay
/// deleted and the caller may retry.
pub(crate) async fn erase_prefix(
    client: &dyn StorageClient,
    bucket: &str,
    prefix: &str,
) -> Result<()> {
    loop {
        let page = client.list_objects(bucket, prefix).await?;
        if page.keys.is_empty() {
            return Ok(());
        }

        let outcome = client.delete_objects(bucket, &page.keys).await?;
        if !outcome.errors.is_empty() {
            // Per-key failures inside a 200 are skipped keys, not a failed
            // request; the next pass will list and retry them
            warn!(
                prefix = %prefix,
                failed = outcome.errors.len(),
                "bulk delete skipped keys"
            );
        }
        debug!(prefix = %prefix, deleted = page.keys.len(), truncated = page.truncated, "erased page");

        if !page.truncated {
            return Ok(());
        }
    }
}
