//! Blob uploads for file records.
//!
//! A file record staged on device carries `pending_upload` and its bytes
//! live in the local store. Uploading moves the bytes to blob storage,
//! records the storage path and re-marks the record dirty so its metadata
//! goes out with the regular push.

use fieldsync_core::{EntityKind, EntityPayload, FileMeta, LocalRecord, OwnerId, RecordId, SyncMarker};
use fieldsync_store::StoreError;

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::report::UploadReport;
use crate::retry::retry_remote;

/// Rate limiter operation name for uploads.
pub const UPLOAD_OPERATION: &str = "upload:files";

/// Blob path for a file: `{owner}/{project}/{id}-{file_name}`.
pub fn storage_path(owner: &OwnerId, id: &RecordId, meta: &FileMeta) -> String {
    format!("{}/{}/{}-{}", owner, meta.project_id, id, meta.file_name)
}

/// Upload every staged blob. Failures are counted, never fatal.
pub async fn upload_pending(ctx: &SyncContext) -> Result<UploadReport> {
    let mut report = UploadReport::default();

    let staged: Vec<LocalRecord> = ctx
        .local
        .list_by_marker(EntityKind::File, SyncMarker::Dirty)
        .await?
        .into_iter()
        .filter(|r| r.as_file().map_or(false, |f| f.pending_upload))
        .collect();

    for record in staged {
        ctx.cancel.check()?;
        match upload_one(ctx, &record).await {
            Ok(path) => {
                tracing::debug!(id = %record.id, path = %path, "uploaded file");
                report.uploaded += 1;
            }
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "file upload failed, will retry next sync");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

async fn upload_one(ctx: &SyncContext, record: &LocalRecord) -> Result<String> {
    let meta = record.as_file().ok_or_else(|| {
        SyncError::Store(StoreError::InvalidData(format!("{} is not a file", record.id)))
    })?;
    let bytes = ctx
        .local
        .staged_blob(&record.id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("staged bytes for {}", record.id)))?;

    let path = storage_path(&ctx.config.owner_id, &record.id, meta);
    ctx.limiter.wait_for_limit(UPLOAD_OPERATION).await;
    let stored = retry_remote(
        &ctx.config.storage_retry,
        ctx.config.request_timeout,
        "upload",
        || ctx.blobs.upload(&path, &bytes),
    )
    .await?;

    let mut uploaded = meta.clone();
    uploaded.storage_path = Some(stored.clone());
    uploaded.pending_upload = false;
    ctx.local
        .put(&LocalRecord::dirty(
            record.id.clone(),
            EntityPayload::File(uploaded),
            ctx.clock.now_millis(),
        ))
        .await?;
    ctx.local.discard_staged_blob(&record.id).await?;

    Ok(stored)
}
