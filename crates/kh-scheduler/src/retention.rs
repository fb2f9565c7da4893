use chrono::{DateTime, Months, Utc};
use kh_core::store::Store;
use kh_core::KhError;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    #[error("store error: {0}")]
    Store(#[from] KhError),
}

pub type Result<T> = std::result::Result<T, RetentionError>;

#[derive(Debug, Default, Clone, Copy)]
pub struct RetentionReport {
    pub hashlists_deleted: usize,
    pub orphan_hashes_deleted: usize,
}

/// Spec.md §4.8's daily sweep. File deletion (overwrite-then-unlink) is out
/// of scope here — the `file_path` column is opaque to this crate; only
/// database rows are purged. `0` months means "never expires", matching
/// the system default.
pub async fn run_purge(store: &Store, now: DateTime<Utc>) -> Result<RetentionReport> {
    let mut report = RetentionReport::default();
    let mut settings = store.get_settings().await?;

    if settings.default_retention_months <= 0 {
        settings.last_purge_run = Some(now);
        store.update_settings(settings).await?;
        return Ok(report);
    }

    let cutoff = now
        .checked_sub_months(Months::new(settings.default_retention_months as u32))
        .unwrap_or(now);

    for hashlist in store.list_hashlists_older_than(cutoff).await? {
        store.delete_hashlist(hashlist.id).await?;
        report.hashlists_deleted += 1;
        info!(hashlist_id = hashlist.id, "retention: hashlist expired");
    }

    report.orphan_hashes_deleted = store.delete_orphan_hashes().await?;

    settings.last_purge_run = Some(now);
    store.update_settings(settings).await?;

    info!(
        hashlists = report.hashlists_deleted,
        orphan_hashes = report.orphan_hashes_deleted,
        "retention purge completed"
    );
    Ok(report)
}
