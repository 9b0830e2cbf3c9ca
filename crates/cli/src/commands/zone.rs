//! Zone maintenance commands.

use zone_editor_core::{TenantId, ZoneId, validate_segment};
use zone_editor_functions::services::CascadeDeleter;

use super::{CommandError, connect_store};

/// Re-run the cascade delete for a removed zone.
///
/// Safe to repeat: already drained sub-collections cost one empty read.
pub async fn cascade(tenant: &str, zone: &str, batch_size: usize) -> Result<(), CommandError> {
    let tenant_id = TenantId::new(validate_segment(tenant)?);
    let zone_id = ZoneId::new(validate_segment(zone)?);

    let store = connect_store().await?;
    let report = CascadeDeleter::new(&store)
        .with_batch_size(batch_size)
        .delete_zone_dependents(&tenant_id, &zone_id)
        .await?;

    for collection in &report.collections {
        tracing::info!(
            "{}: {} deleted in {} batches",
            collection.collection,
            collection.deleted,
            collection.batches
        );
    }
    tracing::info!(
        "Cascade complete! {} documents deleted",
        report.total_deleted()
    );

    Ok(())
}
