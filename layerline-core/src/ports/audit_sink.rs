// layerline-core/src/ports/audit_sink.rs

use crate::domain::audit::AuditRecord;
use async_trait::async_trait;

/// External observability target for closed audit records.
///
/// Delivery is best-effort: implementations report failures as a message
/// and the recorder only logs it.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn publish(&self, record: &AuditRecord) -> Result<(), String>;

    fn name(&self) -> &str;
}
