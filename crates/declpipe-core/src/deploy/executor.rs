//! Reconcile one declared resource against its remote counterpart.

use crate::error::Result;
use crate::handler::ResourceHandler;
use crate::provider::ResourceClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub kind: String,
    pub resource_id: String,
    pub outcome: ReconcileOutcome,
    /// Fields the update touched (or would touch in a dry run).
    pub changed_fields: Vec<String>,
    /// False when the mutating call was suppressed by a dry run.
    pub applied: bool,
    /// Name reported by the provider after the call completed.
    pub display_name: Option<String>,
}

/// Run the find / diff / create-or-update cycle for one handler.
///
/// Unchanged resources issue no mutating call. In a dry run the decision and
/// diff are reported but neither create nor update is invoked.
pub fn deploy_gcp_resource(
    handler: &dyn ResourceHandler,
    client: &dyn ResourceClient,
    dry_run: bool,
) -> Result<ReconcileReport> {
    let resource_id = handler.get_resource_id();
    let kind = handler.kind().to_string();
    let local = handler.get_local_definition();

    let mut report = ReconcileReport {
        kind: kind.clone(),
        resource_id: resource_id.clone(),
        outcome: ReconcileOutcome::Unchanged,
        changed_fields: Vec::new(),
        applied: false,
        display_name: None,
    };

    let Some(existing) = handler.find_existing_resource(client)? else {
        report.outcome = ReconcileOutcome::Created;
        if dry_run {
            tracing::info!(resource = %resource_id, kind = %kind, "dry run: would create");
            return Ok(report);
        }
        let request = handler.build_create_request(&local)?;
        let response = client.invoke(&handler.get_create_method(), &request)?;
        let (_, name) = handler.wait_for_operation(client, response)?;
        tracing::info!(resource = %name, kind = %kind, "created");
        report.applied = true;
        report.display_name = Some(name);
        return Ok(report);
    };

    let changed = handler.compare(&existing, &local);
    if changed.is_empty() {
        tracing::info!(resource = %resource_id, kind = %kind, "up to date");
        return Ok(report);
    }

    report.outcome = ReconcileOutcome::Updated;
    report.changed_fields = changed.clone();
    if dry_run {
        tracing::info!(
            resource = %resource_id,
            kind = %kind,
            fields = ?changed,
            "dry run: would update"
        );
        return Ok(report);
    }

    let request = handler.build_update_request(&existing, &local, &changed)?;
    let response = client.invoke(&handler.get_update_method(), &request)?;
    let (_, name) = handler.wait_for_operation(client, response)?;
    tracing::info!(resource = %name, kind = %kind, fields = ?changed, "updated");
    report.applied = true;
    report.display_name = Some(name);
    Ok(report)
}
