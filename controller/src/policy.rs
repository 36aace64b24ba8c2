//! Policy engine (§4.5): resolves, for an exporter/client pair, every
//! `ApprovedExporter{policy, exporter, existing_lease?}` candidate.

use crate::model::{Client, Exporter, ExporterAccessPolicy, Lease, PolicyEntry};
use crate::selector::{parse_selector, SelectorError};

#[derive(Clone, Debug)]
pub struct ApprovedExporter {
    pub policy: PolicyEntry,
    pub exporter: Exporter,
    pub existing_lease: Option<Lease>,
}

/// Evaluate every policy document against one exporter/client pair. `existing_lease` is
/// resolved by the caller (the lease reconciler, which already has the bound-lease index) and
/// threaded into every produced candidate unchanged.
pub fn approved_exporters_for(
    exporter: &Exporter,
    client: &Client,
    policies: &[ExporterAccessPolicy],
    existing_lease: Option<&Lease>,
) -> Result<Vec<ApprovedExporter>, SelectorError> {
    let mut approved = Vec::new();

    for policy_doc in policies {
        let exporter_selector = parse_selector(&policy_doc.exporter_selector)?;
        if !exporter_selector.matches(&exporter.meta.labels) {
            continue;
        }

        for entry in &policy_doc.policies {
            let mut entry_matches = false;
            for from in &entry.from {
                let client_selector = parse_selector(&from.client_selector)?;
                if client_selector.matches(&client.meta.labels) {
                    entry_matches = true;
                    break;
                }
            }
            if entry_matches {
                approved.push(ApprovedExporter {
                    policy: entry.clone(),
                    exporter: exporter.clone(),
                    existing_lease: existing_lease.cloned(),
                });
            }
        }
    }

    Ok(approved)
}
