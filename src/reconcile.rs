//! Converging managed blocks to an operator selection.
//!
//! Reconciliation runs in two passes over the catalog:
//!
//! 1. **Retract** every sub-platform owned by the target that is no longer
//!    selected.
//! 2. **Apply** every selected sub-platform that is not already owned by the
//!    target: remove any stale block, then write a fresh one.
//!
//! Sub-platforms already routed to the target are left alone, so saving an
//! unchanged selection produces no edits and no file write.

use crate::assignment::{Assignment, Target};
use crate::catalog::DomainCatalog;
use crate::conflict::{Ownership, classify};
use crate::error::{ManagerError, Result};
use crate::resolver_file::ResolverFile;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

/// Sub-platforms chosen for a target, as `(top category, sub-platform)`.
pub type Selection = BTreeSet<(String, String)>;

/// Outcome of a reconciliation.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Number of sub-platforms removed or (re)written.
    pub changed: usize,
    /// Sub-platforms whose block was retracted.
    pub removed: Vec<String>,
    /// Sub-platforms whose block was (re)written.
    pub written: Vec<String>,
    /// Selected sub-platforms left alone because another target owns them.
    pub conflicts: Vec<String>,
    /// Sub-platforms that could not be written.
    pub failures: Vec<(String, ManagerError)>,
}

impl ReconcileReport {
    /// Returns `true` if nothing needed saving.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.changed == 0
    }
}

/// Reconciles `file` in memory so that exactly the selected sub-platforms
/// route to `target`.
///
/// Sub-platforms owned by another target are never overwritten, even when
/// selected; they are reported in [`ReconcileReport::conflicts`]. A failure
/// to write one sub-platform is logged and recorded, and the remaining
/// items are still processed.
///
/// # Errors
///
/// Returns [`ManagerError::EmptyIdentifier`] if the target has no
/// identifier. No line is changed in that case.
pub fn reconcile(
    file: &mut ResolverFile,
    target: &Target,
    selection: &Selection,
    catalog: &DomainCatalog,
) -> Result<ReconcileReport> {
    target.validate()?;

    let mut current = file.assignments();
    let selected: HashSet<(&str, &str)> = selection
        .iter()
        .map(|(top, sub)| (top.as_str(), sub.as_str()))
        .collect();
    let selected_subs: HashSet<&str> = selected.iter().map(|(_, sub)| *sub).collect();
    let mut report = ReconcileReport::default();

    for (top, sub) in selection {
        if !catalog.contains(top, sub) {
            tracing::debug!(top = %top, sub_platform = %sub, "Selected sub-platform is not in the catalog");
        }
    }

    let mut seen = HashSet::new();
    for (_, sub, _) in catalog.iter() {
        if !seen.insert(sub) || selected_subs.contains(sub) {
            continue;
        }
        if classify(sub, &current, target) == Ownership::OwnedByTarget {
            remove_all_blocks(file, sub);
            current.shift_remove(sub);
            report.removed.push(sub.to_string());
            report.changed += 1;
        }
    }

    for (top, sub, domains) in catalog.iter() {
        if !selected.contains(&(top, sub)) {
            continue;
        }
        if domains.is_empty() {
            tracing::debug!(top = %top, sub_platform = %sub, "No domains, skipping");
            continue;
        }
        match classify(sub, &current, target) {
            Ownership::OwnedByTarget => {
                tracing::debug!(sub_platform = %sub, target = %target, "Already assigned");
            }
            Ownership::OwnedByOther => {
                let owner = current
                    .get(sub)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                tracing::warn!(
                    sub_platform = %sub,
                    owner = %owner,
                    target = %target,
                    "Sub-platform owned by another target, leaving it untouched"
                );
                report.conflicts.push(sub.to_string());
            }
            Ownership::Free => {
                remove_all_blocks(file, sub);
                match file.write_rules(target.method, domains, &target.identifier, sub) {
                    Ok(()) => {
                        current.insert(
                            sub.to_string(),
                            Assignment {
                                method: Some(target.method),
                                identifier: target.identifier.clone(),
                            },
                        );
                        report.written.push(sub.to_string());
                        report.changed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(sub_platform = %sub, error = %e, "Failed to write platform rules");
                        report.failures.push((sub.to_string(), e));
                    }
                }
            }
        }
    }

    Ok(report)
}

/// Drops every block for `sub`. The assignment comes from the last block,
/// so stale earlier duplicates must go with it.
fn remove_all_blocks(file: &mut ResolverFile, sub: &str) {
    let mut removed = 0;
    while file.remove_rules(sub) {
        removed += 1;
    }
    if removed > 1 {
        tracing::debug!(sub_platform = %sub, blocks = removed, "Removed duplicate blocks");
    }
}

/// Loads the resolver config at `path`, reconciles it, and writes it back
/// only if something changed.
///
/// # Errors
///
/// Returns [`ManagerError::Io`] if the file cannot be read or written, or
/// [`ManagerError::EmptyIdentifier`] for a blank target.
pub fn reconcile_file(
    path: &Path,
    target: &Target,
    selection: &Selection,
    catalog: &DomainCatalog,
) -> Result<ReconcileReport> {
    let mut file = ResolverFile::open(path)?;
    let report = reconcile(&mut file, target, selection, catalog)?;
    if report.is_noop() {
        tracing::info!(path = %path.display(), target = %target, "Nothing to save");
        return Ok(report);
    }
    file.save()?;
    tracing::info!(
        path = %path.display(),
        target = %target,
        changed = report.changed,
        failed = report.failures.len(),
        "Saved platform assignments"
    );
    Ok(report)
}
