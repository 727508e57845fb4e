//! Editing session for one target.
//!
//! A session holds the operator's selection while they pick sub-platforms
//! for a single target. It is seeded from the resolver config and refuses
//! sub-platforms that another target owns.

use crate::assignment::{AssignmentTable, Target};
use crate::catalog::DomainCatalog;
use crate::conflict::{Ownership, classify};
use crate::error::{ManagerError, Result};
use crate::reconcile::{ReconcileReport, Selection, reconcile};
use crate::resolver_file::ResolverFile;

/// Selection state of a top category, over its selectable sub-platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    /// Nothing selected, or nothing selectable.
    None,
    /// Some selectable sub-platforms selected.
    Partial,
    /// Every selectable sub-platform selected.
    All,
}

/// Operator selection for one target.
#[derive(Debug, Clone)]
pub struct Session {
    target: Target,
    assignments: AssignmentTable,
    selection: Selection,
    dirty: bool,
}

impl Session {
    /// Opens a session with every sub-platform the target already owns
    /// selected.
    #[must_use]
    pub fn open(target: Target, assignments: AssignmentTable, catalog: &DomainCatalog) -> Self {
        let selection = catalog
            .iter()
            .filter(|(_, sub, _)| classify(sub, &assignments, &target) == Ownership::OwnedByTarget)
            .map(|(top, sub, _)| (top.to_string(), sub.to_string()))
            .collect();
        Self {
            target,
            assignments,
            selection,
            dirty: false,
        }
    }

    /// Returns the target being edited.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Returns the assignments the session was seeded from.
    #[must_use]
    pub const fn assignments(&self) -> &AssignmentTable {
        &self.assignments
    }

    /// Returns the current selection.
    #[must_use]
    pub const fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Returns `true` if the selection changed since it was seeded.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Classifies `sub` against the session target.
    #[must_use]
    pub fn ownership(&self, sub: &str) -> Ownership {
        classify(sub, &self.assignments, &self.target)
    }

    /// Returns `true` if `top`/`sub` is selected.
    #[must_use]
    pub fn is_selected(&self, top: &str, sub: &str) -> bool {
        self.selection
            .iter()
            .any(|(t, s)| t == top && s == sub)
    }

    /// Selects or deselects `top`/`sub`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Conflict`] if another target owns `sub`.
    pub fn set_selected(&mut self, top: &str, sub: &str, selected: bool) -> Result<()> {
        self.ensure_selectable(sub)?;
        let key = (top.to_string(), sub.to_string());
        let changed = if selected {
            self.selection.insert(key)
        } else {
            self.selection.remove(&key)
        };
        self.dirty |= changed;
        Ok(())
    }

    /// Flips the selection of `top`/`sub` and returns the new state.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Conflict`] if another target owns `sub`.
    pub fn toggle(&mut self, top: &str, sub: &str) -> Result<bool> {
        let selected = !self.is_selected(top, sub);
        self.set_selected(top, sub, selected)?;
        Ok(selected)
    }

    /// Selects every selectable sub-platform of `top`, or clears them all
    /// if they were already all selected. Returns the resulting mark.
    pub fn toggle_top(&mut self, top: &str, catalog: &DomainCatalog) -> Mark {
        let select = self.mark(top, catalog) != Mark::All;
        let subs: Vec<String> = catalog
            .sub_platforms(top)
            .filter(|sub| self.ownership(sub).is_selectable())
            .map(str::to_owned)
            .collect();
        for sub in subs {
            let key = (top.to_string(), sub);
            let changed = if select {
                self.selection.insert(key)
            } else {
                self.selection.remove(&key)
            };
            self.dirty |= changed;
        }
        self.mark(top, catalog)
    }

    /// Clears the whole selection.
    pub fn clear(&mut self) {
        if !self.selection.is_empty() {
            self.selection.clear();
            self.dirty = true;
        }
    }

    /// Summarizes the selection of `top` over its selectable sub-platforms.
    #[must_use]
    pub fn mark(&self, top: &str, catalog: &DomainCatalog) -> Mark {
        let (mut selectable, mut selected) = (0, 0);
        for sub in catalog.sub_platforms(top) {
            if !self.ownership(sub).is_selectable() {
                continue;
            }
            selectable += 1;
            if self.is_selected(top, sub) {
                selected += 1;
            }
        }
        match selected {
            0 => Mark::None,
            n if n == selectable => Mark::All,
            _ => Mark::Partial,
        }
    }

    /// Reconciles `file` against the selection and saves it when anything
    /// changed, then re-seeds the session from the new file contents.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::EmptyIdentifier`] for a blank target, or
    /// [`ManagerError::Io`] if the file cannot be written.
    pub fn save(
        &mut self,
        file: &mut ResolverFile,
        catalog: &DomainCatalog,
    ) -> Result<ReconcileReport> {
        let report = reconcile(file, &self.target, &self.selection, catalog)?;
        if !report.is_noop() {
            file.save()?;
            *self = Self::open(self.target.clone(), file.assignments(), catalog);
        }
        self.dirty = false;
        Ok(report)
    }

    fn ensure_selectable(&self, sub: &str) -> Result<()> {
        if self.ownership(sub).is_selectable() {
            return Ok(());
        }
        let owner = self
            .assignments
            .get(sub)
            .map(ToString::to_string)
            .unwrap_or_default();
        Err(ManagerError::Conflict {
            sub_platform: sub.to_string(),
            owner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::parse_assignments;

    fn catalog() -> DomainCatalog {
        DomainCatalog::from_yaml(
            "USA:\n  Netflix:\n    - netflix.com\n  Hulu:\n    - hulu.com\n  Max:\n    - max.com\nHK:\n  ViuTV:\n    - viu.tv\n",
        )
        .unwrap()
    }

    fn assignments() -> AssignmentTable {
        parse_assignments(&[
            "#> Netflix us",
            "nameserver /netflix.com/us",
            "",
            "#> Hulu hk",
            "nameserver /hulu.com/hk",
            "",
        ])
    }

    #[test]
    fn open_seeds_owned_entries() {
        let s = Session::open(Target::nameserver("US"), assignments(), &catalog());
        assert!(s.is_selected("USA", "Netflix"));
        assert!(!s.is_selected("USA", "Hulu"));
        assert!(!s.is_dirty());
    }

    #[test]
    fn conflicting_entry_is_refused() {
        let mut s = Session::open(Target::nameserver("us"), assignments(), &catalog());
        let err = s.toggle("USA", "Hulu").unwrap_err();
        assert!(matches!(err, ManagerError::Conflict { ref sub_platform, .. } if sub_platform == "Hulu"));
        assert!(!s.is_selected("USA", "Hulu"));
        assert!(!s.is_dirty());
    }

    #[test]
    fn toggle_flips_and_marks_dirty() {
        let mut s = Session::open(Target::nameserver("us"), assignments(), &catalog());
        assert!(s.toggle("USA", "Max").unwrap());
        assert!(s.is_dirty());
        assert!(!s.toggle("USA", "Max").unwrap());
        assert!(!s.is_selected("USA", "Max"));
    }

    #[test]
    fn toggle_top_skips_conflicts() {
        let cat = catalog();
        let mut s = Session::open(Target::nameserver("us"), assignments(), &cat);
        assert_eq!(s.mark("USA", &cat), Mark::Partial);
        assert_eq!(s.toggle_top("USA", &cat), Mark::All);
        assert!(s.is_selected("USA", "Max"));
        assert!(!s.is_selected("USA", "Hulu"));
        assert_eq!(s.toggle_top("USA", &cat), Mark::None);
        assert!(!s.is_selected("USA", "Netflix"));
        assert_eq!(s.mark("HK", &cat), Mark::None);
    }

    #[test]
    fn save_rewrites_and_reseeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smartdns.conf");
        std::fs::write(
            &path,
            "server 8.8.8.8\n#> Netflix us\nnameserver /netflix.com/us\n\n",
        )
        .unwrap();
        let cat = catalog();
        let mut file = ResolverFile::open(&path).unwrap();
        let mut s = Session::open(Target::nameserver("us"), file.assignments(), &cat);
        s.set_selected("USA", "Netflix", false).unwrap();
        s.set_selected("HK", "ViuTV", true).unwrap();

        let report = s.save(&mut file, &cat).unwrap();
        assert_eq!(report.changed, 2);
        assert!(!s.is_dirty());
        assert!(s.is_selected("HK", "ViuTV"));
        assert!(!s.is_selected("USA", "Netflix"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "server 8.8.8.8\n#> ViuTV us\nnameserver /viu.tv/us\n\n"
        );

        let again = s.save(&mut file, &cat).unwrap();
        assert!(again.is_noop());
    }
}
