//! Ownership classification of sub-platforms against a target.

use crate::assignment::{AssignmentTable, Target};

/// Who currently holds a sub-platform, relative to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// No managed block exists for the sub-platform.
    Free,
    /// The block routes to the target.
    OwnedByTarget,
    /// The block routes somewhere else, or is malformed.
    OwnedByOther,
}

impl Ownership {
    /// `OwnedByOther` entries must not be selected for the target.
    #[must_use]
    pub const fn is_selectable(self) -> bool {
        !matches!(self, Self::OwnedByOther)
    }
}

/// Classifies `sub_platform` against `target`.
#[must_use]
pub fn classify(sub_platform: &str, table: &AssignmentTable, target: &Target) -> Ownership {
    match table.get(sub_platform) {
        None => Ownership::Free,
        Some(assignment) if target.matches(assignment) => Ownership::OwnedByTarget,
        Some(_) => Ownership::OwnedByOther,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::parse_assignments;

    fn table() -> AssignmentTable {
        parse_assignments(&[
            "#> Netflix US",
            "nameserver /netflix.com/US",
            "",
            "#> Disney 203.0.113.5",
            "address /disneyplus.com/203.0.113.5",
            "",
            "#> Hulu us",
            "",
        ])
    }

    #[test]
    fn free_when_absent() {
        assert_eq!(
            classify("Max", &table(), &Target::nameserver("us")),
            Ownership::Free
        );
    }

    #[test]
    fn group_names_ignore_case() {
        assert_eq!(
            classify("Netflix", &table(), &Target::nameserver("us")),
            Ownership::OwnedByTarget
        );
    }

    #[test]
    fn other_method_or_identifier_is_other() {
        let t = table();
        assert_eq!(
            classify("Netflix", &t, &Target::nameserver("hk")),
            Ownership::OwnedByOther
        );
        assert_eq!(
            classify("Netflix", &t, &Target::address("US")),
            Ownership::OwnedByOther
        );
        assert_eq!(
            classify("Disney", &t, &Target::address("203.0.113.5")),
            Ownership::OwnedByTarget
        );
        assert_eq!(
            classify("Disney", &t, &Target::nameserver("203.0.113.5")),
            Ownership::OwnedByOther
        );
    }

    #[test]
    fn malformed_block_is_other() {
        let ownership = classify("Hulu", &table(), &Target::nameserver("us"));
        assert_eq!(ownership, Ownership::OwnedByOther);
        assert!(!ownership.is_selectable());
    }
}
