//! Exporter ordering and assignability (§4.4.3): a stable comparator ranks approved candidates,
//! and a separate predicate decides which of them can actually be bound right now.

use std::cmp::Ordering;

use crate::policy::ApprovedExporter;

/// Strict total order, stable for ties (§8 invariant): no-existing-lease before
/// existing-lease, non-spot before spot, higher priority first, exporter name ascending.
pub fn order_candidates(candidates: &mut [ApprovedExporter]) {
    candidates.sort_by(compare);
}

fn compare(a: &ApprovedExporter, b: &ApprovedExporter) -> Ordering {
    let has_lease_a = a.existing_lease.is_some();
    let has_lease_b = b.existing_lease.is_some();
    has_lease_a
        .cmp(&has_lease_b)
        .then_with(|| a.policy.spot_access.cmp(&b.policy.spot_access))
        .then_with(|| b.policy.priority.cmp(&a.policy.priority))
        .then_with(|| a.exporter.meta.name.cmp(&b.exporter.meta.name))
}

/// An approved candidate is assignable iff the exporter is online and either it has no
/// existing lease, or the candidate's policy grants spot access (in which case the existing
/// lease is preempted by the caller via `spec.release=true`).
pub fn assignable(candidate: &ApprovedExporter) -> bool {
    candidate.exporter.status.online()
        && (candidate.existing_lease.is_none() || candidate.policy.spot_access)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Exporter, Lease, LeaseSpec, LeaseStatus, ObjectMeta, PolicyEntry};

    fn exporter(name: &str, online: bool) -> Exporter {
        let mut e = Exporter {
            meta: ObjectMeta::new("lab1", name),
            username_override: None,
            status: Default::default(),
        };
        if online {
            crate::model::set_condition(
                &mut e.status.conditions,
                crate::model::Condition::new(crate::model::CONDITION_ONLINE, true, "Connect", ""),
            );
        }
        e
    }

    fn lease_stub() -> Lease {
        Lease {
            meta: ObjectMeta::new("lab1", "existing"),
            spec: LeaseSpec::default(),
            status: LeaseStatus::default(),
        }
    }

    fn candidate(
        name: &str,
        online: bool,
        priority: i64,
        spot: bool,
        with_existing_lease: bool,
    ) -> ApprovedExporter {
        ApprovedExporter {
            policy: PolicyEntry {
                priority,
                from: vec![],
                maximum_duration_seconds: None,
                spot_access: spot,
            },
            exporter: exporter(name, online),
            existing_lease: with_existing_lease.then(lease_stub),
        }
    }

    #[test]
    fn free_candidate_sorts_before_leased_candidate() {
        let mut cands = vec![
            candidate("e2", true, 0, false, true),
            candidate("e1", true, 0, false, false),
        ];
        order_candidates(&mut cands);
        assert_eq!(cands[0].exporter.meta.name, "e1");
    }

    #[test]
    fn non_spot_sorts_before_spot() {
        let mut cands = vec![
            candidate("e1", true, 0, true, false),
            candidate("e2", true, 0, false, false),
        ];
        order_candidates(&mut cands);
        assert_eq!(cands[0].exporter.meta.name, "e2");
    }

    #[test]
    fn higher_priority_sorts_first() {
        let mut cands = vec![
            candidate("e1", true, 1, false, false),
            candidate("e2", true, 5, false, false),
        ];
        order_candidates(&mut cands);
        assert_eq!(cands[0].exporter.meta.name, "e2");
    }

    #[test]
    fn name_is_the_final_tiebreak() {
        let mut cands = vec![
            candidate("b", true, 0, false, false),
            candidate("a", true, 0, false, false),
        ];
        order_candidates(&mut cands);
        assert_eq!(cands[0].exporter.meta.name, "a");
    }

    #[test]
    fn order_is_a_strict_total_order_across_all_four_keys() {
        let mut cands = vec![
            candidate("z", true, 1, true, true),
            candidate("a", true, 10, false, false),
            candidate("m", true, 1, false, false),
            candidate("b", true, 1, false, true),
        ];
        order_candidates(&mut cands);
        let names: Vec<_> = cands.iter().map(|c| c.exporter.meta.name.clone()).collect();
        assert_eq!(names, vec!["a", "m", "b", "z"]);
    }

    #[test]
    fn offline_candidate_is_never_assignable() {
        let c = candidate("e1", false, 0, false, false);
        assert!(!assignable(&c));
    }

    #[test]
    fn leased_non_spot_candidate_is_not_assignable() {
        let c = candidate("e1", true, 0, false, true);
        assert!(!assignable(&c));
    }

    #[test]
    fn leased_spot_candidate_is_assignable_via_preemption() {
        let c = candidate("e1", true, 0, true, true);
        assert!(assignable(&c));
    }

    #[test]
    fn free_online_candidate_is_assignable() {
        let c = candidate("e1", true, 0, false, false);
        assert!(assignable(&c));
    }
}
