//! Conflict-free batch construction for the system scheduler.

use crate::system::SystemAccess;

/// Partition systems into conflict-free batches by greedy first-fit over
/// the registration order: each system joins the first batch where no
/// member's access conflicts with its own, or opens a new batch.
///
/// Returns positions into `accesses`; callers map them back to their own
/// system indices. Recomputed whenever the system set changes.
pub(crate) fn build_batches(accesses: &[SystemAccess]) -> Vec<Vec<usize>> {
    let mut batches: Vec<Vec<usize>> = Vec::new();

    for (pos, access) in accesses.iter().enumerate() {
        let fit = batches.iter_mut().find(|batch| {
            batch
                .iter()
                .all(|&member| !accesses[member].conflicts_with(access))
        });
        match fit {
            Some(batch) => batch.push(pos),
            None => batches.push(vec![pos]),
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ComponentId;

    fn id(n: u32) -> ComponentId {
        ComponentId(n)
    }

    #[test]
    fn test_disjoint_systems_share_a_batch() {
        let accesses = vec![
            SystemAccess::empty().write(id(0)),
            SystemAccess::empty().write(id(1)),
            SystemAccess::empty().read(id(0)).read(id(1)),
        ];
        let batches = build_batches(&accesses);

        assert_eq!(batches[0], vec![0, 1]);
        assert_eq!(batches[1], vec![2]);
    }

    #[test]
    fn test_opposed_writers_split() {
        // Sa writes A reads B; Sb writes B reads A: must not share a batch
        let accesses = vec![
            SystemAccess::empty().write(id(0)).read(id(1)),
            SystemAccess::empty().write(id(1)).read(id(0)),
        ];
        let batches = build_batches(&accesses);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_batches_are_pairwise_conflict_free() {
        let accesses = vec![
            SystemAccess::empty().write(id(0)),
            SystemAccess::empty().read(id(0)).write(id(1)),
            SystemAccess::empty().read(id(1)),
            SystemAccess::empty().write(id(2)),
            SystemAccess::empty().read(id(2)).read(id(0)),
        ];
        let batches = build_batches(&accesses);

        for batch in &batches {
            for (i, &a) in batch.iter().enumerate() {
                for &b in &batch[i + 1..] {
                    assert!(
                        !accesses[a].conflicts_with(&accesses[b]),
                        "systems {a} and {b} conflict within a batch"
                    );
                }
            }
        }
    }
}
