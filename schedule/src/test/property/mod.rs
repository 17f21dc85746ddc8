//! Property tests for split normalization.

use proptest::prelude::*;

use fresco_ir::schedule::{Schedule, Split};

use crate::lower::nest::normalize_splits;

/// One schedule-surgery step to apply to a random live dim.
#[derive(Debug, Clone)]
enum Surgery {
    /// Split the dim at `index % live_dims` by the factor.
    Split { index: usize, factor: i64 },
    /// Fuse the dim at `index % (live_dims - 1)` with its neighbor.
    Fuse { index: usize },
}

fn surgery_strategy() -> impl Strategy<Value = Vec<Surgery>> {
    let step = prop_oneof![
        3 => (0usize..8, 2i64..64).prop_map(|(index, factor)| Surgery::Split { index, factor }),
        1 => (0usize..8).prop_map(|index| Surgery::Fuse { index }),
    ];
    proptest::collection::vec(step, 0..8)
}

/// Build a well-formed (possibly deeply chained) split list by driving the
/// schedule API the way a user would.
fn apply_surgery(steps: &[Surgery]) -> Vec<Split> {
    let mut schedule = Schedule::for_args(&["x", "y", "z"]);
    let mut counter = 0usize;
    for step in steps {
        // Real dims only; leave the synthetic outermost alone.
        let live = schedule.dims.len() - 1;
        match step {
            Surgery::Split { index, factor } => {
                let old = schedule.dims[index % live].var.clone();
                let outer = format!("o{counter}");
                let inner = format!("i{counter}");
                counter += 1;
                schedule.split(&old, outer, inner, *factor);
            }
            Surgery::Fuse { index } if live >= 2 => {
                let a = schedule.dims[index % (live - 1)].var.clone();
                let b = schedule.dims[index % (live - 1) + 1].var.clone();
                let fused = format!("f{counter}");
                counter += 1;
                schedule.fuse(&a, &b, fused);
            }
            Surgery::Fuse { .. } => {}
        }
    }
    schedule.splits
}

proptest! {
    /// Normalizing twice is the same as normalizing once.
    #[test]
    fn normalization_is_idempotent(steps in surgery_strategy()) {
        let splits = apply_surgery(&steps);
        let once = normalize_splits(&splits);
        let twice = normalize_splits(&once);
        prop_assert_eq!(once, twice);
    }

    /// After normalization no split consumes a variable that a later split
    /// derives: derivations come strictly before uses.
    #[test]
    fn normalized_derivations_precede_uses(steps in surgery_strategy()) {
        let splits = apply_surgery(&steps);
        let normalized = normalize_splits(&splits);
        for i in 0..normalized.len() {
            for j in i + 1..normalized.len() {
                prop_assert_ne!(
                    &normalized[i].outer, &normalized[j].old,
                    "split {} consumes a variable split {} derives", i, j
                );
            }
        }
    }

    /// Normalization never invents or drops work: the set of consumed
    /// original variables is preserved.
    #[test]
    fn normalization_preserves_original_vars(steps in surgery_strategy()) {
        let splits = apply_surgery(&steps);
        let originals = |list: &[Split]| {
            let mut names: Vec<String> = list
                .iter()
                .filter(|s| ["x", "y", "z"].contains(&s.old.as_str()))
                .map(|s| s.old.clone())
                .collect();
            names.sort();
            names
        };
        prop_assert_eq!(originals(&splits), originals(&normalize_splits(&splits)));
    }
}
