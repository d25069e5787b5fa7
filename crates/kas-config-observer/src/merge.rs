//! Owned-path diffing and fragment merging
//!
//! Observers build a candidate [`PathTree`] from upstream state and use
//! [`diff_and_build`] to turn it into the fragment they return plus a
//! single "changed" verdict used to decide whether to emit an event.
//! The registry uses [`merge_owned`] to fold all fragments back into the
//! next committed tree.

use crate::error::Result;
use crate::path_tree::{PathTree, StaticPath};
use std::collections::BTreeSet;

/// Top-level key holding command-line arguments of the managed workload
pub const API_SERVER_ARGUMENTS: &str = "apiServerArguments";

/// Fragment built from a candidate and whether it differs from existing
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub fragment: PathTree,
    pub changed: bool,
}

/// Compare the owned paths of `candidate` with `existing`
///
/// The comparison is deep and order-sensitive; an empty sequence counts
/// as absent. The returned fragment holds only the owned paths present
/// in the candidate.
pub fn diff_and_build(
    existing: &PathTree,
    candidate: &PathTree,
    owned: &[StaticPath],
) -> Result<MergeOutcome> {
    let fragment = candidate.pruned_to(owned)?;

    let mut changed = false;
    for path in owned {
        let current = existing.get_list(path)?.filter(|values| !values.is_empty());
        let desired = fragment.get_list(path)?;
        if current != desired {
            changed = true;
            break;
        }
    }

    Ok(MergeOutcome { fragment, changed })
}

/// Sorted, de-duplicated union of `existing` and `own`
pub fn union_sorted<S: AsRef<str>>(existing: &[String], own: &[S]) -> Vec<String> {
    existing
        .iter()
        .map(String::as_str)
        .chain(own.iter().map(AsRef::as_ref))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// `existing` with every entry of `own` removed, order preserved
pub fn retract<S: AsRef<str>>(existing: &[String], own: &[S]) -> Vec<String> {
    existing
        .iter()
        .filter(|entry| !own.iter().any(|o| o.as_ref() == entry.as_str()))
        .cloned()
        .collect()
}

/// Fold observer fragments into `existing`
///
/// Every owned path is first cleared from a copy of `existing`, so paths
/// nobody owns carry through untouched; each fragment is then pruned to
/// its owned paths and merged in.
pub fn merge_owned<'a, I>(existing: &PathTree, contributions: I) -> Result<PathTree>
where
    I: IntoIterator<Item = (&'a [StaticPath], &'a PathTree)>,
{
    let contributions: Vec<_> = contributions.into_iter().collect();

    let mut merged = existing.clone();
    for (owned, _) in &contributions {
        for path in owned.iter() {
            merged.remove(path);
        }
    }
    for (owned, fragment) in contributions {
        merged.merge_from(&fragment.pruned_to(owned)?);
    }

    Ok(merged.pruned())
}
