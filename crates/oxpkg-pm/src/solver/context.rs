use std::collections::{BTreeMap, HashMap, HashSet};

use indexmap::IndexMap;
use oxpkg_fmri::{Constraint, Fmri};

use crate::actions::DependencyAction;
use crate::catalog::PackageState;
use crate::solver::trim::TrimReason;

/// Key for one cached version partition: target, policy, whether obsolete
/// candidates count as matches, and whether trimmed candidates do.
pub(crate) type PartitionKey = (Fmri, Constraint, bool, bool);

/// Mutable working state of one resolution session.
///
/// The trim map is append-only and in insertion order, so diagnostics come
/// out chronologically.  Caches of derived sets are only consulted once
/// `trim_done` is set; before that, trimming may still change any answer.
#[derive(Default)]
pub(crate) struct ResolutionContext {
    trim: IndexMap<Fmri, Vec<TrimReason>>,
    pub(crate) trim_done: bool,

    pub(crate) partition_cache: HashMap<PartitionKey, (Vec<Fmri>, Vec<Fmri>)>,
    pub(crate) candidate_cache: HashMap<String, Vec<Fmri>>,
    pub(crate) dep_cache: HashMap<Fmri, Vec<DependencyAction>>,
    pub(crate) state_cache: HashMap<Fmri, PackageState>,
    pub(crate) publisher_filtered: HashSet<String>,

    /// Candidate universe for the current solve, per stem, each list in
    /// descending-version order.
    pub(crate) possible: BTreeMap<String, Vec<Fmri>>,

    // fmri <-> variable bijection, assigned once the universe is final
    id_to_fmri: Vec<Fmri>,
    fmri_to_id: HashMap<Fmri, usize>,
    stem_ranges: HashMap<String, (usize, usize)>,
}

impl ResolutionContext {
    pub(crate) fn trim(&mut self, fmri: &Fmri, reason: TrimReason) {
        self.trim.entry(fmri.clone()).or_default().push(reason);
    }

    pub(crate) fn trim_all<I>(&mut self, fmris: I, reason: TrimReason)
    where
        I: IntoIterator<Item = Fmri>,
    {
        for fmri in fmris {
            self.trim(&fmri, reason.clone());
        }
    }

    pub(crate) fn is_trimmed(&self, fmri: &Fmri) -> bool {
        self.trim.contains_key(fmri)
    }

    pub(crate) fn reasons(&self, fmri: &Fmri) -> &[TrimReason] {
        self.trim.get(fmri).map_or(&[], Vec::as_slice)
    }

    /// Finalize trimming; derived-set caching is only sound from here on.
    pub(crate) fn mark_trim_done(&mut self) {
        self.trim_done = true;
    }

    /// Assign variable ids over the finalized universe: stems in ascending
    /// name order, each stem's versions in descending order, so contiguous
    /// id blocks correspond to one stem.
    pub(crate) fn assign_ids(&mut self) {
        self.id_to_fmri.clear();
        self.fmri_to_id.clear();
        self.stem_ranges.clear();
        let mut next = 1usize;
        for (stem, fmris) in &self.possible {
            let start = next;
            for fmri in fmris {
                self.fmri_to_id.insert(fmri.clone(), next);
                self.id_to_fmri.push(fmri.clone());
                next += 1;
            }
            self.stem_ranges.insert(stem.clone(), (start, next));
        }
    }

    pub(crate) fn variable_count(&self) -> usize {
        self.id_to_fmri.len()
    }

    pub(crate) fn id_of(&self, fmri: &Fmri) -> Option<usize> {
        self.fmri_to_id.get(fmri).copied()
    }

    pub(crate) fn fmri_of(&self, id: usize) -> &Fmri {
        &self.id_to_fmri[id - 1]
    }

    /// The contiguous id range `[start, end)` of a stem's candidates.
    pub(crate) fn stem_range(&self, stem: &str) -> Option<(usize, usize)> {
        self.stem_ranges.get(stem).copied()
    }

    /// Drop the bulk caches at end of session; trim records and the
    /// variable mapping stay around for diagnostics.
    pub(crate) fn release_caches(&mut self) {
        self.partition_cache = HashMap::new();
        self.candidate_cache = HashMap::new();
        self.dep_cache = HashMap::new();
        self.state_cache = HashMap::new();
        self.publisher_filtered = HashSet::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmri(s: &str) -> Fmri {
        s.parse().unwrap()
    }

    #[test]
    fn test_trim_is_append_only() {
        let mut ctx = ResolutionContext::default();
        let a = fmri("a@1.0");
        assert!(!ctx.is_trimmed(&a));
        ctx.trim(&a, TrimReason::ExcludedByRequest);
        ctx.trim(&a, TrimReason::PublisherLowerRanked);
        assert!(ctx.is_trimmed(&a));
        assert_eq!(ctx.reasons(&a).len(), 2);
    }

    #[test]
    fn test_id_assignment_order() {
        let mut ctx = ResolutionContext::default();
        ctx.possible.insert(
            "b".to_string(),
            vec![fmri("b@2.0"), fmri("b@1.0")],
        );
        ctx.possible.insert(
            "a".to_string(),
            vec![fmri("a@3.0"), fmri("a@2.0"), fmri("a@1.0")],
        );
        ctx.assign_ids();

        assert_eq!(ctx.variable_count(), 5);
        // stems ascending, versions descending within each block
        assert_eq!(ctx.id_of(&fmri("a@3.0")), Some(1));
        assert_eq!(ctx.id_of(&fmri("a@1.0")), Some(3));
        assert_eq!(ctx.id_of(&fmri("b@2.0")), Some(4));
        assert_eq!(ctx.stem_range("a"), Some((1, 4)));
        assert_eq!(ctx.stem_range("b"), Some((4, 6)));
        assert_eq!(ctx.fmri_of(5), &fmri("b@1.0"));
    }
}
