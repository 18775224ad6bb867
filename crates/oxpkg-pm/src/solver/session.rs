use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::time::Instant;

use oxpkg_fmri::{Constraint, Fmri};

use crate::actions::{DependKind, DependencyAction, VariantContext};
use crate::catalog::{Catalog, Freeze, PackageState, PublisherRank, Variants};
use crate::error::{Result, SolverError};
use crate::progress::ProgressSink;
use crate::solver::context::ResolutionContext;
use crate::solver::engine::SatEngine;
use crate::solver::trim::TrimReason;

/// Runaway guard on the extremal search loop.
const MAX_ITERATIONS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    NotYetDetermined,
    Failed,
    Succeeded,
}

/// One dependency-resolution session.
///
/// A session is single-use: construct it with the image state, call exactly
/// one of the `solve_*` operations, then discard it.  After completion the
/// engine and bulk caches are released; the trim records, counters, and
/// timings stay available through [`Display`] for failure reporting.
///
/// [`Display`]: fmt::Display
pub struct Solver<'a> {
    catalog: &'a dyn Catalog,
    installed: BTreeMap<String, Fmri>,
    publisher_ranks: BTreeMap<String, PublisherRank>,
    publisher_pins: BTreeMap<String, String>,
    variants: VariantContext,
    progress: &'a dyn ProgressSink,

    ctx: ResolutionContext,
    engine: SatEngine,
    // installed fmris kept alive although the catalog no longer carries
    // them; their missing metadata must not trim them away
    installed_fallback: BTreeSet<Fmri>,
    unsatisfiable: bool,
    state: State,
    iterations: usize,
    clause_count: usize,
    timings: Vec<(String, f64)>,
    maintained_incorps: Vec<Fmri>,
}

impl<'a> Solver<'a> {
    pub fn new<I>(
        catalog: &'a dyn Catalog,
        installed: I,
        publisher_ranks: BTreeMap<String, PublisherRank>,
        variants: VariantContext,
        progress: &'a dyn ProgressSink,
    ) -> Self
    where
        I: IntoIterator<Item = Fmri>,
    {
        Self {
            catalog,
            installed: installed
                .into_iter()
                .map(|f| (f.stem.clone(), f))
                .collect(),
            publisher_ranks,
            publisher_pins: BTreeMap::new(),
            variants,
            progress,
            ctx: ResolutionContext::default(),
            engine: SatEngine::new(),
            installed_fallback: BTreeSet::new(),
            unsatisfiable: false,
            state: State::Init,
            iterations: 0,
            clause_count: 0,
            timings: Vec::new(),
            maintained_incorps: Vec::new(),
        }
    }

    /// Compute the image contents after installing the requested packages.
    ///
    /// `requested` holds name patterns, optionally pinned to a version or
    /// publisher; `reject` lists stems that must not appear in the result.
    pub fn solve_install(
        &mut self,
        requested: &[Fmri],
        reject: &BTreeSet<String>,
        freezes: &[Freeze],
    ) -> Result<BTreeSet<Fmri>> {
        self.begin();
        let result = self.run_install(requested, reject, freezes);
        self.finish(result)
    }

    /// Compute the image contents after updating everything installed to
    /// the newest allowed versions.
    pub fn solve_update_all(&mut self, freezes: &[Freeze]) -> Result<BTreeSet<Fmri>> {
        self.begin();
        let result = self.run_update(freezes);
        self.finish(result)
    }

    /// Compute the image contents after removing the named packages.  No
    /// SAT search is involved; this is pure graph reachability over the
    /// installed set, and it is all-or-nothing.
    pub fn solve_uninstall(
        &mut self,
        removal: &[Fmri],
        recursive: bool,
    ) -> Result<BTreeSet<Fmri>> {
        self.begin();
        let result = self.run_uninstall(removal, recursive);
        self.finish(result)
    }

    /// Compute the image contents under a new variant context, forcing a
    /// full re-validation of every surviving package's dependency graph.
    pub fn solve_change_varcets(
        &mut self,
        new_variants: VariantContext,
    ) -> Result<BTreeSet<Fmri>> {
        self.begin();
        let result = self.run_change_varcets(&new_variants);
        self.finish(result)
    }

    fn begin(&mut self) {
        assert!(
            self.state == State::Init,
            "solver sessions are single-use; construct a new one per operation"
        );
        self.state = State::NotYetDetermined;
    }

    fn finish(&mut self, result: Result<BTreeSet<Fmri>>) -> Result<BTreeSet<Fmri>> {
        self.state = if result.is_ok() {
            State::Succeeded
        } else {
            State::Failed
        };
        // release the engine and bulk caches; trim records stay for reports
        self.engine = SatEngine::new();
        self.ctx.release_caches();
        result
    }

    fn check_cancel(&self) -> Result<()> {
        if self.progress.canceled() {
            Err(SolverError::Canceled)
        } else {
            Ok(())
        }
    }

    fn record_phase(&mut self, name: &str, start: Instant) {
        let secs = start.elapsed().as_secs_f64();
        log::debug!("phase {name} finished in {secs:.3}s");
        self.timings.push((name.to_string(), secs));
    }

    // --- install -----------------------------------------------------

    fn run_install(
        &mut self,
        requested: &[Fmri],
        reject: &BTreeSet<String>,
        freezes: &[Freeze],
    ) -> Result<BTreeSet<Fmri>> {
        // explicit publisher selections become sticky for their stem
        for pattern in requested {
            if let Some(publisher) = &pattern.publisher {
                self.publisher_pins
                    .insert(pattern.stem.clone(), publisher.clone());
            }
        }

        let mut proposed: BTreeMap<String, Vec<Fmri>> = BTreeMap::new();
        for pattern in requested {
            if reject.contains(&pattern.stem) {
                return Err(SolverError::PlanCreation {
                    no_version: vec![pattern.to_string()],
                    diagnostics: vec![
                        "this package was requested and rejected at the same time".to_string(),
                    ],
                });
            }
            let matches = self.match_pattern(pattern)?;
            match proposed.entry(pattern.stem.clone()) {
                Entry::Vacant(e) => {
                    e.insert(matches);
                }
                Entry::Occupied(mut e) => {
                    e.get_mut().retain(|f| matches.contains(f));
                    if e.get().is_empty() {
                        return Err(SolverError::PlanCreation {
                            no_version: vec![pattern.to_string()],
                            diagnostics: vec![
                                "conflicting version requests for this package".to_string(),
                            ],
                        });
                    }
                }
            }
        }
        self.run_install_proposed(proposed, reject, freezes)
    }

    /// The install pipeline proper, over an already-matched request.  Each
    /// proposed entry holds the exact candidate set its stem may resolve
    /// to; callers that must not allow version drift pass singletons.
    fn run_install_proposed(
        &mut self,
        mut proposed: BTreeMap<String, Vec<Fmri>>,
        reject: &BTreeSet<String>,
        freezes: &[Freeze],
    ) -> Result<BTreeSet<Fmri>> {
        let start = Instant::now();

        self.check_cancel()?;
        self.trim_phase(&mut proposed, reject, freezes)?;
        self.ctx.mark_trim_done();
        self.record_phase("trimming", start);

        self.check_cancel()?;
        let start = Instant::now();
        let mut seeds: Vec<Fmri> = Vec::new();
        for stem in self.installed.keys().cloned().collect::<Vec<_>>() {
            if reject.contains(&stem) {
                continue;
            }
            let live: Vec<Fmri> = self
                .stem_candidates(&stem)
                .into_iter()
                .filter(|c| !self.ctx.is_trimmed(c))
                .collect();
            seeds.extend(live);
        }
        for matches in proposed.values() {
            seeds.extend(matches.iter().cloned());
        }
        self.build_possible(seeds);
        self.record_phase("closure", start);

        self.check_cancel()?;
        let start = Instant::now();
        self.ctx.assign_ids();
        self.gen_clauses();
        self.record_phase("clauses", start);

        // checkpoint before the continuity clauses; the optimization
        // phases rebuild from here with different pins
        let checkpoint = self.engine.clone();
        let saved_unsat = self.unsatisfiable;

        self.check_cancel()?;
        let start = Instant::now();
        self.add_continuity_clauses(&proposed, reject);
        let saved_solution = match self.solve_extremal(false) {
            Ok(solution) => solution,
            Err(_) => return Err(self.failure_diagnostics(&proposed, &checkpoint, saved_unsat)),
        };
        self.record_phase("solve", start);

        // nothing to do if the model is exactly the surviving image
        let installed_set: BTreeSet<Fmri> = self
            .installed
            .iter()
            .filter(|(stem, _)| !reject.contains(*stem))
            .map(|(_, f)| f.clone())
            .collect();
        let solution_set: BTreeSet<Fmri> = saved_solution.iter().cloned().collect();
        if solution_set == installed_set {
            let result = self.drop_obsolete(saved_solution);
            return Ok(self.elide_renames(&result));
        }

        self.check_cancel()?;
        let start = Instant::now();
        // pin the requested stems to their chosen versions, then find the
        // oldest-biased footprint to spot incidental upgrades
        self.restore(&checkpoint, saved_unsat);
        self.add_continuity_clauses(&proposed, reject);
        self.pin_requested(&proposed, &saved_solution);
        let oldest = self.solve_extremal(true)?;

        // installed versions the oldest model proves sufficient stay put;
        // everything else moves to its newest allowed version
        self.restore(&checkpoint, saved_unsat);
        self.add_continuity_clauses(&proposed, reject);
        self.pin_requested(&proposed, &saved_solution);
        for fmri in &oldest {
            if self.installed.get(&fmri.stem) == Some(fmri) {
                if let Some(id) = self.ctx.id_of(fmri) {
                    self.add_clause(&[id as i32]);
                }
            }
        }
        let final_solution = self.solve_extremal(false)?;
        self.record_phase("optimize", start);

        let result = self.drop_obsolete(final_solution);
        Ok(self.elide_renames(&result))
    }

    fn trim_phase(
        &mut self,
        proposed: &mut BTreeMap<String, Vec<Fmri>>,
        reject: &BTreeSet<String>,
        freezes: &[Freeze],
    ) -> Result<()> {
        // rejected stems leave the image entirely
        for stem in reject {
            let candidates = self.stem_candidates(stem);
            self.ctx.trim_all(candidates, TrimReason::RejectedByRequest);
        }

        // candidates older than what is already installed
        for (stem, installed) in self.installed.clone() {
            if reject.contains(&stem) {
                continue;
            }
            let older: Vec<Fmri> = self
                .stem_candidates(&stem)
                .into_iter()
                .filter(|c| c.version < installed.version)
                .collect();
            self.ctx
                .trim_all(older, TrimReason::OlderThanInstalled(installed));
        }

        // a request pins its stem: every candidate outside the matched set
        // is excluded, and obsolete candidates never satisfy a request
        for stem in proposed.keys().cloned().collect::<Vec<_>>() {
            let matches = proposed[&stem].clone();
            let wanted: Vec<Fmri> = matches
                .iter()
                .filter(|m| !self.state_of(m).obsolete)
                .cloned()
                .collect();
            if wanted.is_empty() {
                return Err(SolverError::PlanCreation {
                    no_version: vec![stem.clone()],
                    diagnostics: vec![format!(
                        "every matching version of '{stem}' is marked obsolete"
                    )],
                });
            }
            let excluded: Vec<Fmri> = self
                .stem_candidates(&stem)
                .into_iter()
                .filter(|c| !wanted.contains(c))
                .collect();
            self.ctx.trim_all(excluded, TrimReason::ExcludedByRequest);
            proposed.insert(stem, wanted);
        }

        // incorporations being installed constrain their families now,
        // recursively through incorporations they in turn pin
        for matches in proposed.values().cloned().collect::<Vec<_>>() {
            let incorps: Vec<Fmri> = matches
                .iter()
                .filter(|m| self.has_incorporate_deps(m))
                .cloned()
                .collect();
            if !incorps.is_empty() {
                self.trim_recursive_incorps(incorps, TrimReason::ProposedIncorporation);
            }
        }

        // installed incorporations not overridden by the request hold
        // their families fixed
        let mut constrained: BTreeSet<String> = proposed.keys().cloned().collect();
        constrained.extend(reject.iter().cloned());
        for matches in proposed.values().cloned().collect::<Vec<_>>() {
            for fmri in matches {
                for dep in self.applicable_deps(&fmri) {
                    if dep.target.version.is_some() {
                        constrained.insert(dep.target.stem.clone());
                    }
                }
            }
        }
        for (stem, fmri) in self.installed.clone() {
            if constrained.contains(&stem) {
                continue;
            }
            if self.has_incorporate_deps(&fmri) {
                self.maintained_incorps.push(fmri.clone());
                self.trim_recursive_incorps(vec![fmri], TrimReason::UnboundIncorporation);
            }
        }

        for freeze in freezes {
            if freeze.fmri.version.is_none() {
                continue;
            }
            let (_, nonmatching) = self.partition(&freeze.fmri, Constraint::Auto, true, false);
            self.ctx.trim_all(
                nonmatching,
                TrimReason::Frozen(freeze.fmri.clone(), freeze.reason.clone()),
            );
        }

        // requested packages must support the active variants
        for matches in proposed.values().cloned().collect::<Vec<_>>() {
            for fmri in matches {
                self.variant_ok(&fmri);
            }
        }

        // every requested stem must still have a live candidate
        for (stem, matches) in proposed.iter() {
            if matches.iter().all(|m| self.ctx.is_trimmed(m)) {
                let diagnostics = self.trim_lines(stem);
                return Err(SolverError::PlanCreation {
                    no_version: vec![stem.clone()],
                    diagnostics,
                });
            }
        }
        Ok(())
    }

    // --- update ------------------------------------------------------

    fn run_update(&mut self, freezes: &[Freeze]) -> Result<BTreeSet<Fmri>> {
        let start = Instant::now();
        for (stem, installed) in self.installed.clone() {
            let older: Vec<Fmri> = self
                .stem_candidates(&stem)
                .into_iter()
                .filter(|c| c.version < installed.version)
                .collect();
            self.ctx
                .trim_all(older, TrimReason::OlderThanInstalled(installed));
        }
        for freeze in freezes {
            if freeze.fmri.version.is_none() {
                continue;
            }
            let (_, nonmatching) = self.partition(&freeze.fmri, Constraint::Auto, true, false);
            self.ctx.trim_all(
                nonmatching,
                TrimReason::Frozen(freeze.fmri.clone(), freeze.reason.clone()),
            );
        }
        self.ctx.mark_trim_done();
        self.record_phase("trimming", start);

        self.check_cancel()?;
        let start = Instant::now();
        let mut seeds: Vec<Fmri> = Vec::new();
        for (stem, installed) in self.installed.clone() {
            let live: Vec<Fmri> = self
                .stem_candidates(&stem)
                .into_iter()
                .filter(|c| !self.ctx.is_trimmed(c))
                .collect();
            if live.is_empty() {
                // a publisher change may leave no catalog candidates at
                // all; what is on the system is still a valid answer,
                // even when its metadata is gone from the catalog
                self.installed_fallback.insert(installed.clone());
                seeds.push(installed);
            } else {
                seeds.extend(live);
            }
        }
        self.build_possible(seeds);
        self.record_phase("closure", start);

        self.check_cancel()?;
        let start = Instant::now();
        self.ctx.assign_ids();
        self.gen_clauses();
        self.record_phase("clauses", start);

        let checkpoint = self.engine.clone();
        let saved_unsat = self.unsatisfiable;
        let no_request = BTreeMap::new();

        self.check_cancel()?;
        let start = Instant::now();
        self.add_continuity_clauses(&no_request, &BTreeSet::new());
        let solution = match self.solve_extremal(false) {
            Ok(solution) => solution,
            Err(_) => {
                return Err(self.failure_diagnostics(&no_request, &checkpoint, saved_unsat))
            }
        };
        self.record_phase("solve", start);

        let result = self.drop_obsolete(solution);
        Ok(self.elide_renames(&result))
    }

    // --- uninstall ---------------------------------------------------

    fn run_uninstall(&mut self, removal: &[Fmri], recursive: bool) -> Result<BTreeSet<Fmri>> {
        let start = Instant::now();
        self.state = State::Failed;
        let installed_set: BTreeSet<Fmri> = self.installed.values().cloned().collect();
        let installed_set = self.elide_renames(&installed_set);

        let mut to_remove: BTreeSet<Fmri> = BTreeSet::new();
        for pattern in removal {
            let Some(installed) = self.installed.get(&pattern.stem).cloned() else {
                return Err(SolverError::PlanCreation {
                    no_version: vec![pattern.to_string()],
                    diagnostics: vec!["no version of this package is installed".to_string()],
                });
            };
            if pattern.version.is_some() && !installed.is_successor(pattern, Constraint::Auto) {
                return Err(SolverError::PlanCreation {
                    no_version: vec![pattern.to_string()],
                    diagnostics: vec![format!("installed version is {installed}")],
                });
            }
            to_remove.insert(installed);
        }

        if recursive {
            // close the removal set over reverse require edges
            loop {
                let removed_stems: BTreeSet<String> =
                    to_remove.iter().map(|f| f.stem.clone()).collect();
                let mut grew = false;
                for fmri in installed_set.iter().cloned().collect::<Vec<_>>() {
                    if to_remove.contains(&fmri) {
                        continue;
                    }
                    if self.required_removed_stem(&fmri, &removed_stems).is_some() {
                        to_remove.insert(fmri);
                        grew = true;
                    }
                }
                if !grew {
                    break;
                }
            }
        }

        // all-or-nothing: any surviving dependent blocks the whole removal
        let removed_stems: BTreeSet<String> = to_remove.iter().map(|f| f.stem.clone()).collect();
        let mut blocked: Option<String> = None;
        let mut dependents: Vec<String> = Vec::new();
        for fmri in installed_set.iter().cloned().collect::<Vec<_>>() {
            if to_remove.contains(&fmri) {
                continue;
            }
            if let Some(stem) = self.required_removed_stem(&fmri, &removed_stems) {
                if blocked.is_none() {
                    blocked = self
                        .installed
                        .get(&stem)
                        .map(ToString::to_string)
                        .or(Some(stem));
                }
                dependents.push(fmri.to_string());
            }
        }
        if let Some(fmri) = blocked {
            return Err(SolverError::NonLeafPackage { fmri, dependents });
        }

        let survivors: BTreeSet<Fmri> = installed_set.difference(&to_remove).cloned().collect();
        let result = self.elide_renames(&survivors);
        self.record_phase("uninstall", start);
        Ok(result)
    }

    /// The stem of a removed package this fmri still requires, if any.
    fn required_removed_stem(
        &mut self,
        fmri: &Fmri,
        removed: &BTreeSet<String>,
    ) -> Option<String> {
        self.applicable_deps(fmri)
            .into_iter()
            .find(|d| d.kind == DependKind::Require && removed.contains(&d.target.stem))
            .map(|d| d.target.stem)
    }

    // --- change variants/facets --------------------------------------

    fn run_change_varcets(&mut self, new_variants: &VariantContext) -> Result<BTreeSet<Fmri>> {
        self.state = State::Failed;
        let mut keep: Vec<Fmri> = Vec::new();
        for fmri in self.installed.values().cloned().collect::<Vec<_>>() {
            let variants = match self.catalog.variants(&fmri) {
                Ok(v) => v,
                Err(e) => {
                    self.ctx.trim(&fmri, TrimReason::InvalidData(e.message));
                    continue;
                }
            };
            let supported = new_variants
                .iter()
                .all(|(axis, value)| variants.get(axis).map_or(true, |vals| vals.contains(value)));
            if supported {
                keep.push(fmri);
            } else {
                log::info!("{fmri} does not support the new variant context; dropping");
            }
        }

        // re-validate everything that stays through a fresh install pass
        // under the new context, pinning each stem to exactly its kept
        // version so nothing upgrades as a side effect
        let mut inner = Solver::new(
            self.catalog,
            Vec::new(),
            self.publisher_ranks.clone(),
            new_variants.clone(),
            self.progress,
        );
        let proposed: BTreeMap<String, Vec<Fmri>> = keep
            .into_iter()
            .map(|f| (f.stem.clone(), vec![f]))
            .collect();
        inner.begin();
        let result = inner.run_install_proposed(proposed, &BTreeSet::new(), &[]);
        inner.finish(result)
    }

    // --- candidate universe ------------------------------------------

    /// All catalog fmris of a stem, newest first.  The first query for a
    /// stem also runs publisher filtering over it.
    fn stem_candidates(&mut self, stem: &str) -> Vec<Fmri> {
        if !self.ctx.candidate_cache.contains_key(stem) {
            let mut list: Vec<Fmri> = Vec::new();
            for (_, fmris) in self.catalog.candidates_by_version(stem) {
                list.extend(fmris);
            }
            self.ctx.candidate_cache.insert(stem.to_string(), list);
        }
        if self.ctx.publisher_filtered.insert(stem.to_string()) {
            self.filter_publishers(stem);
        }
        self.ctx.candidate_cache[stem].clone()
    }

    /// Trim candidates from unacceptable publishers.  The installed
    /// version always stays reachable under its own publisher so closures
    /// over the existing image remain satisfiable.
    fn filter_publishers(&mut self, stem: &str) {
        if self.publisher_ranks.is_empty() && self.publisher_pins.is_empty() {
            return;
        }
        let candidates = self
            .ctx
            .candidate_cache
            .get(stem)
            .cloned()
            .unwrap_or_default();
        let installed = self.installed.get(stem).cloned();

        let pinned: Option<String> = self.publisher_pins.get(stem).cloned().or_else(|| {
            installed
                .as_ref()
                .and_then(|inst| inst.publisher.clone())
                .filter(|p| self.publisher_ranks.get(p).map_or(true, |r| r.sticky))
        });
        let acceptable: BTreeSet<String> = match &pinned {
            Some(p) => [p.clone()].into(),
            None => {
                let best = self
                    .publisher_ranks
                    .values()
                    .filter(|r| r.enabled)
                    .map(|r| r.rank)
                    .min();
                let Some(best) = best else { return };
                self.publisher_ranks
                    .iter()
                    .filter(|(_, r)| r.enabled && r.rank == best)
                    .map(|(p, _)| p.clone())
                    .collect()
            }
        };

        for candidate in candidates {
            let Some(publisher) = candidate.publisher.clone() else {
                continue;
            };
            if acceptable.contains(&publisher) {
                continue;
            }
            if let Some(inst) = &installed {
                if candidate.publisher == inst.publisher && candidate.version == inst.version {
                    continue;
                }
            }
            let reason = match &pinned {
                Some(p) => TrimReason::PublisherDiffers(p.clone()),
                None => TrimReason::PublisherLowerRanked,
            };
            self.ctx.trim(&candidate, reason);
        }
    }

    /// Partition a stem's candidates into (matching, non-matching) against
    /// a target under the given policy.  Cached once trimming is final.
    fn partition(
        &mut self,
        target: &Fmri,
        constraint: Constraint,
        obsolete_ok: bool,
        respect_trim: bool,
    ) -> (Vec<Fmri>, Vec<Fmri>) {
        let key = (target.clone(), constraint, obsolete_ok, respect_trim);
        if self.ctx.trim_done {
            if let Some(hit) = self.ctx.partition_cache.get(&key) {
                return hit.clone();
            }
        }
        let mut matching = Vec::new();
        let mut nonmatching = Vec::new();
        for candidate in self.stem_candidates(&target.stem) {
            let ok = (!respect_trim || !self.ctx.is_trimmed(&candidate))
                && (obsolete_ok || !self.state_of(&candidate).obsolete)
                && candidate.is_successor(target, constraint);
            if ok {
                matching.push(candidate);
            } else {
                nonmatching.push(candidate);
            }
        }
        if self.ctx.trim_done {
            self.ctx
                .partition_cache
                .insert(key, (matching.clone(), nonmatching.clone()));
        }
        (matching, nonmatching)
    }

    /// Candidates satisfying a require dependency.  Obsolete versions only
    /// count when nothing else can.
    fn require_matches(&mut self, target: &Fmri) -> Vec<Fmri> {
        let (matching, _) = self.partition(target, Constraint::None, false, true);
        if !matching.is_empty() {
            return matching;
        }
        let (matching, _) = self.partition(target, Constraint::None, true, true);
        matching
    }

    fn match_pattern(&mut self, pattern: &Fmri) -> Result<Vec<Fmri>> {
        let matches: Vec<Fmri> = self
            .stem_candidates(&pattern.stem)
            .into_iter()
            .filter(|c| {
                (pattern.version.is_none() || c.is_successor(pattern, Constraint::Auto))
                    && pattern
                        .publisher
                        .as_ref()
                        .map_or(true, |p| c.publisher.as_ref() == Some(p))
            })
            .collect();
        if matches.is_empty() {
            return Err(SolverError::PlanCreation {
                no_version: vec![pattern.to_string()],
                diagnostics: vec![format!("no package matching '{pattern}' is available")],
            });
        }
        Ok(matches)
    }

    fn applicable_deps(&mut self, fmri: &Fmri) -> Vec<DependencyAction> {
        if !self.ctx.dep_cache.contains_key(fmri) {
            let deps = match self.catalog.dependency_actions(fmri) {
                Ok(deps) => deps,
                Err(e) => {
                    if !self.installed_fallback.contains(fmri) {
                        self.ctx.trim(fmri, TrimReason::InvalidData(e.message));
                    }
                    Vec::new()
                }
            };
            self.ctx.dep_cache.insert(fmri.clone(), deps);
        }
        self.ctx.dep_cache[fmri]
            .iter()
            .filter(|d| d.applies(&self.variants))
            .cloned()
            .collect()
    }

    fn state_of(&mut self, fmri: &Fmri) -> PackageState {
        if let Some(state) = self.ctx.state_cache.get(fmri) {
            return *state;
        }
        let state = match self.catalog.package_state(fmri) {
            Ok(state) => state,
            Err(e) => {
                if !self.installed_fallback.contains(fmri) {
                    self.ctx.trim(fmri, TrimReason::InvalidData(e.message));
                }
                PackageState::default()
            }
        };
        self.ctx.state_cache.insert(fmri.clone(), state);
        state
    }

    fn has_incorporate_deps(&mut self, fmri: &Fmri) -> bool {
        self.applicable_deps(fmri)
            .iter()
            .any(|d| d.kind == DependKind::Incorporate && d.target.version.is_some())
    }

    fn variant_ok(&mut self, fmri: &Fmri) -> bool {
        let variants = match self.catalog.variants(fmri) {
            Ok(v) => v,
            Err(_) if self.installed_fallback.contains(fmri) => Variants::new(),
            Err(e) => {
                self.ctx.trim(fmri, TrimReason::InvalidData(e.message));
                return false;
            }
        };
        for (axis, value) in &self.variants {
            if let Some(declared) = variants.get(axis) {
                if !declared.contains(value) {
                    self.ctx
                        .trim(fmri, TrimReason::VariantMismatch(axis.clone(), value.clone()));
                    return false;
                }
            }
        }
        true
    }

    // --- incorporation trimming --------------------------------------

    /// The version families each incorporate action of one fmri allows,
    /// per constrained stem.
    fn incorp_partitions(
        &mut self,
        fmri: &Fmri,
    ) -> BTreeMap<String, (BTreeSet<Fmri>, BTreeSet<Fmri>)> {
        let mut out: BTreeMap<String, (BTreeSet<Fmri>, BTreeSet<Fmri>)> = BTreeMap::new();
        for dep in self.applicable_deps(fmri) {
            if dep.kind != DependKind::Incorporate || dep.target.version.is_none() {
                continue;
            }
            let (matching, nonmatching) =
                self.partition(&dep.target, Constraint::Auto, true, false);
            let matching: BTreeSet<Fmri> = matching.into_iter().collect();
            let nonmatching: BTreeSet<Fmri> = nonmatching.into_iter().collect();
            match out.entry(dep.target.stem.clone()) {
                Entry::Vacant(e) => {
                    e.insert((matching, nonmatching));
                }
                Entry::Occupied(mut e) => {
                    // two incorporate actions on one stem both apply
                    let (m, n) = e.get_mut();
                    *m = m.intersection(&matching).cloned().collect();
                    n.extend(nonmatching);
                }
            }
        }
        out
    }

    /// Trim every candidate outside the family an incorporation allows,
    /// recursing through incorporations the family itself contains.
    /// `group` holds the candidate versions of one incorporation; a
    /// candidate is only trimmed when every version of the incorporation
    /// excludes it.
    fn trim_recursive_incorps(&mut self, group: Vec<Fmri>, make_reason: fn(Fmri) -> TrimReason) {
        let mut processed: BTreeSet<String> = group.iter().map(|f| f.stem.clone()).collect();
        let mut work: Vec<Vec<Fmri>> = vec![group];
        while let Some(fmris) = work.pop() {
            let mut combined: BTreeMap<String, (BTreeSet<Fmri>, BTreeSet<Fmri>)> = BTreeMap::new();
            for fmri in &fmris {
                for (stem, (matching, nonmatching)) in self.incorp_partitions(fmri) {
                    match combined.entry(stem) {
                        Entry::Vacant(e) => {
                            e.insert((matching, nonmatching));
                        }
                        Entry::Occupied(mut e) => {
                            let (m, n) = e.get_mut();
                            m.extend(matching);
                            *n = n.intersection(&nonmatching).cloned().collect();
                        }
                    }
                }
            }
            let source = fmris[0].clone();
            for (stem, (matching, nonmatching)) in combined {
                self.ctx.trim_all(nonmatching, make_reason(source.clone()));
                if processed.insert(stem) {
                    let next: Vec<Fmri> = matching
                        .into_iter()
                        .filter(|m| self.has_incorporate_deps(m))
                        .collect();
                    if !next.is_empty() {
                        work.push(next);
                    }
                }
            }
        }
    }

    // --- possible set and clauses ------------------------------------

    /// Close the seed set over require edges into the per-stem candidate
    /// universe.  Work-queue with a seen set, so dependency cycles are
    /// harmless.
    fn build_possible(&mut self, seeds: Vec<Fmri>) {
        let mut possible: BTreeSet<Fmri> = BTreeSet::new();
        let mut work: VecDeque<Fmri> = seeds.into();
        while let Some(fmri) = work.pop_front() {
            if possible.contains(&fmri) || self.ctx.is_trimmed(&fmri) {
                continue;
            }
            if !self.variant_ok(&fmri) {
                continue;
            }
            possible.insert(fmri.clone());
            for dep in self.applicable_deps(&fmri) {
                if dep.kind != DependKind::Require {
                    continue;
                }
                work.extend(self.require_matches(&dep.target));
            }
            self.progress.evaluate_progress();
        }
        let mut by_stem: BTreeMap<String, Vec<Fmri>> = BTreeMap::new();
        for fmri in possible {
            by_stem.entry(fmri.stem.clone()).or_default().push(fmri);
        }
        for fmris in by_stem.values_mut() {
            fmris.sort_by(|a, b| b.cmp(a));
        }
        log::debug!("possible set covers {} stems", by_stem.len());
        self.ctx.possible = by_stem;
    }

    fn add_clause(&mut self, clause: &[i32]) {
        self.clause_count += 1;
        if !self.engine.add_clause(clause) {
            self.unsatisfiable = true;
        }
    }

    fn gen_clauses(&mut self) {
        // at most one version of any stem
        let ranges: Vec<(usize, usize)> = self
            .ctx
            .possible
            .keys()
            .filter_map(|s| self.ctx.stem_range(s))
            .collect();
        for (start, end) in ranges {
            for i in start..end {
                for j in (i + 1)..end {
                    self.add_clause(&[-(i as i32), -(j as i32)]);
                }
            }
        }
        for id in 1..=self.ctx.variable_count() {
            let fmri = self.ctx.fmri_of(id).clone();
            self.gen_dependency_clauses(&fmri, id as i32);
        }
        log::debug!(
            "generated {} clauses over {} variables",
            self.clause_count,
            self.ctx.variable_count()
        );
    }

    fn gen_dependency_clauses(&mut self, fmri: &Fmri, var: i32) {
        for dep in self.applicable_deps(fmri) {
            match dep.kind {
                DependKind::Require => {
                    let lits: Vec<i32> = self
                        .require_matches(&dep.target)
                        .iter()
                        .filter_map(|m| self.ctx.id_of(m))
                        .map(|id| id as i32)
                        .collect();
                    if lits.is_empty() {
                        self.ctx
                            .trim(fmri, TrimReason::UnsatisfiedDependency(dep.target.clone()));
                        self.add_clause(&[-var]);
                    } else {
                        let mut clause = vec![-var];
                        clause.extend(lits);
                        self.add_clause(&clause);
                    }
                }
                DependKind::Optional | DependKind::Incorporate => {
                    if dep.target.version.is_none() {
                        continue;
                    }
                    let constraint = match dep.kind {
                        DependKind::Optional => Constraint::None,
                        _ => Constraint::Auto,
                    };
                    let (_, vetoed) = self.partition(&dep.target, constraint, true, false);
                    for veto in vetoed {
                        if let Some(id) = self.ctx.id_of(&veto) {
                            self.add_clause(&[-var, -(id as i32)]);
                        }
                    }
                }
                DependKind::Exclude => {
                    // versions at or above the target may not coexist;
                    // a versionless exclude vetoes the whole stem
                    let (vetoed, _) = self.partition(&dep.target, Constraint::None, true, false);
                    for veto in vetoed {
                        if let Some(id) = self.ctx.id_of(&veto) {
                            if id as i32 != var {
                                self.add_clause(&[-var, -(id as i32)]);
                            }
                        }
                    }
                }
            }
        }
    }

    /// One-of clauses keeping installed stems present and the request
    /// satisfied.  A stem whose set is empty makes the instance
    /// unsatisfiable, which surfaces through the failure diagnostics.
    fn add_continuity_clauses(
        &mut self,
        proposed: &BTreeMap<String, Vec<Fmri>>,
        reject: &BTreeSet<String>,
    ) {
        for stem in self.installed.keys().cloned().collect::<Vec<_>>() {
            if reject.contains(&stem) || proposed.contains_key(&stem) {
                continue;
            }
            let members: Vec<Fmri> = self
                .ctx
                .possible
                .get(&stem)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|f| !self.ctx.is_trimmed(f))
                .collect();
            self.add_one_of(&members);
        }
        for matches in proposed.values() {
            let members: Vec<Fmri> = matches
                .iter()
                .filter(|f| !self.ctx.is_trimmed(f))
                .cloned()
                .collect();
            self.add_one_of(&members);
        }
    }

    fn add_one_of(&mut self, members: &[Fmri]) {
        let lits: Vec<i32> = members
            .iter()
            .filter_map(|f| self.ctx.id_of(f))
            .map(|id| id as i32)
            .collect();
        self.add_clause(&lits);
    }

    fn pin_requested(&mut self, proposed: &BTreeMap<String, Vec<Fmri>>, solution: &[Fmri]) {
        for fmri in solution {
            if proposed.contains_key(&fmri.stem) {
                if let Some(id) = self.ctx.id_of(fmri) {
                    self.add_clause(&[id as i32]);
                }
            }
        }
    }

    // --- the extremal search -----------------------------------------

    fn restore(&mut self, checkpoint: &SatEngine, saved_unsat: bool) {
        self.engine = checkpoint.clone();
        self.unsatisfiable = saved_unsat;
        self.iterations = 0;
    }

    /// Iteratively push the engine's model toward the newest-biased (or,
    /// with `prefer_older`, oldest-biased) satisfying assignment.  Each
    /// round permanently forbids every chosen variable's strictly-worse
    /// stem siblings and the exact combination just seen, so the search
    /// space shrinks monotonically.
    fn solve_extremal(&mut self, prefer_older: bool) -> Result<Vec<Fmri>> {
        self.state = State::Failed;
        if self.unsatisfiable {
            return Err(SolverError::NoSolution(vec![
                "a constraint was contradictory before the search began".to_string(),
            ]));
        }
        let mut solution: Option<Vec<usize>> = None;
        let mut forbidden: HashSet<usize> = HashSet::new();
        while self.engine.solve(&[]) {
            self.iterations += 1;
            self.progress.evaluate_progress();
            let model: Vec<usize> = (1..=self.ctx.variable_count())
                .filter(|&v| self.engine.dereference(v))
                .collect();

            let mut to_forbid: Vec<usize> = Vec::new();
            for &var in &model {
                let stem = self.ctx.fmri_of(var).stem.clone();
                let version = self.ctx.fmri_of(var).version.clone();
                let Some((start, end)) = self.ctx.stem_range(&stem) else {
                    continue;
                };
                // ids run newest to oldest within a stem block
                let siblings = if prefer_older { start..var } else { (var + 1)..end };
                for sib in siblings {
                    if self.ctx.fmri_of(sib).version != version && forbidden.insert(sib) {
                        to_forbid.push(sib);
                    }
                }
            }
            for sib in to_forbid {
                self.add_clause(&[-(sib as i32)]);
            }

            solution = Some(model.clone());
            if model.is_empty() {
                break;
            }
            let combo: Vec<i32> = model.iter().map(|&v| -(v as i32)).collect();
            self.add_clause(&combo);

            if self.iterations >= MAX_ITERATIONS {
                log::warn!("extremal search hit the iteration ceiling");
                break;
            }
        }
        match solution {
            Some(model) => {
                log::debug!(
                    "extremal search converged after {} iterations",
                    self.iterations
                );
                Ok(model.into_iter().map(|v| self.ctx.fmri_of(v).clone()).collect())
            }
            None => Err(SolverError::NoSolution(vec![
                "no candidate combination satisfies all constraints".to_string(),
            ])),
        }
    }

    // --- result shaping ----------------------------------------------

    fn drop_obsolete(&mut self, solution: Vec<Fmri>) -> BTreeSet<Fmri> {
        solution
            .into_iter()
            .filter(|f| !self.state_of(f).obsolete)
            .collect()
    }

    /// Keep renamed packages only while a non-renamed member still
    /// transitively requires them.
    fn elide_renames(&mut self, set: &BTreeSet<Fmri>) -> BTreeSet<Fmri> {
        let by_stem: BTreeMap<String, Fmri> =
            set.iter().map(|f| (f.stem.clone(), f.clone())).collect();
        let mut keep: BTreeSet<Fmri> = set
            .iter()
            .filter(|f| !self.state_of(f).renamed)
            .cloned()
            .collect();
        let mut work: VecDeque<Fmri> = keep.iter().cloned().collect();
        while let Some(fmri) = work.pop_front() {
            for dep in self.applicable_deps(&fmri) {
                if dep.kind != DependKind::Require {
                    continue;
                }
                if let Some(target) = by_stem.get(&dep.target.stem) {
                    if keep.insert(target.clone()) {
                        work.push_back(target.clone());
                    }
                }
            }
        }
        keep
    }

    // --- failure diagnostics -----------------------------------------

    /// Build the structured report for a failed solve.  One cheaper
    /// fallback solve over "keep every installed package" distinguishes an
    /// impossible request from an already-inconsistent image.
    fn failure_diagnostics(
        &mut self,
        proposed: &BTreeMap<String, Vec<Fmri>>,
        checkpoint: &SatEngine,
        saved_unsat: bool,
    ) -> SolverError {
        self.restore(checkpoint, saved_unsat);
        for fmri in self.installed.values().cloned().collect::<Vec<_>>() {
            if let Some(id) = self.ctx.id_of(&fmri) {
                self.add_clause(&[id as i32]);
            }
        }
        let installed_ok = !self.unsatisfiable && self.engine.solve(&[]);

        let mut lines = Vec::new();
        if installed_ok {
            let roots: Vec<Fmri> = proposed.values().flatten().cloned().collect();
            lines.extend(self.dependency_error_lines(&roots));
            if lines.is_empty() {
                lines.push(
                    "the requested packages conflict with each other or with the installed packages"
                        .to_string(),
                );
            }
        } else {
            lines.extend(self.installed_error_lines());
            lines.extend(self.obsolete_dependent_lines());
            if lines.is_empty() {
                lines.push("the installed packages are no longer mutually compatible".to_string());
            }
        }
        SolverError::NoSolution(lines)
    }

    /// Trace require chains from the given roots and report the first
    /// unsatisfiable edge on each path.
    fn dependency_error_lines(&mut self, roots: &[Fmri]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut seen: BTreeSet<Fmri> = BTreeSet::new();
        let mut reported: BTreeSet<String> = BTreeSet::new();
        let mut work: VecDeque<Fmri> = roots.iter().cloned().collect();
        while let Some(fmri) = work.pop_front() {
            if !seen.insert(fmri.clone()) {
                continue;
            }
            for dep in self.applicable_deps(&fmri) {
                if dep.kind != DependKind::Require {
                    continue;
                }
                let matches = self.require_matches(&dep.target);
                if matches.is_empty() {
                    if reported.insert(dep.target.stem.clone()) {
                        lines.push(format!(
                            "{fmri} requires {}, but no suitable version is available:",
                            dep.target
                        ));
                        lines.extend(self.trim_lines(&dep.target.stem));
                    }
                } else {
                    work.extend(matches);
                }
            }
        }
        lines
    }

    fn installed_error_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        for (stem, installed) in self.installed.clone() {
            let candidates = self.stem_candidates(&stem);
            if !candidates.is_empty() && candidates.iter().all(|c| self.ctx.is_trimmed(c)) {
                lines.push(format!(
                    "no suitable version of installed package {installed} remains available:"
                ));
                lines.extend(self.trim_lines(&stem));
            }
        }
        lines
    }

    fn obsolete_dependent_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        for (stem, installed) in self.installed.clone() {
            if !self.state_of(&installed).obsolete {
                continue;
            }
            let mut dependents: Vec<String> = Vec::new();
            for other in self.installed.clone().into_values() {
                if other.stem == stem {
                    continue;
                }
                let requires = self
                    .applicable_deps(&other)
                    .iter()
                    .any(|d| d.kind == DependKind::Require && d.target.stem == stem);
                if requires {
                    dependents.push(other.to_string());
                }
            }
            if !dependents.is_empty() {
                lines.push(format!(
                    "installed package {installed} is obsolete but still required by: {}",
                    dependents.join(", ")
                ));
            }
        }
        lines
    }

    /// Per-candidate trim reasons for one stem, indented for display.
    fn trim_lines(&mut self, stem: &str) -> Vec<String> {
        let mut lines = Vec::new();
        for candidate in self.stem_candidates(stem) {
            let reasons = self.ctx.reasons(&candidate);
            if reasons.is_empty() {
                continue;
            }
            let text = reasons
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            lines.push(format!("  {candidate}: {text}"));
        }
        lines
    }
}

impl fmt::Display for Solver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "state: {:?}", self.state)?;
        writeln!(
            f,
            "variables: {} clauses: {} iterations: {}",
            self.ctx.variable_count(),
            self.clause_count,
            self.iterations
        )?;
        for (name, secs) in &self.timings {
            writeln!(f, "phase {name}: {secs:.3}s")?;
        }
        if !self.maintained_incorps.is_empty() {
            let names: Vec<String> = self
                .maintained_incorps
                .iter()
                .map(ToString::to_string)
                .collect();
            writeln!(f, "maintained incorporations: {}", names.join(", "))?;
        }
        Ok(())
    }
}
