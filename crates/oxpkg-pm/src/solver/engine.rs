use std::collections::HashSet;

/// Bundled CNF solver.
///
/// Variables are numbered from 1; a literal is the signed variable id.
/// `Clone` snapshots the entire clause database, which is how the session
/// checkpoints between phases.  The search is a plain DPLL with unit
/// propagation, trying false before true so unconstrained variables stay
/// out of the model.
#[derive(Debug, Clone, Default)]
pub struct SatEngine {
    clauses: Vec<Vec<i32>>,
    root_units: HashSet<i32>,
    num_vars: usize,
    model: Vec<bool>,
    contradiction: bool,
}

impl SatEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_variables(&self) -> usize {
        self.num_vars
    }

    /// Add a clause; returns false if it is trivially contradictory (an
    /// empty clause, or a unit conflicting with an existing unit).
    pub fn add_clause(&mut self, clause: &[i32]) -> bool {
        if clause.is_empty() || clause.contains(&0) {
            self.contradiction = true;
            return false;
        }
        for &lit in clause {
            let var = lit.unsigned_abs() as usize;
            if var > self.num_vars {
                self.num_vars = var;
            }
        }
        if let [lit] = clause {
            if self.root_units.contains(&-lit) {
                self.contradiction = true;
                return false;
            }
            self.root_units.insert(*lit);
        }
        self.clauses.push(clause.to_vec());
        true
    }

    /// Search for a satisfying assignment under the given assumption
    /// literals.  On success the model is retained for [`dereference`].
    ///
    /// [`dereference`]: SatEngine::dereference
    pub fn solve(&mut self, assumptions: &[i32]) -> bool {
        if self.contradiction {
            return false;
        }
        let max_var = self.num_vars.max(
            assumptions
                .iter()
                .map(|l| l.unsigned_abs() as usize)
                .max()
                .unwrap_or(0),
        );
        let mut assign: Vec<Option<bool>> = vec![None; max_var + 1];
        for &lit in assumptions {
            let var = lit.unsigned_abs() as usize;
            let val = lit > 0;
            match assign[var] {
                Some(v) if v != val => return false,
                _ => assign[var] = Some(val),
            }
        }
        match self.search(assign) {
            Some(solution) => {
                self.model = solution.iter().map(|v| v.unwrap_or(false)).collect();
                true
            }
            None => false,
        }
    }

    /// Value of variable `var` in the last satisfying model.
    pub fn dereference(&self, var: usize) -> bool {
        self.model.get(var).copied().unwrap_or(false)
    }

    fn search(&self, mut assign: Vec<Option<bool>>) -> Option<Vec<Option<bool>>> {
        // Unit propagation to fixpoint.
        loop {
            let mut changed = false;
            for clause in &self.clauses {
                let mut unassigned = None;
                let mut open = 0;
                let mut satisfied = false;
                for &lit in clause {
                    match assign[lit.unsigned_abs() as usize] {
                        Some(v) if v == (lit > 0) => {
                            satisfied = true;
                            break;
                        }
                        Some(_) => {}
                        None => {
                            open += 1;
                            unassigned = Some(lit);
                        }
                    }
                }
                if satisfied {
                    continue;
                }
                match open {
                    0 => return None,
                    1 => {
                        let lit = unassigned?;
                        assign[lit.unsigned_abs() as usize] = Some(lit > 0);
                        changed = true;
                    }
                    _ => {}
                }
            }
            if !changed {
                break;
            }
        }
        let unassigned = (1..assign.len()).find(|&v| assign[v].is_none());
        match unassigned {
            None => Some(assign),
            Some(var) => {
                for val in [false, true] {
                    let mut next = assign.clone();
                    next[var] = Some(val);
                    if let Some(solution) = self.search(next) {
                        return Some(solution);
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_satisfiable() {
        let mut engine = SatEngine::new();
        assert!(engine.solve(&[]));
    }

    #[test]
    fn test_unit_conflict_is_contradiction() {
        let mut engine = SatEngine::new();
        assert!(engine.add_clause(&[1]));
        assert!(!engine.add_clause(&[-1]));
        assert!(!engine.solve(&[]));
    }

    #[test]
    fn test_propagation() {
        let mut engine = SatEngine::new();
        engine.add_clause(&[1]);
        engine.add_clause(&[-1, 2]);
        engine.add_clause(&[-2, 3]);
        assert!(engine.solve(&[]));
        assert!(engine.dereference(1));
        assert!(engine.dereference(2));
        assert!(engine.dereference(3));
    }

    #[test]
    fn test_unsat_after_search() {
        let mut engine = SatEngine::new();
        engine.add_clause(&[1, 2]);
        engine.add_clause(&[-1, 2]);
        engine.add_clause(&[1, -2]);
        engine.add_clause(&[-1, -2]);
        assert!(!engine.solve(&[]));
    }

    #[test]
    fn test_false_first_polarity() {
        let mut engine = SatEngine::new();
        engine.add_clause(&[1, 2]);
        assert!(engine.solve(&[]));
        // only one of the two should be forced on
        assert!(engine.dereference(1) ^ engine.dereference(2));
    }

    #[test]
    fn test_assumptions() {
        let mut engine = SatEngine::new();
        engine.add_clause(&[1, 2]);
        assert!(engine.solve(&[-2]));
        assert!(engine.dereference(1));
        assert!(!engine.solve(&[-1, -2]));
    }

    #[test]
    fn test_clone_is_a_snapshot() {
        let mut engine = SatEngine::new();
        engine.add_clause(&[1, 2]);
        let snapshot = engine.clone();
        engine.add_clause(&[-1]);
        engine.add_clause(&[-2]);
        assert!(!engine.solve(&[]));
        let mut restored = snapshot;
        assert!(restored.solve(&[]));
    }
}
