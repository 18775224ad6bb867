use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    /// Every candidate of a requested package was trimmed away.
    #[error("no matching version of {} can be installed:\n{}", no_version.join(", "), diagnostics.join("\n"))]
    PlanCreation {
        no_version: Vec<String>,
        diagnostics: Vec<String>,
    },

    /// The SAT search proved the constraint set unsatisfiable.
    #[error("no solution satisfies all dependencies:\n{}", .0.join("\n"))]
    NoSolution(Vec<String>),

    /// Uninstall blocked because other packages still depend on the target.
    #[error("cannot remove '{fmri}'; these packages depend on it: {}", dependents.join(", "))]
    NonLeafPackage {
        fmri: String,
        dependents: Vec<String>,
    },

    /// Cooperative cancellation observed between phases.
    #[error("operation canceled")]
    Canceled,
}

pub type Result<T> = std::result::Result<T, SolverError>;
