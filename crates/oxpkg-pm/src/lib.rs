//! Dependency resolution for the oxpkg package system.
//!
//! The centerpiece is [`Solver`], a single-use session that encodes the
//! package universe as a boolean satisfiability problem and drives a SAT
//! engine through several optimization passes to compute a consistent set
//! of package versions for an install, update, uninstall, or variant
//! change.  Catalog access, installed state, publisher configuration, and
//! progress reporting are all supplied by the caller through the types in
//! [`catalog`] and [`progress`].

pub mod actions;
pub mod catalog;
pub mod error;
pub mod progress;
pub mod solver;

pub use actions::{DependKind, DependencyAction, VariantContext};
pub use catalog::{
    Catalog, Freeze, InvalidPackageData, MemoryCatalog, PackageRecord, PackageState,
    PublisherRank, Variants,
};
pub use error::{Result, SolverError};
pub use progress::{NullProgress, ProgressSink};
pub use solver::{SatEngine, Solver, TrimReason};
