//! Package identity and version types for the oxpkg toolchain
//!
//! This crate provides the FMRI (fault-managed resource identifier) type used
//! to name packages, its version type, and the successor predicates the
//! resolver uses to match dependency constraints.

mod dot_sequence;
mod fmri;
mod version;

pub use dot_sequence::DotSequence;
pub use fmri::{Fmri, FmriError};
pub use version::{Constraint, Version, VersionError};
