//! SAT-based dependency resolution.
//!
//! The session in [`session`] owns the whole pipeline: trimming the
//! candidate universe, closing it over require edges, generating clauses
//! over a stable fmri-to-variable mapping, and driving the engine through
//! the iterative extremal search.  [`engine`] holds the bundled CNF
//! solver; the session only ever touches its minimal contract, so a
//! different engine can be swapped in behind the same four calls.

mod context;
mod engine;
mod session;
mod trim;


pub use engine::SatEngine;
pub use session::Solver;
pub use trim::TrimReason;
