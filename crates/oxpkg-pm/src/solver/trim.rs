use std::fmt;

use oxpkg_fmri::Fmri;

/// Why a candidate version was removed from consideration.
///
/// Trim records are diagnostic as much as operational: when a request
/// cannot be satisfied, these render the per-candidate explanation shown
/// to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrimReason {
    /// Newer version already installed.
    OlderThanInstalled(Fmri),
    /// The caller pinned a different version of this stem.
    ExcludedByRequest,
    /// The caller listed this stem in the reject set.
    RejectedByRequest,
    /// Outside the family allowed by an installed incorporation.
    UnboundIncorporation(Fmri),
    /// Outside the family allowed by an incorporation being installed.
    ProposedIncorporation(Fmri),
    /// Outside the family allowed by a freeze.
    Frozen(Fmri, Option<String>),
    /// The package does not support an active variant value.
    VariantMismatch(String, String),
    /// Candidate comes from a publisher other than the pinned one.
    PublisherDiffers(String),
    PublisherLowerRanked,
    /// A require dependency of this version cannot be satisfied.
    UnsatisfiedDependency(Fmri),
    /// Catalog metadata for this version could not be used.
    InvalidData(String),
}

impl fmt::Display for TrimReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrimReason::OlderThanInstalled(installed) => {
                write!(f, "newer version {installed} is already installed")
            }
            TrimReason::ExcludedByRequest => {
                write!(f, "this version excluded by specified installation version")
            }
            TrimReason::RejectedByRequest => {
                write!(f, "this package was rejected by user request")
            }
            TrimReason::UnboundIncorporation(inc) => {
                write!(f, "this version is excluded by installed incorporation {inc}")
            }
            TrimReason::ProposedIncorporation(inc) => {
                write!(f, "this version is excluded by proposed incorporation {inc}")
            }
            TrimReason::Frozen(fmri, Some(reason)) => {
                write!(f, "this version is excluded by freeze {fmri}: {reason}")
            }
            TrimReason::Frozen(fmri, None) => {
                write!(f, "this version is excluded by freeze {fmri}")
            }
            TrimReason::VariantMismatch(axis, value) => {
                write!(f, "package does not support {axis} value '{value}'")
            }
            TrimReason::PublisherDiffers(publisher) => {
                write!(
                    f,
                    "package publisher differs from installed or specified one ({publisher})"
                )
            }
            TrimReason::PublisherLowerRanked => {
                write!(f, "publisher is ranked lower than the preferred publisher")
            }
            TrimReason::UnsatisfiedDependency(target) => {
                write!(f, "no version matching required dependency {target} can be installed")
            }
            TrimReason::InvalidData(message) => {
                write!(f, "package contains invalid or unsupported metadata: {message}")
            }
        }
    }
}
