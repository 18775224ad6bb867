use std::collections::BTreeMap;

use oxpkg_fmri::Fmri;
use serde::{Deserialize, Serialize};

/// The dependency kinds the resolver understands.
///
/// Clause generation matches on this exhaustively, so adding a kind is a
/// compile-enforced change at a single site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependKind {
    /// The target (or a successor of it) must be installed alongside.
    Require,
    /// If the target stem is installed at all, it must satisfy the version.
    Optional,
    /// Versions of the target at or above the stated one may not coexist.
    Exclude,
    /// Pins the target stem to the compatible-successor family of the
    /// stated version across the whole image.
    Incorporate,
}

/// Active variant values for a resolution session, axis name to value.
pub type VariantContext = BTreeMap<String, String>;

/// A dependency declared by one package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyAction {
    pub kind: DependKind,
    pub target: Fmri,
    /// Variant predicate.  The action only applies when every axis named
    /// here carries the listed value in the active context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub predicate: BTreeMap<String, String>,
}

impl DependencyAction {
    pub fn new(kind: DependKind, target: Fmri) -> Self {
        Self {
            kind,
            target,
            predicate: BTreeMap::new(),
        }
    }

    pub fn when(mut self, axis: &str, value: &str) -> Self {
        self.predicate.insert(axis.to_string(), value.to_string());
        self
    }

    /// Whether this action applies under the given variant context.  Axes
    /// the context does not track never disable an action.
    pub fn applies(&self, context: &VariantContext) -> bool {
        self.predicate
            .iter()
            .all(|(axis, value)| context.get(axis).map_or(true, |active| active == value))
    }
}
