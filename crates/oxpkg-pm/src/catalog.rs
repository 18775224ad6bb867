use std::collections::{BTreeMap, BTreeSet};

use oxpkg_fmri::{Fmri, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actions::DependencyAction;

/// A package whose metadata cannot be used.  The resolver converts this
/// into a trim record instead of propagating it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid package data for {fmri}: {message}")]
pub struct InvalidPackageData {
    pub fmri: String,
    pub message: String,
}

impl InvalidPackageData {
    pub fn new(fmri: &Fmri, message: &str) -> Self {
        Self {
            fmri: fmri.to_string(),
            message: message.to_string(),
        }
    }
}

/// Lifecycle markers a package version may carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageState {
    /// Exists only to satisfy transitional dependency edges; must never be
    /// literally installed.
    #[serde(default)]
    pub obsolete: bool,
    /// Superseded by a successor under a different stem; retained only
    /// while something still depends on it.
    #[serde(default)]
    pub renamed: bool,
}

/// Per-axis values a package declares support for.  An empty map or a
/// missing axis means "supports everything" on that axis.
pub type Variants = BTreeMap<String, BTreeSet<String>>;

/// Read-only view of the package universe.
///
/// Implementations may perform I/O on first access to a stem; the resolver
/// caches every answer for the session's lifetime.
pub trait Catalog {
    /// All known fmris of `stem`, grouped by version, newest first.
    fn candidates_by_version(&self, stem: &str) -> Vec<(Version, Vec<Fmri>)>;

    /// The dependency actions one package version declares.
    fn dependency_actions(&self, fmri: &Fmri)
        -> Result<Vec<DependencyAction>, InvalidPackageData>;

    /// Declared variant support.
    fn variants(&self, fmri: &Fmri) -> Result<Variants, InvalidPackageData>;

    /// Obsolete/renamed markers.
    fn package_state(&self, fmri: &Fmri) -> Result<PackageState, InvalidPackageData>;
}

/// One row of the publisher configuration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherRank {
    /// Search order; lower ranks are preferred.
    pub rank: u32,
    /// Installed packages from a sticky publisher may only be updated
    /// from that publisher.
    pub sticky: bool,
    pub enabled: bool,
}

impl PublisherRank {
    pub fn new(rank: u32) -> Self {
        Self {
            rank,
            sticky: true,
            enabled: true,
        }
    }
}

/// A version pin supplied by the caller, with its recorded reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freeze {
    pub fmri: Fmri,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Freeze {
    pub fn new(fmri: Fmri) -> Self {
        Self { fmri, reason: None }
    }
}

/// Everything the catalog knows about one package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub fmri: Fmri,
    #[serde(default)]
    pub depend: Vec<DependencyAction>,
    #[serde(default)]
    pub variants: Variants,
    #[serde(default)]
    pub state: PackageState,
}

impl PackageRecord {
    pub fn new(fmri: Fmri) -> Self {
        Self {
            fmri,
            depend: Vec::new(),
            variants: Variants::new(),
            state: PackageState::default(),
        }
    }

    pub fn depend(mut self, action: DependencyAction) -> Self {
        self.depend.push(action);
        self
    }

    pub fn variant(mut self, axis: &str, values: &[&str]) -> Self {
        self.variants.insert(
            axis.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn obsolete(mut self) -> Self {
        self.state.obsolete = true;
        self
    }

    pub fn renamed(mut self) -> Self {
        self.state.renamed = true;
        self
    }
}

/// In-memory catalog backed by serde-loadable records; the test double
/// and the natural backing store for embedders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryCatalog {
    packages: Vec<PackageRecord>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: PackageRecord) {
        self.packages.push(record);
    }

    fn find(&self, fmri: &Fmri) -> Result<&PackageRecord, InvalidPackageData> {
        self.packages
            .iter()
            .find(|r| r.fmri == *fmri)
            .ok_or_else(|| InvalidPackageData::new(fmri, "unknown package"))
    }
}

impl Catalog for MemoryCatalog {
    fn candidates_by_version(&self, stem: &str) -> Vec<(Version, Vec<Fmri>)> {
        let mut grouped: BTreeMap<Version, Vec<Fmri>> = BTreeMap::new();
        for record in &self.packages {
            if record.fmri.stem != stem {
                continue;
            }
            if let Some(version) = &record.fmri.version {
                grouped
                    .entry(version.clone())
                    .or_default()
                    .push(record.fmri.clone());
            }
        }
        grouped.into_iter().rev().collect()
    }

    fn dependency_actions(
        &self,
        fmri: &Fmri,
    ) -> Result<Vec<DependencyAction>, InvalidPackageData> {
        Ok(self.find(fmri)?.depend.clone())
    }

    fn variants(&self, fmri: &Fmri) -> Result<Variants, InvalidPackageData> {
        Ok(self.find(fmri)?.variants.clone())
    }

    fn package_state(&self, fmri: &Fmri) -> Result<PackageState, InvalidPackageData> {
        Ok(self.find(fmri)?.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::DependKind;

    #[test]
    fn test_candidates_newest_first() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert(PackageRecord::new("a@1.0".parse().unwrap()));
        catalog.insert(PackageRecord::new("a@2.0".parse().unwrap()));
        catalog.insert(PackageRecord::new("pkg://extra/a@2.0".parse().unwrap()));
        catalog.insert(PackageRecord::new("b@1.0".parse().unwrap()));

        let candidates = catalog.candidates_by_version("a");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].0.to_string(), "2.0");
        assert_eq!(candidates[0].1.len(), 2);
        assert_eq!(candidates[1].0.to_string(), "1.0");
    }

    #[test]
    fn test_unknown_package_is_invalid_data() {
        let catalog = MemoryCatalog::new();
        let missing: Fmri = "nope@1.0".parse().unwrap();
        assert!(catalog.dependency_actions(&missing).is_err());
        assert!(catalog.variants(&missing).is_err());
        assert!(catalog.package_state(&missing).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert(
            PackageRecord::new("a@1.0".parse().unwrap())
                .depend(DependencyAction::new(
                    DependKind::Require,
                    "b@1.0".parse().unwrap(),
                ))
                .variant("variant.arch", &["i386", "sparc"]),
        );
        let json = serde_json::to_string(&catalog).unwrap();
        let back: MemoryCatalog = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.candidates_by_version("a"),
            catalog.candidates_by_version("a")
        );
    }
}
