use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::version::{Constraint, Version};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FmriError {
    #[error("Illegal FMRI: {0}")]
    IllegalFmri(String),

    #[error("Illegal FMRI '{fmri}': {source}")]
    IllegalVersion {
        fmri: String,
        source: crate::version::VersionError,
    },
}

lazy_static! {
    // pkg://publisher/stem, pkg:/stem, or a bare stem, each with an
    // optional @version suffix.
    static ref FMRI_RE: Regex = Regex::new(
        r"^(?:pkg://(?P<pub>[^/@]+)/|pkg:/)?(?P<stem>[A-Za-z0-9][A-Za-z0-9_\-\.\+/]*)(?:@(?P<ver>.+))?$"
    )
    .unwrap();
}

/// A package name, optionally qualified by publisher and version.
///
/// `pkg://solaris/web/server@1.4-3:20110501T120000Z` carries all three
/// parts; `web/server` is just a stem.  FMRIs order by stem, then version,
/// then publisher, so sorting a candidate list groups versions of the same
/// package together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fmri {
    pub publisher: Option<String>,
    pub stem: String,
    pub version: Option<Version>,
}

impl Fmri {
    pub fn new(publisher: Option<&str>, stem: &str, version: Option<Version>) -> Self {
        Self {
            publisher: publisher.map(str::to_string),
            stem: stem.to_string(),
            version,
        }
    }

    /// Evaluate true if `self` names the same stem at a successor version of
    /// `other` under the given constraint.  An unversioned `other` matches
    /// any version of the stem.
    pub fn is_successor(&self, other: &Fmri, constraint: Constraint) -> bool {
        if self.stem != other.stem {
            return false;
        }
        match (&self.version, &other.version) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(sv), Some(ov)) => match constraint {
                // Same-version matches are acceptable for plain dependencies.
                Constraint::None => sv >= ov,
                Constraint::Auto => sv.is_successor(ov, Constraint::Auto),
            },
        }
    }

    /// The same package irrespective of version and publisher.
    pub fn is_same_pkg(&self, other: &Fmri) -> bool {
        self.stem == other.stem
    }
}

impl FromStr for Fmri {
    type Err = FmriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = FMRI_RE
            .captures(s)
            .ok_or_else(|| FmriError::IllegalFmri(s.to_string()))?;
        let version = caps
            .name("ver")
            .map(|m| m.as_str().parse())
            .transpose()
            .map_err(|e| FmriError::IllegalVersion {
                fmri: s.to_string(),
                source: e,
            })?;
        Ok(Fmri {
            publisher: caps.name("pub").map(|m| m.as_str().to_string()),
            stem: caps["stem"].to_string(),
            version,
        })
    }
}

impl fmt::Display for Fmri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.publisher {
            Some(publisher) => write!(f, "pkg://{}/{}", publisher, self.stem)?,
            None => write!(f, "pkg:/{}", self.stem)?,
        }
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        Ok(())
    }
}

impl Ord for Fmri {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stem
            .cmp(&other.stem)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.publisher.cmp(&other.publisher))
    }
}

impl PartialOrd for Fmri {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Fmri {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fmri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmri(s: &str) -> Fmri {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_forms() {
        let f = fmri("pkg://solaris/web/server@1.4-3:20110501T120000Z");
        assert_eq!(f.publisher.as_deref(), Some("solaris"));
        assert_eq!(f.stem, "web/server");
        assert_eq!(f.version.as_ref().unwrap().to_string(), "1.4-3:20110501T120000Z");

        let f = fmri("pkg:/web/server@1.4");
        assert_eq!(f.publisher, None);
        assert_eq!(f.stem, "web/server");

        let f = fmri("web/server");
        assert_eq!(f.publisher, None);
        assert_eq!(f.version, None);
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Fmri>().is_err());
        assert!("pkg://solaris/".parse::<Fmri>().is_err());
        assert!("web/server@not.a@version".parse::<Fmri>().is_err());
        assert!("@1.0".parse::<Fmri>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for s in [
            "pkg://solaris/web/server@1.4-3:20110501T120000Z",
            "pkg:/web/server@1.4",
            "pkg:/web/server",
        ] {
            assert_eq!(fmri(s).to_string(), s);
        }
        // a bare stem renders with the short scheme
        assert_eq!(fmri("web/server").to_string(), "pkg:/web/server");
    }

    #[test]
    fn test_ordering_groups_by_stem() {
        let mut fmris = vec![
            fmri("pkg:/b@2.0"),
            fmri("pkg:/a@2.0"),
            fmri("pkg:/b@1.0"),
            fmri("pkg:/a@1.0"),
        ];
        fmris.sort();
        let names: Vec<String> = fmris.iter().map(Fmri::to_string).collect();
        assert_eq!(names, ["pkg:/a@1.0", "pkg:/a@2.0", "pkg:/b@1.0", "pkg:/b@2.0"]);
    }

    #[test]
    fn test_successor() {
        assert!(fmri("a@2.0").is_successor(&fmri("a@1.0"), Constraint::None));
        assert!(fmri("a@1.0").is_successor(&fmri("a@1.0"), Constraint::None));
        assert!(!fmri("a@0.9").is_successor(&fmri("a@1.0"), Constraint::None));
        assert!(!fmri("b@2.0").is_successor(&fmri("a@1.0"), Constraint::None));
        // unversioned reference matches any version
        assert!(fmri("a@0.1").is_successor(&fmri("a"), Constraint::None));
        // unversioned candidate never satisfies a versioned reference
        assert!(!fmri("a").is_successor(&fmri("a@1.0"), Constraint::None));
        // AUTO follows version semantics
        assert!(fmri("a@1.0-1").is_successor(&fmri("a@1.0"), Constraint::Auto));
        assert!(!fmri("a@1.1").is_successor(&fmri("a@1.0"), Constraint::Auto));
    }

    #[test]
    fn test_serde_string_form() {
        let f = fmri("pkg://solaris/a@1.0");
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(json, "\"pkg://solaris/a@1.0\"");
        let back: Fmri = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
