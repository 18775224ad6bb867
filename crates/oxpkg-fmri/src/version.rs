use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::dot_sequence::DotSequence;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Illegal dot sequence: {0}")]
    IllegalDotSequence(String),

    #[error("Illegal version: {0}")]
    IllegalVersion(String),
}

/// Comparison policy for [`Version::is_successor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// Plain "strictly newer" comparison over the full version.
    None,
    /// Compatible-successor comparison used for incorporations and freezes:
    /// the reference's release and branch must be prefixes of the candidate's,
    /// its timestamp (if any) must match exactly, and absent components act
    /// as wildcards.
    Auto,
}

/// Version format is `release[,build_release][-branch][:datetime]`.
///
/// The datetime is the ISO8601-basic form `YYYYMMDDTHHMMSSZ` (UTC).  It is
/// kept as a string since that form collates lexicographically in date order.
/// The build_release records the system the package was built for and takes
/// no part in comparison, equality, or hashing.
#[derive(Debug, Clone)]
pub struct Version {
    release: DotSequence,
    build_release: Option<DotSequence>,
    branch: Option<DotSequence>,
    timestamp: Option<String>,
}

impl Version {
    pub fn release(&self) -> &DotSequence {
        &self.release
    }

    pub fn branch(&self) -> Option<&DotSequence> {
        self.branch.as_ref()
    }

    pub fn build_release(&self) -> Option<&DotSequence> {
        self.build_release.as_ref()
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    /// Evaluate true if `self` is a successor version to `other` under the
    /// given comparison policy.
    pub fn is_successor(&self, other: &Version, constraint: Constraint) -> bool {
        match constraint {
            Constraint::None => self > other,
            Constraint::Auto => {
                if !other.release.is_subsequence(&self.release) {
                    return false;
                }
                match (&other.branch, &self.branch) {
                    (Some(ob), Some(sb)) => {
                        if !ob.is_subsequence(sb) {
                            return false;
                        }
                    }
                    (Some(_), None) => return false,
                    (None, _) => {}
                }
                match (&other.timestamp, &self.timestamp) {
                    (Some(ot), Some(st)) => {
                        if ot != st {
                            return false;
                        }
                    }
                    (Some(_), None) => return false,
                    (None, _) => {}
                }
                true
            }
        }
    }
}

fn validate_timestamp(ts: &str) -> Result<(), VersionError> {
    let bad = || VersionError::IllegalVersion(format!("time must be ISO8601 format: {ts}"));
    let bytes = ts.as_bytes();
    if bytes.len() != 16 || bytes[8] != b'T' || bytes[15] != b'Z' {
        return Err(bad());
    }
    NaiveDateTime::parse_from_str(ts, "%Y%m%dT%H%M%SZ").map_err(|_| bad())?;
    Ok(())
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionError::IllegalVersion("version cannot be empty".into()));
        }

        // Peel off the timestamp, branch and build strings in that order so
        // that each separator only applies to the portion before the next.
        let (rest, timestamp) = match s.find(':') {
            Some(i) => (&s[..i], Some(&s[i + 1..])),
            None => (s, None),
        };
        let (rest, branch) = match rest.find('-') {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };
        let (release, build) = match rest.find(',') {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };

        if release.is_empty() {
            return Err(VersionError::IllegalVersion(format!(
                "versions must have a release value: {s}"
            )));
        }

        let parse_seq = |part: &str| -> Result<DotSequence, VersionError> {
            part.parse()
                .map_err(|_| VersionError::IllegalVersion(s.to_string()))
        };

        let version = Version {
            release: parse_seq(release)?,
            build_release: build.map(parse_seq).transpose()?,
            branch: branch.map(parse_seq).transpose()?,
            timestamp: timestamp.map(str::to_string),
        };
        if let Some(ts) = &version.timestamp {
            validate_timestamp(ts)?;
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.release)?;
        if let Some(build) = &self.build_release {
            write!(f, ",{build}")?;
        }
        if let Some(branch) = &self.branch {
            write!(f, "-{branch}")?;
        }
        if let Some(ts) = &self.timestamp {
            write!(f, ":{ts}")?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.release == other.release
            && self.branch == other.branch
            && self.timestamp == other.timestamp
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.release.hash(state);
        self.branch.hash(state);
        self.timestamp.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // An absent branch or timestamp sorts before a present one.
        self.release
            .cmp(&other.release)
            .then_with(|| self.branch.cmp(&other.branch))
            .then_with(|| self.timestamp.cmp(&other.timestamp))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_components() {
        let ver = v("0.1,5.11-1:20070710T120000Z");
        assert_eq!(ver.release().to_string(), "0.1");
        assert_eq!(ver.build_release().unwrap().to_string(), "5.11");
        assert_eq!(ver.branch().unwrap().to_string(), "1");
        assert_eq!(ver.timestamp(), Some("20070710T120000Z"));
    }

    #[test]
    fn test_bad_versions() {
        assert!("".parse::<Version>().is_err());
        assert!("0.2.q.4,5.11-1".parse::<Version>().is_err());
        assert!(",5.11-1".parse::<Version>().is_err());
        assert!("0.3-".parse::<Version>().is_err());
    }

    #[test]
    fn test_bad_timestamps() {
        assert!("0.2,5.11-1:moomoomoomoomooZ".parse::<Version>().is_err());
        assert!("0.2,5.11-1:20070113T131519Q".parse::<Version>().is_err());
        assert!("0.2,5.11-1:29T131519Z".parse::<Version>().is_err());
        // bad month
        assert!("0.2,5.11-1:20070013T112233Z".parse::<Version>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(v("5.5.1-10:20051122T000000Z") < v("5.5.1-10:20070318T123456Z"));
        assert!(v("5.5.1-6") < v("5.5.1-10"));
        assert!(v("5.6,1") < v("5.7"));
        assert!(v("5.10") < v("5.10.1"));
        // absent branch sorts before present branch
        assert!(v("5.11") < v("5.11-0.72"));
        // absent timestamp sorts before present timestamp
        assert!(v("0.1,5.11-1") < v("0.1,5.11-1:20070710T120000Z"));
    }

    #[test]
    fn test_build_release_ignored_in_comparison() {
        assert_eq!(v("5.11,5.10"), v("5.11,5.11"));
        assert!(!(v("5.11,5.10") < v("5.11,5.11")));
    }

    #[test]
    fn test_successor_none() {
        assert!(v("5.5.1-10:20070318T123456Z")
            .is_successor(&v("5.5.1-10:20051122T000000Z"), Constraint::None));
        assert!(v("5.7").is_successor(&v("5.6,1"), Constraint::None));
        assert!(!v("5.6").is_successor(&v("5.6"), Constraint::None));
    }

    #[test]
    fn test_successor_auto() {
        // branch absent in the reference acts as a wildcard
        assert!(v("0.1,5.11-1").is_successor(&v("0.1,5.11"), Constraint::Auto));
        // so does an absent timestamp
        assert!(v("0.1,5.11:20071014T234545Z").is_successor(&v("0.1,5.11"), Constraint::Auto));
        // a different release is never a compatible successor
        assert!(!v("0.2,5.11").is_successor(&v("0.1,5.11"), Constraint::Auto));
        assert!(!v("0.2,5.11-1:20071029T131519Z").is_successor(&v("0.1,5.11"), Constraint::Auto));
        // branch prefix matching
        assert!(v("5.11-0.72.1").is_successor(&v("5.11-0.72"), Constraint::Auto));
        assert!(!v("5.11-0.73").is_successor(&v("5.11-0.72"), Constraint::Auto));
        // reference branch present, candidate branch absent
        assert!(!v("5.11").is_successor(&v("5.11-1"), Constraint::Auto));
        // the same version is its own compatible successor
        assert!(v("0.1,5.11").is_successor(&v("0.1,5.11"), Constraint::Auto));
    }

    #[test]
    fn test_display_round_trip() {
        for s in [
            "5.5.1,5.5.1-10:20051122T000000Z",
            "5.11-0.72",
            "0.1,5.11-1",
            "5",
        ] {
            assert_eq!(v(s).to_string(), s);
        }
    }

    #[test]
    fn test_serde_string_form() {
        let ver = v("0.1,5.11-1");
        let json = serde_json::to_string(&ver).unwrap();
        assert_eq!(json, "\"0.1,5.11-1\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ver);
    }
}
