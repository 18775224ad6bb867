use std::fmt;
use std::str::FromStr;

use crate::version::VersionError;

/// A dot sequence is the typical "x.y.z" string used in software versioning.
///
/// Components are unsigned integers; comparison is lexicographic, so a longer
/// sequence sorts after its own prefix ("1.1.3" > "1.1").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DotSequence(Vec<u32>);

impl DotSequence {
    /// Return true if `self` is a "subsequence" of `other`: the two have
    /// identical components up to the length of `self`.
    pub fn is_subsequence(&self, other: &DotSequence) -> bool {
        if self.0.len() > other.0.len() {
            return false;
        }
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    /// Return true if both sequences share the same leading component.
    pub fn is_same_major(&self, other: &DotSequence) -> bool {
        self.0.first() == other.0.first()
    }

    /// The individual numeric components.
    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

fn component_val(elem: &str) -> Result<u32, VersionError> {
    let bad = || VersionError::IllegalDotSequence(elem.to_string());
    if elem.is_empty() || !elem.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let value: u32 = elem.parse().map_err(|_| bad())?;
    // Reject zero padding ("05") so every sequence has one spelling.
    if value > 0 && elem.starts_with('0') {
        return Err(bad());
    }
    Ok(value)
}

impl FromStr for DotSequence {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionError::IllegalDotSequence(s.to_string()));
        }
        let components = s
            .split('.')
            .map(component_val)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionError::IllegalDotSequence(s.to_string()))?;
        Ok(DotSequence(components))
    }
}

impl fmt::Display for DotSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ds(s: &str) -> DotSequence {
        s.parse().unwrap()
    }

    #[test]
    fn test_bogus_dot_sequence() {
        assert!("x.y".parse::<DotSequence>().is_err());
        assert!("".parse::<DotSequence>().is_err());
        assert!("@".parse::<DotSequence>().is_err());
        assert!("1.@".parse::<DotSequence>().is_err());
        assert!("1.".parse::<DotSequence>().is_err());
        assert!("-1.2".parse::<DotSequence>().is_err());
    }

    #[test]
    fn test_zero_padding_rejected() {
        assert!("05".parse::<DotSequence>().is_err());
        assert!("1.05".parse::<DotSequence>().is_err());
        // a lone zero component is legal
        assert_eq!(ds("0.5.11").components(), &[0, 5, 11]);
    }

    #[test]
    fn test_comparison() {
        assert_eq!(ds("1.1.3"), ds("1.1.3"));
        assert!(ds("5.4") < ds("5.6"));
        assert!(ds("5.4") < ds("5.4.1"));
        assert!(ds("5.5.1") < ds("6.5.1"));
        assert!(ds("5.10") > ds("5.6"));
    }

    #[test]
    fn test_subsequence() {
        assert!(ds("5.4").is_subsequence(&ds("5.4.1")));
        assert!(ds("5.4.1").is_subsequence(&ds("5.4.1")));
        assert!(!ds("5.4.1").is_subsequence(&ds("5.4")));
        assert!(!ds("5.5").is_subsequence(&ds("5.4.1")));
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["1.1.3", "0.5.11", "5"] {
            assert_eq!(ds(s).to_string(), s);
        }
    }
}
