//! Platform version detection.
//!
//! Self-hosted platform releases are named `vYYYYMM-N`. Releases older than
//! [`LEGACY_DEMAND_CUTOFF`] cannot filter runs by agent pool, so autoscaling
//! falls back to counting workspaces with pending runs.

use std::cmp::Ordering;

/// First self-hosted release that supports the run-listing demand algorithm.
pub const LEGACY_DEMAND_CUTOFF: PlatformVersion = PlatformVersion {
    year_month: 202409,
    sequence: 1,
};

/// A parsed `vYYYYMM-N` release name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformVersion {
    pub year_month: u32,
    pub sequence: u32,
}

impl PlatformVersion {
    /// Parse `vYYYYMM-N` (the leading `v` is optional).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let raw = raw.strip_prefix('v').unwrap_or(raw);
        let (year_month, sequence) = raw.split_once('-')?;
        if year_month.len() != 6 {
            return None;
        }
        Some(Self {
            year_month: year_month.parse().ok()?,
            sequence: sequence.parse().ok()?,
        })
    }
}

impl PartialOrd for PlatformVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PlatformVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.year_month
            .cmp(&other.year_month)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl std::fmt::Display for PlatformVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}-{}", self.year_month, self.sequence)
    }
}

/// How agent demand is computed for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemandAlgorithm {
    /// Count non-terminal runs assigned to the pool.
    Modern,
    /// Count workspaces whose current run is queued or running.
    Legacy,
}

impl DemandAlgorithm {
    /// Pick the algorithm from the platform's reported release.
    ///
    /// The managed platform reports no release and always supports the
    /// modern algorithm. Release names that do not parse are treated as
    /// modern as well (development builds).
    pub fn for_platform(version: Option<&str>) -> Self {
        match version.and_then(PlatformVersion::parse) {
            Some(v) if v < LEGACY_DEMAND_CUTOFF => Self::Legacy,
            _ => Self::Modern,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            PlatformVersion::parse("v202311-1"),
            Some(PlatformVersion {
                year_month: 202311,
                sequence: 1
            })
        );
        assert_eq!(
            PlatformVersion::parse("202502-12").map(|v| v.sequence),
            Some(12)
        );
        assert_eq!(PlatformVersion::parse("latest"), None);
        assert_eq!(PlatformVersion::parse("v2024-1"), None);
    }

    #[test]
    fn test_ordering() {
        let a = PlatformVersion::parse("v202409-1").unwrap();
        let b = PlatformVersion::parse("v202409-2").unwrap();
        let c = PlatformVersion::parse("v202410-1").unwrap();
        assert!(a < b && b < c);
        assert_eq!(a.to_string(), "v202409-1");
    }

    #[test]
    fn test_algorithm_selection() {
        assert_eq!(DemandAlgorithm::for_platform(None), DemandAlgorithm::Modern);
        assert_eq!(
            DemandAlgorithm::for_platform(Some("v202311-1")),
            DemandAlgorithm::Legacy
        );
        assert_eq!(
            DemandAlgorithm::for_platform(Some("v202409-1")),
            DemandAlgorithm::Modern
        );
        assert_eq!(
            DemandAlgorithm::for_platform(Some("nightly")),
            DemandAlgorithm::Modern
        );
    }
}
