//! Criticality classification for terminal errors.
//!
//! Decides whether a terminal error is worth surfacing to the user (alert
//! banner, error API) or can be handled quietly. Callers pick a profile;
//! an explicit profile fully overrides the default heuristic.

use crate::error::{CostscopeError, ErrorCode};

/// Profile deciding which terminal errors count as critical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriticalityProfile {
    /// Use the built-in heuristic: status >= 500, timeouts, and status-less
    /// network/unknown failures are critical; validation failures never are.
    DefaultHeuristic,
    /// Only transient infrastructure failures: 502/503/504, timeouts, and
    /// network errors.
    TransientInfra,
    /// Nothing is ever critical.
    Nothing,
    /// Explicit sets. Critical iff the status is listed OR the code is listed.
    /// Replaces the heuristic entirely; empty sets mean nothing matches.
    Custom {
        statuses: Vec<u16>,
        codes: Vec<ErrorCode>,
    },
}

impl Default for CriticalityProfile {
    fn default() -> Self {
        Self::DefaultHeuristic
    }
}

impl CriticalityProfile {
    /// The transient-infra profile as explicit sets.
    pub fn transient_infra_sets() -> (Vec<u16>, Vec<ErrorCode>) {
        (
            vec![502, 503, 504],
            vec![ErrorCode::Timeout, ErrorCode::NetworkError],
        )
    }
}

/// Classify a terminal error under the given profile.
pub fn is_critical(err: &CostscopeError, profile: &CriticalityProfile) -> bool {
    match profile {
        CriticalityProfile::DefaultHeuristic => default_heuristic(err),
        CriticalityProfile::TransientInfra => {
            let (statuses, codes) = CriticalityProfile::transient_infra_sets();
            matches_sets(err, &statuses, &codes)
        }
        CriticalityProfile::Nothing => false,
        CriticalityProfile::Custom { statuses, codes } => matches_sets(err, statuses, codes),
    }
}

fn matches_sets(err: &CostscopeError, statuses: &[u16], codes: &[ErrorCode]) -> bool {
    let status_match = err.status().map(|s| statuses.contains(&s)).unwrap_or(false);
    status_match || codes.contains(&err.code())
}

fn default_heuristic(err: &CostscopeError) -> bool {
    match err.code() {
        ErrorCode::ValidationError => false,
        ErrorCode::Timeout => true,
        ErrorCode::NetworkError | ErrorCode::Unknown => match err.status() {
            Some(status) => status >= 500,
            None => true,
        },
        ErrorCode::HttpError => err.status().map(|s| s >= 500).unwrap_or(false),
    }
}

// =============================================================================
// TESTS
// =============================================================================
