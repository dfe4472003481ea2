//! Multi-phase collection pipeline
//!
//! Four ordered phases, each independently resumable:
//!
//! | Phase | Reads | Advances |
//! |-------|-------|----------|
//! | 0 City Discovery | site root listing | creates City(pending) |
//! | 1 Hospital Discovery | City(pending) + listing pages | creates Hospital(pending), City -> scraped |
//! | 2 Hospital Enrichment | Hospital(pending) | Hospital -> doctors_collected, creates Doctor(pending) |
//! | 3 Doctor Enrichment | Doctor(pending) | Doctor -> processed |
//!
//! Work within a phase is partitioned once up front and processed by a fixed
//! pool of workers, each with its own page-source session.

pub mod orchestrator;
pub mod partition;

pub use orchestrator::Orchestrator;
pub use partition::{partition, partition_items};

use crate::error::Error;

/// One of the four pipeline phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    CityDiscovery,
    HospitalDiscovery,
    HospitalEnrichment,
    DoctorEnrichment,
}

impl Phase {
    /// Phases in execution order
    pub fn all() -> [Phase; 4] {
        [
            Self::CityDiscovery,
            Self::HospitalDiscovery,
            Self::HospitalEnrichment,
            Self::DoctorEnrichment,
        ]
    }

    pub fn number(&self) -> u8 {
        match self {
            Self::CityDiscovery => 0,
            Self::HospitalDiscovery => 1,
            Self::HospitalEnrichment => 2,
            Self::DoctorEnrichment => 3,
        }
    }

    pub fn from_number(n: u8) -> Result<Self, Error> {
        match n {
            0 => Ok(Self::CityDiscovery),
            1 => Ok(Self::HospitalDiscovery),
            2 => Ok(Self::HospitalEnrichment),
            3 => Ok(Self::DoctorEnrichment),
            other => Err(Error::config(format!("unknown phase {other}, expected 0-3"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CityDiscovery => "city_discovery",
            Self::HospitalDiscovery => "hospital_discovery",
            Self::HospitalEnrichment => "hospital_enrichment",
            Self::DoctorEnrichment => "doctor_enrichment",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Orchestrator tuning knobs, derived from [`crate::config::Config`]
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Worker pool size
    pub workers: usize,

    /// A run of this many consecutive listing pages with zero new hospital
    /// stubs ends a city's page walk. End-of-listing heuristic, tunable
    /// because a flaky source could terminate a walk early.
    pub empty_page_run: u32,

    /// Hard cap on listing pages walked per city
    pub max_pages: u32,

    /// Listing pages fetched per worker per batch during Phase 1
    pub pages_per_batch: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            empty_page_run: 5,
            max_pages: 500,
            pages_per_batch: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_numbering_round_trip() {
        for phase in Phase::all() {
            assert_eq!(Phase::from_number(phase.number()).unwrap(), phase);
        }
        assert!(Phase::from_number(4).is_err());
    }
}
