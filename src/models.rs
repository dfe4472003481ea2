// Core data structures for the sehat pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// Opening hours keyed by day name, e.g. "Monday" -> "09:00 - 17:00"
pub type Timings = BTreeMap<String, String>;

/// Geographic coordinates attached to a hospital
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

// ============================================================================
// Workflow statuses
// ============================================================================
//
// Each entity carries a closed status enumeration. The only legal writes are
// the transitions listed in `can_advance_to`; the store rejects anything else.

/// City workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CityStatus {
    Pending,
    Scraped,
}

impl CityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scraped => "scraped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "scraped" => Some(Self::Scraped),
            _ => None,
        }
    }

    /// Transition table: pending -> scraped only
    pub fn can_advance_to(&self, next: Self) -> bool {
        matches!((self, next), (Self::Pending, Self::Scraped))
    }
}

/// Hospital workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HospitalStatus {
    Pending,
    Enriched,
    DoctorsCollected,
}

impl HospitalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Enriched => "enriched",
            Self::DoctorsCollected => "doctors_collected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "enriched" => Some(Self::Enriched),
            "doctors_collected" => Some(Self::DoctorsCollected),
            _ => None,
        }
    }

    /// Transition table: pending -> enriched -> doctors_collected, with the
    /// enrichment phase allowed to collapse both steps into one write.
    pub fn can_advance_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Enriched)
                | (Self::Pending, Self::DoctorsCollected)
                | (Self::Enriched, Self::DoctorsCollected)
        )
    }
}

/// Doctor workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoctorStatus {
    Pending,
    Processed,
}

impl DoctorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processed" => Some(Self::Processed),
            _ => None,
        }
    }

    /// Transition table: pending -> processed only
    pub fn can_advance_to(&self, next: Self) -> bool {
        matches!((self, next), (Self::Pending, Self::Processed))
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A city listing page discovered during Phase 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    /// Unique key, e.g. `https://site/hospitals/karachi`
    pub url: String,
    pub status: CityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl City {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            url: url.into(),
            status: CityStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A doctor's entry inside `Hospital::doctors`
///
/// The mirror of [`HospitalRef`]: hospital-side view of an affiliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorEntry {
    /// Unique within the owning hospital's `doctors` list
    pub profile_url: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<Timings>,
}

impl DoctorEntry {
    pub fn new(profile_url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            profile_url: profile_url.into(),
            name: name.into(),
            fee: None,
            timings: None,
        }
    }
}

/// A hospital record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hospital {
    /// Primary key
    pub url: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub departments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub procedures: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub founded_year: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees_range: Option<String>,
    /// Ordered, deduplicated by `profile_url`
    #[serde(default)]
    pub doctors: Vec<DoctorEntry>,
    pub status: HospitalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Hospital {
    /// Minimal record created during Hospital Discovery
    pub fn stub(url: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            url: url.into(),
            name: name.into(),
            city: None,
            area: None,
            address: None,
            location: None,
            departments: Vec::new(),
            procedures: Vec::new(),
            facilities: Vec::new(),
            founded_year: None,
            fees_range: None,
            doctors: Vec::new(),
            status: HospitalStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Field-wise equality ignoring status and timestamps, used for no-op
    /// write avoidance in the merger.
    pub fn content_eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.name == other.name
            && self.city == other.city
            && self.area == other.area
            && self.address == other.address
            && self.location == other.location
            && self.departments == other.departments
            && self.procedures == other.procedures
            && self.facilities == other.facilities
            && self.founded_year == other.founded_year
            && self.fees_range == other.fees_range
            && self.doctors == other.doctors
    }
}

/// A hospital entry inside `Doctor::hospitals`
///
/// The mirror of [`DoctorEntry`]: doctor-side view of an affiliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HospitalRef {
    /// Unique within the owning doctor's `hospitals` list
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<Timings>,
}

/// A doctor's private/video-consultation channel. Single slot, never a list,
/// and never materialized as a Hospital record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivatePractice {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<Timings>,
}

/// A doctor record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    /// Primary key
    pub profile_url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specialty: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifications: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience_years: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diseases: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symptoms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interests: Vec<String>,
    /// Deduplicated by `url`; bidirectional mirror of `Hospital::doctors`
    #[serde(default)]
    pub hospitals: Vec<HospitalRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_practice: Option<PrivatePractice>,
    pub status: DoctorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Doctor {
    /// Minimal record created when a doctor is first referenced from a
    /// hospital page.
    pub fn stub(profile_url: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            profile_url: profile_url.into(),
            name: name.into(),
            specialty: Vec::new(),
            qualifications: Vec::new(),
            experience_years: None,
            services: Vec::new(),
            diseases: Vec::new(),
            symptoms: Vec::new(),
            interests: Vec::new(),
            hospitals: Vec::new(),
            private_practice: None,
            status: DoctorStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Field-wise equality ignoring status and timestamps, used for no-op
    /// write avoidance in the merger.
    pub fn content_eq(&self, other: &Self) -> bool {
        self.profile_url == other.profile_url
            && self.name == other.name
            && self.specialty == other.specialty
            && self.qualifications == other.qualifications
            && self.experience_years == other.experience_years
            && self.services == other.services
            && self.diseases == other.diseases
            && self.symptoms == other.symptoms
            && self.interests == other.interests
            && self.hospitals == other.hospitals
            && self.private_practice == other.private_practice
    }
}

// ============================================================================
// Run statistics
// ============================================================================

/// Per-worker run counters, combined by summation after workers join.
/// Never shared mutably during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl AddAssign for RunStats {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.created += rhs.created;
        self.updated += rhs.updated;
        self.skipped += rhs.skipped;
        self.errors += rhs.errors;
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed={} created={} updated={} skipped={} errors={}",
            self.processed, self.created, self.updated, self.skipped, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_city_transition_table() {
        assert!(CityStatus::Pending.can_advance_to(CityStatus::Scraped));
        assert!(!CityStatus::Scraped.can_advance_to(CityStatus::Pending));
        assert!(!CityStatus::Pending.can_advance_to(CityStatus::Pending));
    }

    #[test]
    fn test_hospital_transition_table() {
        assert!(HospitalStatus::Pending.can_advance_to(HospitalStatus::DoctorsCollected));
        assert!(HospitalStatus::Enriched.can_advance_to(HospitalStatus::DoctorsCollected));
        assert!(!HospitalStatus::DoctorsCollected.can_advance_to(HospitalStatus::Pending));
        assert!(!HospitalStatus::DoctorsCollected.can_advance_to(HospitalStatus::Enriched));
    }

    #[test]
    fn test_doctor_transition_table() {
        assert!(DoctorStatus::Pending.can_advance_to(DoctorStatus::Processed));
        assert!(!DoctorStatus::Processed.can_advance_to(DoctorStatus::Pending));
    }

    #[test]
    fn test_status_round_trip() {
        for s in ["pending", "enriched", "doctors_collected"] {
            assert_eq!(HospitalStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(HospitalStatus::parse("unknown").is_none());
    }

    #[test]
    fn test_content_eq_ignores_status() {
        let mut a = Doctor::stub("https://example.com/doctors/jane", "Jane");
        let mut b = a.clone();
        b.status = DoctorStatus::Processed;
        b.updated_at = Utc::now();
        assert!(a.content_eq(&b));

        a.specialty.push("Cardiology".into());
        assert!(!a.content_eq(&b));
    }

    #[test]
    fn test_stats_sum() {
        let mut total = RunStats::default();
        total += RunStats {
            processed: 2,
            created: 1,
            ..Default::default()
        };
        total += RunStats {
            processed: 3,
            errors: 1,
            ..Default::default()
        };
        assert_eq!(total.processed, 5);
        assert_eq!(total.created, 1);
        assert_eq!(total.errors, 1);
    }
}
