//! Page-source abstraction
//!
//! The pipeline never inspects raw HTML. It consumes pages through
//! [`PageSource`], which bundles "fetch the page" and "extract its fields"
//! into typed per-page-kind calls. [`SessionFactory`] opens one independent
//! session per worker so browser/cookie state is never shared across workers.
//!
//! [`http::HttpSessionFactory`] is the production implementation; tests plug
//! in fixture sources.

pub mod http;

use async_trait::async_trait;

use crate::error::Error;
use crate::models::{GeoPoint, Timings};

/// A city link found on the site root listing (Phase 0)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityStub {
    pub name: String,
    pub url: String,
}

/// A hospital card found on a city listing page (Phase 1)
#[derive(Debug, Clone, PartialEq)]
pub struct HospitalStub {
    pub name: String,
    pub url: String,
    pub area: Option<String>,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
}

/// A doctor card found on a hospital detail page (Phase 2)
#[derive(Debug, Clone, PartialEq)]
pub struct DoctorCard {
    pub name: String,
    pub profile_url: String,
    pub fee: Option<u32>,
    pub timings: Option<Timings>,
}

/// A link found in a hospital's About section. May reference a doctor or
/// cross-link another hospital; the caller classifies and filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AboutLink {
    pub name: String,
    pub url: String,
}

/// Descriptive fields extracted from a hospital detail page (Phase 2)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HospitalDetail {
    pub name: Option<String>,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
    pub departments: Vec<String>,
    pub procedures: Vec<String>,
    pub facilities: Vec<String>,
    pub founded_year: Option<u32>,
    pub fees_range: Option<String>,
    pub doctor_cards: Vec<DoctorCard>,
    pub about_links: Vec<AboutLink>,
}

/// One practice entry on a doctor profile: a hospital affiliation or a
/// private/video-consultation channel, distinguished by URL classification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PracticeRef {
    pub name: Option<String>,
    pub url: Option<String>,
    pub fee: Option<u32>,
    pub timings: Option<Timings>,
    pub location: Option<GeoPoint>,
}

/// Fields extracted from a doctor profile page (Phase 3)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoctorProfile {
    pub name: Option<String>,
    pub specialty: Vec<String>,
    pub qualifications: Vec<String>,
    pub experience_years: Option<u32>,
    pub services: Vec<String>,
    pub diseases: Vec<String>,
    pub symptoms: Vec<String>,
    pub interests: Vec<String>,
    pub practices: Vec<PracticeRef>,
}

/// One fetch-and-extract session, owned by a single worker.
///
/// Fetching may block and retry internally; extraction is pure. Implementors
/// return [`Error::Fetch`] or [`Error::Parse`] so the orchestrator can count
/// and skip the unit without aborting the phase.
#[async_trait]
pub trait PageSource: Send {
    /// Enumerate cities from the site root listing
    async fn city_listing(&mut self) -> Result<Vec<CityStub>, Error>;

    /// Extract hospital cards from one page of a city's listing.
    /// An empty vector means the page exists but lists nothing.
    async fn hospital_listing(
        &mut self,
        city_url: &str,
        page: u32,
    ) -> Result<Vec<HospitalStub>, Error>;

    /// Fetch and extract a hospital detail page
    async fn hospital_detail(&mut self, url: &str) -> Result<HospitalDetail, Error>;

    /// Fetch and extract a doctor profile page
    async fn doctor_profile(&mut self, url: &str) -> Result<DoctorProfile, Error>;
}

/// Opens page-source sessions, one per worker
pub trait SessionFactory: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn PageSource>, Error>;
}
