//! URL classification and hospital-URL decomposition
//!
//! The listing site uses stable path shapes:
//!
//! - Hospital pages: `/hospitals/{city}/{name}[/{area}]`
//! - Doctor profiles: `/doctors/{specialty}/{city}/{slug}`
//! - Video-consultation / private-practice channels carry a
//!   "video-consultation" or "online-consultation" path marker
//!
//! Private-practice detection runs before the hospital pattern so a
//! consultation URL is never mistaken for a hospital. Callers scanning a
//! hospital About section must drop links that classify as [`UrlKind::Hospital`]
//! before treating them as doctor references; cross-links to other hospitals
//! used to leak into doctor lists that way.

use regex::Regex;
use std::sync::OnceLock;

/// What a referenced URL points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Hospital,
    DoctorProfile,
    PrivatePractice,
    Unknown,
}

/// Decomposed hospital URL: `/hospitals/{city}/{name}[/{area}]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HospitalUrlParts {
    pub city: String,
    pub name: String,
    pub area: Option<String>,
}

fn hospital_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/hospitals/([^/?#]+)/([^/?#]+)(?:/([^/?#]+))?").unwrap())
}

/// Classify a referenced URL
pub fn classify(url: &str) -> UrlKind {
    if url.is_empty() {
        return UrlKind::Unknown;
    }
    let lower = url.to_ascii_lowercase();
    // Consultation channels take precedence over the hospital path shape
    if lower.contains("video-consultation")
        || lower.contains("online-consultation")
        || lower.contains("video_consultation")
    {
        return UrlKind::PrivatePractice;
    }
    if hospital_pattern().is_match(url) {
        return UrlKind::Hospital;
    }
    if url.contains("/doctors/") {
        return UrlKind::DoctorProfile;
    }
    UrlKind::Unknown
}

/// Decompose a hospital URL into city, name, and optional area.
///
/// Path segments are hyphen-separated slugs; they come back title-cased with
/// hyphens replaced by spaces. Returns `None` when the URL does not match the
/// hospital path shape (including consultation URLs).
pub fn parse_hospital_url(url: &str) -> Option<HospitalUrlParts> {
    if classify(url) != UrlKind::Hospital {
        return None;
    }
    let caps = hospital_pattern().captures(url)?;
    let city = titleize(caps.get(1)?.as_str());
    let name = titleize(caps.get(2)?.as_str());
    let area = caps.get(3).map(|m| titleize(m.as_str()));
    Some(HospitalUrlParts { city, name, area })
}

/// Hyphen-to-space and title-case normalization for URL slugs
fn titleize(slug: &str) -> String {
    slug.split('-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
