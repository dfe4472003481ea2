//! HTTP page source
//!
//! Production implementation of [`PageSource`] backed by `reqwest` and
//! `scraper`. Each session owns its own client (and cookie jar); sessions are
//! never shared across workers. Fetches retry internally with exponential
//! backoff, so a [`FetchError`] surfacing to the pipeline already means the
//! retries were exhausted.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::classify::{classify, UrlKind};
use crate::error::{Error, FetchError};
use crate::models::Timings;
use crate::source::{
    AboutLink, CityStub, DoctorCard, DoctorProfile, HospitalDetail, HospitalStub, PageSource,
    PracticeRef, SessionFactory,
};

const MAX_FETCH_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Opens one [`HttpPageSource`] per worker
pub struct HttpSessionFactory {
    base_url: String,
    user_agent: String,
    timeout: Duration,
}

impl HttpSessionFactory {
    pub fn new(base_url: impl Into<String>, user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            user_agent: user_agent.into(),
            timeout,
        }
    }
}

impl SessionFactory for HttpSessionFactory {
    fn open_session(&self) -> Result<Box<dyn PageSource>, Error> {
        let client = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .cookie_store(true)
            .gzip(true)
            .build()
            .map_err(FetchError::Http)?;
        Ok(Box::new(HttpPageSource {
            client,
            base_url: self.base_url.clone(),
        }))
    }
}

/// One fetch session: a dedicated HTTP client with its own cookie jar
pub struct HttpPageSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPageSource {
    async fn fetch(&self, url: &str) -> Result<String, Error> {
        let mut last_err = FetchError::MaxRetriesExceeded;
        for attempt in 0..MAX_FETCH_ATTEMPTS {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY_MS * (1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.text().await.map_err(FetchError::Http)?);
                    }
                    debug!(url, status = status.as_u16(), attempt, "non-success response");
                    last_err = FetchError::ServerError(status.as_u16());
                    // Client errors other than 429 will not improve with retries
                    if status.is_client_error() && status.as_u16() != 429 {
                        break;
                    }
                }
                Err(e) => {
                    debug!(url, attempt, error = %e, "request failed");
                    last_err = if e.is_timeout() {
                        FetchError::Timeout
                    } else {
                        FetchError::Http(e)
                    };
                }
            }
        }
        Err(last_err.into())
    }

}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn city_listing(&mut self) -> Result<Vec<CityStub>, Error> {
        let url = format!("{}/hospitals", self.base_url.trim_end_matches('/'));
        let html = self.fetch(&url).await?;
        Ok(extract_cities(&html, &self.base_url))
    }

    async fn hospital_listing(
        &mut self,
        city_url: &str,
        page: u32,
    ) -> Result<Vec<HospitalStub>, Error> {
        let url = format!("{city_url}?page={page}");
        let html = self.fetch(&url).await?;
        let stubs = extract_hospital_cards(&html, &self.base_url);
        debug!(city = city_url, page, found = stubs.len(), "listing page extracted");
        Ok(stubs)
    }

    async fn hospital_detail(&mut self, url: &str) -> Result<HospitalDetail, Error> {
        let html = self.fetch(url).await?;
        Ok(extract_hospital_detail(&html, &self.base_url))
    }

    async fn doctor_profile(&mut self, url: &str) -> Result<DoctorProfile, Error> {
        let html = self.fetch(url).await?;
        Ok(extract_doctor_profile(&html, &self.base_url))
    }
}

// ----------------------------------------------------------------------
// Pure extraction helpers (no Html value crosses an await point)
// ----------------------------------------------------------------------

fn sel(s: &str) -> Selector {
    Selector::parse(s).unwrap()
}

fn absolutize(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match Url::parse(base_url).and_then(|base| base.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}

fn clean_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_cities(html: &str, base_url: &str) -> Vec<CityStub> {
    let doc = Html::parse_document(html);
    let anchor = sel(r#"a[href*="/hospitals/"]"#);

    let mut cities = Vec::new();
    for a in doc.select(&anchor) {
        let Some(href) = a.value().attr("href") else { continue };
        let url = absolutize(base_url, href);
        // City listing pages have exactly one segment after /hospitals/
        let Some(rest) = url.split("/hospitals/").nth(1) else { continue };
        let slug = rest.split(['?', '#']).next().unwrap_or("");
        if slug.is_empty() || slug.contains('/') {
            continue;
        }
        let name = clean_text(a).replace("Hospitals in", "").trim().to_string();
        if name.len() < 2 {
            continue;
        }
        let url = url.split(['?', '#']).next().unwrap_or(&url).to_string();
        if !cities.iter().any(|c: &CityStub| c.url == url) {
            cities.push(CityStub { name, url });
        }
    }
    cities
}

fn extract_hospital_cards(html: &str, base_url: &str) -> Vec<HospitalStub> {
    let doc = Html::parse_document(html);
    let anchor = sel(r#"a[href*="/hospitals/"]"#);

    let mut stubs: Vec<HospitalStub> = Vec::new();
    for a in doc.select(&anchor) {
        let Some(href) = a.value().attr("href") else { continue };
        let url = absolutize(base_url, href);
        let url = url.split(['?', '#']).next().unwrap_or(&url).to_string();
        if classify(&url) != UrlKind::Hospital {
            continue;
        }
        let name = clean_text(a);
        if name.is_empty() || stubs.iter().any(|s| s.url == url) {
            continue;
        }
        stubs.push(HospitalStub {
            name,
            url,
            area: None,
            address: None,
            location: None,
        });
    }
    stubs
}

fn extract_hospital_detail(html: &str, base_url: &str) -> HospitalDetail {
    let doc = Html::parse_document(html);
    let mut detail = HospitalDetail::default();

    if let Some(h1) = doc.select(&sel("h1")).next() {
        let name = clean_text(h1);
        if !name.is_empty() {
            detail.name = Some(name);
        }
    }
    if let Some(address) = doc.select(&sel("p.address, div.address, span.address")).next() {
        let text = clean_text(address);
        if !text.is_empty() {
            detail.address = Some(text);
        }
    }

    detail.departments = extract_chip_list(&doc, "departments");
    detail.procedures = extract_chip_list(&doc, "procedures");
    detail.facilities = extract_chip_list(&doc, "facilities");

    // Doctor cards on the hospital page carry the profile link and name
    let doctor_anchor = sel(r#"a[href*="/doctors/"]"#);
    for a in doc.select(&doctor_anchor) {
        let Some(href) = a.value().attr("href") else { continue };
        let url = absolutize(base_url, href);
        let url = url.split(['?', '#']).next().unwrap_or(&url).to_string();
        if classify(&url) != UrlKind::DoctorProfile {
            continue;
        }
        let name = clean_text(a);
        if name.is_empty() || detail.doctor_cards.iter().any(|c| c.profile_url == url) {
            continue;
        }
        detail.doctor_cards.push(DoctorCard {
            name,
            profile_url: url,
            fee: None,
            timings: None,
        });
    }

    // About sections may link both doctors and other hospitals; the caller
    // classifies and filters, we only collect
    let about_anchor = sel("section.about a, div.about a, #about a");
    for a in doc.select(&about_anchor) {
        let Some(href) = a.value().attr("href") else { continue };
        let url = absolutize(base_url, href);
        let name = clean_text(a);
        if name.is_empty() {
            continue;
        }
        if !detail.about_links.iter().any(|l| l.url == url) {
            detail.about_links.push(AboutLink { name, url });
        }
    }

    detail
}

fn extract_chip_list(doc: &Html, section: &str) -> Vec<String> {
    let selector = sel(&format!(
        "section.{section} li, div.{section} li, ul.{section} li"
    ));
    let mut items = Vec::new();
    for li in doc.select(&selector) {
        let text = clean_text(li);
        if !text.is_empty() && !items.contains(&text) {
            items.push(text);
        }
    }
    items
}

fn extract_doctor_profile(html: &str, base_url: &str) -> DoctorProfile {
    let doc = Html::parse_document(html);
    let mut profile = DoctorProfile::default();

    if let Some(h1) = doc.select(&sel("h1")).next() {
        let name = clean_text(h1);
        if !name.is_empty() {
            profile.name = Some(name);
        }
    }

    // Specialties sit in the intro paragraph as a comma-joined strong tag
    if let Some(spec) = doc.select(&sel("p.mt-10 strong.text-sm, strong.text-sm")).next() {
        profile.specialty = clean_text(spec)
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    profile.qualifications = extract_chip_list(&doc, "qualifications");
    profile.services = extract_chip_list(&doc, "services");
    profile.diseases = extract_chip_list(&doc, "diseases");
    profile.symptoms = extract_chip_list(&doc, "symptoms");
    profile.interests = extract_chip_list(&doc, "interests");

    let years_re = Regex::new(r"(\d+)\s*(?:\+\s*)?[Yy]ears").unwrap();
    if let Some(exp) = doc.select(&sel("span.experience, div.experience, p.experience")).next() {
        if let Some(caps) = years_re.captures(&clean_text(exp)) {
            profile.experience_years = caps[1].parse().ok();
        }
    }

    // Practice cards: one per hospital / consultation channel
    let card = sel("div.mt-4.row.cursor-pointer, div.practice-card");
    for c in doc.select(&card) {
        profile.practices.push(extract_practice(c, base_url));
    }

    profile
}

fn extract_practice(card: ElementRef<'_>, base_url: &str) -> PracticeRef {
    let mut practice = PracticeRef::default();

    if let Some(h3) = card.select(&sel("h3")).next() {
        let name = clean_text(h3);
        if !name.is_empty() {
            practice.name = Some(name);
        }
    }
    if let Some(a) = card.select(&sel("a[href]")).next() {
        if let Some(href) = a.value().attr("href") {
            practice.url = Some(absolutize(base_url, href));
        }
    }

    let fee_re = Regex::new(r"(?:Rs\.?|PKR)\s*([\d,]+)").unwrap();
    let text = card.text().collect::<String>();
    if let Some(caps) = fee_re.captures(&text) {
        practice.fee = caps[1].replace(',', "").parse().ok();
    }

    // Timing tables list one row per day
    let row = sel("table tr");
    let cell = sel("td");
    let mut timings = Timings::new();
    for tr in card.select(&row) {
        let cells: Vec<String> = tr.select(&cell).map(clean_text).collect();
        if cells.len() >= 2 && !cells[0].is_empty() && !cells[1].is_empty() {
            timings.insert(cells[0].clone(), cells[1].clone());
        }
    }
    if !timings.is_empty() {
        practice.timings = Some(timings);
    }

    practice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_hospital_cards() {
        let html = r#"
            <div class="listing">
              <a href="/hospitals/karachi/city-hospital">City Hospital</a>
              <a href="/hospitals/karachi/city-hospital">City Hospital</a>
              <a href="/hospitals/karachi">Karachi</a>
              <a href="/doctors/karachi/derm/dr-jane">Dr Jane</a>
            </div>
        "#;
        let stubs = extract_hospital_cards(html, "https://www.marham.pk");
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].name, "City Hospital");
        assert_eq!(
            stubs[0].url,
            "https://www.marham.pk/hospitals/karachi/city-hospital"
        );
    }

    #[test]
    fn test_extract_cities_skips_hospital_pages() {
        let html = r#"
            <h2>Top Cities</h2>
            <a href="/hospitals/karachi">Hospitals in Karachi</a>
            <a href="/hospitals/lahore?page=2">Hospitals in Lahore</a>
            <a href="/hospitals/karachi/city-hospital">City Hospital</a>
        "#;
        let cities = extract_cities(html, "https://www.marham.pk");
        assert_eq!(cities.len(), 2);
        assert_eq!(cities[0].name, "Karachi");
        assert_eq!(cities[1].url, "https://www.marham.pk/hospitals/lahore");
    }

    #[test]
    fn test_extract_practice_card() {
        let html = r#"
            <div class="mt-4 row cursor-pointer">
              <h3>City Hospital</h3>
              <a href="/hospitals/karachi/city-hospital">View</a>
              <span>Fee: Rs. 1,500</span>
              <table>
                <tr><td>Monday</td><td>09:00 - 17:00</td></tr>
                <tr><td>Tuesday</td><td>10:00 - 16:00</td></tr>
              </table>
            </div>
        "#;
        let doc = Html::parse_fragment(html);
        let card_sel = sel("div.mt-4.row.cursor-pointer");
        let card = doc.select(&card_sel).next().unwrap();
        let practice = extract_practice(card, "https://www.marham.pk");

        assert_eq!(practice.name.as_deref(), Some("City Hospital"));
        assert_eq!(practice.fee, Some(1500));
        let timings = practice.timings.unwrap();
        assert_eq!(timings.get("Monday").unwrap(), "09:00 - 17:00");
    }

    #[test]
    fn test_extract_doctor_profile_specialties() {
        let html = r#"
            <h1>Dr Jane Doe</h1>
            <p class="mt-10"><strong class="text-sm">Dermatologist, Cosmetologist</strong></p>
        "#;
        let profile = extract_doctor_profile(html, "https://www.marham.pk");
        assert_eq!(profile.name.as_deref(), Some("Dr Jane Doe"));
        assert_eq!(
            profile.specialty,
            vec!["Dermatologist".to_string(), "Cosmetologist".to_string()]
        );
    }
}
