//! Common test utilities: an in-memory fixture site standing in for the
//! listing website.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use sehat::error::{Error, FetchError};
use sehat::source::{
    CityStub, DoctorProfile, HospitalDetail, HospitalStub, PageSource, SessionFactory,
};

pub const BASE: &str = "https://www.marham.pk";

pub fn city_url(slug: &str) -> String {
    format!("{BASE}/hospitals/{slug}")
}

pub fn hospital_url(city: &str, slug: &str) -> String {
    format!("{BASE}/hospitals/{city}/{slug}")
}

pub fn doctor_url(slug: &str) -> String {
    format!("{BASE}/doctors/karachi/dermatologist/{slug}")
}

/// In-memory site model served to the pipeline through [`FixtureFactory`]
#[derive(Default)]
pub struct FixtureSite {
    pub cities: Vec<CityStub>,
    pub listing_pages: HashMap<(String, u32), Vec<HospitalStub>>,
    pub hospital_pages: HashMap<String, HospitalDetail>,
    pub doctor_pages: HashMap<String, DoctorProfile>,
    /// When set, every listing fetch fails with a server error
    pub fail_listings: bool,
    /// (city url, page) of every listing fetch, for walk-termination asserts
    pub listing_fetches: Mutex<Vec<(String, u32)>>,
}

impl FixtureSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_city(&mut self, name: &str, url: &str) {
        self.cities.push(CityStub {
            name: name.to_string(),
            url: url.to_string(),
        });
    }

    pub fn add_listing_page(&mut self, city_url: &str, page: u32, stubs: Vec<HospitalStub>) {
        self.listing_pages.insert((city_url.to_string(), page), stubs);
    }

    pub fn add_hospital_page(&mut self, url: &str, detail: HospitalDetail) {
        self.hospital_pages.insert(url.to_string(), detail);
    }

    pub fn add_doctor_page(&mut self, url: &str, profile: DoctorProfile) {
        self.doctor_pages.insert(url.to_string(), profile);
    }

    pub fn fail_all_listings(&mut self) {
        self.fail_listings = true;
    }

    pub fn highest_listing_page(&self, city: &str) -> u32 {
        self.listing_fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == city)
            .map(|(_, p)| *p)
            .max()
            .unwrap_or(0)
    }
}

pub fn hospital_stub(name: &str, url: &str) -> HospitalStub {
    HospitalStub {
        name: name.to_string(),
        url: url.to_string(),
        area: None,
        address: None,
        location: None,
    }
}

/// Session factory handing every worker a view of the same fixture site
pub struct FixtureFactory(pub Arc<FixtureSite>);

impl SessionFactory for FixtureFactory {
    fn open_session(&self) -> Result<Box<dyn PageSource>, Error> {
        Ok(Box::new(FixtureSource {
            site: Arc::clone(&self.0),
        }))
    }
}

struct FixtureSource {
    site: Arc<FixtureSite>,
}

#[async_trait]
impl PageSource for FixtureSource {
    async fn city_listing(&mut self) -> Result<Vec<CityStub>, Error> {
        Ok(self.site.cities.clone())
    }

    async fn hospital_listing(
        &mut self,
        city_url: &str,
        page: u32,
    ) -> Result<Vec<HospitalStub>, Error> {
        self.site
            .listing_fetches
            .lock()
            .unwrap()
            .push((city_url.to_string(), page));
        if self.site.fail_listings {
            return Err(Error::Fetch(FetchError::ServerError(503)));
        }
        Ok(self
            .site
            .listing_pages
            .get(&(city_url.to_string(), page))
            .cloned()
            .unwrap_or_default())
    }

    async fn hospital_detail(&mut self, url: &str) -> Result<HospitalDetail, Error> {
        self.site
            .hospital_pages
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Fetch(FetchError::ServerError(404)))
    }

    async fn doctor_profile(&mut self, url: &str) -> Result<DoctorProfile, Error> {
        self.site
            .doctor_pages
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Fetch(FetchError::ServerError(404)))
    }
}
