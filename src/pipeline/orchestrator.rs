//! Phase orchestration
//!
//! Drives the four-phase state machine: queries the store for the current
//! phase's pending records, partitions them across a fixed worker pool, and
//! advances statuses as units commit. Each worker opens its own page-source
//! session and accumulates private [`RunStats`]; totals are summed only after
//! all workers join.
//!
//! A unit that fails is logged with its identity and left in its current
//! status, so the next invocation of the same phase naturally retries it.
//! Completed units are skipped because their status has already advanced.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::classify::{classify, UrlKind};
use crate::error::{Error, Result};
use crate::merge;
use crate::models::{City, Doctor, DoctorEntry, Hospital, RunStats};
use crate::pipeline::{partition_items, Phase, PipelineOptions};
use crate::source::{DoctorProfile, HospitalDetail, PageSource, SessionFactory};
use crate::storage::{EntityStore, UpsertOutcome};

/// Drives the four collection phases against a store and a page source
pub struct Orchestrator {
    store: Arc<EntityStore>,
    sessions: Arc<dyn SessionFactory>,
    options: PipelineOptions,
}

impl Orchestrator {
    pub fn new(
        store: Arc<EntityStore>,
        sessions: Arc<dyn SessionFactory>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            sessions,
            options,
        }
    }

    /// Run a single phase, draining pending work up to `limit` units
    pub async fn run_phase(&self, phase: Phase, limit: Option<u64>) -> Result<RunStats> {
        info!(%phase, workers = self.options.workers, ?limit, "phase starting");
        let stats = match phase {
            Phase::CityDiscovery => self.run_city_discovery(limit).await?,
            Phase::HospitalDiscovery => self.run_hospital_discovery(limit).await?,
            Phase::HospitalEnrichment => self.run_hospital_enrichment(limit).await?,
            Phase::DoctorEnrichment => self.run_doctor_enrichment(limit).await?,
        };
        info!(%phase, %stats, "phase complete");
        Ok(stats)
    }

    /// Run phases 0 through 3 in order, feeding each phase's pending output
    /// into the next.
    pub async fn run_all(&self, limit: Option<u64>) -> Result<RunStats> {
        let mut total = RunStats::default();
        for phase in Phase::all() {
            total += self.run_phase(phase, limit).await?;
        }
        Ok(total)
    }

    // ------------------------------------------------------------------
    // Phase 0: City Discovery (serial, one root page)
    // ------------------------------------------------------------------

    async fn run_city_discovery(&self, limit: Option<u64>) -> Result<RunStats> {
        let mut session = self.sessions.open_session()?;
        // Root listing unreachable is a phase-level failure
        let cities = session.city_listing().await?;
        if cities.is_empty() {
            return Err(Error::other("no cities found on the root hospitals listing"));
        }

        let mut stats = RunStats::default();
        let cap = limit.unwrap_or(u64::MAX);
        for stub in cities {
            if stats.processed >= cap {
                break;
            }
            stats.processed += 1;
            match self.store.upsert_city(&stub.name, &stub.url) {
                Ok(true) => {
                    info!(city = %stub.name, url = %stub.url, "city discovered");
                    stats.created += 1;
                }
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    warn!(city = %stub.name, error = %e, "failed to save city");
                    stats.errors += 1;
                }
            }
        }
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Phase 1: Hospital Discovery (page walk per pending city)
    // ------------------------------------------------------------------

    /// The unit cap counts newly created hospitals, not pages walked; a walk
    /// cut short by the cap leaves its city pending so the next run resumes it.
    async fn run_hospital_discovery(&self, limit: Option<u64>) -> Result<RunStats> {
        let cities = self.store.pending_cities()?;
        let mut stats = RunStats::default();
        let cap = limit.unwrap_or(u64::MAX);

        for city in cities {
            if stats.created >= cap {
                break;
            }
            let remaining = cap - stats.created;
            stats += self.walk_city_listing(&city, remaining).await?;
        }
        Ok(stats)
    }

    /// Walk one city's listing pages in worker-sized batches until a run of
    /// `empty_page_run` consecutive pages yields zero new stubs, the page cap
    /// is hit, or the unit limit is exhausted. The city advances to `scraped`
    /// only when its listing was actually exhausted.
    async fn walk_city_listing(&self, city: &City, cap: u64) -> Result<RunStats> {
        let batch_size = (self.options.workers as u32) * self.options.pages_per_batch;
        let mut stats = RunStats::default();
        let mut empty_run = 0u32;
        let mut next_page = 1u32;
        let mut exhausted = false;
        let mut pages_consumed = 0u64;

        while !exhausted && next_page <= self.options.max_pages && stats.created < cap {
            let last = (next_page + batch_size - 1).min(self.options.max_pages);
            let pages: Vec<u32> = (next_page..=last).collect();
            next_page = last + 1;

            let mut outcomes = Vec::with_capacity(pages.len());
            let mut handles = Vec::new();
            for chunk in partition_items(&pages, self.options.workers) {
                let store = Arc::clone(&self.store);
                let sessions = Arc::clone(&self.sessions);
                let city_url = city.url.clone();
                handles.push(tokio::spawn(async move {
                    discover_pages(store, sessions, city_url, chunk).await
                }));
            }
            for joined in futures::future::join_all(handles).await {
                let (worker_outcomes, worker_stats) =
                    joined.map_err(|e| Error::other(e.to_string()))?;
                outcomes.extend(worker_outcomes);
                stats += worker_stats;
            }

            // Evaluate the end-of-listing heuristic in page order; pages that
            // failed to fetch neither extend nor reset the empty run.
            outcomes.sort_by_key(|o| o.page);
            pages_consumed += outcomes.iter().filter(|o| o.new_stubs.is_some()).count() as u64;
            for outcome in &outcomes {
                match outcome.new_stubs {
                    Some(0) => {
                        empty_run += 1;
                        if empty_run >= self.options.empty_page_run {
                            exhausted = true;
                            break;
                        }
                    }
                    Some(_) => empty_run = 0,
                    None => {}
                }
            }
        }

        // A walk where not a single page was reachable must not finalize the
        // city: `scraped` is one-way and its hospitals would never be
        // collected. Surface it as a phase-level failure instead.
        if pages_consumed == 0 {
            warn!(city = %city.name, "no listing pages reachable, city left pending");
            return Err(Error::other(format!(
                "no reachable listing pages for {}",
                city.url
            )));
        }

        if exhausted || next_page > self.options.max_pages {
            info!(city = %city.name, "city listing exhausted");
            self.store.mark_city_scraped(&city.url)?;
        } else {
            info!(city = %city.name, "unit limit reached, city left pending");
        }
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Phase 2: Hospital Enrichment + Doctor-URL Collection
    // ------------------------------------------------------------------

    async fn run_hospital_enrichment(&self, limit: Option<u64>) -> Result<RunStats> {
        let pending = self
            .store
            .pending_hospitals(limit.map(|n| n as usize))?;
        info!(count = pending.len(), "hospitals awaiting enrichment");

        let mut handles = Vec::new();
        for slice in partition_items(&pending, self.options.workers) {
            let store = Arc::clone(&self.store);
            let sessions = Arc::clone(&self.sessions);
            handles.push(tokio::spawn(async move {
                enrich_hospitals(store, sessions, slice).await
            }));
        }

        let mut stats = RunStats::default();
        for joined in futures::future::join_all(handles).await {
            stats += joined.map_err(|e| Error::other(e.to_string()))?;
        }
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Phase 3: Doctor Enrichment
    // ------------------------------------------------------------------

    async fn run_doctor_enrichment(&self, limit: Option<u64>) -> Result<RunStats> {
        let pending = self.store.pending_doctors(limit.map(|n| n as usize))?;
        info!(count = pending.len(), "doctors awaiting processing");

        let mut handles = Vec::new();
        for slice in partition_items(&pending, self.options.workers) {
            let store = Arc::clone(&self.store);
            let sessions = Arc::clone(&self.sessions);
            handles.push(tokio::spawn(async move {
                process_doctors(store, sessions, slice).await
            }));
        }

        let mut stats = RunStats::default();
        for joined in futures::future::join_all(handles).await {
            stats += joined.map_err(|e| Error::other(e.to_string()))?;
        }
        Ok(stats)
    }
}

/// Outcome of fetching one listing page: `None` means the fetch itself failed
struct PageOutcome {
    page: u32,
    new_stubs: Option<u32>,
}

/// Phase 1 worker: fetch a slice of listing pages and insert hospital stubs
async fn discover_pages(
    store: Arc<EntityStore>,
    sessions: Arc<dyn SessionFactory>,
    city_url: String,
    pages: Vec<u32>,
) -> (Vec<PageOutcome>, RunStats) {
    let mut stats = RunStats::default();
    let mut outcomes = Vec::with_capacity(pages.len());

    let mut session = match sessions.open_session() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open page-source session");
            stats.errors += 1;
            return (outcomes, stats);
        }
    };

    for page in pages {
        match session.hospital_listing(&city_url, page).await {
            Ok(stubs) => {
                let mut new_stubs = 0u32;
                for stub in stubs {
                    let mut hospital = Hospital::stub(&stub.url, &stub.name);
                    if let Some(parts) = crate::classify::parse_hospital_url(&stub.url) {
                        hospital.city = Some(parts.city);
                        hospital.area = parts.area;
                    }
                    if stub.area.is_some() {
                        hospital.area = stub.area.clone();
                    }
                    hospital.address = stub.address.clone();
                    hospital.location = stub.location;

                    match store.insert_hospital_stub(&hospital) {
                        Ok(true) => {
                            new_stubs += 1;
                            stats.created += 1;
                        }
                        Ok(false) => stats.skipped += 1,
                        Err(e) => {
                            warn!(url = %hospital.url, error = %e, "failed to insert hospital stub");
                            stats.errors += 1;
                        }
                    }
                }
                stats.processed += 1;
                outcomes.push(PageOutcome {
                    page,
                    new_stubs: Some(new_stubs),
                });
            }
            Err(e) => {
                warn!(city = %city_url, page, error = %e, "listing page fetch failed");
                stats.errors += 1;
                outcomes.push(PageOutcome {
                    page,
                    new_stubs: None,
                });
            }
        }
    }
    (outcomes, stats)
}

/// Phase 2 worker: enrich a slice of pending hospitals
async fn enrich_hospitals(
    store: Arc<EntityStore>,
    sessions: Arc<dyn SessionFactory>,
    hospitals: Vec<Hospital>,
) -> RunStats {
    let mut stats = RunStats::default();
    let mut session = match sessions.open_session() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open page-source session");
            stats.errors += 1;
            return stats;
        }
    };

    for hospital in hospitals {
        match enrich_one_hospital(&store, session.as_mut(), &hospital).await {
            Ok(new_doctors) => {
                stats.processed += 1;
                stats.updated += 1;
                stats.created += new_doctors;
            }
            Err(e) => {
                log_unit_error(&e, "hospital", &hospital.url);
                stats.errors += 1;
            }
        }
    }
    stats
}

async fn enrich_one_hospital(
    store: &EntityStore,
    session: &mut dyn PageSource,
    hospital: &Hospital,
) -> Result<u64> {
    let detail: HospitalDetail = session.hospital_detail(&hospital.url).await?;

    let mut incoming = Hospital::stub(&hospital.url, detail.name.clone().unwrap_or_default());
    incoming.address = detail.address.clone();
    incoming.location = detail.location;
    incoming.departments = detail.departments.clone();
    incoming.procedures = detail.procedures.clone();
    incoming.facilities = detail.facilities.clone();
    incoming.founded_year = detail.founded_year;
    incoming.fees_range = detail.fees_range.clone();

    for card in &detail.doctor_cards {
        incoming.doctors = merge::merge_doctor_entries(
            &incoming.doctors,
            &[DoctorEntry {
                profile_url: card.profile_url.clone(),
                name: card.name.clone(),
                fee: card.fee,
                timings: card.timings.clone(),
            }],
        );
    }

    // About sections cross-link other hospitals; only profile links survive
    for link in &detail.about_links {
        match classify(&link.url) {
            UrlKind::DoctorProfile => {
                incoming.doctors = merge::merge_doctor_entries(
                    &incoming.doctors,
                    &[DoctorEntry::new(&link.url, &link.name)],
                );
            }
            UrlKind::Hospital => {
                tracing::debug!(url = %link.url, "hospital cross-link discarded from About section");
            }
            _ => {}
        }
    }

    let mut new_doctors = 0u64;
    for entry in &incoming.doctors {
        if store.upsert_minimal_doctor(&entry.profile_url, &entry.name)? {
            new_doctors += 1;
        }
    }

    store.apply_hospital_enrichment(&hospital.url, &incoming)?;
    Ok(new_doctors)
}

/// Phase 3 worker: process a slice of pending doctors
async fn process_doctors(
    store: Arc<EntityStore>,
    sessions: Arc<dyn SessionFactory>,
    doctors: Vec<Doctor>,
) -> RunStats {
    let mut stats = RunStats::default();
    let mut session = match sessions.open_session() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open page-source session");
            stats.errors += 1;
            return stats;
        }
    };

    for doctor in doctors {
        match process_one_doctor(&store, session.as_mut(), &doctor).await {
            Ok(outcome) => {
                stats.processed += 1;
                match outcome {
                    UpsertOutcome::Created => stats.created += 1,
                    UpsertOutcome::Updated => stats.updated += 1,
                    UpsertOutcome::Unchanged => stats.skipped += 1,
                }
            }
            Err(e) => {
                log_unit_error(&e, "doctor", &doctor.profile_url);
                stats.errors += 1;
            }
        }
    }
    stats
}

async fn process_one_doctor(
    store: &EntityStore,
    session: &mut dyn PageSource,
    doctor: &Doctor,
) -> Result<UpsertOutcome> {
    let profile: DoctorProfile = session.doctor_profile(&doctor.profile_url).await?;

    let mut incoming = Doctor::stub(
        &doctor.profile_url,
        profile.name.clone().unwrap_or_else(|| doctor.name.clone()),
    );
    incoming.specialty = profile.specialty.clone();
    incoming.qualifications = profile.qualifications.clone();
    incoming.experience_years = profile.experience_years;
    incoming.services = profile.services.clone();
    incoming.diseases = profile.diseases.clone();
    incoming.symptoms = profile.symptoms.clone();
    incoming.interests = profile.interests.clone();

    for practice in &profile.practices {
        if let Some(upsert) = merge::apply_practice(&mut incoming, practice) {
            store.upsert_practice_hospital(&upsert)?;
        }
    }

    store.apply_doctor_merge(&incoming)
}

fn log_unit_error(e: &Error, kind: &str, url: &str) {
    if e.is_recoverable() {
        warn!(kind, url, error = %e, "unit failed, left pending for retry");
    } else {
        error!(kind, url, error = %e, "unit failed with non-recoverable error");
    }
}
