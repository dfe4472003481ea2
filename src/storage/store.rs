//! SQLite entity store
//!
//! The store is the sole writer of persisted state. Every public method takes
//! `&self` and serializes through a `Mutex<Connection>`, so each call is
//! atomic at the single-record level; the merge methods read the current
//! stored version, run the pure merge, and write back while holding the lock.
//! Two workers touching the same hospital therefore converge regardless of
//! interleaving.
//!
//! Records are stored as JSON documents with identity, display name, and
//! status mirrored into columns. The status column carries a secondary index
//! so per-phase pending queries do not scan documents.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{Result, StoreError};
use crate::merge::{self, PracticeUpsert};
use crate::models::{City, CityStatus, Doctor, DoctorStatus, Hospital, HospitalStatus};

/// Outcome of a single-record upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Per-collection record counts grouped by status
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub cities: Vec<(String, u64)>,
    pub hospitals: Vec<(String, u64)>,
    pub doctors: Vec<(String, u64)>,
}

/// Result of a bidirectional relationship check
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub doctors_checked: u64,
    pub hospitals_checked: u64,
    /// (doctor profile_url, hospital url) pairs where the hospital is missing
    pub missing_hospitals: Vec<(String, String)>,
    /// (doctor profile_url, hospital url) pairs where the hospital exists but
    /// does not list the doctor back
    pub unmirrored_doctor_refs: Vec<(String, String)>,
    /// (hospital url, doctor profile_url) pairs where the doctor record is
    /// missing entirely
    pub dangling_hospital_entries: Vec<(String, String)>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_hospitals.is_empty()
            && self.unmirrored_doctor_refs.is_empty()
            && self.dangling_hospital_entries.is_empty()
    }
}

/// SQLite-backed entity store
pub struct EntityStore {
    conn: Mutex<Connection>,
}

impl EntityStore {
    /// Open (or create) a store at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        // WAL keeps readers unblocked while a worker writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        info!(path = %path.display(), "entity store opened");
        Ok(store)
    }

    /// In-memory store for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cities (
                url        TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                status     TEXT NOT NULL,
                doc        TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cities_status ON cities(status);

            CREATE TABLE IF NOT EXISTS hospitals (
                url        TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                status     TEXT NOT NULL,
                doc        TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_hospitals_status ON hospitals(status);

            CREATE TABLE IF NOT EXISTS doctors (
                profile_url TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                status      TEXT NOT NULL,
                doc         TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_doctors_status ON doctors(status);
            "#,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cities
    // ------------------------------------------------------------------

    /// Create a city if it is not already known. Returns `true` on insert.
    pub fn upsert_city(&self, name: &str, url: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let city = City::new(name, url);
        let doc = serde_json::to_string(&city)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO cities (url, name, status, doc) VALUES (?1, ?2, ?3, ?4)",
            params![city.url, city.name, city.status.as_str(), doc],
        )?;
        Ok(inserted > 0)
    }

    /// Cities still awaiting their hospital-listing walk
    pub fn pending_cities(&self) -> Result<Vec<City>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT url, doc FROM cities WHERE status = 'pending' ORDER BY url")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut cities = Vec::new();
        for row in rows {
            let (url, doc) = row?;
            cities.push(decode::<City>(&url, &doc)?);
        }
        Ok(cities)
    }

    /// Advance a city to `scraped` after its listing pages are exhausted
    pub fn mark_city_scraped(&self, url: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut city: City = match fetch_doc(&conn, "SELECT doc FROM cities WHERE url = ?1", url)? {
            Some(c) => c,
            None => {
                warn!(url, "mark_city_scraped: city not found");
                return Ok(());
            }
        };

        if city.status == CityStatus::Scraped {
            return Ok(());
        }
        check_transition(
            url,
            city.status.as_str(),
            CityStatus::Scraped.as_str(),
            city.status.can_advance_to(CityStatus::Scraped),
        )?;

        city.status = CityStatus::Scraped;
        city.updated_at = Utc::now();
        let doc = serde_json::to_string(&city)?;
        conn.execute(
            "UPDATE cities SET status = ?2, doc = ?3 WHERE url = ?1",
            params![url, city.status.as_str(), doc],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Hospitals
    // ------------------------------------------------------------------

    /// Create a minimal hospital during discovery; never clobbers an existing
    /// record. Returns `true` on insert.
    pub fn insert_hospital_stub(&self, hospital: &Hospital) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let doc = serde_json::to_string(hospital)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO hospitals (url, name, status, doc) VALUES (?1, ?2, ?3, ?4)",
            params![hospital.url, hospital.name, hospital.status.as_str(), doc],
        )?;
        Ok(inserted > 0)
    }

    /// Hospitals awaiting enrichment, oldest URL first
    pub fn pending_hospitals(&self, limit: Option<usize>) -> Result<Vec<Hospital>> {
        let conn = self.conn.lock().unwrap();
        let sql = match limit {
            Some(n) => format!(
                "SELECT url, doc FROM hospitals WHERE status = 'pending' ORDER BY url LIMIT {n}"
            ),
            None => "SELECT url, doc FROM hospitals WHERE status = 'pending' ORDER BY url".into(),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut hospitals = Vec::new();
        for row in rows {
            let (url, doc) = row?;
            hospitals.push(decode::<Hospital>(&url, &doc)?);
        }
        Ok(hospitals)
    }

    pub fn get_hospital(&self, url: &str) -> Result<Option<Hospital>> {
        let conn = self.conn.lock().unwrap();
        fetch_doc(&conn, "SELECT doc FROM hospitals WHERE url = ?1", url)
    }

    /// Merge enrichment results into a hospital and advance it to
    /// `doctors_collected`. Reads the current stored version under the lock,
    /// so a concurrent practice upsert from Phase 3 is never lost.
    pub fn apply_hospital_enrichment(
        &self,
        url: &str,
        incoming: &Hospital,
    ) -> Result<UpsertOutcome> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<Hospital> =
            fetch_doc(&conn, "SELECT doc FROM hospitals WHERE url = ?1", url)?;

        let target = HospitalStatus::DoctorsCollected;
        let (mut merged, outcome) = match &existing {
            None => (incoming.clone(), UpsertOutcome::Created),
            Some(current) => {
                if current.status != target {
                    check_transition(
                        url,
                        current.status.as_str(),
                        target.as_str(),
                        current.status.can_advance_to(target),
                    )?;
                }
                match merge::merge_hospital(Some(current), incoming) {
                    Some(m) => (m, UpsertOutcome::Updated),
                    None if current.status == target => return Ok(UpsertOutcome::Unchanged),
                    // Content unchanged but the status still advances
                    None => (current.clone(), UpsertOutcome::Updated),
                }
            }
        };

        merged.status = target;
        merged.updated_at = Utc::now();
        write_hospital(&conn, &merged)?;
        Ok(outcome)
    }

    /// Mirror a practice found on a doctor profile onto the hospital side:
    /// create the hospital if absent, then merge the doctor's entry into its
    /// `doctors` list by profile URL.
    pub fn upsert_practice_hospital(&self, upsert: &PracticeUpsert) -> Result<UpsertOutcome> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<Hospital> = fetch_doc(
            &conn,
            "SELECT doc FROM hospitals WHERE url = ?1",
            &upsert.hospital.url,
        )?;

        match existing {
            None => {
                let mut hospital = upsert.hospital.clone();
                hospital.doctors =
                    merge::merge_doctor_entries(&[], std::slice::from_ref(&upsert.entry));
                write_hospital(&conn, &hospital)?;
                debug!(url = %hospital.url, "hospital created from practice reference");
                Ok(UpsertOutcome::Created)
            }
            Some(current) => {
                let mut merged = current.clone();
                merged.doctors = merge::merge_doctor_entries(
                    &current.doctors,
                    std::slice::from_ref(&upsert.entry),
                );
                if merged.location.is_none() {
                    merged.location = upsert.hospital.location;
                }
                if merged.content_eq(&current) {
                    return Ok(UpsertOutcome::Unchanged);
                }
                merged.updated_at = Utc::now();
                write_hospital(&conn, &merged)?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    // ------------------------------------------------------------------
    // Doctors
    // ------------------------------------------------------------------

    /// Create a minimal pending doctor when first referenced from a hospital
    /// page. Returns `true` on insert; an existing record is left untouched.
    pub fn upsert_minimal_doctor(&self, profile_url: &str, name: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let doctor = Doctor::stub(profile_url, name);
        let doc = serde_json::to_string(&doctor)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO doctors (profile_url, name, status, doc) VALUES (?1, ?2, ?3, ?4)",
            params![doctor.profile_url, doctor.name, doctor.status.as_str(), doc],
        )?;
        Ok(inserted > 0)
    }

    /// Doctors awaiting profile processing, oldest URL first
    pub fn pending_doctors(&self, limit: Option<usize>) -> Result<Vec<Doctor>> {
        let conn = self.conn.lock().unwrap();
        let sql = match limit {
            Some(n) => format!(
                "SELECT profile_url, doc FROM doctors WHERE status = 'pending' ORDER BY profile_url LIMIT {n}"
            ),
            None => {
                "SELECT profile_url, doc FROM doctors WHERE status = 'pending' ORDER BY profile_url"
                    .into()
            }
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut doctors = Vec::new();
        for row in rows {
            let (url, doc) = row?;
            doctors.push(decode::<Doctor>(&url, &doc)?);
        }
        Ok(doctors)
    }

    pub fn get_doctor(&self, profile_url: &str) -> Result<Option<Doctor>> {
        let conn = self.conn.lock().unwrap();
        fetch_doc(
            &conn,
            "SELECT doc FROM doctors WHERE profile_url = ?1",
            profile_url,
        )
    }

    /// Merge a finalized doctor against the stored record and advance it to
    /// `processed`. The merge runs against the store's current version under
    /// the lock; status advances even when the merge is a content no-op.
    pub fn apply_doctor_merge(&self, incoming: &Doctor) -> Result<UpsertOutcome> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<Doctor> = fetch_doc(
            &conn,
            "SELECT doc FROM doctors WHERE profile_url = ?1",
            &incoming.profile_url,
        )?;

        let target = DoctorStatus::Processed;
        let (mut merged, outcome) = match &existing {
            None => (incoming.clone(), UpsertOutcome::Created),
            Some(current) => {
                if current.status != target {
                    check_transition(
                        &incoming.profile_url,
                        current.status.as_str(),
                        target.as_str(),
                        current.status.can_advance_to(target),
                    )?;
                }
                match merge::merge_doctor(Some(current), incoming) {
                    Some(m) => (m, UpsertOutcome::Updated),
                    None if current.status == target => return Ok(UpsertOutcome::Unchanged),
                    None => (current.clone(), UpsertOutcome::Unchanged),
                }
            }
        };

        merged.status = target;
        merged.updated_at = Utc::now();
        write_doctor(&conn, &merged)?;
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Reporting and maintenance
    // ------------------------------------------------------------------

    /// Record counts per status for each collection
    pub fn status_counts(&self) -> Result<StatusCounts> {
        let conn = self.conn.lock().unwrap();
        let mut counts = StatusCounts::default();
        for (table, slot) in [
            ("cities", &mut counts.cities),
            ("hospitals", &mut counts.hospitals),
            ("doctors", &mut counts.doctors),
        ] {
            let sql = format!("SELECT status, COUNT(*) FROM {table} GROUP BY status ORDER BY status");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?;
            for row in rows {
                slot.push(row?);
            }
        }
        Ok(counts)
    }

    /// Check the bidirectional affiliation invariant over the whole store:
    /// every hospital a processed doctor references must exist and list the
    /// doctor back, and every hospital doctor entry must have a doctor record.
    pub fn verify_relationships(&self) -> Result<VerifyReport> {
        let doctors = self.all_doctors()?;
        let hospitals = self.all_hospitals()?;
        let mut report = VerifyReport::default();

        for doctor in &doctors {
            if doctor.status != DoctorStatus::Processed {
                continue;
            }
            report.doctors_checked += 1;
            for href in &doctor.hospitals {
                match hospitals.iter().find(|h| h.url == href.url) {
                    None => report
                        .missing_hospitals
                        .push((doctor.profile_url.clone(), href.url.clone())),
                    Some(hospital) => {
                        let mirrored = hospital
                            .doctors
                            .iter()
                            .any(|d| d.profile_url == doctor.profile_url);
                        if !mirrored {
                            report
                                .unmirrored_doctor_refs
                                .push((doctor.profile_url.clone(), href.url.clone()));
                        }
                    }
                }
            }
        }

        for hospital in &hospitals {
            report.hospitals_checked += 1;
            for entry in &hospital.doctors {
                if !doctors.iter().any(|d| d.profile_url == entry.profile_url) {
                    report
                        .dangling_hospital_entries
                        .push((hospital.url.clone(), entry.profile_url.clone()));
                }
            }
        }

        Ok(report)
    }

    /// One-shot legacy reconciliation: hospitals that predate URL identity
    /// can exist twice under different URLs with the same name+address. This
    /// merges each duplicate group into the lexicographically-first URL and
    /// rewrites doctor references. Steady-state lookups stay URL-only; this
    /// runs only from the `migrate` subcommand.
    pub fn reconcile_legacy(&self) -> Result<usize> {
        let hospitals = self.all_hospitals()?;
        let mut groups: std::collections::BTreeMap<(String, String), Vec<&Hospital>> =
            Default::default();
        for h in &hospitals {
            let address = match &h.address {
                Some(a) if !a.is_empty() => a.to_lowercase(),
                _ => continue,
            };
            groups
                .entry((h.name.to_lowercase(), address))
                .or_default()
                .push(h);
        }

        let mut merged_count = 0;
        for ((name, _), mut group) in groups {
            if group.len() < 2 {
                continue;
            }
            group.sort_by(|a, b| a.url.cmp(&b.url));
            let canonical_url = group[0].url.clone();
            let mut canonical = group[0].clone();

            for dup in &group[1..] {
                info!(
                    canonical = %canonical_url,
                    duplicate = %dup.url,
                    name = %name,
                    "legacy reconciliation: merging duplicate hospital"
                );
                if let Some(m) = merge::merge_hospital(Some(&canonical), dup) {
                    canonical = m;
                }
                canonical.url = canonical_url.clone();
                self.rewrite_doctor_refs(&dup.url, &canonical_url)?;

                let conn = self.conn.lock().unwrap();
                conn.execute("DELETE FROM hospitals WHERE url = ?1", params![dup.url])?;
                merged_count += 1;
            }

            canonical.updated_at = Utc::now();
            let conn = self.conn.lock().unwrap();
            write_hospital(&conn, &canonical)?;
        }
        Ok(merged_count)
    }

    /// Point every doctor's affiliation at the canonical hospital URL
    fn rewrite_doctor_refs(&self, from_url: &str, to_url: &str) -> Result<()> {
        let doctors = self.all_doctors()?;
        let conn = self.conn.lock().unwrap();
        for mut doctor in doctors {
            let mut changed = false;
            for href in &mut doctor.hospitals {
                if href.url == from_url {
                    href.url = to_url.to_string();
                    changed = true;
                }
            }
            if changed {
                // Rewriting may create a duplicate of an existing canonical ref
                doctor.hospitals = merge::merge_hospital_refs(&[], &doctor.hospitals);
                doctor.updated_at = Utc::now();
                write_doctor(&conn, &doctor)?;
            }
        }
        Ok(())
    }

    fn all_hospitals(&self) -> Result<Vec<Hospital>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT url, doc FROM hospitals ORDER BY url")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (url, doc) = row?;
            out.push(decode::<Hospital>(&url, &doc)?);
        }
        Ok(out)
    }

    fn all_doctors(&self) -> Result<Vec<Doctor>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT profile_url, doc FROM doctors ORDER BY profile_url")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (url, doc) = row?;
            out.push(decode::<Doctor>(&url, &doc)?);
        }
        Ok(out)
    }
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, doc: &str) -> Result<T> {
    serde_json::from_str(doc).map_err(|source| {
        StoreError::CorruptDocument {
            key: key.to_string(),
            source,
        }
        .into()
    })
}

fn fetch_doc<T: serde::de::DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    key: &str,
) -> Result<Option<T>> {
    let doc: Option<String> = conn
        .query_row(sql, params![key], |row| row.get(0))
        .optional()?;
    match doc {
        Some(doc) => Ok(Some(decode(key, &doc)?)),
        None => Ok(None),
    }
}

fn write_hospital(conn: &Connection, hospital: &Hospital) -> Result<()> {
    let doc = serde_json::to_string(hospital)?;
    conn.execute(
        "INSERT INTO hospitals (url, name, status, doc) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(url) DO UPDATE SET name = ?2, status = ?3, doc = ?4",
        params![hospital.url, hospital.name, hospital.status.as_str(), doc],
    )?;
    Ok(())
}

fn write_doctor(conn: &Connection, doctor: &Doctor) -> Result<()> {
    let doc = serde_json::to_string(doctor)?;
    conn.execute(
        "INSERT INTO doctors (profile_url, name, status, doc) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(profile_url) DO UPDATE SET name = ?2, status = ?3, doc = ?4",
        params![doctor.profile_url, doctor.name, doctor.status.as_str(), doc],
    )?;
    Ok(())
}

fn check_transition(key: &str, from: &'static str, to: &'static str, allowed: bool) -> Result<()> {
    if allowed {
        return Ok(());
    }
    // Merges are total functions over optional fields, so an illegal
    // transition here means a data-model bug, not bad input.
    error!(key, from, to, "illegal status transition rejected");
    Err(StoreError::InvalidTransition {
        key: key.to_string(),
        from,
        to,
    }
    .into())
}
