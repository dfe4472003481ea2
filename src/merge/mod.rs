//! Relationship merging
//!
//! Reconciles freshly-parsed records against what the store already holds.
//! Affiliation data for the same doctor/hospital pair arrives at different
//! times from different pages (hospital listing cards, hospital detail pages,
//! doctor profiles); these merges make the two sides converge without ever
//! dropping a previously known affiliation.
//!
//! All functions here are pure over in-memory copies. The store wraps them in
//! a record-level transaction so concurrent workers merging into the same
//! record serialize correctly (see [`crate::storage`]).

use tracing::debug;

use crate::classify::{classify, parse_hospital_url, UrlKind};
use crate::models::{Doctor, DoctorEntry, Hospital, HospitalRef, PrivatePractice};
use crate::source::PracticeRef;

/// Merge a freshly-parsed doctor against the stored record.
///
/// Scalars overwrite only when the incoming value is non-empty; a populated
/// field is never nulled out by an empty parse. `hospitals` unions by URL with
/// fee/timings preferring incoming values. The returned record always carries
/// the full merged affiliation set, so downstream writers persist the complete
/// current list rather than a delta. `private_practice` is a single slot and
/// is replaced wholesale when the incoming record has one.
///
/// Returns `None` when the merge changes nothing, so callers can skip the
/// write entirely.
pub fn merge_doctor(existing: Option<&Doctor>, incoming: &Doctor) -> Option<Doctor> {
    let Some(existing) = existing else {
        return Some(incoming.clone());
    };

    let mut merged = existing.clone();
    overwrite_string(&mut merged.name, &incoming.name);
    overwrite_list(&mut merged.specialty, &incoming.specialty);
    overwrite_list(&mut merged.qualifications, &incoming.qualifications);
    overwrite_option(&mut merged.experience_years, incoming.experience_years);
    overwrite_list(&mut merged.services, &incoming.services);
    overwrite_list(&mut merged.diseases, &incoming.diseases);
    overwrite_list(&mut merged.symptoms, &incoming.symptoms);
    overwrite_list(&mut merged.interests, &incoming.interests);

    merged.hospitals = merge_hospital_refs(&existing.hospitals, &incoming.hospitals);

    if incoming.private_practice.is_some() {
        merged.private_practice = incoming.private_practice.clone();
    }

    if merged.content_eq(existing) {
        None
    } else {
        Some(merged)
    }
}

/// Merge a freshly-parsed hospital against the stored record.
///
/// Same non-empty-overwrite rule as [`merge_doctor`]; the `doctors` list
/// unions by `profile_url`.
pub fn merge_hospital(existing: Option<&Hospital>, incoming: &Hospital) -> Option<Hospital> {
    let Some(existing) = existing else {
        return Some(incoming.clone());
    };

    let mut merged = existing.clone();
    overwrite_string(&mut merged.name, &incoming.name);
    overwrite_opt_string(&mut merged.city, &incoming.city);
    overwrite_opt_string(&mut merged.area, &incoming.area);
    overwrite_opt_string(&mut merged.address, &incoming.address);
    overwrite_option(&mut merged.location, incoming.location);
    overwrite_list(&mut merged.departments, &incoming.departments);
    overwrite_list(&mut merged.procedures, &incoming.procedures);
    overwrite_list(&mut merged.facilities, &incoming.facilities);
    overwrite_option(&mut merged.founded_year, incoming.founded_year);
    overwrite_opt_string(&mut merged.fees_range, &incoming.fees_range);

    merged.doctors = merge_doctor_entries(&existing.doctors, &incoming.doctors);

    if merged.content_eq(existing) {
        None
    } else {
        Some(merged)
    }
}

/// Union two doctor-side affiliation lists by hospital URL.
///
/// Existing entries keep their position; new hospitals append in incoming
/// order. When the same URL appears on both sides, fee/timings/name prefer
/// the incoming values where present.
pub fn merge_hospital_refs(existing: &[HospitalRef], incoming: &[HospitalRef]) -> Vec<HospitalRef> {
    let mut merged: Vec<HospitalRef> = existing.to_vec();
    for inc in incoming {
        if inc.url.is_empty() {
            continue;
        }
        match merged.iter_mut().find(|h| h.url == inc.url) {
            Some(slot) => {
                if inc.name.is_some() {
                    slot.name = inc.name.clone();
                }
                if inc.fee.is_some() {
                    slot.fee = inc.fee;
                }
                if inc.timings.is_some() {
                    slot.timings = inc.timings.clone();
                }
            }
            None => merged.push(inc.clone()),
        }
    }
    merged
}

/// Union two hospital-side doctor lists by profile URL. Mirror of
/// [`merge_hospital_refs`].
pub fn merge_doctor_entries(existing: &[DoctorEntry], incoming: &[DoctorEntry]) -> Vec<DoctorEntry> {
    let mut merged: Vec<DoctorEntry> = existing.to_vec();
    for inc in incoming {
        if inc.profile_url.is_empty() {
            continue;
        }
        match merged.iter_mut().find(|d| d.profile_url == inc.profile_url) {
            Some(slot) => {
                if !inc.name.is_empty() {
                    slot.name = inc.name.clone();
                }
                if inc.fee.is_some() {
                    slot.fee = inc.fee;
                }
                if inc.timings.is_some() {
                    slot.timings = inc.timings.clone();
                }
            }
            None => merged.push(inc.clone()),
        }
    }
    merged
}

/// Hospital-side write required to mirror a practice found on a doctor
/// profile: ensure the hospital exists and carries this doctor in its
/// `doctors` list.
#[derive(Debug, Clone, PartialEq)]
pub struct PracticeUpsert {
    /// Minimal hospital to create if absent (never overwrites an enriched one)
    pub hospital: Hospital,
    /// This doctor's entry for that hospital's `doctors` list
    pub entry: DoctorEntry,
}

/// Classify one practice reference from a doctor profile and record it on the
/// doctor, returning the hospital-side upsert when the practice is a real
/// hospital.
///
/// Hospital URLs gain a symmetric pair of entries: the hospital in the
/// doctor's `hospitals` list and the doctor in the hospital's `doctors` list,
/// both carrying fee/timings where known. Everything else (video
/// consultation, missing or unrecognized URL) lands in the doctor's single
/// `private_practice` slot and never materializes a Hospital record. The
/// first private practice on a profile wins; later ones are ignored.
pub fn apply_practice(doctor: &mut Doctor, practice: &PracticeRef) -> Option<PracticeUpsert> {
    let url = practice.url.as_deref().unwrap_or("");

    if classify(url) != UrlKind::Hospital {
        if doctor.private_practice.is_none() {
            doctor.private_practice = Some(PrivatePractice {
                name: practice
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}'s Private Practice", doctor.name)),
                url: practice.url.clone(),
                fee: practice.fee,
                timings: practice.timings.clone(),
            });
        } else {
            debug!(
                doctor = %doctor.profile_url,
                url = %url,
                "extra private practice ignored, slot already filled"
            );
        }
        return None;
    }

    let parts = parse_hospital_url(url);
    let display_name = practice
        .name
        .clone()
        .or_else(|| parts.as_ref().map(|p| p.name.clone()))
        .unwrap_or_default();

    // Doctor-side entry, deduplicated by URL
    let incoming_ref = HospitalRef {
        url: url.to_string(),
        name: if display_name.is_empty() {
            None
        } else {
            Some(display_name.clone())
        },
        fee: practice.fee,
        timings: practice.timings.clone(),
    };
    doctor.hospitals = merge_hospital_refs(&doctor.hospitals, std::slice::from_ref(&incoming_ref));

    // Hospital-side stub plus the doctor's entry
    let mut hospital = Hospital::stub(url, display_name);
    if let Some(parts) = parts {
        hospital.city = Some(parts.city);
        hospital.area = parts.area;
    }
    hospital.location = practice.location;

    Some(PracticeUpsert {
        hospital,
        entry: DoctorEntry {
            profile_url: doctor.profile_url.clone(),
            name: doctor.name.clone(),
            fee: practice.fee,
            timings: practice.timings.clone(),
        },
    })
}

fn overwrite_string(slot: &mut String, incoming: &str) {
    if !incoming.is_empty() {
        *slot = incoming.to_string();
    }
}

fn overwrite_opt_string(slot: &mut Option<String>, incoming: &Option<String>) {
    if let Some(v) = incoming {
        if !v.is_empty() {
            *slot = Some(v.clone());
        }
    }
}

fn overwrite_list(slot: &mut Vec<String>, incoming: &[String]) {
    if !incoming.is_empty() {
        *slot = incoming.to_vec();
    }
}

fn overwrite_option<T: Copy>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}
