//! End-to-end pipeline tests against an in-memory fixture site

mod common;

use std::sync::Arc;

use common::{city_url, doctor_url, hospital_stub, hospital_url, FixtureFactory, FixtureSite, BASE};
use sehat::models::{DoctorStatus, HospitalStatus};
use sehat::pipeline::{Orchestrator, Phase, PipelineOptions};
use sehat::source::{DoctorCard, DoctorProfile, HospitalDetail, PracticeRef};
use sehat::storage::EntityStore;

fn orchestrator(
    site: FixtureSite,
    options: PipelineOptions,
) -> (Arc<EntityStore>, Arc<FixtureSite>, Orchestrator) {
    let store = Arc::new(EntityStore::in_memory().unwrap());
    let site = Arc::new(site);
    let orch = Orchestrator::new(
        Arc::clone(&store),
        Arc::new(FixtureFactory(Arc::clone(&site))),
        options,
    );
    (store, site, orch)
}

fn serial_options() -> PipelineOptions {
    PipelineOptions {
        workers: 1,
        pages_per_batch: 1,
        ..PipelineOptions::default()
    }
}

/// A small two-hospital site whose doctors cross-reference both hospitals
fn two_hospital_site() -> FixtureSite {
    let mut site = FixtureSite::new();
    let karachi = city_url("karachi");
    site.add_city("Karachi", &karachi);

    let city_hospital = hospital_url("karachi", "city-hospital");
    let south_clinic = hospital_url("karachi", "south-clinic");
    site.add_listing_page(
        &karachi,
        1,
        vec![
            hospital_stub("City Hospital", &city_hospital),
            hospital_stub("South Clinic", &south_clinic),
        ],
    );

    let dr_jane = doctor_url("dr-jane");
    let dr_omar = doctor_url("dr-omar");

    site.add_hospital_page(
        &city_hospital,
        HospitalDetail {
            name: Some("City Hospital".into()),
            address: Some("M A Jinnah Road".into()),
            departments: vec!["Cardiology".into(), "Dermatology".into()],
            doctor_cards: vec![
                DoctorCard {
                    name: "Dr Jane".into(),
                    profile_url: dr_jane.clone(),
                    fee: Some(1500),
                    timings: None,
                },
                DoctorCard {
                    name: "Dr Omar".into(),
                    profile_url: dr_omar.clone(),
                    fee: None,
                    timings: None,
                },
            ],
            ..Default::default()
        },
    );
    site.add_hospital_page(
        &south_clinic,
        HospitalDetail {
            name: Some("South Clinic".into()),
            doctor_cards: vec![DoctorCard {
                name: "Dr Jane".into(),
                profile_url: dr_jane.clone(),
                fee: None,
                timings: None,
            }],
            ..Default::default()
        },
    );

    site.add_doctor_page(
        &dr_jane,
        DoctorProfile {
            name: Some("Dr Jane".into()),
            specialty: vec!["Dermatologist".into()],
            practices: vec![
                PracticeRef {
                    name: Some("City Hospital".into()),
                    url: Some(city_hospital.clone()),
                    fee: Some(1800),
                    ..Default::default()
                },
                PracticeRef {
                    name: Some("South Clinic".into()),
                    url: Some(south_clinic.clone()),
                    fee: Some(1200),
                    ..Default::default()
                },
            ],
            ..Default::default()
        },
    );
    site.add_doctor_page(
        &dr_omar,
        DoctorProfile {
            name: Some("Dr Omar".into()),
            specialty: vec!["Cardiologist".into()],
            practices: vec![PracticeRef {
                name: Some("City Hospital".into()),
                url: Some(city_hospital.clone()),
                fee: Some(2000),
                ..Default::default()
            }],
            ..Default::default()
        },
    );

    site
}

#[tokio::test]
async fn test_full_pipeline_is_bidirectionally_consistent() {
    let (store, _site, orch) = orchestrator(two_hospital_site(), serial_options());

    let stats = orch.run_all(None).await.unwrap();
    assert_eq!(stats.errors, 0);

    // Every processed doctor's hospitals are mirrored and vice versa
    let report = store.verify_relationships().unwrap();
    assert!(report.is_consistent(), "violations: {report:?}");

    let jane = store.get_doctor(&doctor_url("dr-jane")).unwrap().unwrap();
    assert_eq!(jane.status, DoctorStatus::Processed);
    assert_eq!(jane.hospitals.len(), 2);
    // Profile fee wins over the hospital-card fee
    let city_ref = jane
        .hospitals
        .iter()
        .find(|h| h.url == hospital_url("karachi", "city-hospital"))
        .unwrap();
    assert_eq!(city_ref.fee, Some(1800));

    let city = store
        .get_hospital(&hospital_url("karachi", "city-hospital"))
        .unwrap()
        .unwrap();
    assert_eq!(city.status, HospitalStatus::DoctorsCollected);
    assert_eq!(city.doctors.len(), 2);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let (_store, _site, orch) = orchestrator(two_hospital_site(), serial_options());

    let first = orch.run_all(None).await.unwrap();
    assert!(first.created > 0);

    // Unchanged source: every unit already transitioned out of pending
    let second = orch.run_all(None).await.unwrap();
    assert_eq!(second.created, 0, "second run created records: {second}");
    assert_eq!(second.updated, 0, "second run updated records: {second}");
    assert_eq!(second.errors, 0);
}

#[tokio::test]
async fn test_hospital_plus_video_consultation_practice() {
    // Scenario: a profile listing one hospital link and one video-consultation
    // link ends with exactly one affiliation and a private practice.
    let mut site = FixtureSite::new();
    let hospital = hospital_url("karachi", "city-hospital");
    let dr = doctor_url("dr-jane");
    site.add_doctor_page(
        &dr,
        DoctorProfile {
            name: Some("Dr Jane".into()),
            practices: vec![
                PracticeRef {
                    name: Some("City Hospital".into()),
                    url: Some(hospital.clone()),
                    fee: Some(1500),
                    ..Default::default()
                },
                PracticeRef {
                    name: Some("Video Consultation".into()),
                    url: Some(format!("{BASE}/video-consultation/dr-jane")),
                    fee: Some(900),
                    ..Default::default()
                },
            ],
            ..Default::default()
        },
    );

    let (store, _site, orch) = orchestrator(site, serial_options());
    store.upsert_minimal_doctor(&dr, "Dr Jane").unwrap();

    let stats = orch
        .run_phase(Phase::DoctorEnrichment, None)
        .await
        .unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.errors, 0);

    let doctor = store.get_doctor(&dr).unwrap().unwrap();
    assert_eq!(doctor.hospitals.len(), 1);
    assert_eq!(doctor.hospitals[0].url, hospital);
    let pp = doctor.private_practice.as_ref().unwrap();
    assert_eq!(pp.name, "Video Consultation");

    // The consultation channel never materializes as a hospital
    assert!(store
        .get_hospital(&format!("{BASE}/video-consultation/dr-jane"))
        .unwrap()
        .is_none());

    let mirrored = store.get_hospital(&hospital).unwrap().unwrap();
    let entries: Vec<_> = mirrored
        .doctors
        .iter()
        .filter(|d| d.profile_url == dr)
        .collect();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_listing_walk_stops_after_empty_run() {
    // Scenario: hospitals on pages 1-3, nothing after. The walk must stop
    // after page 8 (five consecutive empties) with no page-count limit.
    let mut site = FixtureSite::new();
    let karachi = city_url("karachi");
    site.add_city("Karachi", &karachi);
    for page in 1..=3u32 {
        let url = hospital_url("karachi", &format!("hospital-{page}"));
        site.add_listing_page(&karachi, page, vec![hospital_stub("Hospital", &url)]);
    }

    let (store, site, orch) = orchestrator(site, serial_options());

    orch.run_phase(Phase::CityDiscovery, None).await.unwrap();
    let stats = orch
        .run_phase(Phase::HospitalDiscovery, None)
        .await
        .unwrap();

    assert_eq!(stats.created, 3);
    assert_eq!(site.highest_listing_page(&karachi), 8);
    assert!(store.pending_cities().unwrap().is_empty(), "city not marked scraped");
}

#[tokio::test]
async fn test_unreachable_listing_leaves_city_pending() {
    // Every listing fetch fails: the walk must not finalize the city, even
    // after the page cap, and the phase surfaces the failure.
    let mut site = FixtureSite::new();
    site.add_city("Karachi", &city_url("karachi"));
    site.fail_all_listings();

    let options = PipelineOptions {
        workers: 1,
        pages_per_batch: 1,
        max_pages: 10,
        ..PipelineOptions::default()
    };
    let (store, _site, orch) = orchestrator(site, options);

    orch.run_phase(Phase::CityDiscovery, None).await.unwrap();
    let result = orch.run_phase(Phase::HospitalDiscovery, None).await;
    assert!(result.is_err(), "all-failed walk must be a phase failure");
    assert_eq!(store.pending_cities().unwrap().len(), 1);

    // Once the listing recovers, the same city resumes and completes
    let mut recovered = FixtureSite::new();
    recovered.add_city("Karachi", &city_url("karachi"));
    recovered.add_listing_page(
        &city_url("karachi"),
        1,
        vec![hospital_stub(
            "City Hospital",
            &hospital_url("karachi", "city-hospital"),
        )],
    );
    let retry = Orchestrator::new(
        Arc::clone(&store),
        Arc::new(FixtureFactory(Arc::new(recovered))),
        serial_options(),
    );
    let stats = retry
        .run_phase(Phase::HospitalDiscovery, None)
        .await
        .unwrap();
    assert_eq!(stats.created, 1);
    assert!(store.pending_cities().unwrap().is_empty());
}

#[tokio::test]
async fn test_hospital_discovery_limit_counts_new_hospitals() {
    let (store, _site, orch) = orchestrator(two_hospital_site(), serial_options());

    orch.run_phase(Phase::CityDiscovery, None).await.unwrap();
    let stats = orch
        .run_phase(Phase::HospitalDiscovery, Some(1))
        .await
        .unwrap();

    // The cap is evaluated per batch, so a page can overshoot it, but the
    // walk stops and the city stays pending for the next run.
    assert!(stats.created >= 1);
    assert_eq!(store.pending_cities().unwrap().len(), 1);

    let stats = orch
        .run_phase(Phase::HospitalDiscovery, None)
        .await
        .unwrap();
    assert!(store.pending_cities().unwrap().is_empty());
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn test_concurrent_workers_converge_on_shared_hospital() {
    // Scenario: two workers finalize different doctors who both practice at
    // the same hospital; neither update may be lost.
    let mut site = FixtureSite::new();
    let hospital = hospital_url("karachi", "city-hospital");
    for slug in ["dr-jane", "dr-omar"] {
        let dr = doctor_url(slug);
        site.add_doctor_page(
            &dr,
            DoctorProfile {
                name: Some(slug.to_string()),
                practices: vec![PracticeRef {
                    name: Some("City Hospital".into()),
                    url: Some(hospital.clone()),
                    fee: Some(1000),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
    }

    let options = PipelineOptions {
        workers: 2,
        ..PipelineOptions::default()
    };
    let (store, _site, orch) = orchestrator(site, options);
    store
        .upsert_minimal_doctor(&doctor_url("dr-jane"), "dr-jane")
        .unwrap();
    store
        .upsert_minimal_doctor(&doctor_url("dr-omar"), "dr-omar")
        .unwrap();

    let stats = orch
        .run_phase(Phase::DoctorEnrichment, None)
        .await
        .unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.errors, 0);

    let mirrored = store.get_hospital(&hospital).unwrap().unwrap();
    let mut profiles: Vec<_> = mirrored
        .doctors
        .iter()
        .map(|d| d.profile_url.clone())
        .collect();
    profiles.sort();
    assert_eq!(
        profiles,
        vec![doctor_url("dr-jane"), doctor_url("dr-omar")]
    );
}

#[tokio::test]
async fn test_about_section_hospital_crosslinks_are_discarded() {
    let mut site = FixtureSite::new();
    let hospital = hospital_url("karachi", "city-hospital");
    let other_hospital = hospital_url("karachi", "other-hospital");
    let dr = doctor_url("dr-jane");

    site.add_hospital_page(
        &hospital,
        HospitalDetail {
            name: Some("City Hospital".into()),
            about_links: vec![
                sehat::source::AboutLink {
                    name: "Dr Jane".into(),
                    url: dr.clone(),
                },
                sehat::source::AboutLink {
                    name: "Other Hospital".into(),
                    url: other_hospital.clone(),
                },
            ],
            ..Default::default()
        },
    );

    let (store, _site, orch) = orchestrator(site, serial_options());
    store
        .insert_hospital_stub(&sehat::Hospital::stub(&hospital, "City Hospital"))
        .unwrap();

    let stats = orch
        .run_phase(Phase::HospitalEnrichment, None)
        .await
        .unwrap();
    assert_eq!(stats.errors, 0);

    // Only the doctor link became a stub; the cross-linked hospital did not
    assert!(store.get_doctor(&dr).unwrap().is_some());
    assert!(store.get_doctor(&other_hospital).unwrap().is_none());
    let enriched = store.get_hospital(&hospital).unwrap().unwrap();
    assert_eq!(enriched.doctors.len(), 1);
    assert_eq!(enriched.doctors[0].profile_url, dr);
}

#[tokio::test]
async fn test_failed_unit_stays_pending_and_retries() {
    // No profile page for the doctor: the unit errors, stays pending, and
    // succeeds once the page appears on a later run.
    let site = FixtureSite::new();
    let dr = doctor_url("dr-jane");

    let (store, site, orch) = orchestrator(site, serial_options());
    store.upsert_minimal_doctor(&dr, "Dr Jane").unwrap();

    let stats = orch
        .run_phase(Phase::DoctorEnrichment, None)
        .await
        .unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.processed, 0);
    assert_eq!(store.pending_doctors(None).unwrap().len(), 1);

    // Fixture sites are immutable behind Arc, so build a fresh orchestrator
    // over the same store with the page now present.
    let mut retry_site = FixtureSite::new();
    retry_site.add_doctor_page(
        &dr,
        DoctorProfile {
            name: Some("Dr Jane".into()),
            specialty: vec!["Dermatologist".into()],
            ..Default::default()
        },
    );
    drop(site);
    let retry = Orchestrator::new(
        Arc::clone(&store),
        Arc::new(FixtureFactory(Arc::new(retry_site))),
        serial_options(),
    );
    let stats = retry
        .run_phase(Phase::DoctorEnrichment, None)
        .await
        .unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.errors, 0);
    assert!(store.pending_doctors(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_unit_limit_caps_phase_work() {
    let (store, _site, orch) = orchestrator(two_hospital_site(), serial_options());

    orch.run_phase(Phase::CityDiscovery, None).await.unwrap();
    orch.run_phase(Phase::HospitalDiscovery, None).await.unwrap();

    let stats = orch
        .run_phase(Phase::HospitalEnrichment, Some(1))
        .await
        .unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(store.pending_hospitals(None).unwrap().len(), 1);

    // The rest drains on the next invocation
    let stats = orch
        .run_phase(Phase::HospitalEnrichment, None)
        .await
        .unwrap();
    assert_eq!(stats.processed, 1);
    assert!(store.pending_hospitals(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_on_disk_store_resumes_across_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sehat.db");

    {
        let store = Arc::new(EntityStore::new(&db_path).unwrap());
        let orch = Orchestrator::new(
            Arc::clone(&store),
            Arc::new(FixtureFactory(Arc::new(two_hospital_site()))),
            serial_options(),
        );
        orch.run_phase(Phase::CityDiscovery, None).await.unwrap();
        orch.run_phase(Phase::HospitalDiscovery, None).await.unwrap();
    }

    // Reopen and continue where the previous process stopped
    let store = Arc::new(EntityStore::new(&db_path).unwrap());
    assert_eq!(store.pending_hospitals(None).unwrap().len(), 2);

    let orch = Orchestrator::new(
        Arc::clone(&store),
        Arc::new(FixtureFactory(Arc::new(two_hospital_site()))),
        serial_options(),
    );
    orch.run_phase(Phase::HospitalEnrichment, None).await.unwrap();
    orch.run_phase(Phase::DoctorEnrichment, None).await.unwrap();

    let report = store.verify_relationships().unwrap();
    assert!(report.is_consistent());
}
