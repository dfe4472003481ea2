//! Reporting and maintenance commands: stats, verify, migrate

use anyhow::Result;

use crate::config::Config;
use crate::storage::EntityStore;

/// Print record counts per collection and status
pub fn stats(config: Config) -> Result<()> {
    let store = EntityStore::new(&config.database.sqlite_path)?;
    let counts = store.status_counts()?;

    println!("Collection status");
    println!("=================");
    for (label, rows) in [
        ("cities", &counts.cities),
        ("hospitals", &counts.hospitals),
        ("doctors", &counts.doctors),
    ] {
        if rows.is_empty() {
            println!("{label:>10}: (empty)");
            continue;
        }
        for (status, count) in rows {
            println!("{label:>10}: {status:<18} {count}");
        }
    }
    Ok(())
}

/// Check the bidirectional affiliation invariant and report violations
pub fn verify(config: Config) -> Result<()> {
    let store = EntityStore::new(&config.database.sqlite_path)?;
    let report = store.verify_relationships()?;

    println!(
        "Checked {} processed doctors and {} hospitals",
        report.doctors_checked, report.hospitals_checked
    );
    if report.is_consistent() {
        println!("All doctor-hospital relationships are consistent");
        return Ok(());
    }

    for (doctor, hospital) in &report.missing_hospitals {
        println!("MISSING HOSPITAL  {doctor} -> {hospital}");
    }
    for (doctor, hospital) in &report.unmirrored_doctor_refs {
        println!("NOT MIRRORED      {doctor} -> {hospital}");
    }
    for (hospital, doctor) in &report.dangling_hospital_entries {
        println!("DANGLING DOCTOR   {hospital} -> {doctor}");
    }
    anyhow::bail!(
        "{} relationship violations found",
        report.missing_hospitals.len()
            + report.unmirrored_doctor_refs.len()
            + report.dangling_hospital_entries.len()
    );
}

/// One-shot legacy reconciliation of hospitals duplicated under different
/// URLs with the same name and address
pub fn migrate(config: Config) -> Result<()> {
    let store = EntityStore::new(&config.database.sqlite_path)?;
    let merged = store.reconcile_legacy()?;
    println!("Legacy reconciliation merged {merged} duplicate hospitals");
    Ok(())
}
