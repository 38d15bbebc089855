//! Lightweight global metrics for the snapshot engine.
//!
//! Потокобезопасные атомарные счётчики:
//! - Save (проходы, Element'ы, payload)
//! - Load (проходы, разрешённые/неразрешённые Element'ы)
//! - Catalog (быстрые чтения summary)

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Save -----
static SAVES_TOTAL: AtomicU64 = AtomicU64::new(0);
static SAVE_FAILURES: AtomicU64 = AtomicU64::new(0);
static ELEMENTS_WRITTEN: AtomicU64 = AtomicU64::new(0);
static PAYLOAD_BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static BASELINE_SUBSTITUTIONS: AtomicU64 = AtomicU64::new(0);

// ----- Load -----
static LOADS_TOTAL: AtomicU64 = AtomicU64::new(0);
static LOAD_FAILURES: AtomicU64 = AtomicU64::new(0);
static ELEMENTS_RESOLVED: AtomicU64 = AtomicU64::new(0);
static ELEMENTS_FAILED: AtomicU64 = AtomicU64::new(0);

// ----- Catalog -----
static SUMMARIES_READ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    // Save
    pub saves_total: u64,
    pub save_failures: u64,
    pub elements_written: u64,
    pub payload_bytes_written: u64,
    pub baseline_substitutions: u64,

    // Load
    pub loads_total: u64,
    pub load_failures: u64,
    pub elements_resolved: u64,
    pub elements_failed: u64,

    // Catalog
    pub summaries_read: u64,
}

// ----- Recorders (Save) -----
pub fn record_save(elements: usize, payload_bytes: usize) {
    SAVES_TOTAL.fetch_add(1, Ordering::Relaxed);
    ELEMENTS_WRITTEN.fetch_add(elements as u64, Ordering::Relaxed);
    PAYLOAD_BYTES_WRITTEN.fetch_add(payload_bytes as u64, Ordering::Relaxed);
}

pub fn record_save_failure() {
    SAVE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_baseline_substitution() {
    BASELINE_SUBSTITUTIONS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Load) -----
pub fn record_load(resolved: usize, failed: usize) {
    LOADS_TOTAL.fetch_add(1, Ordering::Relaxed);
    ELEMENTS_RESOLVED.fetch_add(resolved as u64, Ordering::Relaxed);
    ELEMENTS_FAILED.fetch_add(failed as u64, Ordering::Relaxed);
}

pub fn record_load_failure() {
    LOAD_FAILURES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Catalog) -----
pub fn record_summary_read() {
    SUMMARIES_READ.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        saves_total: SAVES_TOTAL.load(Ordering::Relaxed),
        save_failures: SAVE_FAILURES.load(Ordering::Relaxed),
        elements_written: ELEMENTS_WRITTEN.load(Ordering::Relaxed),
        payload_bytes_written: PAYLOAD_BYTES_WRITTEN.load(Ordering::Relaxed),
        baseline_substitutions: BASELINE_SUBSTITUTIONS.load(Ordering::Relaxed),
        loads_total: LOADS_TOTAL.load(Ordering::Relaxed),
        load_failures: LOAD_FAILURES.load(Ordering::Relaxed),
        elements_resolved: ELEMENTS_RESOLVED.load(Ordering::Relaxed),
        elements_failed: ELEMENTS_FAILED.load(Ordering::Relaxed),
        summaries_read: SUMMARIES_READ.load(Ordering::Relaxed),
    }
}

/// Сброс всех счётчиков (для тестов/бенчей).
pub fn reset() {
    for c in [
        &SAVES_TOTAL,
        &SAVE_FAILURES,
        &ELEMENTS_WRITTEN,
        &PAYLOAD_BYTES_WRITTEN,
        &BASELINE_SUBSTITUTIONS,
        &LOADS_TOTAL,
        &LOAD_FAILURES,
        &ELEMENTS_RESOLVED,
        &ELEMENTS_FAILED,
        &SUMMARIES_READ,
    ] {
        c.store(0, Ordering::Relaxed);
    }
}
