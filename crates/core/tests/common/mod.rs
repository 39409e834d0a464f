#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use extractors::func::FnExtractor;
use extractors::{ExtractError, Extracted};
use intake_core::capability::CapabilityRegistry;
use intake_core::config::QueueConfig;
use intake_core::scorer::Scorer;
use intake_core::{FileDescriptor, ManualClock, Scheduler};
use std::sync::Arc;

pub const MB: u64 = 1024 * 1024;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

pub fn scheduler_with(config: QueueConfig, registry: CapabilityRegistry) -> (Scheduler, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let scheduler =
        Scheduler::new(config, Scorer::default(), registry).with_clock(clock.clone());
    (scheduler, clock)
}

pub fn scheduler() -> (Scheduler, Arc<ManualClock>) {
    scheduler_with(QueueConfig::default(), CapabilityRegistry::with_defaults())
}

/// A text file held in memory, modified `age_days` before the test start.
pub fn text_file(path: &str, body: &str, age_days: i64) -> FileDescriptor {
    FileDescriptor::new(path, body.len() as u64, start() - Duration::days(age_days))
        .with_content(body.as_bytes().to_vec())
}

pub fn file(path: &str, size: u64, age_days: i64) -> FileDescriptor {
    FileDescriptor::new(path, size, start() - Duration::days(age_days))
}

pub fn ok_extractor(name: &str) -> Arc<FnExtractor> {
    Arc::new(FnExtractor::new(name, |_| {
        Ok(Extracted::from_text("extracted body".to_string(), 64, 0.8))
    }))
}

pub fn failing_extractor(name: &str, permanent: bool) -> Arc<FnExtractor> {
    Arc::new(FnExtractor::new(name, move |input| {
        if permanent {
            Err(ExtractError::Permanent(format!("{} is corrupt", input.path.display())))
        } else {
            Err(ExtractError::Transient("backend busy".to_string()))
        }
    }))
}
