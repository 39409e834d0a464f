use crate::capability::{CapabilityDescriptor, PriorityClass};
use crate::models::{FileDescriptor, Tier};
use crate::scorer::ScoreVector;
use chrono::Duration;

const MB: u64 = 1024 * 1024;

/// Types worth pulling forward even before their content is readable.
pub const HIGH_VALUE_TYPES: &[&str] = &["pst", "ost", "msg", "eml", "mbox", "pdf", "docx"];

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tier: Tier,
    pub reason: String,
}

/// First matching rule wins: critical, high, medium, then low.
pub fn classify(
    scores: &ScoreVector,
    file_type: &str,
    future_priority: Option<PriorityClass>,
    urgent: bool,
) -> Classification {
    let cp = scores.composite_potential;
    let (tier, reason) = if cp >= 85 {
        (Tier::Critical, format!("composite potential {cp} >= 85"))
    } else if future_priority == Some(PriorityClass::Critical) {
        (Tier::Critical, "registry marks type critical".to_string())
    } else if urgent {
        (Tier::Critical, "urgency marker in filename".to_string())
    } else if cp >= 60 {
        (Tier::High, format!("composite potential {cp} >= 60"))
    } else if scores.potential >= 80.0 {
        (Tier::High, format!("potential {} >= 80", scores.potential))
    } else if HIGH_VALUE_TYPES.contains(&file_type) {
        (Tier::High, format!("{file_type} is a high-value type"))
    } else if cp >= 30 {
        (Tier::Medium, format!("composite potential {cp} >= 30"))
    } else if scores.potential >= 50.0 {
        (Tier::Medium, format!("potential {} >= 50", scores.potential))
    } else {
        (Tier::Low, "no rule matched".to_string())
    };
    Classification { tier, reason }
}

#[derive(Debug, Clone, Copy)]
pub struct PriorityInputs<'a> {
    pub scores: &'a ScoreVector,
    pub registry_priority: f64,
    pub file_type: &'a str,
    pub size: u64,
    pub queued_for: Duration,
    pub aging_threshold: Duration,
}

impl<'a> PriorityInputs<'a> {
    pub fn new(
        scores: &'a ScoreVector,
        file: &'a FileDescriptor,
        capability: &CapabilityDescriptor,
        queued_for: Duration,
        aging_threshold: Duration,
    ) -> Self {
        Self {
            scores,
            registry_priority: capability.registry_priority(),
            file_type: &file.file_type,
            size: file.size,
            queued_for,
            aging_threshold,
        }
    }
}

/// Ordering key inside a tier. Distinct from the composite: it folds in registry
/// priority, type and size boosts, and time spent waiting.
pub fn priority_score(inputs: &PriorityInputs<'_>) -> f64 {
    let s = inputs.scores;
    2.0 * f64::from(s.composite_potential)
        + inputs.registry_priority
        + s.potential
        + 0.5 * s.temporal
        + 0.5 * s.context
        + type_boost(inputs.file_type)
        + size_boost(inputs.size)
        + queue_age_boost(inputs.queued_for, inputs.aging_threshold)
}

pub fn type_boost(file_type: &str) -> f64 {
    match file_type {
        "pst" | "ost" => 50.0,
        "msg" | "mbox" => 40.0,
        "eml" => 30.0,
        "pdf" => 20.0,
        "docx" | "xlsx" => 15.0,
        "pptx" | "doc" | "xls" => 10.0,
        "md" | "txt" => 5.0,
        _ => 0.0,
    }
}

pub fn size_boost(size: u64) -> f64 {
    if size > 50 * MB {
        30.0
    } else if size > 10 * MB {
        20.0
    } else {
        0.0
    }
}

/// Up to +50, two points per day past the aging threshold.
pub fn queue_age_boost(queued_for: Duration, threshold: Duration) -> f64 {
    let days_beyond = (queued_for - threshold).num_days();
    if days_beyond <= 0 {
        0.0
    } else {
        (days_beyond as f64 * 2.0).min(50.0)
    }
}
