//! Multi-dimensional scoring.
//!
//! Every file gets five independent scores in `[0, 100]` whether or not its content
//! can be extracted yet. Wall-clock time and the sibling population are passed in
//! through [`ScoringContext`], so scoring is a pure function of its inputs.

use crate::config::ScoringConfig;
use crate::models::FileDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub content: f64,
    pub metadata: f64,
    pub context: f64,
    pub temporal: f64,
    pub potential: f64,
}

pub const WEIGHTS: Weights = Weights {
    content: 0.4,
    metadata: 0.2,
    context: 0.15,
    temporal: 0.15,
    potential: 0.1,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreVector {
    pub content: f64,
    pub metadata: f64,
    pub context: f64,
    pub temporal: f64,
    pub potential: f64,
    pub composite: u32,
    /// Composite with the content slot standing in for potential until content
    /// has been extracted.
    pub composite_potential: u32,
}

impl ScoreVector {
    pub fn from_dimensions(
        content: f64,
        metadata: f64,
        context: f64,
        temporal: f64,
        potential: f64,
    ) -> Self {
        let content = clamp(content);
        let metadata = clamp(metadata);
        let context = clamp(context);
        let temporal = clamp(temporal);
        let potential = clamp(potential);
        let content_slot = if content > 0.0 { content } else { potential };
        Self {
            content,
            metadata,
            context,
            temporal,
            potential,
            composite: composite(content, metadata, context, temporal, potential),
            composite_potential: composite(content_slot, metadata, context, temporal, potential),
        }
    }

    pub fn dimensions(&self) -> [f64; 5] {
        [
            self.content,
            self.metadata,
            self.context,
            self.temporal,
            self.potential,
        ]
    }
}

/// Weighted sum, rounded. Never 0 while any dimension carries signal.
pub fn composite(content: f64, metadata: f64, context: f64, temporal: f64, potential: f64) -> u32 {
    let sum = content * WEIGHTS.content
        + metadata * WEIGHTS.metadata
        + context * WEIGHTS.context
        + temporal * WEIGHTS.temporal
        + potential * WEIGHTS.potential;
    let rounded = sum.round().clamp(0.0, 100.0) as u32;
    let any_signal = [content, metadata, context, temporal, potential]
        .iter()
        .any(|d| *d > 0.0);
    if rounded == 0 && any_signal {
        1
    } else {
        rounded
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoringContext {
    pub now: DateTime<Utc>,
    /// Files in the same folder that were already analyzed or scored as relevant.
    pub relevant_siblings: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(
        &self,
        file: &FileDescriptor,
        content: Option<&str>,
        ctx: &ScoringContext,
    ) -> ScoreVector {
        ScoreVector::from_dimensions(
            self.content_score(content),
            self.metadata_score(file),
            context_score(&file.path, ctx.relevant_siblings),
            temporal_score(file.modified_at, ctx.now),
            potential_score(&file.file_type),
        )
    }

    pub fn content_score(&self, content: Option<&str>) -> f64 {
        let text = match content.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return 0.0,
        };
        let lower = text.to_lowercase();
        let hits = self
            .config
            .content_keywords
            .iter()
            .filter(|k| lower.contains(k.as_str()))
            .count();

        let mut score = 5.0 + (hits as f64 * 12.0).min(60.0);
        let chars = text.chars().count();
        if chars >= 500 {
            score += 10.0;
        }
        if chars >= 2_000 {
            score += 10.0;
        }
        if chars >= 10_000 {
            score += 5.0;
        }
        if text.lines().count() >= 20 {
            score += 5.0;
        }
        clamp(score)
    }

    pub fn metadata_score(&self, file: &FileDescriptor) -> f64 {
        let name = file.name.to_lowercase();
        let name_hits = self
            .config
            .filename_keywords
            .iter()
            .filter(|k| name.contains(k.as_str()))
            .count();
        let mut score = (name_hits as f64 * 20.0).min(40.0);

        if file.size > 10 * MB {
            score += 20.0;
        } else if file.size > MB {
            score += 10.0;
        }

        let segments = folder_segments(&file.path);
        let path_hits = self
            .config
            .path_keywords
            .iter()
            .filter(|k| segments.iter().any(|s| s == *k))
            .count();
        score += (path_hits as f64 * 15.0).min(30.0);
        clamp(score)
    }

    pub fn is_urgent(&self, file: &FileDescriptor) -> bool {
        let name = file.name.to_lowercase();
        self.config
            .urgency_markers
            .iter()
            .any(|m| name.contains(m.as_str()))
    }
}

pub fn context_score(path: &Path, relevant_siblings: usize) -> f64 {
    let sibling_bonus = (relevant_siblings as f64 * 10.0).min(60.0);
    let depth = folder_segments(path).len();
    let depth_bonus = (depth.saturating_sub(2) as f64 * 5.0).min(20.0);
    clamp(sibling_bonus + depth_bonus)
}

/// Newer is higher.
pub fn temporal_score(modified_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days = (now - modified_at).num_days();
    match days {
        d if d < 7 => 100.0,
        d if d < 30 => 80.0,
        d if d < 90 => 60.0,
        d if d < 180 => 40.0,
        d if d <= 365 => 25.0,
        _ => 10.0,
    }
}

/// Expected information density of a file type, regardless of whether it can be
/// extracted today.
pub fn potential_score(file_type: &str) -> f64 {
    match file_type {
        "pst" | "ost" => 100.0,
        "mbox" | "msg" => 95.0,
        "eml" => 90.0,
        "pdf" => 85.0,
        "docx" => 80.0,
        "doc" => 75.0,
        "xlsx" => 70.0,
        "xls" | "pptx" => 65.0,
        "ppt" => 60.0,
        "csv" => 55.0,
        "zip" => 50.0,
        "md" | "markdown" => 40.0,
        "txt" | "html" | "htm" => 35.0,
        "json" | "xml" | "rs" | "py" | "js" | "ts" => 30.0,
        "yaml" | "yml" | "toml" => 25.0,
        "log" | "jpg" | "jpeg" | "png" => 20.0,
        _ => 15.0,
    }
}

fn folder_segments(path: &Path) -> Vec<String> {
    path.parent()
        .map(|p| {
            p.components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().to_lowercase()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn clamp(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 100.0)
    }
}
