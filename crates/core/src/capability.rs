//! Capability registry: which file types can be extracted today, and for the rest,
//! when and how they are expected to become extractable.

use crate::models::normalize_token;
use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use extractors::plaintext::PlainTextExtractor;
use extractors::{Extractor, ExtractorCatalog};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const TEXT_TYPES: &[&str] = &[
    "txt", "md", "markdown", "log", "csv", "json", "yaml", "yml", "toml", "xml", "html", "htm",
    "rs", "py", "js", "ts",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Critical,
    High,
    Medium,
    Low,
}

impl PriorityClass {
    pub fn weight(self) -> f64 {
        match self {
            PriorityClass::Critical => 100.0,
            PriorityClass::High => 75.0,
            PriorityClass::Medium => 50.0,
            PriorityClass::Low => 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureCapability {
    pub technique: String,
    pub estimated_ready_at: Option<DateTime<Utc>>,
    pub priority: PriorityClass,
}

#[derive(Clone)]
pub struct CapabilityDescriptor {
    pub file_type: String,
    pub supported: bool,
    pub extractor: Option<Arc<dyn Extractor>>,
    pub confidence: f32,
    pub future: Option<FutureCapability>,
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("file_type", &self.file_type)
            .field("supported", &self.supported)
            .field("extractor", &self.extractor.as_ref().map(|e| e.name().to_string()))
            .field("confidence", &self.confidence)
            .field("future", &self.future)
            .finish()
    }
}

impl CapabilityDescriptor {
    pub fn supported(file_type: &str, extractor: Arc<dyn Extractor>, confidence: f32) -> Self {
        Self {
            file_type: normalize_token(file_type),
            supported: true,
            extractor: Some(extractor),
            confidence: confidence.clamp(0.0, 1.0),
            future: None,
        }
    }

    pub fn future(file_type: &str, future: FutureCapability) -> Self {
        Self {
            file_type: normalize_token(file_type),
            supported: false,
            extractor: None,
            confidence: 0.0,
            future: Some(future),
        }
    }

    pub fn unknown(file_type: &str) -> Self {
        Self {
            file_type: normalize_token(file_type),
            supported: false,
            extractor: None,
            confidence: 0.0,
            future: None,
        }
    }

    pub fn future_priority(&self) -> Option<PriorityClass> {
        if self.supported {
            None
        } else {
            self.future.as_ref().map(|f| f.priority)
        }
    }

    /// Contribution of the registry to the priority score.
    pub fn registry_priority(&self) -> f64 {
        if self.supported {
            (f64::from(self.confidence) * 50.0).round()
        } else {
            self.future_priority()
                .unwrap_or(PriorityClass::Low)
                .weight()
        }
    }
}

#[derive(Clone)]
pub struct CapabilityCheck {
    pub capable: bool,
    pub reason: String,
    pub estimated_ready_at: Option<DateTime<Utc>>,
    pub technique: Option<String>,
    pub extractor: Option<Arc<dyn Extractor>>,
    pub confidence: f32,
}

impl fmt::Debug for CapabilityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityCheck")
            .field("capable", &self.capable)
            .field("reason", &self.reason)
            .field("estimated_ready_at", &self.estimated_ready_at)
            .field("technique", &self.technique)
            .finish()
    }
}

/// A runtime extractor registration, recorded so snapshots can replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOverride {
    pub file_type: String,
    pub extractor: String,
    pub confidence: f32,
    pub registered_at: DateTime<Utc>,
}

#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    entries: HashMap<String, CapabilityDescriptor>,
    overrides: HashMap<String, CapabilityOverride>,
    catalog: ExtractorCatalog,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain-text types supported, mail/office/image/archive types scheduled.
    pub fn with_defaults() -> Self {
        Self::with_text_extractor(PlainTextExtractor::default())
    }

    /// Defaults with `text` bound to the plain-text types. Every built-in extractor
    /// is catalogued, so registrations naming one survive a snapshot round trip.
    pub fn with_text_extractor(text: PlainTextExtractor) -> Self {
        let mut reg = Self {
            catalog: ExtractorCatalog::builtin(text.max_bytes),
            ..Self::default()
        };
        let plaintext: Arc<dyn Extractor> = Arc::new(text);
        for t in TEXT_TYPES {
            reg.insert(CapabilityDescriptor::supported(t, plaintext.clone(), 0.9));
        }
        let future = |technique: &str, ready: (i32, u32, u32), priority| FutureCapability {
            technique: technique.to_string(),
            estimated_ready_at: Utc
                .with_ymd_and_hms(ready.0, ready.1, ready.2, 0, 0, 0)
                .single(),
            priority,
        };
        let planned = [
            ("pst", future("pst-mailbox-parser", (2027, 3, 1), PriorityClass::Critical)),
            ("ost", future("pst-mailbox-parser", (2027, 3, 1), PriorityClass::High)),
            ("msg", future("outlook-msg-parser", (2027, 1, 15), PriorityClass::High)),
            ("eml", future("mime-mail-parser", (2026, 12, 1), PriorityClass::High)),
            ("mbox", future("mbox-splitter", (2026, 12, 1), PriorityClass::High)),
            ("pdf", future("pdf-text-layer", (2026, 11, 15), PriorityClass::Medium)),
            ("docx", future("openxml-reader", (2027, 2, 1), PriorityClass::Medium)),
            ("xlsx", future("openxml-reader", (2027, 2, 1), PriorityClass::Medium)),
            ("pptx", future("openxml-reader", (2027, 2, 1), PriorityClass::Medium)),
            ("doc", future("legacy-office-binary", (2027, 6, 1), PriorityClass::Low)),
            ("xls", future("legacy-office-binary", (2027, 6, 1), PriorityClass::Low)),
            ("ppt", future("legacy-office-binary", (2027, 6, 1), PriorityClass::Low)),
            ("jpg", future("ocr", (2027, 9, 1), PriorityClass::Low)),
            ("jpeg", future("ocr", (2027, 9, 1), PriorityClass::Low)),
            ("png", future("ocr", (2027, 9, 1), PriorityClass::Low)),
            ("zip", future("archive-expansion", (2027, 4, 1), PriorityClass::Low)),
        ];
        for (t, f) in planned {
            reg.insert(CapabilityDescriptor::future(t, f));
        }
        reg
    }

    pub fn with_entry(mut self, descriptor: CapabilityDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    /// Makes an extractor available for restoring persisted registrations without
    /// binding it to any file type.
    pub fn with_catalog_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.catalog.insert(extractor);
        self
    }

    pub fn insert(&mut self, descriptor: CapabilityDescriptor) {
        if let Some(ex) = &descriptor.extractor {
            self.catalog.insert(ex.clone());
        }
        self.entries.insert(descriptor.file_type.clone(), descriptor);
    }

    pub fn catalog(&self) -> &ExtractorCatalog {
        &self.catalog
    }

    /// Descriptor for a token; unknown tokens get an unsupported entry with no
    /// readiness estimate.
    pub fn descriptor(&self, file_type: &str) -> CapabilityDescriptor {
        let key = normalize_token(file_type);
        self.entries
            .get(&key)
            .cloned()
            .unwrap_or_else(|| CapabilityDescriptor::unknown(&key))
    }

    pub fn is_supported(&self, file_type: &str) -> bool {
        self.entries
            .get(&normalize_token(file_type))
            .map(|d| d.supported && d.extractor.is_some())
            .unwrap_or(false)
    }

    pub fn check(&self, file_type: &str) -> CapabilityCheck {
        let key = normalize_token(file_type);
        let Some(desc) = self.entries.get(&key) else {
            return CapabilityCheck {
                capable: false,
                reason: format!("no extractor for file type {key:?}"),
                estimated_ready_at: None,
                technique: None,
                extractor: None,
                confidence: 0.0,
            };
        };
        match (&desc.extractor, &desc.future) {
            (Some(ex), _) if desc.supported => CapabilityCheck {
                capable: true,
                reason: format!("extractor {} available", ex.name()),
                estimated_ready_at: None,
                technique: None,
                extractor: Some(ex.clone()),
                confidence: desc.confidence,
            },
            (_, Some(future)) => CapabilityCheck {
                capable: false,
                reason: format!("awaiting {}", future.technique),
                estimated_ready_at: future.estimated_ready_at,
                technique: Some(future.technique.clone()),
                extractor: None,
                confidence: 0.0,
            },
            _ => CapabilityCheck {
                capable: false,
                reason: format!("file type {key:?} has no bound extractor"),
                estimated_ready_at: None,
                technique: None,
                extractor: None,
                confidence: 0.0,
            },
        }
    }

    /// Marks `file_type` supported by `extractor`. Returns true when the type was
    /// not extractable before.
    pub fn register(
        &mut self,
        file_type: &str,
        extractor: Arc<dyn Extractor>,
        confidence: f32,
        now: DateTime<Utc>,
    ) -> bool {
        let key = normalize_token(file_type);
        let newly_supported = !self.is_supported(&key);
        self.overrides.insert(
            key.clone(),
            CapabilityOverride {
                file_type: key.clone(),
                extractor: extractor.name().to_string(),
                confidence: confidence.clamp(0.0, 1.0),
                registered_at: now,
            },
        );
        self.insert(CapabilityDescriptor::supported(&key, extractor, confidence));
        newly_supported
    }

    pub fn overrides(&self) -> Vec<CapabilityOverride> {
        let mut list: Vec<CapabilityOverride> = self.overrides.values().cloned().collect();
        list.sort_by(|a, b| a.file_type.cmp(&b.file_type));
        list
    }

    /// Re-applies persisted registrations whose extractor is in the catalogue.
    /// Returns the ones that could not be bound.
    pub fn restore_overrides(&mut self, overrides: &[CapabilityOverride]) -> Vec<CapabilityOverride> {
        let mut missing = Vec::new();
        for o in overrides {
            match self.catalog.get(&o.extractor) {
                Some(ex) => {
                    self.insert(CapabilityDescriptor::supported(&o.file_type, ex, o.confidence));
                    self.overrides.insert(normalize_token(&o.file_type), o.clone());
                }
                None => missing.push(o.clone()),
            }
        }
        missing
    }

    pub fn unsupported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .entries
            .values()
            .filter(|d| !d.supported)
            .map(|d| d.file_type.clone())
            .collect();
        types.sort();
        types
    }

    /// Merges future-capability declarations from TOML files in `dir`. Types that
    /// are already supported are left alone.
    pub fn load_future_from_dir(&mut self, dir: &Path) -> anyhow::Result<usize> {
        let mut merged = 0;
        for entry in load_capability_files(dir)? {
            if self.is_supported(&entry.file_type) {
                continue;
            }
            self.insert(CapabilityDescriptor::future(
                &entry.file_type,
                FutureCapability {
                    technique: entry.technique,
                    estimated_ready_at: entry.estimated_ready_at,
                    priority: entry.priority,
                },
            ));
            merged += 1;
        }
        Ok(merged)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CapabilityFileEntry {
    pub file_type: String,
    pub technique: String,
    pub estimated_ready_at: Option<DateTime<Utc>>,
    pub priority: PriorityClass,
}

#[derive(Debug, Deserialize)]
struct CapabilityFile {
    #[serde(default)]
    capability: Vec<CapabilityFileEntry>,
}

pub fn load_capability_files(dir: &Path) -> anyhow::Result<Vec<CapabilityFileEntry>> {
    let mut entries = Vec::new();
    if !dir.exists() {
        return Ok(entries);
    }
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("toml"))
        .collect();
    paths.sort();
    for path in paths {
        let content = fs::read_to_string(&path)?;
        let file: CapabilityFile =
            toml::from_str(&content).with_context(|| format!("parse {}", path.display()))?;
        entries.extend(file.capability);
    }
    Ok(entries)
}
