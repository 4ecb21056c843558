use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use image::ImageFormat;
use moodboard_contracts::ImageRef;
use tracing::{debug, info, warn};

use crate::generation::{GenerationCapability, GenerationRequest, RequestPart, ResponsePart};
use crate::resolve::ImageResolver;

pub const MAX_REFERENCES: usize = 10;
pub const TARGET_RESOLUTION: &str = "1K";
pub const STYLE_TRANSFER_INSTRUCTION: &str = "Maintain the main subject, composition, and content \
of the first image perfectly intact. Apply the exact aesthetic, mood, lighting, color grading, \
and style of the supplementary reference images to the main subject.";

const QUOTA_MARKERS: &[&str] = &["429", "RESOURCE_EXHAUSTED"];
const DIAGNOSTIC_MAX_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadPart<'a> {
    Text(&'a str),
    Image(&'a ImageRef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionRequest {
    pub subject: ImageRef,
    pub references: Vec<ImageRef>,
    pub instruction: &'static str,
    pub truncated: bool,
    pub references_total: usize,
}

impl CompositionRequest {
    /// `None` when there is nothing to borrow a style from. Keeps the oldest
    /// [`MAX_REFERENCES`] references.
    pub fn build(subject: ImageRef, all_references: &[ImageRef]) -> Option<Self> {
        if all_references.is_empty() {
            return None;
        }
        let truncated = all_references.len() > MAX_REFERENCES;
        Some(Self {
            subject,
            references: all_references
                .iter()
                .take(MAX_REFERENCES)
                .cloned()
                .collect(),
            instruction: STYLE_TRANSFER_INSTRUCTION,
            truncated,
            references_total: all_references.len(),
        })
    }

    /// `[instruction, subject, references...]`.
    pub fn payload(&self) -> Vec<PayloadPart<'_>> {
        let mut parts = Vec::with_capacity(self.references.len() + 2);
        parts.push(PayloadPart::Text(self.instruction));
        parts.push(PayloadPart::Image(&self.subject));
        parts.extend(self.references.iter().map(PayloadPart::Image));
        parts
    }
}

/// PNG bytes of the generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionFailure {
    NoReferencesConfigured,
    GenerationEmpty,
    QuotaExceeded { diagnostic: String },
    GenerationFailed { diagnostic: String },
}

impl CompositionFailure {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoReferencesConfigured => "no_references",
            Self::GenerationEmpty => "generation_empty",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::GenerationFailed { .. } => "generation_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionResult {
    pub truncated: bool,
    pub references_used: usize,
    pub references_total: usize,
    pub outcome: Result<GeneratedImage, CompositionFailure>,
}

impl CompositionResult {
    pub fn label(&self) -> &'static str {
        match &self.outcome {
            Ok(_) => "success",
            Err(failure) => failure.label(),
        }
    }

    fn failed(request: &CompositionRequest, failure: CompositionFailure) -> Self {
        Self {
            truncated: request.truncated,
            references_used: request.references.len(),
            references_total: request.references_total,
            outcome: Err(failure),
        }
    }
}

/// Builds one generation call per subject and classifies whatever comes back.
#[derive(Clone)]
pub struct Composer {
    capability: Arc<dyn GenerationCapability>,
    resolver: Arc<dyn ImageResolver>,
}

impl Composer {
    pub fn new(capability: Arc<dyn GenerationCapability>, resolver: Arc<dyn ImageResolver>) -> Self {
        Self {
            capability,
            resolver,
        }
    }

    pub fn compose(&self, subject: &ImageRef, all_references: &[ImageRef]) -> CompositionResult {
        let Some(request) = CompositionRequest::build(subject.clone(), all_references) else {
            return CompositionResult {
                truncated: false,
                references_used: 0,
                references_total: 0,
                outcome: Err(CompositionFailure::NoReferencesConfigured),
            };
        };
        if request.truncated {
            info!(
                total = request.references_total,
                used = request.references.len(),
                "reference set truncated for composition"
            );
        }

        let generation_request = match self.resolve_payload(&request) {
            Ok(generation_request) => generation_request,
            Err(err) => {
                warn!(error = %err, "failed to resolve composition images");
                return CompositionResult::failed(&request, classify_failure(&err));
            }
        };

        let started = Instant::now();
        let response = self.capability.generate(&generation_request);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                let failure = classify_failure(&err);
                warn!(
                    provider = self.capability.name(),
                    elapsed_ms,
                    failure = failure.label(),
                    error = %error_chain_text(&err, DIAGNOSTIC_MAX_CHARS),
                    "generation call failed"
                );
                return CompositionResult::failed(&request, failure);
            }
        };
        debug!(
            provider = self.capability.name(),
            elapsed_ms,
            parts = response.parts.len(),
            "generation call returned"
        );

        match first_image(&response.parts) {
            Some(image) => CompositionResult {
                truncated: request.truncated,
                references_used: request.references.len(),
                references_total: request.references_total,
                outcome: Ok(image),
            },
            None => CompositionResult::failed(&request, CompositionFailure::GenerationEmpty),
        }
    }

    fn resolve_payload(&self, request: &CompositionRequest) -> anyhow::Result<GenerationRequest> {
        let mut parts = Vec::new();
        for (idx, part) in request.payload().into_iter().enumerate() {
            match part {
                PayloadPart::Text(text) => parts.push(RequestPart::Text(text.to_string())),
                PayloadPart::Image(image) => {
                    let bytes = self.resolver.resolve(image).map_err(|err| {
                        let role = if idx == 1 { "subject" } else { "reference" };
                        anyhow::Error::new(err).context(format!("failed to fetch {role} image"))
                    })?;
                    parts.push(RequestPart::Image(bytes));
                }
            }
        }
        Ok(GenerationRequest {
            parts,
            image_size: TARGET_RESOLUTION.to_string(),
        })
    }
}

/// First part that decodes as an image, re-encoded as PNG.
fn first_image(parts: &[ResponsePart]) -> Option<GeneratedImage> {
    parts.iter().find_map(|part| {
        let ResponsePart::InlineData { bytes, .. } = part else {
            return None;
        };
        let decoded = image::load_from_memory(bytes).ok()?;
        let mut png = Vec::new();
        decoded
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .ok()?;
        Some(GeneratedImage {
            bytes: png,
            width: decoded.width(),
            height: decoded.height(),
        })
    })
}

pub fn classify_failure(err: &anyhow::Error) -> CompositionFailure {
    let diagnostic = error_chain_text(err, DIAGNOSTIC_MAX_CHARS);
    classify_diagnostic(diagnostic)
}

pub fn classify_diagnostic(diagnostic: String) -> CompositionFailure {
    if QUOTA_MARKERS
        .iter()
        .any(|marker| diagnostic.contains(marker))
    {
        CompositionFailure::QuotaExceeded { diagnostic }
    } else {
        CompositionFailure::GenerationFailed { diagnostic }
    }
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(": "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
