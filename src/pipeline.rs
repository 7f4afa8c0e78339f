use crate::config::Settings;
use crate::marketplace::{self, LinkValidator};
use crate::models::{AnalysisResult, MarketplaceLink, SearchResponse, StageReport};
use crate::upload::{ImageUpload, ValidatedImage};
use crate::vision::resize::{self, ResizeError};
use crate::vision::{VisionClient, VisionConfig, VisionError};
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Photo in, marketplace search links out.
#[derive(Clone)]
pub struct Pipeline {
    pub settings: Arc<Settings>,
    vision: Arc<VisionClient>,
    validator: LinkValidator,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Self {
        let vision = VisionClient::new(VisionConfig::from_settings(&settings));
        let validator = LinkValidator::from_settings(&settings);
        Self::from_parts(settings, vision, validator)
    }

    pub fn from_parts(settings: Settings, vision: VisionClient, validator: LinkValidator) -> Self {
        Self {
            settings: Arc::new(settings),
            vision: Arc::new(vision),
            validator,
        }
    }

    /// Builds the links for an analysis and, when enabled, drops the ones
    /// whose search page is known to be empty.
    pub async fn process(&self, analysis: &AnalysisResult) -> Vec<MarketplaceLink> {
        let mut links = marketplace::build(analysis);
        if let Some(origin) = &self.settings.marketplace_origin {
            links = marketplace::builder::rebase(links, origin);
        }
        if !self.settings.link_validation_enabled || links.is_empty() {
            return links;
        }
        self.validator.validate(links).await
    }

    pub async fn run(&self, upload: ImageUpload) -> Result<SearchResponse, PipelineError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let mut stages = Vec::new();

        let image = self
            .capture_stage("validate_upload", &mut stages, {
                let settings = self.settings.clone();
                async move { stages::validate_upload(upload, &settings) }
            })
            .await?;

        let image = self
            .capture_stage("prepare_image", &mut stages, stages::prepare_image(image))
            .await?;

        let analysis = self
            .capture_stage("analyze_image", &mut stages, {
                let vision = self.vision.clone();
                async move { stages::analyze_image(&vision, &image).await }
            })
            .await?;

        let links = self
            .capture_stage("resolve_links", &mut stages, {
                let analysis = analysis.clone();
                async move {
                    let links = self.process(&analysis).await;
                    stages::check_links(links)
                }
            })
            .await?;

        let processing_time_seconds = started.elapsed().as_secs_f64();
        info!(
            target = "photosearch.pipeline",
            request_id = %request_id,
            object_type = analysis.object_type().as_str(),
            links = links.len(),
            processing_time_seconds,
            "search_completed"
        );
        Ok(SearchResponse {
            request_id,
            analysis,
            marketplace_links: links,
            processing_time_seconds,
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        let outcome = result.inspect_err(|err| {
            warn!(
                target = "photosearch.pipeline",
                stage = name,
                kind = ?err.kind(),
                error = %err.detail(),
                "stage_failed"
            );
        })?;
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

pub mod stages {
    use super::*;

    pub fn validate_upload(
        upload: ImageUpload,
        settings: &Settings,
    ) -> Result<StageOutcome<ValidatedImage>, PipelineError> {
        let filename = upload.filename.clone();
        let image = upload
            .validate(settings)
            .map_err(|err| PipelineError::invalid_input("validate_upload", err.to_string()))?;
        let output = json!({
            "filename": filename,
            "media_type": image.media_type,
            "bytes": image.bytes.len(),
        });
        Ok(StageOutcome::new(image, output))
    }

    /// Downscales images whose base64 form would exceed the vision limit.
    /// Decoding and re-encoding run on the blocking pool.
    pub async fn prepare_image(
        image: ValidatedImage,
    ) -> Result<StageOutcome<ValidatedImage>, PipelineError> {
        let original_bytes = image.bytes.len();
        let prepared = tokio::task::spawn_blocking(move || resize::fit_for_vision(image))
            .await
            .map_err(|err| PipelineError::internal("prepare_image", err.to_string()))?
            .map_err(|err| match err {
                ResizeError::Encode(_) => PipelineError::internal("prepare_image", err.to_string()),
                ResizeError::Decode(_) | ResizeError::StillTooLarge { .. } => {
                    PipelineError::invalid_input("prepare_image", err.to_string())
                }
            })?;
        let output = json!({
            "original_bytes": original_bytes,
            "bytes": prepared.bytes.len(),
            "media_type": prepared.media_type,
            "resized": prepared.bytes.len() != original_bytes,
        });
        Ok(StageOutcome::new(prepared, output))
    }

    pub async fn analyze_image(
        vision: &VisionClient,
        image: &ValidatedImage,
    ) -> Result<StageOutcome<AnalysisResult>, PipelineError> {
        let analysis = vision
            .analyze(&image.bytes, image.media_type)
            .await
            .map_err(PipelineError::from)?;
        let output = json!({
            "object_type": analysis.object_type(),
            "description": analysis.description(),
            "confidence": analysis.confidence(),
            "queries": analysis.search_queries().len(),
        });
        Ok(StageOutcome::new(analysis, output))
    }

    pub fn check_links(
        links: Vec<MarketplaceLink>,
    ) -> Result<StageOutcome<Vec<MarketplaceLink>>, PipelineError> {
        if links.is_empty() {
            return Err(PipelineError::routing("resolve_links", "no_links"));
        }
        let output = json!({
            "count": links.len(),
            "marketplaces": links.iter().map(|l| l.marketplace().as_str()).collect::<Vec<_>>(),
        });
        Ok(StageOutcome::new(links, output))
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    /// The vision service failed or answered outside its contract.
    Upstream,
    Routing,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::InvalidInput)
    }

    pub fn upstream(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Upstream)
    }

    pub fn routing(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Routing)
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Internal)
    }

    fn with_kind(stage: &'static str, message: impl Into<String>, kind: PipelineErrorKind) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

impl From<VisionError> for PipelineError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::ImageTooLarge(_) => {
                PipelineError::invalid_input("analyze_image", err.to_string())
            }
            _ => PipelineError::upstream("analyze_image", err.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}
