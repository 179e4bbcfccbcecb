//! Occupancy counting from camera images.
//!
//! A facility's cameras are fetched concurrently under a per-facility cap;
//! each frame goes to the counting collaborator. One unreachable camera
//! contributes zero and the aggregate continues.

use crate::error::AppError;
use crate::store::{CameraSample, CameraSampleStatus};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

pub mod mock;
pub mod vision;

pub use vision::VisionCounter;

/// Resolves an opaque camera reference (URL) to image bytes.
#[async_trait]
pub trait CameraFetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, AppError>;
}

/// Counts people in a single image.
#[async_trait]
pub trait PeopleCounter: Send + Sync {
    async fn count(&self, image: &[u8]) -> Result<u32, AppError>;

    /// False when the collaborator is not configured; strict callers fail,
    /// the rest fall back to the seeded heuristic.
    fn ready(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// Counting failures propagate; no heuristic fallback.
    Strict,
    /// Counting failures fall back to a count seeded from the image bytes.
    Heuristic,
}

/// One already-fetched frame, as submitted by the frame-upload endpoint.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub source_id: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyCount {
    pub total: u32,
    pub cameras: Vec<CameraSample>,
}

/// Deterministic pseudo-random count seeded from the image content.
/// Repeatable for test fixtures; NOT a quality estimate.
pub fn seeded_count(image: &[u8]) -> u32 {
    let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in image.iter().take(256) {
        seed ^= u64::from(byte);
        seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
    }
    StdRng::seed_from_u64(seed).gen_range(1..=8)
}

pub struct CameraOccupancySource {
    fetcher: Arc<dyn CameraFetcher>,
    counter: Arc<dyn PeopleCounter>,
    mode: CountMode,
    fetch_parallel: usize,
}

impl CameraOccupancySource {
    pub fn new(
        fetcher: Arc<dyn CameraFetcher>,
        counter: Arc<dyn PeopleCounter>,
        mode: CountMode,
        fetch_parallel: usize,
    ) -> Self {
        Self {
            fetcher,
            counter,
            mode,
            fetch_parallel: fetch_parallel.max(1),
        }
    }

    pub fn mode(&self) -> CountMode {
        self.mode
    }

    pub fn counter(&self) -> &Arc<dyn PeopleCounter> {
        &self.counter
    }

    /// Fetch and count every referenced camera. Tolerates zero references.
    pub async fn count_refs(&self, references: &[String]) -> Result<OccupancyCount, AppError> {
        let gate = Arc::new(Semaphore::new(self.fetch_parallel));
        let fetches = references.iter().enumerate().map(|(index, reference)| {
            let gate = Arc::clone(&gate);
            async move {
                // Semaphore is never closed, acquire cannot fail.
                let Ok(_permit) = gate.acquire().await else {
                    return (index, Err(AppError::Fetch("fetch gate closed".to_string())));
                };
                (index, self.fetcher.fetch(reference).await)
            }
        });
        let fetched = futures::future::join_all(fetches).await;

        let mut total: u32 = 0;
        let mut cameras = Vec::with_capacity(references.len());
        for (index, result) in fetched {
            // The reference is the sample's identity; a stored record must
            // be able to say which camera was unreachable.
            let source_id = references[index].clone();
            match result {
                Ok(bytes) => {
                    let people = self.count_bytes(&bytes).await?;
                    total += people;
                    cameras.push(CameraSample {
                        source_id,
                        people,
                        status: CameraSampleStatus::Ok,
                    });
                }
                Err(err) => {
                    warn!(camera = %source_id, error = %err, "camera fetch failed, counting it as empty");
                    cameras.push(CameraSample {
                        source_id,
                        people: 0,
                        status: CameraSampleStatus::NoImage,
                    });
                }
            }
        }
        Ok(OccupancyCount { total, cameras })
    }

    /// Count frames that were already fetched (frame-upload path). Frames
    /// with empty bytes degrade to `no_image` like a failed fetch.
    pub async fn count_frames(&self, frames: &[CameraFrame]) -> Result<OccupancyCount, AppError> {
        let mut total: u32 = 0;
        let mut cameras = Vec::with_capacity(frames.len());
        for frame in frames {
            if frame.bytes.is_empty() {
                cameras.push(CameraSample {
                    source_id: frame.source_id.clone(),
                    people: 0,
                    status: CameraSampleStatus::NoImage,
                });
                continue;
            }
            let people = self.count_bytes(&frame.bytes).await?;
            total += people;
            cameras.push(CameraSample {
                source_id: frame.source_id.clone(),
                people,
                status: CameraSampleStatus::Ok,
            });
        }
        Ok(OccupancyCount { total, cameras })
    }

    async fn count_bytes(&self, image: &[u8]) -> Result<u32, AppError> {
        if !self.counter.ready() {
            return match self.mode {
                CountMode::Strict => Err(AppError::Count(
                    "counting collaborator is not configured".to_string(),
                )),
                CountMode::Heuristic => Ok(seeded_count(image)),
            };
        }
        match self.counter.count(image).await {
            Ok(count) => Ok(count),
            Err(err) => match self.mode {
                CountMode::Strict => Err(err),
                CountMode::Heuristic => {
                    warn!(error = %err, "counting failed, using seeded heuristic");
                    Ok(seeded_count(image))
                }
            },
        }
    }
}

/// Camera resolution over HTTP. Rejects non-2xx responses, responses below
/// the minimum byte threshold (error pages are tiny), and non-image
/// content types.
pub struct HttpCameraFetcher {
    client: Client,
    timeout: Duration,
    min_bytes: usize,
}

impl HttpCameraFetcher {
    pub fn new(client: Client, timeout: Duration, min_bytes: usize) -> Self {
        Self {
            client,
            timeout,
            min_bytes,
        }
    }
}

#[async_trait]
impl CameraFetcher for HttpCameraFetcher {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, AppError> {
        let response = self
            .client
            .get(reference)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AppError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Fetch(format!("camera returned {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(AppError::Fetch(format!(
                "not image content ({})",
                if content_type.is_empty() {
                    "no content type"
                } else {
                    &content_type
                }
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Fetch(e.to_string()))?;
        if bytes.len() < self.min_bytes {
            return Err(AppError::Fetch(format!(
                "response too small ({} bytes)",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }
}
