//! Deterministic collaborator doubles shared by unit and integration tests.

use crate::error::AppError;
use crate::occupancy::{CameraFetcher, PeopleCounter};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Fetcher keyed by reference: known references return canned bytes, a
/// canned failure, or never resolve; unknown references fail.
#[derive(Debug, Default)]
pub struct MockCameraFetcher {
    images: HashMap<String, Vec<u8>>,
    failures: HashMap<String, String>,
    stalls: HashSet<String>,
}

impl MockCameraFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, reference: &str, bytes: Vec<u8>) -> Self {
        self.images.insert(reference.to_string(), bytes);
        self
    }

    pub fn with_failure(mut self, reference: &str) -> Self {
        self.failures
            .insert(reference.to_string(), "mock camera unreachable".to_string());
        self
    }

    /// The fetch never completes. For exercising timeouts under a paused
    /// test clock.
    pub fn with_stall(mut self, reference: &str) -> Self {
        self.stalls.insert(reference.to_string());
        self
    }
}

#[async_trait]
impl CameraFetcher for MockCameraFetcher {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, AppError> {
        if self.stalls.contains(reference) {
            return std::future::pending().await;
        }
        if let Some(reason) = self.failures.get(reference) {
            return Err(AppError::Fetch(reason.clone()));
        }
        self.images
            .get(reference)
            .cloned()
            .ok_or_else(|| AppError::Fetch(format!("no mock image for {reference}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CounterBehavior {
    /// Count equals the image's first byte. Deterministic per fixture.
    FromFirstByte,
    FailAlways,
    Unready,
}

#[derive(Debug)]
pub struct MockPeopleCounter {
    behavior: CounterBehavior,
}

impl MockPeopleCounter {
    pub fn from_first_byte() -> Self {
        Self {
            behavior: CounterBehavior::FromFirstByte,
        }
    }

    pub fn fail_always() -> Self {
        Self {
            behavior: CounterBehavior::FailAlways,
        }
    }

    pub fn unready() -> Self {
        Self {
            behavior: CounterBehavior::Unready,
        }
    }
}

#[async_trait]
impl PeopleCounter for MockPeopleCounter {
    async fn count(&self, image: &[u8]) -> Result<u32, AppError> {
        match self.behavior {
            CounterBehavior::FromFirstByte => {
                Ok(image.first().copied().map(u32::from).unwrap_or(0))
            }
            CounterBehavior::FailAlways | CounterBehavior::Unready => {
                Err(AppError::Count("mock counter failure".to_string()))
            }
        }
    }

    fn ready(&self) -> bool {
        self.behavior != CounterBehavior::Unready
    }
}
