//! Location coordinates shared with the upstream pipeline.
//!
//! The pipeline tags uploaded packets with the gateway position. It reads
//! that position through a [`CoordinatesProvider`] it holds by reference;
//! whoever owns the location source pushes fixes into it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};

/// A single position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees, -90..=90.
    pub latitude: f64,
    /// Longitude in degrees, -180..=180.
    pub longitude: f64,
    /// Horizontal accuracy radius in meters, if known.
    pub horizontal_accuracy: Option<f64>,
    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
}

impl Coordinates {
    /// Create a fix taken now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for out-of-range or non-finite values.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::InvalidParameter {
                name: "latitude".to_string(),
                value: latitude.to_string(),
            });
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidParameter {
                name: "longitude".to_string(),
                value: longitude.to_string(),
            });
        }

        Ok(Self {
            latitude,
            longitude,
            horizontal_accuracy: None,
            timestamp: Utc::now(),
        })
    }

    /// Attach an accuracy radius.
    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.horizontal_accuracy = Some(meters);
        self
    }
}

/// Read side of the location source, as seen by the upstream pipeline.
#[cfg_attr(test, mockall::automock)]
pub trait CoordinatesProvider: Send + Sync {
    /// Most recent fix, if any.
    fn coordinates(&self) -> Option<Coordinates>;
}

/// Holds the latest fix pushed by the platform location source.
#[derive(Debug, Default)]
pub struct LocationService {
    latest: RwLock<Option<Coordinates>>,
}

impl LocationService {
    /// Create a service with no fix yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new fix. Older fixes than the current one are ignored.
    pub fn update(&self, fix: Coordinates) {
        let mut latest = self.latest.write();
        if latest.map_or(true, |current| fix.timestamp >= current.timestamp) {
            trace!("Location updated: {:.5}, {:.5}", fix.latitude, fix.longitude);
            *latest = Some(fix);
        }
    }

    /// Forget the current fix.
    pub fn clear(&self) {
        *self.latest.write() = None;
    }
}

impl CoordinatesProvider for LocationService {
    fn coordinates(&self) -> Option<Coordinates> {
        *self.latest.read()
    }
}
