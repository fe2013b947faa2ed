use crate::error::AppError;
use async_trait::async_trait;
use offline_queue::GeoPoint;
use std::time::Duration;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A GPS fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
}

impl Position {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Source of the device position (platform GPS, fixed position, ...)
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<Position, AppError>;
}

/// Best-effort position within `timeout`. Failures and timeouts yield `None`.
pub async fn acquire_position(
    provider: &dyn GeolocationProvider,
    timeout: Duration,
) -> Option<Position> {
    match tokio::time::timeout(timeout, provider.current_position()).await {
        Ok(Ok(position)) => Some(position),
        Ok(Err(e)) => {
            log::warn!("Could not get GPS position: {}", e);
            None
        }
        Err(_) => {
            log::warn!("GPS position timed out after {:?}", timeout);
            None
        }
    }
}

/// Great-circle distance in meters (haversine)
pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Always reports the same position
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition(pub Position);

#[async_trait]
impl GeolocationProvider for FixedPosition {
    async fn current_position(&self) -> Result<Position, AppError> {
        Ok(self.0)
    }
}

/// Device without a usable GPS
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeolocation;

#[async_trait]
impl GeolocationProvider for NoGeolocation {
    async fn current_position(&self) -> Result<Position, AppError> {
        Err(AppError::GeolocationUnavailable)
    }
}
