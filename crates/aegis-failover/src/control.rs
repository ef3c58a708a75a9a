//! Routing and promotion collaborators.
//!
//! The real control-plane interactions are deployment-target specific;
//! the logging implementations record the intent and let the operator's
//! infrastructure automation pick it up. Tests substitute recording
//! fakes.

use async_trait::async_trait;

use crate::error::Result;

/// Directs client traffic between regions.
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    /// Stop directing traffic to a region.
    async fn drain(&self, region: &str) -> Result<()>;

    /// Direct traffic to a region.
    async fn route_to(&self, region: &str) -> Result<()>;

    /// Re-admit a previously drained region.
    async fn resume(&self, region: &str) -> Result<()>;
}

/// Promotes and demotes a region's stores.
#[async_trait]
pub trait RegionController: Send + Sync {
    /// Make the region's replicas writable.
    async fn promote(&self, region: &str) -> Result<()>;

    /// Return the region's stores to replica mode.
    async fn demote(&self, region: &str) -> Result<()>;
}

/// Router that logs routing intent.
#[derive(Default)]
pub struct LoggingRouter;

#[async_trait]
impl TrafficRouter for LoggingRouter {
    async fn drain(&self, region: &str) -> Result<()> {
        tracing::info!(region, "draining traffic");
        Ok(())
    }

    async fn route_to(&self, region: &str) -> Result<()> {
        tracing::info!(region, "routing traffic");
        Ok(())
    }

    async fn resume(&self, region: &str) -> Result<()> {
        tracing::info!(region, "resuming traffic");
        Ok(())
    }
}

/// Controller that logs promotion intent.
#[derive(Default)]
pub struct LoggingController;

#[async_trait]
impl RegionController for LoggingController {
    async fn promote(&self, region: &str) -> Result<()> {
        tracing::info!(region, "promoting region stores to writable");
        Ok(())
    }

    async fn demote(&self, region: &str) -> Result<()> {
        tracing::info!(region, "demoting region stores to replica mode");
        Ok(())
    }
}
