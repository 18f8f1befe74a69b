use async_trait::async_trait;

use super::telemetry::TelemetrySink;
use crate::common::errors::Result;
use crate::common::traits::BrokerGateway;

/// Core strategy trait driven by a [`Session`](super::session::Session)
///
/// A session calls the hooks in a fixed order for each trading day:
/// `on_session_start` once before waiting for the open, `on_tick` once per
/// interval while the market is open, and `on_wind_down` once when the close
/// is near. Errors returned from a hook are logged by the session and never
/// stop it.
///
/// # Implementation Notes
///
/// - State that must survive between ticks (rankings, the last order) is
///   owned by the strategy
/// - `on_session_start` should reset anything that must not leak into the
///   next trading day
/// - Positions and balances are always re-read from the gateway
#[async_trait]
pub trait SessionStrategy: Send {
    /// Unique identifier for this strategy
    fn name(&self) -> &str;

    /// Called before waiting for the market to open
    ///
    /// Default implementation does nothing.
    async fn on_session_start(
        &mut self,
        _gateway: &dyn BrokerGateway,
        _telemetry: &dyn TelemetrySink,
    ) -> Result<()> {
        Ok(())
    }

    /// Called once per tick while the market is open
    async fn on_tick(
        &mut self,
        gateway: &dyn BrokerGateway,
        telemetry: &dyn TelemetrySink,
    ) -> Result<()>;

    /// Called when the close is within the wind-down window
    async fn on_wind_down(
        &mut self,
        gateway: &dyn BrokerGateway,
        telemetry: &dyn TelemetrySink,
    ) -> Result<()>;
}
