pub mod connectivity;
pub mod criteria;
pub mod observable;
pub mod position;
pub mod provider;
pub mod space_vehicle;
pub mod units;
pub mod update;

pub use criteria::Criteria;
pub use position::Position;
pub use update::Update;

use provider::UpdateKind;

/// Every failure the service distinguishes. Anything not listed here is
/// logged and dropped at the boundary where it occurred.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("coordinate out of range: {0}")]
    InvalidCoordinate(String),
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),
    #[error("no matching provider for {0} updates")]
    NoMatchingProvider(UpdateKind),
    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),
    #[error("observable was re-entered from one of its own callbacks")]
    ReentrancyRejected,
    #[error("transient reporter failure: {0}")]
    ReporterTransient(String),
    #[error("permanent reporter failure: {0}")]
    ReporterPermanent(String),
    #[error("permission denied")]
    PermissionDenied,
}
