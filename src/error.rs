use thiserror::Error;

use crate::bus::BusError;
use crate::cache::CacheError;
use crate::metrics::MetricsError;
use crate::outbox::OutboxError;
use crate::queue::QueueError;
use crate::settings::ConfigError;

/// Any error raised by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_module_errors_transparently() {
        let err: Error = OutboxError::NotFound(7).into();
        assert_eq!(err.to_string(), "outbox row not found: 7");

        let err: Error = BusError::HandshakeTimeout {
            correlation_id: "cid-1".into(),
            elapsed: std::time::Duration::from_millis(50),
        }
        .into();
        assert!(matches!(err, Error::Bus(ref bus) if bus.is_timeout()));
    }
}
