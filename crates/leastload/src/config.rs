use crate::{Error, Result};

/// Shape of a worker pool, fixed for the lifetime of a [`Balancer`].
///
/// [`Balancer`]: crate::Balancer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker tasks.
    pub num_workers: usize,
    /// Capacity of each worker's inbound queue. A full queue blocks the
    /// balancer's dispatch until the worker drains it.
    pub queue_capacity: usize,
    /// Capacity of the shared request channel between requesters and the
    /// balancer. `1` is the closest tokio offers to a rendezvous channel.
    pub request_buffer: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 3,
            queue_capacity: 3,
            request_buffer: 1,
        }
    }
}

impl PoolConfig {
    pub const fn new(num_workers: usize, queue_capacity: usize) -> Self {
        Self {
            num_workers,
            queue_capacity,
            request_buffer: 1,
        }
    }

    #[must_use]
    pub const fn with_request_buffer(mut self, request_buffer: usize) -> Self {
        self.request_buffer = request_buffer;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if any field is zero; tokio channels
    /// need a non-zero capacity and an empty pool cannot dispatch.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("num_workers", self.num_workers),
            ("queue_capacity", self.queue_capacity),
            ("request_buffer", self.request_buffer),
        ]
        .into_iter()
        .find(|&(_, v)| v == 0);

        match zero {
            Some((name, _)) => Err(Error::InvalidConfig {
                reason: format!("{name} must be greater than 0"),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(PoolConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = PoolConfig::new(0, 1).validate().unwrap_err();
        assert_eq!(
            err,
            Error::InvalidConfig {
                reason: "num_workers must be greater than 0".to_string()
            }
        );
        assert!(PoolConfig::new(2, 0).validate().is_err());
        assert!(
            PoolConfig::new(2, 2)
                .with_request_buffer(0)
                .validate()
                .is_err()
        );
    }
}
