//! The stateless payload transformation run by every worker.

use core::fmt;

/// A typed failure returned by a [`Transform`].
///
/// Workers deliver it on the reply channel in place of a result. The request
/// is never retried by the pool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransformError {
    reason: String,
}

impl TransformError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl core::error::Error for TransformError {}

/// A pure function from a payload to a result, shared by all workers.
///
/// Implementations are invoked concurrently from every worker task and must
/// not rely on shared mutable state. Any closure of the shape
/// `Fn(P) -> Result<R, TransformError>` is a `Transform<P>`.
///
/// ```
/// use leastload::{Transform, TransformError};
///
/// let sine = |x: i64| -> Result<f64, TransformError> { Ok((x as f64).sin()) };
/// assert_eq!(sine.apply(0).unwrap(), 0.0);
/// ```
pub trait Transform<P>: Send + Sync + 'static {
    type Output: Send + 'static;

    fn apply(&self, payload: P) -> Result<Self::Output, TransformError>;
}

impl<P, R, F> Transform<P> for F
where
    F: Fn(P) -> Result<R, TransformError> + Send + Sync + 'static,
    R: Send + 'static,
{
    type Output = R;

    #[inline]
    fn apply(&self, payload: P) -> Result<R, TransformError> {
        self(payload)
    }
}
