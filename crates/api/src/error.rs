//! Syzygy error types.

use std::sync::Arc;

/// Shared handle to whatever lower-level error caused a [SzgError].
///
/// Cloning bumps a refcount, so the same cause can sit behind many
/// clones of one error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Wrap `e` as the cause.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// Failure returned by broker, socket and sync server calls.
///
/// Must stay `Clone`: one failed confirm or listen is reported to
/// every waiter parked on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SzgError {
    /// A described failure, optionally carrying its cause.
    #[error("{ctx} (src: {src})")]
    Other {
        /// What was being attempted, e.g. "bind" or "handshake".
        ctx: Arc<str>,

        /// Underlying cause. Displays as `None` when absent.
        #[source]
        src: DynInnerError,
    },
}

impl SzgError {
    /// Describe a failure that was caused by `src`.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }

    /// Describe a failure that has no underlying cause.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }
}

impl From<std::io::Error> for SzgError {
    fn from(err: std::io::Error) -> Self {
        Self::other_src("io", err)
    }
}

/// Shorthand for results carrying a [SzgError].
pub type SzgResult<T> = Result<T, SzgError>;

#[cfg(test)]
mod test {
    use super::*;
    use std::error::Error;

    #[test]
    fn message_shows_context_and_cause() {
        assert_eq!(
            "no channel (src: None)",
            SzgError::other("no channel").to_string(),
        );
        assert_eq!(
            "bind (src: addr in use)",
            SzgError::other_src("bind", std::io::Error::other("addr in use"))
                .to_string(),
        );
    }

    #[test]
    fn io_error_converts_with_source() {
        let err: SzgError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!("io (src: pipe)", err.to_string());
        assert!(err.source().is_some());
        assert!(SzgError::other("alone").source().is_none());
    }

    #[test]
    fn clones_share_one_cause() {
        let err = SzgError::other_src("listen", std::io::Error::other("busy"));
        let copy = err.clone();
        let SzgError::Other { src: a, .. } = &err;
        let SzgError::Other { src: b, .. } = &copy;
        let (Some(a), Some(b)) = (&a.0, &b.0) else {
            panic!("cause missing");
        };
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn can_cross_threads() {
        let err = SzgError::other("handshake");
        let msg = std::thread::spawn(move || err.to_string()).join().unwrap();
        assert_eq!("handshake (src: None)", msg);
    }
}
