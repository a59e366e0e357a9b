#![deny(missing_docs)]
//! Test utilities shared by the syzygy crates.

mod collector;
pub use collector::*;

/// Enable tracing with the RUST_LOG environment variable.
///
/// This is intended to be used in tests, so it defaults to DEBUG level.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .try_init();
}

/// Run `$code` every `$sleep_ms` until it `return`s a value, panicking
/// after `$timeout_ms`.
///
/// ```
/// let mut n = 0;
/// let got = syzygy_test_utils::iter_check!(1000, {
///     n += 1;
///     if n == 3 {
///         return n;
///     }
/// });
/// assert_eq!(3, got);
/// ```
#[macro_export]
macro_rules! iter_check {
    ($timeout_ms:literal, $sleep_ms:literal, $code:block) => {{
        let timeout = std::time::Duration::from_millis($timeout_ms);
        let start = std::time::Instant::now();
        #[allow(clippy::redundant_closure_call)]
        let out = (|| loop {
            if start.elapsed() > timeout {
                panic!("iter_check timed out after {:?}", timeout);
            }
            $code
            std::thread::sleep(std::time::Duration::from_millis($sleep_ms));
        })();
        out
    }};

    ($timeout_ms:literal, $code:block) => {
        $crate::iter_check!($timeout_ms, 1, $code)
    };
}
