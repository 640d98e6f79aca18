//! Assertion macros shared by integration tests.

/// Await a future, panicking with the call site if it does not resolve
/// within [`DEFAULT_WAIT`](crate::DEFAULT_WAIT).
#[macro_export]
macro_rules! within {
    ($fut:expr) => {{
        ::tokio::time::timeout($crate::DEFAULT_WAIT, $fut)
            .await
            .expect(concat!("timed out at ", file!(), ":", line!()))
    }};
    ($fut:expr, $msg:expr) => {{
        let m = ::std::format!("{msg} timed out at {}:{}", file!(), line!(), msg = $msg);
        ::tokio::time::timeout($crate::DEFAULT_WAIT, $fut)
            .await
            .expect(&m)
    }};
}

pub use crate::within;
