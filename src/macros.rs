/// macro used to spawn a coroutine
///
/// `go!(cx, f)` is a convenient wrapper for [`Context::spawn`], it checks
/// the closure shape up front so a wrong signature reports at the call
/// site. `go!(remote => f)` spawns through a [`Remote`] and additionally
/// requires `Send`.
///
/// [`Context::spawn`]: crate::Context::spawn
/// [`Remote`]: crate::Remote
#[macro_export]
macro_rules! go {
    // spawn on another worker
    ($remote:expr => $func:expr) => {{
        fn _go_check<F, T>(f: F) -> F
        where
            F: FnOnce(&$crate::Context) -> T + Send + 'static,
            T: Send + 'static,
        {
            f
        }
        let f = _go_check($func);
        $remote.spawn(f)
    }};

    // spawn on the current worker
    ($cx:expr, $func:expr) => {{
        fn _go_check<F, T>(f: F) -> F
        where
            F: FnOnce(&$crate::Context) -> T + 'static,
            T: 'static,
        {
            f
        }
        let f = _go_check($func);
        $cx.spawn(f)
    }};
}

/// Log an invariant violation and abort the process.
///
/// Used where continuing would run on corrupted scheduler state, a panic
/// would only be caught at the coroutine boundary.
macro_rules! fatal {
    ($($arg:tt)+) => {{
        error!($($arg)+);
        ::std::process::abort()
    }};
}
