cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll;
        pub use self::epoll::Selector;
        pub(crate) use self::epoll::{Poller, Waker};
    } else {
        compile_error!("coil needs an epoll based platform");
    }
}
