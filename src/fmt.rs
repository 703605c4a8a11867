// SPDX-License-Identifier: Apache-2.0

//! Logging macros. Forwards to [`defmt`](https://docs.rs/defmt) on the RP2040 and to
//! [`log`](https://docs.rs/log) everywhere else, so the library can be unit tested on a host
//! without a defmt global logger.
//!
//! Only plain `{}` / `{:?}` placeholders are supported, since the arguments must satisfy both
//! frontends.
#![allow(unused_macros)]

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(target_os = "none")]
        ::defmt::trace!($($arg)*);
        #[cfg(not(target_os = "none"))]
        ::log::trace!($($arg)*);
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(target_os = "none")]
        ::defmt::debug!($($arg)*);
        #[cfg(not(target_os = "none"))]
        ::log::debug!($($arg)*);
    }};
}

macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(target_os = "none")]
        ::defmt::info!($($arg)*);
        #[cfg(not(target_os = "none"))]
        ::log::info!($($arg)*);
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(target_os = "none")]
        ::defmt::warn!($($arg)*);
        #[cfg(not(target_os = "none"))]
        ::log::warn!($($arg)*);
    }};
}

macro_rules! error {
    ($($arg:tt)*) => {{
        #[cfg(target_os = "none")]
        ::defmt::error!($($arg)*);
        #[cfg(not(target_os = "none"))]
        ::log::error!($($arg)*);
    }};
}
