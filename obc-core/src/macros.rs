//! Debug logging macros.
//!
//! One macro layer fanning out to the sink selected at build time: `defmt`
//! on flight targets, `log` on the host. Info and above are additionally
//! formatted into the on-board byte ring so the most recent lines survive
//! for a debug-port dump even without a live sink.

#[cfg(all(feature = "log", feature = "defmt"))]
compile_error!("features `log` and `defmt` are mutually exclusive");

#[cfg(feature = "defmt")]
mod defmt_impl {
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => { ::defmt::trace!($($arg)*) };
    }

    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => { ::defmt::debug!($($arg)*) };
    }

    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {{
            ::defmt::info!($($arg)*);
            $crate::logging::logger::log_line(format_args!($($arg)*));
        }};
    }

    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {{
            ::defmt::warn!($($arg)*);
            $crate::logging::logger::log_line(format_args!($($arg)*));
        }};
    }

    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {{
            ::defmt::error!($($arg)*);
            $crate::logging::logger::log_line(format_args!($($arg)*));
        }};
    }
}

#[cfg(all(feature = "log", not(feature = "defmt")))]
mod log_impl {
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => { ::log::trace!($($arg)*) };
    }

    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => { ::log::debug!($($arg)*) };
    }

    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {{
            ::log::info!($($arg)*);
            $crate::logging::logger::log_line(format_args!($($arg)*));
        }};
    }

    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {{
            ::log::warn!($($arg)*);
            $crate::logging::logger::log_line(format_args!($($arg)*));
        }};
    }

    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {{
            ::log::error!($($arg)*);
            $crate::logging::logger::log_line(format_args!($($arg)*));
        }};
    }
}

#[cfg(not(any(feature = "log", feature = "defmt")))]
mod noop_impl {
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {
            $crate::logging::logger::log_line(format_args!($($arg)*))
        };
    }

    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {
            $crate::logging::logger::log_line(format_args!($($arg)*))
        };
    }

    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {
            $crate::logging::logger::log_line(format_args!($($arg)*))
        };
    }
}
