//! Simple to ``stderr`` logger.
//!
//! ``warn!`` and ``error!`` always print. ``info!`` and ``debug!`` are only
//! compiled in with the ``debug`` feature, and ``trace!`` with the ``trace``
//! feature; when disabled, their arguments are still type checked but never
//! evaluated.

/// Timestamp related functions.
///
/// This module is used by the exported macros in external crates; so this has
/// to be public in scope.
pub mod timestamp {
    /// Generate the current timestamp, followed by a separator.
    #[cfg(feature = "debug")]
    pub fn prefix() -> String {
        format!("\x1b[38:5:240m{}\x1b[39m ", chrono::Utc::now().to_rfc3339())
    }

    /// Without the ``debug`` feature, no timestamp is printed.
    #[cfg(not(feature = "debug"))]
    pub fn prefix() -> String {
        String::new()
    }
}

#[cfg(feature = "trace")]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        ::std::eprintln!(
            "{}\x1b[1m\x1b[38:5:240mTRACE\x1b[39m | \x1b[22m\x1b[38:5:240m{}\x1b[39m",
            $crate::timestamp::prefix(),
            ::std::format_args!($($arg)*)
        );
    }};
}

#[cfg(not(feature = "trace"))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        if false {
            ::std::eprintln!($($arg)*);
        }
    }};
}

#[cfg(feature = "debug")]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        ::std::eprintln!(
            "{}\x1b[1m\x1b[38:5:245mDEBUG\x1b[39m | \x1b[22m\x1b[38:5:245m{}\x1b[39m",
            $crate::timestamp::prefix(),
            ::std::format_args!($($arg)*)
        );
    }};
}

#[cfg(not(feature = "debug"))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        if false {
            ::std::eprintln!($($arg)*);
        }
    }};
}

#[cfg(feature = "debug")]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        ::std::eprintln!(
            "{}\x1b[1m\x1b[38:5:15mINFO\x1b[39m  | \x1b[22m\x1b[38:5:7m{}\x1b[39m",
            $crate::timestamp::prefix(),
            ::std::format_args!($($arg)*)
        );
    }};
}

#[cfg(not(feature = "debug"))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        if false {
            ::std::eprintln!($($arg)*);
        }
    }};
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        ::std::eprintln!(
            "{}\x1b[1m\x1b[38:5:11mWARN\x1b[39m  | \x1b[22m\x1b[38:5:228m{}\x1b[39m",
            $crate::timestamp::prefix(),
            ::std::format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        ::std::eprintln!(
            "{}\x1b[1m\x1b[38:5:9mERROR\x1b[39m | \x1b[22m\x1b[38:5:160m{}\x1b[39m",
            $crate::timestamp::prefix(),
            ::std::format_args!($($arg)*)
        );
    }};
}
