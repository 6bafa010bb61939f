//! Crate-wide helper macros.
//!

/// Recover a poisoned lock, warning about it.
macro_rules! ignore_poison {
    ($what:expr) => {
        |poison| {
            logger::warn!(
                "Poisoned lock ignored for {what}, \
                but its state may be inconsistent.",
                what = $what
            );
            poison.into_inner()
        }
    };
}
