//! Thin logging helpers for code paths that build their message up front.
//!
//! They forward to `tracing` under the `procshield` target so one filter
//! directive controls both these and the macro call sites.

pub fn debug(message: impl AsRef<str>) {
    tracing::debug!(target: "procshield", "{}", message.as_ref());
}

pub fn info(message: impl AsRef<str>) {
    tracing::info!(target: "procshield", "{}", message.as_ref());
}

pub fn warn(message: impl AsRef<str>) {
    tracing::warn!(target: "procshield", "{}", message.as_ref());
}
