//! Logging macros shared by the engine modules

/// Per-element diagnostic log line, emitted only when the element's logging
/// flag is set.
///
/// # Example
/// ```ignore
/// element_log!(core, "set execution state {}", next);
/// ```
macro_rules! element_log {
    ($core:expr, $($arg:tt)+) => {
        if $core.log_enabled() {
            log::debug!(
                target: "engine::element",
                "[{}] {}",
                $core.name(),
                format_args!($($arg)+)
            );
        }
    };
}

/// Log an error and continue execution (non-fatal error handling)
///
/// # Example
/// ```ignore
/// log_and_continue!(core.wake(), "wake worker");
/// ```
macro_rules! log_and_continue {
    ($expr:expr, $context:expr) => {
        if let Err(e) = $expr {
            log::error!("Failed to {}: {}", $context, e);
        }
    };
}
