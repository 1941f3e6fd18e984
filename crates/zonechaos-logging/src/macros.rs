//! ---
//! zc_section: "03-logging"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Structured logging adapters for the experiment trail."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---

/// Shared expansion for the level-specific macros below.
#[doc(hidden)]
#[macro_export]
macro_rules! __zc_event {
    ($level:expr, context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            experiment = ctx.experiment.unwrap_or(""),
            fault = ctx.fault.unwrap_or(""),
            experiment_target = ctx.target.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($level:expr, $($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            $level,
            experiment = ctx.experiment.unwrap_or(""),
            fault = ctx.fault.unwrap_or(""),
            experiment_target = ctx.target.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with experiment context.
#[macro_export]
macro_rules! zc_info {
    ($($arg:tt)+) => { $crate::__zc_event!(tracing::Level::INFO, $($arg)+) };
}

/// Emit a debug log enriched with experiment context.
#[macro_export]
macro_rules! zc_debug {
    ($($arg:tt)+) => { $crate::__zc_event!(tracing::Level::DEBUG, $($arg)+) };
}

/// Emit a warning enriched with experiment context.
#[macro_export]
macro_rules! zc_warn {
    ($($arg:tt)+) => { $crate::__zc_event!(tracing::Level::WARN, $($arg)+) };
}

/// Emit an error log enriched with experiment context.
#[macro_export]
macro_rules! zc_error {
    ($($arg:tt)+) => { $crate::__zc_event!(tracing::Level::ERROR, $($arg)+) };
}
