//! ---
//! dcu_section: "03-logging"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Structured logging adapters and sinks."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
/// Emit an informational log enriched with service context.
#[macro_export]
macro_rules! dcu_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            service = ctx.service.unwrap_or(""),
            container = ctx.container.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::dcu_info!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a debug log enriched with service context.
#[macro_export]
macro_rules! dcu_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            service = ctx.service.unwrap_or(""),
            container = ctx.container.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::dcu_debug!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a warning log enriched with service context.
#[macro_export]
macro_rules! dcu_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            service = ctx.service.unwrap_or(""),
            container = ctx.container.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::dcu_warn!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an error log enriched with service context.
#[macro_export]
macro_rules! dcu_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            service = ctx.service.unwrap_or(""),
            container = ctx.container.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::dcu_error!(context = $crate::LogContext::default(), $($arg)+)
    }};
}
