//! Span builder helpers for safelink instrumentation.

/// Create a tracing span for a top-level routing decision request.
///
/// Usage: `let span = route_decision_span!(correlation_id, rule_type);`
///
/// Fields recorded later by the handler:
/// - `decision`: "target" or "normal" once the evaluation completes
/// - `target_url`: the selected destination, if any
/// - `duration_ms`: milliseconds from request receipt to response
#[macro_export]
macro_rules! route_decision_span {
    ($correlation_id:expr, $rule_type:expr) => {
        tracing::info_span!(
            "route_decision",
            correlation_id = %$correlation_id,
            rule_type = %$rule_type,
            decision = tracing::field::Empty,
            target_url = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for signed-link generation.
#[macro_export]
macro_rules! link_sign_span {
    ($correlation_id:expr, $target_url:expr) => {
        tracing::info_span!(
            "link_sign",
            correlation_id = %$correlation_id,
            target_url = %$target_url,
        )
    };
}
