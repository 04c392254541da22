use crate::exchange::{ExchangeOutcome, ExchangeReport};
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (TRACE, DEBUG, INFO, ERROR)
///
/// Logs go to stderr so they do not interleave with chat output.
pub fn init_tracing(log_level: &str) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.trim().to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

fn outcome_label(outcome: ExchangeOutcome) -> &'static str {
    match outcome {
        ExchangeOutcome::Completed => "completed",
        ExchangeOutcome::Cancelled => "cancelled",
        ExchangeOutcome::Failed(_) => "failed",
    }
}

/// One log line per finished exchange.
pub fn log_exchange_complete(report: &ExchangeReport) {
    let elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX);
    let outcome = outcome_label(report.outcome);
    match report.outcome {
        ExchangeOutcome::Completed => tracing::info!(
            exchange_id = report.id,
            target = %report.target,
            outcome,
            elapsed_ms,
            streamed = report.streamed,
            dropped_chunks = report.dropped_chunks,
            used_resource_units = report.used_resource_units.unwrap_or_default(),
            final_len = report.final_text.as_ref().map_or(0, String::len),
            "exchange complete"
        ),
        ExchangeOutcome::Cancelled | ExchangeOutcome::Failed(_) => tracing::warn!(
            exchange_id = report.id,
            target = %report.target,
            outcome,
            elapsed_ms,
            dropped_chunks = report.dropped_chunks,
            category = ?report.outcome,
            "exchange ended without an answer"
        ),
    }
    if report.dropped_chunks > 0 {
        tracing::warn!(
            exchange_id = report.id,
            dropped_chunks = report.dropped_chunks,
            "malformed chunks were dropped during this exchange"
        );
    }
}
