//! Utility functions.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Resolve when the process receives Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Convert a human amount to raw token units, truncating below one unit.
/// `None` for negative values or overflow.
pub fn to_raw(value: Decimal, decimals: u8) -> Option<u128> {
    if value.is_sign_negative() {
        return None;
    }
    let scale = Decimal::from_i128_with_scale(10i128.checked_pow(u32::from(decimals))?, 0);
    value.checked_mul(scale)?.trunc().to_u128()
}

/// Format raw signed units with `decimals` fractional digits, trimming
/// trailing zeros.
pub fn format_units(raw: i128, decimals: u8) -> String {
    let digits = raw.unsigned_abs().to_string();
    let decimals = usize::from(decimals);
    let sign = if raw < 0 { "-" } else { "" };
    if decimals == 0 {
        return format!("{sign}{digits}");
    }
    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (int, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{sign}{int}")
    } else {
        format!("{sign}{int}.{frac}")
    }
}
