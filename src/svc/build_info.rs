use chrono::{DateTime, Utc};

pub fn build_host() -> &'static str {
    option_env!("SYSVCTL_BUILD_HOST").unwrap_or("unknown")
}

pub fn build_time_raw() -> &'static str {
    option_env!("SYSVCTL_BUILD_TIME").unwrap_or("unknown")
}

pub fn format_build_time_pretty(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(epoch) = raw.strip_prefix("epoch:") {
        if let Some(dt) = epoch
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        {
            return dt.format("%Y-%m-%d %H:%M:%S").to_string();
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S").to_string();
    }
    // Best-effort fallback.
    raw.replace('T', " ").trim_end_matches('Z').to_string()
}

/// Multi-line text shown by `sysvctl --version`.
pub fn long_version() -> String {
    format!(
        "{} (built on {} at {})",
        env!("CARGO_PKG_VERSION"),
        build_host(),
        format_build_time_pretty(build_time_raw())
    )
}
