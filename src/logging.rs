//! Tracing subscriber setup
//!
//! Diagnostics go to stderr so the console summary on stdout stays readable.
//! `RUST_LOG` overrides the default filter; `N8N_DOCTOR_LOG_JSON=1` switches
//! to one JSON object per event.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const JSON_ENV_VAR: &str = "N8N_DOCTOR_LOG_JSON";

/// Install the global subscriber. Later calls are ignored.
pub fn setup_logging(json: bool, default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

pub fn should_use_json() -> bool {
    json_flag(std::env::var(JSON_ENV_VAR).ok().as_deref())
}

fn json_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_flag_values() {
        assert!(json_flag(Some("1")));
        assert!(json_flag(Some("TRUE")));
        assert!(!json_flag(Some("0")));
        assert!(!json_flag(None));
    }
}
