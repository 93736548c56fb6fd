//! Environment-variable parsing shared by every tuning knob.
//!
//! Reads go through these helpers so truthy/falsey parsing is defined in
//! one place.

/// Upper bound on dispatcher worker threads.
pub(crate) const MAX_WORKERS_VAR: &str = "SNOW_DIFF_MAX_WORKERS";
/// Run every dispatch inline on the calling thread.
pub(crate) const FORCE_SERIAL_VAR: &str = "SNOW_DIFF_FORCE_SERIAL";

/// `true` when the value is `1`, `true`, `yes`, or `on` (case-insensitive,
/// trimmed).
#[inline]
pub(crate) fn parse_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| parse_truthy(&raw))
        .unwrap_or(false)
}

/// Parses a strictly positive integer, `None` otherwise.
#[inline]
pub(crate) fn parse_positive_usize(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|value| *value > 0)
}

#[inline]
pub(crate) fn env_var_positive_usize(var_name: &str) -> Option<usize> {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| parse_positive_usize(&raw))
}

/// Declares a cached boolean flag backed by a `OnceLock<bool>`.
///
/// `enabled_when(fn_name, "ENV_VAR")` returns `true` only when the variable
/// is truthy. The first read wins for the life of the process.
macro_rules! define_env_flag {
    (enabled_when($fn_name:ident, $var:expr)) => {
        #[inline]
        fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| $crate::env_config::env_var_truthy($var))
        }
    };
}

pub(crate) use define_env_flag;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for raw in ["1", "true", " YES ", "On"] {
            assert!(parse_truthy(raw), "{raw:?} should be truthy");
        }
        for raw in ["0", "false", "", "enabled"] {
            assert!(!parse_truthy(raw), "{raw:?} should be falsey");
        }
    }

    #[test]
    fn positive_integers_only() {
        assert_eq!(parse_positive_usize(" 4 "), Some(4));
        assert_eq!(parse_positive_usize("0"), None);
        assert_eq!(parse_positive_usize("-2"), None);
        assert_eq!(parse_positive_usize("many"), None);
    }
}
