/// Centralized environment-variable parsing helpers.
///
/// Every tuning-knob env-var read goes through these helpers so the
/// truthy/falsey parsing lives in exactly one place.

/// Parses a raw env value: `Some(true)` for `1`/`true`/`yes`/`on`,
/// `Some(false)` for `0`/`false`/`no`/`off` (case-insensitive, trimmed),
/// `None` for anything else.
pub(crate) fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Returns the switch value of the environment variable, or `default`
/// when it is unset or unparsable.
#[inline]
pub(crate) fn env_switch_or(var_name: &str, default: bool) -> bool {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| parse_switch(&raw))
        .unwrap_or(default)
}

/// Declares a cached boolean switch backed by a `OnceLock<bool>`.
///
/// `define_env_switch!(fn_name, "ENV_VAR", default)` reads the variable
/// once per process and falls back to `default`.
macro_rules! define_env_switch {
    ($fn_name:ident, $var:expr, $default:expr) => {
        #[inline]
        pub(crate) fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| $crate::env_config::env_switch_or($var, $default))
        }
    };
}

define_env_switch!(
    require_present_time_default,
    "SNOW_DUPL_REQUIRE_PRESENT_TIME",
    false
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_truthy_and_falsey_spellings() {
        assert_eq!(parse_switch(" ON "), Some(true));
        assert_eq!(parse_switch("Yes"), Some(true));
        assert_eq!(parse_switch("0"), Some(false));
        assert_eq!(parse_switch("off"), Some(false));
        assert_eq!(parse_switch("maybe"), None);
    }
}
