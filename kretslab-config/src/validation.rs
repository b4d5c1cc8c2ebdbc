//! Custom validation functions shared by the configuration sections.

use regex::Regex;
use validator::ValidationError;

fn matches(pattern: &str, value: &str, code: &'static str) -> Result<(), ValidationError> {
    let re = Regex::new(pattern).map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new(code))
    }
}

/// Fan-in policy for `input` ports.
pub fn validate_fan_in(policy: &str) -> Result<(), ValidationError> {
    matches("^(reject|allow)$", policy, "invalid_fan_in_policy")
}

/// A level name or an `EnvFilter` directive list such as `info,kretslab_script=debug`.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    matches(
        r"^([a-z_][a-z0-9_:]*=)?(trace|debug|info|warn|error|off)(,([a-z_][a-z0-9_:]*=)?(trace|debug|info|warn|error|off))*$",
        level,
        "invalid_log_level",
    )
}

/// Catalog files are YAML.
pub fn validate_catalog_path(path: &str) -> Result<(), ValidationError> {
    matches(r"(?i)\.ya?ml$", path, "catalog_must_be_yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_in_values() {
        assert!(validate_fan_in("reject").is_ok());
        assert!(validate_fan_in("allow").is_ok());
        assert!(validate_fan_in("Allow").is_err());
        assert!(validate_fan_in("sometimes").is_err());
    }

    #[test]
    fn log_directives() {
        assert!(validate_log_level("info").is_ok());
        assert!(validate_log_level("warn,kretslab_script=trace").is_ok());
        assert!(validate_log_level("loud").is_err());
    }

    #[test]
    fn catalog_extension() {
        assert!(validate_catalog_path("devices.yaml").is_ok());
        assert!(validate_catalog_path("lab/DEVICES.YML").is_ok());
        assert!(validate_catalog_path("devices.json").is_err());
    }
}
