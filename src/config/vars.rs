//! Environment variable interpolation for config files.
//!
//! Function runtimes hand their settings over as environment variables, so a
//! single config file can be shared by every stage and filled in per function.
//!
//! Supported syntax:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset (empty is OK)
//! - `$$` - escape sequence for literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # literal $
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # 1: braced name
            (?: (:?-) ([^}]*) )?       # 2: operator, 3: default
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # 4: bare name
        ",
    )
    .expect("env var pattern is a valid regex")
});

/// How a `${VAR...}` reference falls back when the variable is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback<'a> {
    /// No default: a missing variable is an error.
    None,
    /// `${VAR-default}`: used only when unset.
    Unset(&'a str),
    /// `${VAR:-default}`: used when unset or empty.
    UnsetOrEmpty(&'a str),
}

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every problem found, so all missing variables are reported at once.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if there were no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            let reference = &caps[0];
            if reference == "$$" {
                return "$".to_string();
            }

            let name = caps
                .get(1)
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            let fallback = match (caps.get(2).map(|m| m.as_str()), caps.get(3)) {
                (Some(":-"), Some(default)) => Fallback::UnsetOrEmpty(default.as_str()),
                (Some(_), Some(default)) => Fallback::Unset(default.as_str()),
                _ => Fallback::None,
            };

            match resolve(name, fallback) {
                Ok(value) => value,
                Err(message) => {
                    errors.push(message);
                    reference.to_string()
                }
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}

fn resolve(name: &str, fallback: Fallback<'_>) -> Result<String, String> {
    match env::var(name) {
        Ok(value) if value.contains('\n') || value.contains('\r') => Err(format!(
            "environment variable '{name}' contains newlines, which is not allowed"
        )),
        Ok(value) if value.is_empty() => match fallback {
            Fallback::UnsetOrEmpty(default) => Ok(default.to_string()),
            _ => Ok(value),
        },
        Ok(value) => Ok(value),
        Err(_) => match fallback {
            Fallback::Unset(default) | Fallback::UnsetOrEmpty(default) => Ok(default.to_string()),
            Fallback::None => Err(format!("environment variable '{name}' is not set")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        // SAFETY: each test uses its own variable names and restores them afterwards
        for (key, value) in vars {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        let result = f();

        // SAFETY: restoring original environment state
        for (key, original) in originals {
            match original {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        result
    }

    #[test]
    fn test_bare_and_braced_substitution() {
        with_env_vars(&[("SLEET_TEST_BUCKET", Some("dw-bucket"))], || {
            let result = interpolate("a: $SLEET_TEST_BUCKET, b: ${SLEET_TEST_BUCKET}");
            assert!(result.is_ok());
            assert_eq!(result.text, "a: dw-bucket, b: dw-bucket");
        });
    }

    #[test]
    fn test_all_missing_variables_reported() {
        with_env_vars(
            &[("SLEET_TEST_MISS1", None), ("SLEET_TEST_MISS2", None)],
            || {
                let result = interpolate("a: $SLEET_TEST_MISS1, b: ${SLEET_TEST_MISS2}");
                assert!(!result.is_ok());
                assert_eq!(result.errors.len(), 2);
                assert!(result.errors[0].contains("SLEET_TEST_MISS1"));
                assert!(result.errors[1].contains("not set"));
                // Unresolved references are left in place.
                assert!(result.text.contains("$SLEET_TEST_MISS1"));
            },
        );
    }

    #[test]
    fn test_colon_default_covers_empty() {
        with_env_vars(&[("SLEET_TEST_EMPTY", Some(""))], || {
            let result = interpolate("${SLEET_TEST_EMPTY:-us-east-1}|${SLEET_TEST_EMPTY-x}");
            assert!(result.is_ok());
            assert_eq!(result.text, "us-east-1|");
        });
    }

    #[test]
    fn test_default_used_when_unset() {
        with_env_vars(&[("SLEET_TEST_UNSET", None)], || {
            let result = interpolate("${SLEET_TEST_UNSET-dev}/${SLEET_TEST_UNSET:-dev}");
            assert!(result.is_ok());
            assert_eq!(result.text, "dev/dev");
        });
    }

    #[test]
    fn test_set_value_wins_over_default() {
        with_env_vars(&[("SLEET_TEST_SET", Some("prod"))], || {
            let result = interpolate("${SLEET_TEST_SET:-dev}");
            assert_eq!(result.text, "prod");
        });
    }

    #[test]
    fn test_escape_sequence() {
        let result = interpolate("admin_password: Pa$$word");
        assert!(result.is_ok());
        assert_eq!(result.text, "admin_password: Pa$word");
    }

    #[test]
    fn test_newlines_rejected() {
        with_env_vars(
            &[
                ("SLEET_TEST_NL", Some("a\nb")),
                ("SLEET_TEST_CR", Some("a\rb")),
            ],
            || {
                let result = interpolate("$SLEET_TEST_NL $SLEET_TEST_CR");
                assert_eq!(result.errors.len(), 2);
                assert!(result.errors.iter().all(|e| e.contains("newlines")));
            },
        );
    }

    #[test]
    fn test_pipeline_config_example() {
        with_env_vars(
            &[
                ("SLEET_TEST_BUCKET_NAME", Some("dp-datawarehouse-solution-1")),
                ("SLEET_TEST_REDSHIFT_PASSWORD", Some("s3cret!")),
                ("SLEET_TEST_REGION", None),
            ],
            || {
                let yaml = r#"
bucket: ${SLEET_TEST_BUCKET_NAME}
aws:
  region: ${SLEET_TEST_REGION:-us-east-1}
warehouse:
  admin_password: ${SLEET_TEST_REDSHIFT_PASSWORD}
"#;
                let result = interpolate(yaml);
                assert!(result.is_ok());
                assert!(result.text.contains("bucket: dp-datawarehouse-solution-1"));
                assert!(result.text.contains("region: us-east-1"));
                assert!(result.text.contains("admin_password: s3cret!"));
            },
        );
    }
}
