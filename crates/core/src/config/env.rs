//! `${VAR}` substitution over parsed YAML values.
//!
//! Runs once at load, before deserialization into typed config, so
//! secrets never appear unresolved in plugin config objects that
//! loggers might see. Substitution is idempotent: resolved values
//! contain no further references.

use serde_yaml::Value;

use crate::error::CoreError;

/// Resolve `${VAR}` references in every string scalar of `value`.
///
/// Unresolved names and unclosed references are load-time errors.
pub fn substitute_env(value: &mut Value) -> Result<(), CoreError> {
    match value {
        Value::String(s) => {
            *s = resolve_refs(s)?;
            Ok(())
        }
        Value::Sequence(items) => {
            for item in items {
                substitute_env(item)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_env(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Resolve `${VAR_NAME}` patterns in a single string.
fn resolve_refs(input: &str) -> Result<String, CoreError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(CoreError::UnresolvedEnv(format!(
                    "unclosed reference in: {input}"
                )));
            }
            let value = std::env::var(&var_name)
                .map_err(|_| CoreError::UnresolvedEnv(var_name.clone()))?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_in_nested_structures() {
        std::env::set_var("RELAY_TEST_TOKEN", "tok-123");
        let mut value: Value = serde_yaml::from_str(
            r#"
actors:
  - id: a1
    config:
      headers:
        Authorization: "Bearer ${RELAY_TEST_TOKEN}"
"#,
        )
        .unwrap();

        substitute_env(&mut value).unwrap();
        let rendered = serde_yaml::to_string(&value).unwrap();
        assert!(rendered.contains("Bearer tok-123"));
        std::env::remove_var("RELAY_TEST_TOKEN");
    }

    #[test]
    fn missing_var_is_load_error() {
        let mut value: Value = serde_yaml::from_str("url: ${RELAY_DEFINITELY_NOT_SET}").unwrap();
        let err = substitute_env(&mut value).unwrap_err();
        assert!(err.to_string().contains("RELAY_DEFINITELY_NOT_SET"));
    }

    #[test]
    fn unclosed_reference_is_load_error() {
        let mut value: Value = serde_yaml::from_str("url: broken-${OOPS").unwrap();
        assert!(substitute_env(&mut value).is_err());
    }

    #[test]
    fn idempotent_on_resolved_values() {
        std::env::set_var("RELAY_TEST_HOST", "example.com");
        let mut value: Value = serde_yaml::from_str("host: https://${RELAY_TEST_HOST}/x").unwrap();
        substitute_env(&mut value).unwrap();
        let once = serde_yaml::to_string(&value).unwrap();
        substitute_env(&mut value).unwrap();
        let twice = serde_yaml::to_string(&value).unwrap();
        assert_eq!(once, twice);
        std::env::remove_var("RELAY_TEST_HOST");
    }

    #[test]
    fn plain_strings_untouched() {
        let mut value: Value = serde_yaml::from_str("name: just-a-name").unwrap();
        substitute_env(&mut value).unwrap();
        assert_eq!(value["name"], Value::String("just-a-name".into()));
    }
}
