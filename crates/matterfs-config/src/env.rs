use regex::Regex;
use std::env;

use crate::ConfigError;

/// Interpolate environment variables in a string.
/// Replaces `${VAR_NAME}` with the value of the environment variable.
pub fn interpolate_env(input: &str) -> Result<String, ConfigError> {
    let re = match Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return Ok(input.to_string()),
    };

    let mut result = input.to_string();
    let mut missing = Vec::new();

    let matches: Vec<(String, String)> = re
        .captures_iter(input)
        .filter_map(|cap| {
            let full = cap.get(0)?.as_str().to_string();
            let name = cap.get(1)?.as_str().to_string();
            Some((full, name))
        })
        .collect();

    for (full, name) in matches {
        match env::var(&name) {
            Ok(value) => {
                result = result.replace(&full, &value);
            }
            Err(_) => missing.push(name),
        }
    }

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnvVars(missing));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env() {
        env::set_var("MFS_TEST_VAR", "hello");
        let result = interpolate_env("prefix ${MFS_TEST_VAR} suffix").unwrap();
        assert_eq!(result, "prefix hello suffix");
    }

    #[test]
    fn test_interpolate_env_missing() {
        let result = interpolate_env("${MFS_MISSING_VAR_42}");
        match result {
            Err(ConfigError::MissingEnvVars(vars)) => {
                assert_eq!(vars, vec!["MFS_MISSING_VAR_42"]);
            }
            other => panic!("Expected MissingEnvVars, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_interpolate_env_no_vars() {
        assert_eq!(interpolate_env("plain text").unwrap(), "plain text");
    }

    #[test]
    fn test_interpolate_env_repeated_var() {
        env::set_var("MFS_REPEAT", "x");
        let result = interpolate_env("${MFS_REPEAT}/${MFS_REPEAT}").unwrap();
        assert_eq!(result, "x/x");
    }

    #[test]
    fn test_partial_syntax_not_matched() {
        assert_eq!(interpolate_env("$VAR and ${UNCLOSED").unwrap(), "$VAR and ${UNCLOSED");
    }
}
