use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration, set the {env_var} environment variable")]
    MissingEnvVar { env_var: String },

    #[error(transparent)]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a dotted configuration key,
/// e.g. `provider.api_key` -> `NSCHAT_PROVIDER__API_KEY`
pub fn to_env_var(field_path: &str) -> String {
    format!(
        "NSCHAT_{}",
        field_path.replace('.', "__").to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("provider.api_key"), "NSCHAT_PROVIDER__API_KEY");
        assert_eq!(to_env_var("model"), "NSCHAT_MODEL");
    }

    #[test]
    fn test_missing_env_var_message() {
        let err = ConfigError::MissingEnvVar {
            env_var: to_env_var("provider.api_key"),
        };
        assert_eq!(
            err.to_string(),
            "Missing required configuration, set the NSCHAT_PROVIDER__API_KEY environment variable"
        );
    }
}
