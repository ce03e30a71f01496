use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct Config {
    pub token: String,
    pub api_url: String,
}

impl Config {
    /// Creates a new Config instance with the provided parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if `token` or `api_url` is empty.
    pub fn new(token: String, api_url: String) -> Result<Self> {
        if token.is_empty() {
            return Err(Error::Config("API token cannot be empty".to_string()));
        }
        if api_url.is_empty() {
            return Err(Error::Config("API URL cannot be empty".to_string()));
        }

        Ok(Self {
            token,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_stripped() {
        let config = Config::new("t".into(), "https://drop.example/api/".into()).unwrap();
        assert_eq!(config.api_url, "https://drop.example/api");
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(Config::new(String::new(), "https://drop.example".into()).is_err());
    }
}
