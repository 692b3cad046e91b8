use std::env;

use thiserror::Error;

pub const DTX_AGG_THD_CNT_ENV: &str = "DAOS_DTX_AGG_THD_CNT";
pub const DTX_AGG_THD_AGE_ENV: &str = "DAOS_DTX_AGG_THD_AGE";
pub const DTX_BATCHED_ULT_MAX_ENV: &str = "DAOS_DTX_BATCHED_ULT_MAX";

#[derive(Debug, Error)]
pub enum EnvParseError {
    #[error("environment variable {var}={value:?} is not an integer")]
    NotAnInteger { var: &'static str, value: String },
}

/// Reads `var` as a `u32`. Returns `Ok(None)` if unset, `Err` if set but not
/// parseable. Mirrors `d_getenv_uint32_t`'s "ignore and use default" contract
/// except parse failures are surfaced to the caller, who logs and falls back.
pub fn read_u32_env(var: &'static str) -> Result<Option<u32>, EnvParseError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| EnvParseError::NotAnInteger { var, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_var_is_none() {
        assert!(env::var("DTX_CONFIG_TEST_DOES_NOT_EXIST").is_err());
        assert_eq!(read_u32_env("DTX_CONFIG_TEST_DOES_NOT_EXIST").unwrap(), None);
    }
}
