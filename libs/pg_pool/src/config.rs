use std::{env, fmt::Debug, str::FromStr, time::Duration};

use crate::error::PoolError;

/// Reads `name` from the environment and parses it as `T`, falling back to
/// `default` (and logging why) if the variable is absent or unparsable.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(_)) => {
            tracing::warn!("invalid value for {name}, falling back to {default:?}");
            return default;
        }
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("overriding {name} to {v:?} from environment");
            v
        }
        Err(e) => {
            tracing::warn!("invalid value {var_s:?} for {name}, falling back to {default:?}: {e:?}");
            default
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub minimum_pool_size: u32,
    pub maximum_pool_size: u32,
    pub maximum_idle_connections: u32,
    pub acquire_timeout: Duration,
    pub borrow_timeout: Duration,
    pub retry_interval: Duration,
    pub validate_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let minimum_pool_size = 0;
        let maximum_pool_size = minimum_pool_size + 20;
        Self {
            minimum_pool_size,
            maximum_pool_size,
            maximum_idle_connections: (minimum_pool_size + maximum_pool_size) / 2,
            acquire_timeout: Duration::from_secs(30),
            borrow_timeout: Duration::from_secs(120),
            retry_interval: Duration::from_secs(5),
            validate_on_borrow: true,
        }
    }
}

impl PoolConfig {
    /// Builds a configuration from defaults overridden by the
    /// `PGPOOL*` environment variables, then validates it.
    pub fn from_env() -> Result<Self, PoolError> {
        let default = Self::default();
        let minimum_pool_size =
            env_config("PGPOOLMINSIZE", default.minimum_pool_size);
        let maximum_pool_size =
            env_config("PGPOOLMAXSIZE", minimum_pool_size + 20);
        let maximum_idle_connections = env_config(
            "PGPOOLIDLECONN",
            (minimum_pool_size + maximum_pool_size) / 2,
        );
        let acquire_timeout = Duration::from_millis(env_config(
            "PGPOOLACQUIRETIMEOUT",
            default.acquire_timeout.as_millis() as u64,
        ));
        let borrow_timeout = Duration::from_millis(env_config(
            "PGPOOLBORROWTIMEOUT",
            default.borrow_timeout.as_millis() as u64,
        ));
        let retry_interval = Duration::from_millis(env_config(
            "PGPOOLRETRYINTERVAL",
            default.retry_interval.as_millis() as u64,
        ));
        let validate_on_borrow =
            env_config("PGPOOLVALIDATEONBORROW", default.validate_on_borrow);

        let config = Self {
            minimum_pool_size,
            maximum_pool_size,
            maximum_idle_connections,
            acquire_timeout,
            borrow_timeout,
            retry_interval,
            validate_on_borrow,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.maximum_pool_size < 1 {
            return Err(PoolError::InvalidConfig(
                "maximumPoolSize must be >= 1".into(),
            ));
        }
        if self.minimum_pool_size > self.maximum_idle_connections {
            return Err(PoolError::InvalidConfig(
                "minimumPoolSize must be <= maximumIdleConnections".into(),
            ));
        }
        if self.maximum_idle_connections > self.maximum_pool_size {
            return Err(PoolError::InvalidConfig(
                "maximumIdleConnections must be <= maximumPoolSize".into(),
            ));
        }
        if self.acquire_timeout.is_zero()
            || self.borrow_timeout.is_zero()
            || self.retry_interval.is_zero()
        {
            return Err(PoolError::InvalidConfig(
                "all timeouts must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PoolConfig::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn rejects_min_above_idle() {
        let mut config = PoolConfig::default();
        config.minimum_pool_size = 10;
        config.maximum_idle_connections = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_max() {
        let mut config = PoolConfig::default();
        config.maximum_pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = PoolConfig::default();
        config.acquire_timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());
    }
}
