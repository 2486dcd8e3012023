use crate::domain::Decimal;
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_addr: IpAddr,
    pub bisection_tolerance: Decimal,
    pub bisection_max_iterations: u32,
    pub max_conversion_iterations: usize,
    pub max_curve_points: usize,
    pub history_cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_addr: IpAddr::from([127, 0, 0, 1]),
            bisection_tolerance: Decimal::one(),
            bisection_max_iterations: 60,
            max_conversion_iterations: 64,
            max_curve_points: 10_000,
            history_cache_capacity: 256,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let port = parse_or(&env_map, "PORT", defaults.port, "must be a valid u16")?;
        let bind_addr = parse_or(
            &env_map,
            "BIND_ADDR",
            defaults.bind_addr,
            "must be an IP address",
        )?;

        let bisection_tolerance = parse_or(
            &env_map,
            "BISECTION_TOLERANCE",
            defaults.bisection_tolerance,
            "must be a decimal dollar amount",
        )?;
        if bisection_tolerance < Decimal::cent() {
            return Err(ConfigError::InvalidValue(
                "BISECTION_TOLERANCE".to_string(),
                format!("must be at least 0.01, got {}", bisection_tolerance),
            ));
        }

        let bisection_max_iterations = parse_or(
            &env_map,
            "BISECTION_MAX_ITERATIONS",
            defaults.bisection_max_iterations,
            "must be a valid u32",
        )?;
        let max_conversion_iterations = parse_or(
            &env_map,
            "MAX_CONVERSION_ITERATIONS",
            defaults.max_conversion_iterations,
            "must be a valid usize",
        )?;
        let max_curve_points = parse_or(
            &env_map,
            "MAX_CURVE_POINTS",
            defaults.max_curve_points,
            "must be a valid usize",
        )?;
        let history_cache_capacity = parse_or(
            &env_map,
            "HISTORY_CACHE_CAPACITY",
            defaults.history_cache_capacity,
            "must be a valid usize",
        )?;

        for (key, value) in [
            ("BISECTION_MAX_ITERATIONS", bisection_max_iterations as usize),
            ("MAX_CONVERSION_ITERATIONS", max_conversion_iterations),
            ("MAX_CURVE_POINTS", max_curve_points),
            ("HISTORY_CACHE_CAPACITY", history_cache_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    "must be greater than zero".to_string(),
                ));
            }
        }

        Ok(Config {
            port,
            bind_addr,
            bisection_tolerance,
            bisection_max_iterations,
            max_conversion_iterations,
            max_curve_points,
            history_cache_capacity,
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expectation: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expectation.to_string())),
    }
}
