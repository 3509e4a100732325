//! Start-up configuration, read once from the environment.

use std::time::Duration;

/// Resource limits enforced by the runtime adapter for a single tier.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub memory_mib: u32,
    pub cpu_limit: f32,
    pub tmpfs_mib: u32,
    pub timeout: Duration,
}

/// Process-wide configuration, built once in `main` and handed to every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub debug: bool,
    pub inspector_port: u16,
    pub isolation: ResourceLimits,
    pub development: ResourceLimits,
}

impl Config {
    /// Reads `DEBUG` and `INSPECTOR_PORT` from the environment, falling back to the
    /// defaults named in the engine contract (128 MiB / 0.5 CPU / 64 MiB tmpfs / 30 s
    /// isolation tier, 512 MiB / 1.0 CPU / 256 MiB tmpfs / 60 s development tier).
    pub fn from_env() -> Self {
        let debug = std::env::var("DEBUG")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        let inspector_port = std::env::var("INSPECTOR_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|&p| p != 0)
            .unwrap_or(8000);

        Config {
            debug,
            inspector_port,
            isolation: ResourceLimits {
                memory_mib: 128,
                cpu_limit: 0.5,
                tmpfs_mib: 64,
                timeout: Duration::from_secs(30),
            },
            development: ResourceLimits {
                memory_mib: 512,
                cpu_limit: 1.0,
                tmpfs_mib: 256,
                timeout: Duration::from_secs(60),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_unset() {
        std::env::remove_var("DEBUG");
        std::env::remove_var("INSPECTOR_PORT");
        let config = Config::from_env();
        assert!(!config.debug);
        assert_eq!(config.inspector_port, 8000);
        assert_eq!(config.isolation.memory_mib, 128);
        assert_eq!(config.development.timeout, Duration::from_secs(60));
    }
}
