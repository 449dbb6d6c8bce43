use crate::config::EngineConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads engine configuration by layering defaults, a TOML file and
    /// `VAULT_`-prefixed environment variables (`VAULT_RISK__MAX_DRAWDOWN_BPS=1500`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the merged
    /// configuration fails validation.
    pub fn load(path: &str) -> Result<EngineConfig> {
        Self::extract(Self::base(path))
    }

    /// Loads configuration with a profile overlay (`<stem>.<profile>.toml`
    /// next to `path`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_with_profile(path: &str, profile: &str) -> Result<EngineConfig> {
        let overlay = match path.strip_suffix(".toml") {
            Some(stem) => format!("{stem}.{profile}.toml"),
            None => format!("{path}.{profile}"),
        };
        Self::extract(Self::base(path).merge(Toml::file(overlay)))
    }

    fn base(path: &str) -> Figment {
        Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path))
    }

    fn extract(figment: Figment) -> Result<EngineConfig> {
        let config: EngineConfig = figment
            .merge(Env::prefixed("VAULT_").split("__"))
            .extract()
            .context("Failed to parse engine configuration")?;
        config
            .validate()
            .context("Engine configuration failed validation")?;
        tracing::debug!(?config, "Engine configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_load_merges_file_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "engine.toml",
                r#"
                [risk]
                max_drawdown_bps = 1500

                [compounder]
                bounty_bps = 75
                "#,
            )?;
            let config = ConfigLoader::load("engine.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.risk.max_drawdown_bps, 1_500);
            assert_eq!(config.compounder.bounty_bps, 75);
            assert_eq!(config.rebalance.drift_threshold_bps, 500);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("engine.toml", "[hedge]\nhedge_ratio_bps = 4000\n")?;
            jail.set_env("VAULT_HEDGE__HEDGE_RATIO_BPS", "6000");
            let config = ConfigLoader::load("engine.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.hedge.hedge_ratio_bps, 6_000);
            Ok(())
        });
    }

    #[test]
    fn test_profile_overlay() {
        Jail::expect_with(|jail| {
            jail.create_file("engine.toml", "[risk]\nmax_slippage_bps = 100\n")?;
            jail.create_file("engine.stress.toml", "[risk]\nmax_slippage_bps = 30\n")?;
            let config = ConfigLoader::load_with_profile("engine.toml", "stress")
                .map_err(|e| e.to_string())?;
            assert_eq!(config.risk.max_slippage_bps, 30);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("engine.toml", "[risk]\nmax_drawdown_bps = 20000\n")?;
            assert!(ConfigLoader::load("engine.toml").is_err());
            Ok(())
        });
    }
}
