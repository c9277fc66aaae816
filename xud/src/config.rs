use crate::swap_client::SwapClientType;
use anyhow::{anyhow, bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

const ENV_PREFIX: &str = "XUD";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: Logging,
    pub swaps: SwapSettings,
    pub connext: Option<ConnextSettings>,
    pub lnd: Vec<LndSettings>,
    pub currencies: Vec<CurrencySettings>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// A `tracing` filter directive, e.g. `info` or `xud=debug,warn`.
    pub level: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SwapSettings {
    pub reconnect_interval_secs: u64,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            reconnect_interval_secs: 5,
        }
    }
}

impl SwapSettings {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnextSettings {
    pub url: Url,
    pub seed: Option<String>,
    /// Timelock, in blocks, for the final hop.
    pub final_lock: u64,
    pub request_timeout_secs: u64,
}

impl Default for ConnextSettings {
    fn default() -> Self {
        Self {
            url: Url::parse("http://127.0.0.1:5040").expect("static url"),
            seed: None,
            final_lock: 200,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LndSettings {
    pub currency: String,
    pub url: Url,
    pub macaroon_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub no_macaroons: bool,
    /// CLTV delta, in blocks, for the final hop.
    pub final_lock: u64,
    pub request_timeout_secs: u64,
}

impl Default for LndSettings {
    fn default() -> Self {
        Self {
            currency: "BTC".to_owned(),
            url: Url::parse("https://127.0.0.1:8080").expect("static url"),
            macaroon_path: None,
            cert_path: None,
            no_macaroons: false,
            final_lock: 40,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CurrencySettings {
    pub id: String,
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u32,
    pub token_address: Option<String>,
    pub swap_client: SwapClientType,
}

fn default_decimal_places() -> u32 {
    8
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "xud").map(|dirs| dirs.config_dir().join("xud.toml"))
}

impl Settings {
    /// Reads the TOML file at `path` (or the default location, if present)
    /// and overlays `XUD__SECTION__KEY` environment variables.
    pub fn read(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                if let Some(path) = default_config_path() {
                    builder = builder.add_source(
                        File::from(path.as_path())
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        validate_nonzero("swaps.reconnect_interval_secs", self.swaps.reconnect_interval_secs)?;

        if let Some(connext) = &self.connext {
            validate_http_url("connext.url", &connext.url)?;
            validate_nonzero("connext.final_lock", connext.final_lock)?;
            validate_nonzero("connext.request_timeout_secs", connext.request_timeout_secs)?;
        }

        for lnd in &self.lnd {
            validate_http_url(&format!("lnd.{}.url", lnd.currency), &lnd.url)?;
            validate_nonzero(&format!("lnd.{}.final_lock", lnd.currency), lnd.final_lock)?;
            if !self.currencies.iter().any(|c| c.id == lnd.currency) {
                bail!("lnd is configured for {} but no such currency is listed", lnd.currency);
            }
        }

        for currency in &self.currencies {
            if currency.decimal_places > 30 {
                bail!("currency {} has too many decimal places", currency.id);
            }

            match currency.swap_client {
                SwapClientType::Connext if currency.token_address.is_none() => {
                    bail!("connext currency {} requires a token_address", currency.id)
                }
                SwapClientType::Connext if self.connext.is_none() => {
                    bail!("currency {} uses connext but connext is not configured", currency.id)
                }
                SwapClientType::Lnd if !self.lnd.iter().any(|lnd| lnd.currency == currency.id) => {
                    bail!("currency {} uses lnd but no lnd section exists for it", currency.id)
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn validate_http_url(label: &str, url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!("{} must use http or https, got {}", label, other)),
    }
}

fn validate_nonzero(label: &str, value: u64) -> Result<()> {
    if value == 0 {
        Err(anyhow!("{} must be greater than zero", label))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;
    use std::io::Write;

    const CONFIG: &str = r#"
[logging]
level = "debug"

[connext]
url = "http://localhost:5040"
seed = "abandon abandon abandon"

[[lnd]]
currency = "BTC"
url = "https://localhost:8080"
no_macaroons = true

[[currencies]]
id = "BTC"
swap_client = "lnd"

[[currencies]]
id = "ETH"
decimal_places = 18
token_address = "0x0000000000000000000000000000000000000000"
swap_client = "connext"
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_a_complete_configuration() {
        let file = write_config(CONFIG);

        let settings = Settings::read(Some(file.path())).unwrap();

        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.swaps.reconnect_interval_secs, 5);
        assert_eq!(settings.currencies.len(), 2);
        assert_eq!(settings.currencies[0].decimal_places, 8);
        assert_eq!(settings.currencies[1].swap_client, SwapClientType::Connext);
        assert_eq!(settings.lnd[0].final_lock, 40);
        assert_that(&settings.lnd[0].no_macaroons).is_true();
        assert_eq!(settings.connext.unwrap().final_lock, 200);
    }

    #[test]
    fn connext_currency_without_token_address_is_rejected() {
        let file = write_config(&CONFIG.replace(
            "token_address = \"0x0000000000000000000000000000000000000000\"\n",
            "",
        ));

        assert_that(&Settings::read(Some(file.path()))).is_err();
    }

    #[test]
    fn non_http_urls_are_rejected() {
        let mut settings = Settings::default();
        settings.connext = Some(ConnextSettings {
            url: Url::parse("ws://localhost:5040").unwrap(),
            ..ConnextSettings::default()
        });

        let error = settings.validate().unwrap_err();

        assert_eq!(error.to_string(), "connext.url must use http or https, got ws");
    }

    #[test]
    fn zero_reconnect_interval_is_rejected() {
        let mut settings = Settings::default();
        settings.swaps.reconnect_interval_secs = 0;

        assert_that(&settings.validate()).is_err();
    }
}
