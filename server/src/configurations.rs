// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use config::{Config, ConfigError, File, Source};
use glkdc_backend::settings::Settings;

/// The runtime environment, selected by `APP_ENVIRONMENT` and used to pick
/// the YAML overlay layered on top of `configuration/base.yaml`.
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn from_env() -> Result<Self, String> {
        std::env::var("APP_ENVIRONMENT")
            .unwrap_or_else(|_| "local".into())
            .try_into()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local` or `production`."
            )),
        }
    }
}

/// Loads `{prefix}configuration/base.yaml` plus the environment overlay,
/// then layers `GLKDC_`-prefixed environment variables on top (e.g.
/// `GLKDC_APPLICATION_PORT=5001` sets `Settings.application.port`).
pub fn get_configuration(prefix: &str) -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir().expect("failed to determine the current directory");
    let configuration_directory = base_path.join(format!("{prefix}configuration"));

    let environment = Environment::from_env().map_err(ConfigError::Message)?;

    get_configuration_impl(
        File::from(configuration_directory.join("base")).required(true),
        File::from(configuration_directory.join(environment.as_str())).required(true),
    )
}

/// Variant of [`get_configuration`] that reads YAML from strings rather than
/// files, for tests that assemble configuration inline.
pub fn get_configuration_from_str(base: &str, environment: &str) -> Result<Settings, ConfigError> {
    get_configuration_impl(
        File::from_str(base, config::FileFormat::Yaml),
        File::from_str(environment, config::FileFormat::Yaml),
    )
}

fn get_configuration_impl(
    base: impl Source + Send + Sync + 'static,
    environment: impl Source + Send + Sync + 'static,
) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(base)
        .add_source(environment)
        .add_source(config::Environment::with_prefix("GLKDC").separator("_"));
    builder.build()?.try_deserialize()
}
