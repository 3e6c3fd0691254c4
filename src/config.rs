//! Download engine configuration.
//!
//! One immutable [`Config`] is built at startup and shared with every
//! component. Defaults can be overridden from a TOML file with a
//! `[download]` table and then from the command line.
//!
//! ```toml
//! [download]
//! location = "/music"
//! max_concurrent = 4
//! fallback_bitrate = true
//! fallback_search = false
//! overwrite = false
//! ```

use std::{fs, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{
    arl::Arl,
    error::{Error, Result},
};

#[derive(Clone, Debug)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_lang: String,

    pub user_agent: String,

    pub arl: Option<Arl>,

    /// Directory that downloaded files are written to.
    pub download_location: PathBuf,

    /// Width of the worker pool for collections.
    pub max_concurrent: usize,

    /// Whether to fall back to lower formats of the same family.
    pub fallback_bitrate: bool,

    /// Whether to substitute unavailable tracks with a metadata search
    /// match.
    pub fallback_search: bool,

    /// Whether to download over files that already exist.
    pub overwrite: bool,

    /// Bound on the number of identity substitutions per track.
    pub max_substitutions: usize,

    /// Silent retries of transient transfer faults.
    pub max_retries: u32,
    pub retry_min: Duration,
    pub retry_max: Duration,

    /// Edge length of the embedded album artwork in pixels.
    pub artwork_size: u32,
}

/// The `[download]` table of a configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub location: Option<PathBuf>,
    pub max_concurrent: Option<usize>,
    pub fallback_bitrate: Option<bool>,
    pub fallback_search: Option<bool>,
    pub overwrite: Option<bool>,
    pub max_substitutions: Option<usize>,
    pub max_retries: Option<u32>,
    pub artwork_size: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    download: DownloadSettings,
}

impl Config {
    /// Largest file a configuration file may be.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Creates the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no valid `User-Agent` can be built out of the
    /// application name, version or the detected OS.
    pub fn new() -> Result<Self> {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            return Err(Error::invalid_argument(format!(
                "application name, version and/or language invalid (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            )));
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        if os_name.is_empty()
            || os_name.contains(illegal_chars)
            || os_version.is_empty()
            || os_version.contains(illegal_chars)
        {
            return Err(Error::invalid_argument(format!(
                "os name and/or version invalid (\"{os_name}\"; \"{os_version}\")"
            )));
        }

        let user_agent =
            format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; Desktop; {app_lang})");
        trace!("user agent: {user_agent}");

        Ok(Self {
            app_name,
            app_version,
            app_lang,
            user_agent,
            arl: None,
            download_location: PathBuf::from("."),
            max_concurrent: 4,
            fallback_bitrate: true,
            fallback_search: false,
            overwrite: false,
            max_substitutions: 4,
            max_retries: 5,
            retry_min: Duration::from_millis(500),
            retry_max: Duration::from_secs(10),
            artwork_size: 800,
        })
    }

    /// Applies the `[download]` table of a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large or is not
    /// valid TOML.
    pub fn load(&mut self, path: &str) -> Result<()> {
        // Prevent out-of-memory condition: configuration files are small.
        let size = fs::metadata(path)?.len();
        if size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!("{path} is too large")));
        }

        let contents = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;
        debug!("loaded settings from {path}: {:?}", settings.download);
        self.apply(settings.download);

        Ok(())
    }

    pub fn apply(&mut self, settings: DownloadSettings) {
        if let Some(location) = settings.location {
            self.download_location = location;
        }
        if let Some(max_concurrent) = settings.max_concurrent {
            self.max_concurrent = max_concurrent.max(1);
        }
        if let Some(fallback_bitrate) = settings.fallback_bitrate {
            self.fallback_bitrate = fallback_bitrate;
        }
        if let Some(fallback_search) = settings.fallback_search {
            self.fallback_search = fallback_search;
        }
        if let Some(overwrite) = settings.overwrite {
            self.overwrite = overwrite;
        }
        if let Some(max_substitutions) = settings.max_substitutions {
            self.max_substitutions = max_substitutions;
        }
        if let Some(max_retries) = settings.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(artwork_size) = settings.artwork_size {
            self.artwork_size = artwork_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_download_table() {
        let mut config = Config::new().unwrap();
        let settings: Settings = toml::from_str(
            r#"
            [download]
            location = "/music"
            max_concurrent = 0
            fallback_search = true
            "#,
        )
        .unwrap();
        config.apply(settings.download);

        assert_eq!(config.download_location, PathBuf::from("/music"));
        assert_eq!(config.max_concurrent, 1);
        assert!(config.fallback_search);
        assert!(config.fallback_bitrate);
    }

    #[test]
    fn user_agent_has_no_illegal_parts() {
        let config = Config::new().unwrap();
        assert!(config.user_agent.starts_with("dzdl/"));
        assert!(config.user_agent.contains("(Rust; "));
    }
}
