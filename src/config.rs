//! Runtime configuration and the static per-platform table.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use crate::{cookie::Cookie, error::Error};

/// Music platforms known to the tool.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Platform {
    #[default]
    Netease,
    Tencent,
    Kugou,
    Baidu,
    Kuwo,
}

/// Static login configuration of a platform.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CookiePlatformConfig {
    /// Page the operator logs in on.
    pub login_url: &'static str,
    /// Only cookies whose domain ends with this suffix are captured.
    pub domain_suffix: &'static str,
    /// Names that must all be present before a login counts as complete.
    pub required_cookie_names: &'static [&'static str],
    /// Shown to the operator when the login page opens.
    pub instructions: &'static str,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Netease,
        Platform::Tencent,
        Platform::Kugou,
        Platform::Baidu,
        Platform::Kuwo,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Netease => "netease",
            Platform::Tencent => "tencent",
            Platform::Kugou => "kugou",
            Platform::Baidu => "baidu",
            Platform::Kuwo => "kuwo",
        }
    }

    #[must_use]
    pub fn cookie_config(self) -> CookiePlatformConfig {
        match self {
            Platform::Netease => CookiePlatformConfig {
                login_url: "https://music.163.com/",
                domain_suffix: ".163.com",
                required_cookie_names: &["MUSIC_U"],
                instructions: "log in to NetEase Cloud Music",
            },
            Platform::Tencent => CookiePlatformConfig {
                login_url: "https://y.qq.com/",
                domain_suffix: ".qq.com",
                required_cookie_names: &["uin"],
                instructions: "log in to QQ Music",
            },
            Platform::Kugou => CookiePlatformConfig {
                login_url: "https://www.kugou.com/",
                domain_suffix: ".kugou.com",
                required_cookie_names: &[],
                instructions: "log in to Kugou Music",
            },
            Platform::Baidu => CookiePlatformConfig {
                login_url: "https://music.baidu.com/",
                domain_suffix: ".baidu.com",
                required_cookie_names: &["BDUSS"],
                instructions: "log in to Baidu Music",
            },
            Platform::Kuwo => CookiePlatformConfig {
                login_url: "https://www.kuwo.cn/",
                domain_suffix: ".kuwo.cn",
                required_cookie_names: &[],
                instructions: "log in to Kuwo Music",
            },
        }
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|platform| platform.as_str() == lower)
            .ok_or_else(|| {
                let available: Vec<_> = Self::ALL.iter().map(|p| p.as_str()).collect();
                Error::invalid_argument(format!(
                    "unsupported platform \"{s}\", available: {}",
                    available.join(", ")
                ))
            })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings shared by every download run.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_lang: String,

    pub user_agent: String,

    pub platform: Platform,
    pub cookie: Option<Cookie>,

    /// Requested bitrate in kbps.
    pub quality: u32,

    /// Fixed pause after every catalog request and between downloads.
    pub delay: Duration,

    /// Number of results requested per search page.
    pub page_size: usize,

    pub output_dir: PathBuf,
    pub overwrite: bool,
}

impl Config {
    pub const DEFAULT_QUALITY: u32 = 320;
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);
    pub const DEFAULT_PAGE_SIZE: usize = 30;
    pub const DEFAULT_OUTPUT_DIR: &'static str = "downloads";

    /// Creates a configuration for `platform` with default settings.
    ///
    /// # Panics
    ///
    /// Panics when the package name or version would produce an invalid
    /// `User-Agent` string. This is a build-time invariant.
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "zh".to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
        {
            panic!("application name and/or version invalid (\"{app_name}\"; \"{app_version}\")");
        }

        let os_name = std::env::consts::OS;
        let os_version = sysinfo::System::os_version()
            .filter(|version| !version.contains(illegal_chars))
            .unwrap_or_else(|| String::from("0"));

        let user_agent =
            format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; {app_lang})");
        trace!("user agent: {user_agent}");

        Self {
            app_name,
            app_version,
            app_lang,

            user_agent,

            platform,
            cookie: None,

            quality: Self::DEFAULT_QUALITY,
            delay: Self::DEFAULT_DELAY,
            page_size: Self::DEFAULT_PAGE_SIZE,

            output_dir: PathBuf::from(Self::DEFAULT_OUTPUT_DIR),
            overwrite: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parses_case_insensitively() {
        assert_eq!("NetEase".parse::<Platform>().unwrap(), Platform::Netease);
        assert_eq!(" kuwo ".parse::<Platform>().unwrap(), Platform::Kuwo);
        assert!("spotify".parse::<Platform>().is_err());
    }

    #[test]
    fn cookie_table_matches_platforms() {
        let netease = Platform::Netease.cookie_config();
        assert_eq!(netease.domain_suffix, ".163.com");
        assert_eq!(netease.required_cookie_names, &["MUSIC_U"]);

        assert!(Platform::Kugou.cookie_config().required_cookie_names.is_empty());
        for platform in Platform::ALL {
            assert!(platform.cookie_config().login_url.starts_with("https://"));
        }
    }

    #[test]
    fn user_agent_names_the_package() {
        let config = Config::new(Platform::Netease);
        assert!(config.user_agent.starts_with("meting-dl/"));
        assert_eq!(config.page_size, 30);
        assert!(!config.overwrite);
    }
}
