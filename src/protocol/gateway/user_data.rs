//! User data and licence from Deezer's gateway API.
//!
//! The downloader needs two things from the user data: the API token that
//! authorizes every further gateway call, and the licence options that
//! tell which formats the account may stream and from where.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "USER": {
//!         "USER_ID": "123456789",
//!         "BLOG_NAME": "Username",
//!         "OPTIONS": {
//!             "web_hq": true,
//!             "mobile_hq": true,
//!             "web_lossless": false,
//!             "mobile_lossless": false,
//!             "license_country": "NL"
//!         }
//!     },
//!     "checkForm": "api_token"
//! }
//! ```
//!
//! Without a valid `arl`, `USER_ID` is `0`.

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use veil::Redact;

use crate::resolver::License;

use super::Method;

impl Method for UserData {
    const METHOD: &'static str = "deezer.getUserData";
}

#[derive(Clone, Eq, PartialEq, Deserialize, Redact, Hash)]
pub struct UserData {
    #[serde(rename = "USER")]
    pub user: User,

    /// API authentication token for all further gateway calls.
    #[serde(rename = "checkForm")]
    #[redact]
    pub api_token: String,
}

#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Debug, Hash)]
pub struct User {
    #[serde(rename = "USER_ID")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: u64,

    #[serde(default)]
    #[serde(rename = "BLOG_NAME")]
    pub name: String,

    #[serde(default)]
    #[serde(rename = "OPTIONS")]
    pub options: Options,
}

/// Streaming rights of the account.
#[derive(Clone, Default, Eq, PartialEq, Deserialize, Debug, Hash)]
pub struct Options {
    #[serde(default)]
    pub web_hq: bool,
    #[serde(default)]
    pub mobile_hq: bool,
    #[serde(default)]
    pub web_lossless: bool,
    #[serde(default)]
    pub mobile_lossless: bool,
    #[serde(default)]
    pub license_country: Option<String>,
}

impl UserData {
    /// Whether the `arl` identified a user.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.user.id != 0
    }
}

impl From<&Options> for License {
    fn from(options: &Options) -> Self {
        Self {
            hq: options.web_hq || options.mobile_hq,
            lossless: options.web_lossless || options.mobile_lossless,
            country: options
                .license_country
                .clone()
                .filter(|country| !country.is_empty()),
        }
    }
}
