use std::sync::Arc;

use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

use crate::{
    api::CreateParams,
    probe::{ProbeError, UrlProber, url_prober_capsule},
};

pub const MAX_URL_LEN: usize = 1024;
pub const MAX_TITLE_LEN: usize = 255;

/// Returns `value` when it is one of `allowed`, otherwise `default`.
pub fn whitelist_or_default<T: PartialEq + Copy>(value: T, allowed: &[T], default: T) -> T {
    if allowed.contains(&value) {
        value
    } else {
        default
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Xml,
    Json,
    Text,
}

impl OutputFormat {
    #[must_use]
    pub fn from_param(raw: &str) -> Self {
        match whitelist_or_default(raw.trim(), &["xml", "json", "text"], "json") {
            "xml" => Self::Xml,
            "text" => Self::Text,
            _ => Self::Json,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectType {
    Http,
    Meta,
}

impl RedirectType {
    #[must_use]
    pub fn from_param(raw: &str) -> Self {
        match whitelist_or_default(raw.trim(), &["http", "meta"], "http") {
            "meta" => Self::Meta,
            _ => Self::Http,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Meta => "meta",
        }
    }
}

/// Seconds to wait before a `meta` redirect; always 3, 5 or 10.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedirectTime(i32);

impl RedirectTime {
    pub const ALLOWED: [i32; 3] = [3, 5, 10];
    pub const DEFAULT: Self = Self(5);

    #[must_use]
    pub fn from_param(raw: &str) -> Self {
        let seconds = i32::try_from(loose_int(raw)).unwrap_or_default();
        Self(whitelist_or_default(seconds, &Self::ALLOWED, Self::DEFAULT.0))
    }

    /// Accepts a stored value, falling back to the default for anything
    /// outside the whitelist.
    #[must_use]
    pub fn from_stored(seconds: i32) -> Self {
        Self(whitelist_or_default(seconds, &Self::ALLOWED, Self::DEFAULT.0))
    }

    #[must_use]
    pub const fn seconds(self) -> i32 {
        self.0
    }
}

/// Integer conversion that reads an optional sign and the leading digits,
/// yielding 0 when there are none (`"10s"` is 10, `"abc"` is 0).
fn loose_int(raw: &str) -> i64 {
    let raw = raw.trim();
    let (sign, digits) = raw
        .strip_prefix('-')
        .map_or_else(|| (1, raw.strip_prefix('+').unwrap_or(raw)), |rest| (-1, rest));
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits
        .get(..end)
        .and_then(|digits| digits.parse::<i64>().ok())
        .map_or(0, |n| sign * n)
}

/// Trims the title and keeps only ASCII letters and digits.
#[must_use]
pub fn sanitize_title(raw: &str) -> String {
    let mut title: String = raw
        .trim()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    title.truncate(MAX_TITLE_LEN);
    title
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("URL is empty")]
    Empty,
    #[error("URL must start with http:// or https://")]
    Malformed,
    #[error("URL is longer than {MAX_URL_LEN} bytes")]
    TooLong,
    #[error("URL is not reachable: {0}")]
    Unreachable(#[from] ProbeError),
}

impl ValidationError {
    /// The only message ever shown to API callers, whatever the cause.
    pub const USER_MESSAGE: &'static str = "Invalid URL.";
}

/// Normalized input for a link that is ready to be stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewShortLink {
    pub url: String,
    pub title: String,
    pub redirect_type: RedirectType,
    pub redirect_time: RedirectTime,
}

/// Checks the URL without touching the network.
///
/// # Errors
/// Will return [`Err`] if the URL is empty, does not start with an http(s)
/// scheme, is too long, or cannot be parsed.
pub fn check_url_shape(url: &str) -> Result<(), ValidationError> {
    if url.is_empty() {
        return Err(ValidationError::Empty);
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ValidationError::Malformed);
    }
    if url.len() > MAX_URL_LEN {
        return Err(ValidationError::TooLong);
    }
    Url::parse(url).map_err(|_| ValidationError::Malformed)?;
    Ok(())
}

pub fn validator_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<Validator> {
    let prober = Arc::clone(get.as_ref(url_prober_capsule));
    Arc::new(Validator::new(prober))
}

pub struct Validator {
    prober: Arc<dyn UrlProber>,
}

impl Validator {
    #[must_use]
    pub fn new(prober: Arc<dyn UrlProber>) -> Self {
        Self { prober }
    }

    /// # Errors
    /// Will return [`Err`] if the URL is empty, malformed, or unreachable.
    /// Title, type, and time never fail; they fall back to their defaults.
    #[instrument(skip(self))]
    pub async fn validate(&self, params: &CreateParams) -> Result<NewShortLink, ValidationError> {
        let url = params.url.trim();
        check_url_shape(url)?;
        self.prober.probe(url).await?;

        let link = NewShortLink {
            url: url.to_owned(),
            title: sanitize_title(&params.title),
            redirect_type: RedirectType::from_param(&params.redirect_type),
            redirect_time: RedirectTime::from_param(&params.redirect_time),
        };
        info!(?link, "Validated link parameters");
        Ok(link)
    }
}
