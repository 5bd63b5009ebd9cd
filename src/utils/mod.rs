//! Utility functions and helpers.

pub mod html;
pub mod http;

use url::Url;

/// Prefix of provider media wrapper links around the real image URL.
const MEDIA_WRAPPER_PREFIX: &str = "https://www.reddit.com/media?url=";

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Join a path onto a base URL string, keeping any path prefix of the base.
pub fn endpoint(base_url: &str, path: &str) -> crate::error::Result<Url> {
    let base = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    Ok(Url::parse(&base)?.join(path.trim_start_matches('/'))?)
}

/// Unwrap a provider media link to the image it points at.
pub fn media_url_target(raw: &str) -> Option<String> {
    if !raw.starts_with(MEDIA_WRAPPER_PREFIX) {
        return None;
    }
    Url::parse(raw)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == "url")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
