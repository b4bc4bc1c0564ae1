//! Object store adapters.
//!
//! Every store maps storage keys to public URLs under one base URL and
//! recognises only URLs under that same base, so a URL from anywhere else
//! can never be turned into a key.

#[cfg(feature = "media-local")]
pub mod local;
pub mod memory;
#[cfg(feature = "media-s3")]
pub mod s3;

use domains::{DomainError, DomainResult};
use url::Url;

/// Checks a storage key: relative, `/`-separated, no empty or dot segments.
pub fn validate_key(path: &str) -> DomainResult<()> {
    let invalid = |reason: &str| DomainError::validation("path", format!("invalid storage path: {reason}"));

    if path.is_empty() {
        return Err(invalid("empty"));
    }
    if path.contains('\\') || path.contains('\0') {
        return Err(invalid("forbidden character"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("empty segment")),
            "." | ".." => return Err(invalid("relative segment")),
            _ => {}
        }
    }
    Ok(())
}

/// The public base URL objects are served from.
#[derive(Debug, Clone)]
pub struct PublicBase {
    url: Url,
}

impl PublicBase {
    pub fn parse(base: &str) -> DomainResult<Self> {
        let mut url = Url::parse(base).map_err(|e| {
            DomainError::validation("public_base_url", format!("invalid URL {base:?}: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(DomainError::validation(
                "public_base_url",
                "expected an absolute http(s) URL",
            ));
        }
        url.set_query(None);
        url.set_fragment(None);
        let trimmed = url.path().trim_end_matches('/').to_owned();
        url.set_path(&trimmed);
        Ok(Self { url })
    }

    /// `{base}/{key}` with each key segment percent-encoded.
    pub fn url_for(&self, path: &str) -> String {
        let encoded: Vec<_> = path.split('/').map(urlencoding::encode).collect();
        format!(
            "{}/{}",
            self.url.as_str().trim_end_matches('/'),
            encoded.join("/")
        )
    }

    /// Inverse of [`PublicBase::url_for`]. Query and fragment are ignored.
    pub fn key_of(&self, raw: &str) -> Option<String> {
        let url = Url::parse(raw).ok()?;
        if url.scheme() != self.url.scheme()
            || url.host_str() != self.url.host_str()
            || url.port_or_known_default() != self.url.port_or_known_default()
        {
            return None;
        }

        let base_path = self.url.path().trim_end_matches('/');
        let rest = url.path().strip_prefix(base_path)?.strip_prefix('/')?;
        let decoded = rest
            .split('/')
            .map(|segment| urlencoding::decode(segment).ok().map(|s| s.into_owned()))
            .collect::<Option<Vec<_>>>()?
            .join("/");

        validate_key(&decoded).ok()?;
        Some(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> PublicBase {
        PublicBase::parse("https://cdn.example.com/files/").unwrap()
    }

    #[test]
    fn keys_round_trip_through_public_urls() {
        let url = base().url_for("uploads/u1/1700000000_my app.apk");
        assert_eq!(
            url,
            "https://cdn.example.com/files/uploads/u1/1700000000_my%20app.apk"
        );
        assert_eq!(
            base().key_of(&url).as_deref(),
            Some("uploads/u1/1700000000_my app.apk")
        );
    }

    #[test]
    fn foreign_hosts_and_prefixes_are_rejected() {
        let b = base();
        assert_eq!(b.key_of("https://evil.example.com/files/a.apk"), None);
        assert_eq!(b.key_of("http://cdn.example.com/files/a.apk"), None);
        assert_eq!(b.key_of("https://cdn.example.com:8443/files/a.apk"), None);
        assert_eq!(b.key_of("https://cdn.example.com/other/a.apk"), None);
        assert_eq!(b.key_of("https://cdn.example.com/filesystem/a.apk"), None);
        assert_eq!(b.key_of("not a url"), None);
    }

    #[test]
    fn traversal_is_rejected() {
        assert_eq!(base().key_of("https://cdn.example.com/files/a%2F..%2Fb.apk"), None);
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a\\b").is_err());
        assert!(validate_key("apps/1/releases/2/3_app.apk").is_ok());
    }

    #[test]
    fn query_strings_are_ignored() {
        assert_eq!(
            base()
                .key_of("https://cdn.example.com/files/a.apk?expires=1&signature=abc")
                .as_deref(),
            Some("a.apk")
        );
    }
}
