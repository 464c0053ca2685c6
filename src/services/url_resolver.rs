//! Public URLs for object keys, and the way back.

/// How a provider exposes objects over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlStyle {
    /// `scheme://bucket.host/key`
    VirtualHosted,
    /// `endpoint/bucket/key`
    PathStyle,
    /// `endpoint/key`, where the endpoint is already the bucket's domain.
    BucketDomain,
}

/// Maps object keys to public URLs for one endpoint/bucket pair.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    /// Everything before the key, ending with `/`.
    prefix: String,
}

impl UrlResolver {
    pub fn new(style: UrlStyle, endpoint: &str, bucket: &str) -> Self {
        let endpoint = endpoint.trim_end_matches('/');
        let base = match style {
            UrlStyle::VirtualHosted => match endpoint.find("://") {
                Some(pos) => {
                    let (scheme, host) = endpoint.split_at(pos + 3);
                    format!("{scheme}{bucket}.{host}")
                }
                None => format!("{bucket}.{endpoint}"),
            },
            UrlStyle::PathStyle => format!("{endpoint}/{bucket}"),
            UrlStyle::BucketDomain => endpoint.to_string(),
        };
        Self {
            prefix: format!("{base}/"),
        }
    }

    /// Public URL of `key`. The key is appended verbatim so `key_from_ref`
    /// recovers it exactly.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Normalize a caller reference (public URL or bare key) to a key.
    pub fn key_from_ref<'a>(&self, reference: &'a str) -> &'a str {
        reference.strip_prefix(self.prefix.as_str()).unwrap_or(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "2024/06/01/0123456789abcdef0123456789abcdef.png";

    #[test]
    fn virtual_hosted_inserts_bucket_before_host() {
        let r = UrlResolver::new(
            UrlStyle::VirtualHosted,
            "https://oss-cn-hangzhou.aliyuncs.com",
            "media",
        );
        assert_eq!(
            r.url_for(KEY),
            format!("https://media.oss-cn-hangzhou.aliyuncs.com/{KEY}")
        );
    }

    #[test]
    fn path_style_appends_bucket() {
        let r = UrlResolver::new(UrlStyle::PathStyle, "http://127.0.0.1:9000/", "media");
        assert_eq!(r.url_for(KEY), format!("http://127.0.0.1:9000/media/{KEY}"));
    }

    #[test]
    fn bucket_domain_uses_endpoint_directly() {
        let r = UrlResolver::new(UrlStyle::BucketDomain, "http://cdn.example.com", "media");
        assert_eq!(r.url_for(KEY), format!("http://cdn.example.com/{KEY}"));
    }

    #[test]
    fn urls_and_keys_round_trip_for_every_style() {
        for style in [
            UrlStyle::VirtualHosted,
            UrlStyle::PathStyle,
            UrlStyle::BucketDomain,
        ] {
            let r = UrlResolver::new(style, "https://storage.example.com", "media");
            let url = r.url_for(KEY);
            let key = r.key_from_ref(&url);
            assert_eq!(key, KEY, "{style:?}");
            assert_eq!(r.url_for(key), url, "{style:?}");
            assert_eq!(r.key_from_ref(KEY), KEY, "{style:?}");
        }
    }

    #[test]
    fn foreign_urls_are_left_alone() {
        let r = UrlResolver::new(UrlStyle::PathStyle, "http://127.0.0.1:9000", "media");
        let other = "http://elsewhere/media/a.txt";
        assert_eq!(r.key_from_ref(other), other);
    }

    #[test]
    fn leading_slash_keys_round_trip() {
        let r = UrlResolver::new(UrlStyle::BucketDomain, "http://cdn.example.com", "media");
        let url = r.url_for("/a");
        assert_eq!(url, "http://cdn.example.com//a");
        assert_eq!(r.key_from_ref(&url), "/a");
    }
}
