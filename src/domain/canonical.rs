use url::Url;

/// Query parameters that never change what an article is, only where the
/// click came from. Stripping them gives every share of the same story the
/// same canonical URL.
const TRACKING_PARAMS: [&str; 17] = [
    "variant",
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "msclkid",
    "ref",
    "source",
    "campaign",
    "_ga",
    "_gl",
    "mc_cid",
    "mc_eid",
    "yclid",
];

/// Canonicalise a raw URL by removing tracking query parameters.
///
/// Pure and idempotent. Unparseable input is returned unchanged; scheme,
/// host, port, userinfo, path, fragment, and all non-tracking query
/// parameters survive, with the remaining query re-serialised in its
/// original order by the URL encoder.
pub fn canonicalize_url(raw: &str) -> String {
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return raw.to_string(),
    };

    if url.query().is_some() {
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        if retained.is_empty() {
            url.set_query(None);
        } else {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in &retained {
                pairs.append_pair(key, value);
            }
        }
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_single_tracking_param() {
        assert_eq!(
            canonicalize_url("https://news.example/story?utm_source=x"),
            "https://news.example/story"
        );
    }

    #[test]
    fn test_strips_all_tracking_params() {
        let raw = "https://news.example/story?utm_source=a&utm_medium=b&utm_campaign=c\
                   &utm_term=d&utm_content=e&fbclid=f&gclid=g&msclkid=h&ref=i&source=j\
                   &campaign=k&_ga=l&_gl=m&mc_cid=n&mc_eid=o&yclid=p&variant=q";
        assert_eq!(
            canonicalize_url(raw),
            "https://news.example/story"
        );
    }

    #[test]
    fn test_preserves_other_params() {
        let canonical = canonicalize_url("https://news.example/story?id=42&utm_source=x&page=2");
        assert_eq!(canonical, "https://news.example/story?id=42&page=2");
    }

    #[test]
    fn test_preserves_fragment_port_and_userinfo() {
        let canonical =
            canonicalize_url("https://user:pw@news.example:8443/story?fbclid=y#section-2");
        assert_eq!(canonical, "https://user:pw@news.example:8443/story#section-2");
    }

    #[test]
    fn test_preserves_path_case_and_encoding() {
        let canonical = canonicalize_url("https://news.example/Story%20Title/Part-1?gclid=z");
        assert_eq!(canonical, "https://news.example/Story%20Title/Part-1");
    }

    #[test]
    fn test_unparseable_input_returned_unchanged() {
        assert_eq!(canonicalize_url("not a url"), "not a url");
        assert_eq!(canonicalize_url(""), "");
    }

    #[test]
    fn test_non_http_scheme_still_canonicalised() {
        let canonical = canonicalize_url("ftp://files.example/archive?ref=feed");
        assert_eq!(canonical, "ftp://files.example/archive");
    }

    #[test]
    fn test_url_without_query_untouched() {
        assert_eq!(
            canonicalize_url("https://news.example/story"),
            "https://news.example/story"
        );
    }

    #[test]
    fn test_idempotence() {
        let inputs = [
            "https://news.example/story?utm_source=x&id=1",
            "https://news.example/a b?q=r s",
            "https://news.example/story#frag",
            "not a url",
            "http://h.example/?ref=x",
        ];

        for input in inputs {
            let once = canonicalize_url(input);
            let twice = canonicalize_url(&once);
            assert_eq!(once, twice, "canonicalisation must be idempotent: {input}");
        }
    }

    #[test]
    fn test_tracking_value_with_same_name_as_kept_key() {
        // Only the parameter name decides; values are never inspected.
        let canonical = canonicalize_url("https://news.example/s?q=utm_source&utm_source=q");
        assert_eq!(canonical, "https://news.example/s?q=utm_source");
    }
}
