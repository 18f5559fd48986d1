//! Minimal URL inspection helpers.
//!
//! The allow-list filter and retry failover only need the scheme and the
//! authority; a full URL parser is deliberately not pulled in.

/// Returns the scheme portion of `url` (the text before `"://"`), if any.
pub fn scheme(url: &str) -> Option<&str> {
    url.split_once("://").map(|(s, _)| s)
}

/// True when `url` uses the `http` or `https` scheme (case-insensitive).
pub fn is_http_scheme(url: &str) -> bool {
    scheme(url).is_some_and(|s| s.eq_ignore_ascii_case("http") || s.eq_ignore_ascii_case("https"))
}

/// Returns the authority of `url` with any userinfo stripped: `host[:port]`.
///
/// Empty when the URL has no scheme separator.
pub fn domain_and_port(url: &str) -> &str {
    let Some((_, rest)) = url.split_once("://") else {
        return "";
    };
    let authority = match rest.find(['/', '?', '#']) {
        Some(end) => &rest[..end],
        None => rest,
    };
    match authority.rfind('@') {
        Some(at) => &authority[at + 1..],
        None => authority,
    }
}

/// Returns the host of `url` without the port.
pub fn domain(url: &str) -> &str {
    let authority = domain_and_port(url);
    // IPv6 literals keep their brackets; the port follows the closing one.
    if let Some(end) = authority.find(']') {
        return &authority[..=end];
    }
    match authority.find(':') {
        Some(colon) => &authority[..colon],
        None => authority,
    }
}

/// Value of the query parameter `name`, percent-decoded.
pub fn url_parameter(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    let query = match query.find('#') {
        Some(end) => &query[..end],
        None => query,
    };
    for pair in query.split('&') {
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, value),
            None => (pair, ""),
        };
        if key == name {
            return Some(percent_decode(value));
        }
    }
    None
}

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let byte = bytes
                .get(idx + 1..idx + 3)
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = byte {
                decoded.push(byte);
                idx += 3;
                continue;
            }
        }
        decoded.push(bytes[idx]);
        idx += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_extraction() {
        assert_eq!(scheme("http://example.com/a"), Some("http"));
        assert_eq!(scheme("HTTPS://example.com"), Some("HTTPS"));
        assert_eq!(scheme("example.com"), None);
    }

    #[test]
    fn http_scheme_detection() {
        assert!(is_http_scheme("http://a"));
        assert!(is_http_scheme("https://a"));
        assert!(is_http_scheme("HTTP://a"));
        assert!(!is_http_scheme("ftp://a"));
        assert!(!is_http_scheme("a"));
    }

    #[test]
    fn domain_and_port_extraction() {
        assert_eq!(domain_and_port("http://example.com/path"), "example.com");
        assert_eq!(domain_and_port("http://example.com:8080/path"), "example.com:8080");
        assert_eq!(domain_and_port("http://user:pw@example.com/x"), "example.com");
        assert_eq!(domain_and_port("http://example.com?q=1"), "example.com");
        assert_eq!(domain_and_port("no-scheme"), "");
    }

    #[test]
    fn domain_strips_port() {
        assert_eq!(domain("http://example.com:8080/path"), "example.com");
        assert_eq!(domain("http://example.com/path"), "example.com");
        assert_eq!(domain("https://api.game.example:443"), "api.game.example");
    }

    #[test]
    fn url_parameter_lookup() {
        let url = "http://example.com/a?x=1&y=hello%20world&flag";
        assert_eq!(url_parameter(url, "x").as_deref(), Some("1"));
        assert_eq!(url_parameter(url, "y").as_deref(), Some("hello world"));
        assert_eq!(url_parameter(url, "flag").as_deref(), Some(""));
        assert_eq!(url_parameter(url, "missing"), None);
        assert_eq!(url_parameter("http://example.com/a", "x"), None);
    }

    #[test]
    fn percent_decoding_leaves_bad_escapes_alone() {
        assert_eq!(percent_decode("a%2Fb"), "a/b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
