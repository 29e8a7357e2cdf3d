//! Cookie helpers for the browser redirect flow.

use axum::http::{header, HeaderMap};

pub const STATE_COOKIE: &str = "gmail_state";

/// Build a Set-Cookie value. A zero `max_age_secs` clears the cookie.
pub fn build_cookie(name: &str, value: &str, max_age_secs: i64) -> String {
    let secure = if std::env::var("RUST_ENV").unwrap_or_default() == "production" {
        "; Secure"
    } else {
        ""
    };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        name, value, max_age_secs, secure
    )
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;

    for cookie_str in cookie_header.split(';') {
        if let Ok(cookie) = cookie::Cookie::parse(cookie_str.trim()) {
            if cookie.name() == name {
                return Some(cookie.value().to_string());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_cookie_among_several() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; gmail_state=abc.def; other=1".parse().unwrap(),
        );
        assert_eq!(read_cookie(&headers, STATE_COOKIE), Some("abc.def".to_string()));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_build_cookie() {
        let cookie = build_cookie(STATE_COOKIE, "xyz", 600);
        assert!(cookie.starts_with("gmail_state=xyz; Path=/; HttpOnly"));
        assert!(cookie.contains("Max-Age=600"));
    }
}
