//! Cookie jar shared with the HTTP client that can be emptied when the
//! session ends. `reqwest::cookie::Jar` has no removal API, so the jar is
//! swapped for a fresh one instead.

use std::sync::{PoisonError, RwLock};

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::Url;

#[derive(Default)]
pub(crate) struct SessionCookies {
    jar: RwLock<Jar>,
}

impl SessionCookies {
    pub(crate) fn add_cookie_str(&self, cookie: &str, url: &Url) {
        self.jar
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .add_cookie_str(cookie, url);
    }

    /// Forget every cookie, the refresh cookie included.
    pub(crate) fn clear(&self) {
        *self.jar.write().unwrap_or_else(PoisonError::into_inner) = Jar::default();
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.jar
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cookies(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_drops_refresh_cookie() {
        let url = Url::parse("http://localhost:3000/api/auth/refresh-token").unwrap();
        let cookies = SessionCookies::default();
        cookies.add_cookie_str("refreshToken=abc; Path=/api", &url);
        assert_eq!(
            cookies.cookies(&url).unwrap().to_str().unwrap(),
            "refreshToken=abc"
        );

        cookies.clear();
        assert!(cookies.cookies(&url).is_none());
    }
}
