use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use url::Url;

/// Source of the anti-forgery token. Read on every attempt, never cached.
pub trait TokenProvider: Send + Sync {
    fn current_token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_token(&self) -> Option<String> {
        self()
    }
}

/// Reads the token cookie from the jar the transport sends and updates.
#[derive(Clone, Debug)]
pub struct CookieTokenProvider {
    jar: Arc<Jar>,
    url: Url,
    cookie_name: String,
}

impl CookieTokenProvider {
    pub fn new(jar: Arc<Jar>, url: Url, cookie_name: impl Into<String>) -> Self {
        Self {
            jar,
            url,
            cookie_name: cookie_name.into(),
        }
    }
}

impl TokenProvider for CookieTokenProvider {
    fn current_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.url)?;
        let header = header.to_str().ok()?;
        find_cookie(header, &self.cookie_name)
    }
}

/// Attaches the token header to mutating requests.
#[derive(Clone)]
pub struct CsrfPolicy {
    provider: Arc<dyn TokenProvider>,
    header_name: String,
}

impl CsrfPolicy {
    pub fn new(provider: Arc<dyn TokenProvider>, header_name: impl Into<String>) -> Self {
        Self {
            provider,
            header_name: header_name.into(),
        }
    }

    pub fn is_token_header(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.header_name)
    }

    /// Replaces any token header in `headers` with a freshly read token.
    /// Leaves the header off when no token is available.
    pub fn attach(&self, headers: &mut Vec<(String, String)>) {
        headers.retain(|(name, _)| !self.is_token_header(name));
        match self.provider.current_token() {
            Some(token) => headers.push((self.header_name.clone(), token)),
            None => tracing::debug!("no anti-forgery token available"),
        }
    }
}

fn find_cookie(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jar_with(cookie: &str, url: &Url) -> Arc<Jar> {
        let jar = Arc::new(Jar::default());
        jar.add_cookie_str(cookie, url);
        jar
    }

    #[test]
    fn finds_named_cookie_among_others() {
        assert_eq!(
            find_cookie("sessionid=abc; csrftoken=xyz; theme=dark", "csrftoken"),
            Some("xyz".to_string())
        );
        assert_eq!(find_cookie("sessionid=abc", "csrftoken"), None);
        assert_eq!(find_cookie("csrftoken=", "csrftoken"), None);
    }

    #[test]
    fn reads_rotated_token_on_each_call() {
        let url = Url::parse("http://kitchen.test/").unwrap();
        let jar = jar_with("csrftoken=first; Path=/", &url);
        let provider = CookieTokenProvider::new(jar.clone(), url.clone(), "csrftoken");

        assert_eq!(provider.current_token().as_deref(), Some("first"));

        jar.add_cookie_str("csrftoken=second; Path=/", &url);
        assert_eq!(provider.current_token().as_deref(), Some("second"));
    }

    #[test]
    fn attach_replaces_stale_header() {
        let policy = CsrfPolicy::new(Arc::new(|| Some("fresh".to_string())), "X-CSRFToken");
        let mut headers = vec![
            ("x-csrftoken".to_string(), "stale".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];

        policy.attach(&mut headers);

        assert_eq!(
            headers,
            vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("X-CSRFToken".to_string(), "fresh".to_string()),
            ]
        );
    }

    #[test]
    fn attach_without_token_leaves_header_off() {
        let policy = CsrfPolicy::new(Arc::new(|| None), "X-CSRFToken");
        let mut headers = vec![];
        policy.attach(&mut headers);
        assert!(headers.is_empty());
    }
}
