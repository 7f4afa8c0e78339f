use crate::config::env_parse;
use reqwest::{
    Client, ClientBuilder,
    header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue},
    redirect::Policy,
};
use std::time::Duration;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const FRENCH_ACCEPT_LANGUAGE: &str = "fr-FR,fr;q=0.9,en;q=0.8";
const MAX_REDIRECTS: usize = 10;

fn connect_timeout() -> Duration {
    let secs = env_parse::<u64>("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5);
    Duration::from_secs(secs)
}

/// Client for JSON APIs (the vision model).
pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(connect_timeout())
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Builder for the marketplace probe client: browser identification, French
/// locale, redirects followed, no cookie store. Timeouts are applied per request.
pub fn probe_client_builder() -> ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(FRENCH_ACCEPT_LANGUAGE),
    );
    Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .default_headers(headers)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .connect_timeout(connect_timeout())
}

pub fn build_probe_client() -> Client {
    probe_client_builder()
        .build()
        .unwrap_or_else(|_| Client::new())
}
