// src/services/fetcher.rs

//! Page retrieval under per-domain policy.
//!
//! One fetch path for every transport: plain GETs for most domains, the
//! render service for JavaScript-dependent ones, and a proxy client for
//! anti-bot-blocked ones. Header tuples rotate per request to keep the
//! fingerprint moving; transient statuses retry with capped backoff.

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::header::{ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{
    Config, DomainPolicy, FetchConfig, HeaderBundle, HeaderPools, HeaderProfile, RenderConfig,
};

/// A successfully retrieved page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    /// URL after redirects (the original target for rendered fetches)
    pub final_url: String,
    pub html: String,
}

/// Fetch seam for the monitor and verifier; stubbed in tests.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, policy: &DomainPolicy) -> Result<FetchedPage>;
}

/// Where a request is routed and how long it may take.
struct Route {
    url: String,
    timeout: Duration,
    rendered: bool,
}

/// HTTP fetcher implementing the per-domain transport policy.
pub struct HttpFetcher {
    fetch: FetchConfig,
    headers: HeaderPools,
    render: RenderConfig,
    client: Client,
    /// Separate client for domains flagged as anti-bot blocked
    proxy_client: Option<Client>,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().build()?;
        let proxy_client = match &config.proxy.url {
            Some(proxy_url) => {
                let proxy = reqwest::Proxy::all(proxy_url)?;
                Some(Client::builder().proxy(proxy).build()?)
            }
            None => None,
        };
        Ok(Self {
            fetch: config.fetch.clone(),
            headers: config.headers.clone(),
            render: config.render.clone(),
            client,
            proxy_client,
        })
    }

    /// Pick a header tuple from the profile's rotating pool.
    fn bundle(&self, profile: HeaderProfile) -> Option<&HeaderBundle> {
        let pool = self.headers.pool(profile);
        pool.choose(&mut rand::rng()).or_else(|| pool.first())
    }

    /// Resolve transport and timeout for a target.
    fn route(&self, url: &str, policy: &DomainPolicy) -> Route {
        if policy.js_render {
            if let Some(endpoint) = &self.render.endpoint {
                match Url::parse(endpoint) {
                    Ok(mut rendered) => {
                        rendered.query_pairs_mut().append_pair("url", url);
                        return Route {
                            url: rendered.to_string(),
                            timeout: Duration::from_secs(
                                self.render.timeout_secs.min(self.fetch.max_timeout_secs),
                            ),
                            rendered: true,
                        };
                    }
                    Err(e) => log::warn!(
                        "Bad render endpoint {:?} ({}); fetching {} directly",
                        endpoint,
                        e,
                        url
                    ),
                }
            } else {
                log::debug!("{} wants rendering but no endpoint is configured", url);
            }
        }
        Route {
            url: url.to_string(),
            timeout: Duration::from_secs(self.fetch.timeout_for(policy.timeout_class)),
            rendered: false,
        }
    }
}

/// Statuses worth retrying: rate limiting and server-side failures.
fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, policy: &DomainPolicy) -> Result<FetchedPage> {
        let route = self.route(url, policy);
        let client = if policy.proxied {
            match &self.proxy_client {
                Some(client) => client,
                None => {
                    log::warn!("{} is flagged proxied but no proxy is configured", url);
                    &self.client
                }
            }
        } else {
            &self.client
        };

        let mut backoff = Duration::from_millis(self.fetch.backoff_ms);
        let cap = Duration::from_millis(self.fetch.max_backoff_ms);
        let mut attempt: u32 = 0;

        loop {
            let mut request = client.get(&route.url).timeout(route.timeout);
            if let Some(bundle) = self.bundle(policy.header_profile) {
                request = request
                    .header(USER_AGENT, &bundle.user_agent)
                    .header(ACCEPT_LANGUAGE, &bundle.accept_language);
                if let Some(referer) = &bundle.referer {
                    request = request.header(REFERER, referer);
                }
            }

            let response = request.send().await.map_err(|e| AppError::fetch(url, e))?;
            let status = response.status();

            if is_transient(status) && attempt < self.fetch.max_retries {
                attempt += 1;
                log::debug!(
                    "Transient {} from {}; retry {}/{} in {:?}",
                    status,
                    url,
                    attempt,
                    self.fetch.max_retries,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(cap);
                continue;
            }
            if !status.is_success() {
                return Err(AppError::fetch(url, format!("HTTP status {}", status)));
            }

            let final_url = if route.rendered {
                url.to_string()
            } else {
                response.url().to_string()
            };
            let html = response.text().await.map_err(|e| AppError::fetch(url, e))?;
            return Ok(FetchedPage {
                status: status.as_u16(),
                final_url,
                html,
            });
        }
    }
}
