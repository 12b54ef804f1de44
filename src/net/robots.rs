use robotstxt::DefaultMatcher;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

/// Cached robots.txt verdict per host. A missing file, a >=400 status, or a
/// fetch error all mean allow-all for that host.
enum RobotsState {
    AllowAll,
    Rules(String),
}

/// Per-host robots.txt cache checked with the configured user agent.
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    cache: Mutex<HashMap<String, RobotsState>>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client, user_agent: String) -> Self {
        Self {
            client,
            user_agent,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let mut base = format!("{}://{}", parsed.scheme(), host);
        if let Some(port) = parsed.port() {
            base = format!("{base}:{port}");
        }

        let mut cache = self.cache.lock().await;
        if !cache.contains_key(&base) {
            let state = self.fetch_rules(&base).await;
            cache.insert(base.clone(), state);
        }
        match cache.get(&base) {
            Some(RobotsState::AllowAll) | None => true,
            Some(RobotsState::Rules(body)) => {
                DefaultMatcher::default().one_agent_allowed_by_robots(body, &self.user_agent, url)
            }
        }
    }

    async fn fetch_rules(&self, base: &str) -> RobotsState {
        let robots_url = format!("{base}/robots.txt");
        let response = self
            .client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().as_u16() < 400 => match resp.text().await {
                Ok(body) => RobotsState::Rules(body),
                Err(e) => {
                    debug!("robots.txt body read failed for {}: {}", robots_url, e);
                    RobotsState::AllowAll
                }
            },
            Ok(resp) => {
                debug!(
                    "robots.txt unavailable for {} (status {}); allowing all",
                    robots_url,
                    resp.status()
                );
                RobotsState::AllowAll
            }
            Err(e) => {
                debug!("robots.txt fetch failed for {}: {}", robots_url, e);
                RobotsState::AllowAll
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matcher_honors_disallow_for_agent() {
        let body = "User-agent: *\nDisallow: /private/\n";
        let mut matcher = DefaultMatcher::default();
        assert!(!matcher.one_agent_allowed_by_robots(
            body,
            "corpus-scout",
            "https://example.com/private/page"
        ));
        assert!(matcher.one_agent_allowed_by_robots(
            body,
            "corpus-scout",
            "https://example.com/public/page"
        ));
    }

    #[tokio::test]
    async fn unparsable_url_is_disallowed() {
        let cache = RobotsCache::new(reqwest::Client::new(), "ua".to_string());
        assert!(!cache.allowed("not a url").await);
    }
}
