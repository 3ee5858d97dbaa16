use crate::{
    auth::{
        error::RefreshError,
        store::{ChangeSource, SessionStore},
    },
    APP_USER_AGENT,
};
use reqwest::{
    header::{COOKIE, SET_COOKIE},
    Client,
};
use secrecy::ExposeSecret;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, info_span, instrument, Instrument};
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8001/api/v1";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The network call that exchanges the current session credential for a
/// renewed one. Only success or failure matters to the coordinator.
pub trait RefreshEndpoint: Send + Sync + 'static {
    fn refresh(&self) -> impl Future<Output = Result<(), RefreshError>> + Send;
}

impl<E: RefreshEndpoint> RefreshEndpoint for Arc<E> {
    fn refresh(&self) -> impl Future<Output = Result<(), RefreshError>> + Send {
        (**self).refresh()
    }
}

/// Join the refresh path onto the API base URL, keeping the base path.
///
/// # Errors
/// Returns an error if `base` cannot be parsed, has no host, or uses an
/// unsupported scheme.
#[instrument]
pub fn endpoint_url(base: &str, path: &str) -> Result<Url, RefreshError> {
    let url = Url::parse(base).map_err(|e| RefreshError::Endpoint(format!("{base}: {e}")))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(RefreshError::Endpoint(format!(
            "unsupported scheme {scheme}"
        )));
    }

    if url.host().is_none() {
        return Err(RefreshError::Endpoint("no host specified".to_string()));
    }

    let joined = format!(
        "{}/{}",
        url.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );

    let endpoint_url =
        Url::parse(&joined).map_err(|e| RefreshError::Endpoint(format!("{joined}: {e}")))?;

    debug!("endpoint URL: {}", endpoint_url);

    Ok(endpoint_url)
}

/// Refresh over HTTP: `POST` with the stored cookies, then write any
/// `Set-Cookie` headers back into the session store.
#[derive(Debug, Clone)]
pub struct HttpRefreshEndpoint {
    client: Client,
    url: Url,
    store: Arc<SessionStore>,
}

impl HttpRefreshEndpoint {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(
        api_base_url: &str,
        refresh_path: &str,
        timeout: Duration,
        store: Arc<SessionStore>,
    ) -> Result<Self, RefreshError> {
        let url = endpoint_url(api_base_url, refresh_path)?;

        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, url, store })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl RefreshEndpoint for HttpRefreshEndpoint {
    async fn refresh(&self) -> Result<(), RefreshError> {
        let mut request = self.client.post(self.url.clone());

        if let Some(cookies) = self.store.cookie_header() {
            request = request.header(COOKIE, cookies.expose_secret());
        }

        let span = info_span!(
            "auth.refresh",
            http.method = "POST",
            url = %self.url
        );
        let response = request.send().instrument(span).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Rejected { status });
        }

        let set_cookies: Vec<&str> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();

        debug!(status = %status, cookies = set_cookies.len(), "refresh accepted");

        self.store
            .apply_set_cookies(set_cookies, ChangeSource::Coordinator);

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;
    use secrecy::SecretString;
    use std::net::TcpListener;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    #[test]
    fn test_endpoint_url_keeps_base_path() {
        let url = endpoint_url("http://localhost:8001/api/v1", "/auth/refresh").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8001/api/v1/auth/refresh");

        let url = endpoint_url("https://api.example.com/", "auth/refresh").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/auth/refresh");
    }

    #[test]
    fn test_endpoint_url_rejects_bad_base() {
        assert!(matches!(
            endpoint_url("ftp://example.com", "/auth/refresh"),
            Err(RefreshError::Endpoint(_))
        ));
        assert!(matches!(
            endpoint_url("not a url", "/auth/refresh"),
            Err(RefreshError::Endpoint(_))
        ));
    }

    #[tokio::test]
    async fn refresh_sends_cookies_and_stores_set_cookies() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .and(header("cookie", "refresh_token=r1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "id_token=new-id; Path=/; SameSite=Lax")
                    .append_header("set-cookie", "is_authenticated=true; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(SessionStore::in_memory());
        store.set_cookie(
            "refresh_token",
            SecretString::from("r1".to_string()),
            ChangeSource::Hydrate,
        );

        let endpoint = HttpRefreshEndpoint::new(
            &format!("{}/api/v1", server.uri()),
            DEFAULT_REFRESH_PATH,
            DEFAULT_TIMEOUT,
            store.clone(),
        )?;

        endpoint.refresh().await?;

        assert!(store.is_authenticated());
        assert_eq!(store.id_token().unwrap().expose_secret(), "new-id");
        Ok(())
    }

    #[tokio::test]
    async fn refresh_maps_unauthorized_to_rejected() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = Arc::new(SessionStore::in_memory());
        let endpoint = HttpRefreshEndpoint::new(
            &server.uri(),
            DEFAULT_REFRESH_PATH,
            DEFAULT_TIMEOUT,
            store.clone(),
        )?;

        let err = endpoint.refresh().await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(!store.is_authenticated());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_reports_transport_errors() -> Result<()> {
        // nothing listens on the discard port
        let store = Arc::new(SessionStore::in_memory());
        let endpoint = HttpRefreshEndpoint::new(
            "http://127.0.0.1:9",
            DEFAULT_REFRESH_PATH,
            Duration::from_secs(2),
            store,
        )?;

        assert!(matches!(
            endpoint.refresh().await,
            Err(RefreshError::Transport(_))
        ));
        Ok(())
    }
}
