use crate::engine::fingerprint::Fingerprint;
use crate::network::errors::NetworkError;
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::time::Duration;

// * The HTTP client backing the static engine. One instance per engine run;
// * carries the session cookie store and the fingerprint identity headers.
#[derive(Clone)]
pub struct PageClient {
    inner: Client,
}

impl PageClient {
    // * @param proxy_url - Optional proxy URL (e.g., "http://user:pass@ip:port")
    pub fn new(
        fingerprint: &Fingerprint,
        timeout: Duration,
        proxy_url: Option<&str>,
    ) -> Result<Self, NetworkError> {
        let mut headers = HeaderMap::new();
        fingerprint.apply_to_headers(&mut headers);

        let mut builder = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .timeout(timeout);

        if let Some(url) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }

        Ok(Self {
            inner: builder.build()?,
        })
    }

    // * Fetches an HTML document, rejecting non-2xx responses.
    pub async fn fetch_page(&self, url: &str) -> Result<String, NetworkError> {
        let resp = self.inner.get(url).send().await?;
        let status = resp.status();

        if !status.is_success() {
            return Err(NetworkError::Status(status.as_u16()));
        }

        let body = resp.text().await?;
        if body.is_empty() {
            return Err(NetworkError::EmptyResponse);
        }

        Ok(body)
    }

    // * Fetches raw bytes plus the declared content type for one asset.
    pub async fn fetch_bytes(
        &self,
        url: &str,
    ) -> Result<(Vec<u8>, Option<String>), NetworkError> {
        let resp = self.inner.get(url).send().await?;
        let status = resp.status();

        if !status.is_success() {
            return Err(NetworkError::Status(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let bytes = resp.bytes().await?.to_vec();
        Ok((bytes, content_type))
    }
}
