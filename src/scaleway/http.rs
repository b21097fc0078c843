//! Raw HTTP calls for endpoints the SDK does not cover.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::ScalewayProviderError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Authenticated JSON client rooted at the API base URL.
#[derive(Clone, Debug)]
pub(crate) struct ScalewayHttp {
    base: String,
    secret_key: String,
}

impl ScalewayHttp {
    pub(crate) fn new(base: &str, secret_key: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_owned(),
            secret_key: secret_key.to_owned(),
        }
    }

    pub(crate) fn instance_url(&self, zone: &str, path: &str) -> String {
        format!("{}/instance/v1/zones/{zone}/{path}", self.base)
    }

    pub(crate) fn iam_url(&self, path: &str) -> String {
        format!("{}/iam/v1alpha1/{path}", self.base)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!(%method, url, "scaleway request");
        HTTP_CLIENT
            .request(method, url)
            .header("X-Auth-Token", &self.secret_key)
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ScalewayProviderError> {
        decode(&send(self.request(Method::GET, url)).await?)
    }

    pub(crate) async fn send_json<B, T>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<T, ScalewayProviderError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        decode(&send(self.request(method, url).json(body)).await?)
    }

    /// Sends a request whose response body is ignored.
    pub(crate) async fn send_empty<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<(), ScalewayProviderError> {
        let builder = self.request(method, url);
        let request = match body {
            Some(payload) => builder.json(payload),
            None => builder,
        };
        send(request).await.map(|_| ())
    }

    pub(crate) async fn patch_text(&self, url: &str, text: String) -> Result<(), ScalewayProviderError> {
        let request = self
            .request(Method::PATCH, url)
            .header("Content-Type", "text/plain")
            .body(text);
        send(request).await.map(|_| ())
    }

    pub(crate) async fn delete(&self, url: &str) -> Result<(), ScalewayProviderError> {
        send(self.request(Method::DELETE, url)).await.map(|_| ())
    }
}

async fn send(request: RequestBuilder) -> Result<Vec<u8>, ScalewayProviderError> {
    let response = request
        .send()
        .await
        .map_err(ScalewayProviderError::transport)?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(ScalewayProviderError::transport)?;

    if status.is_success() {
        return Ok(body.to_vec());
    }
    Err(api_error(status.as_u16(), &body))
}

pub(crate) fn api_error(status: u16, body: &[u8]) -> ScalewayProviderError {
    serde_json::from_slice::<scaleway_rs::ScalewayApiError>(body).map_or_else(
        |_| ScalewayProviderError::Api {
            status: Some(status),
            etype: String::from("http"),
            message: String::from_utf8_lossy(body).into_owned(),
        },
        |api_err| ScalewayProviderError::from_api(Some(status), api_err),
    )
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ScalewayProviderError> {
    serde_json::from_slice(body).map_err(ScalewayProviderError::transport)
}
