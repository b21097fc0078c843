//! Keystone v3 session and authenticated HTTP calls.
//!
//! The session authenticates once with a password, keeps the scoped token
//! and resolves the compute, network and image endpoints from the service
//! catalogue. It is built by the driver and handed to the provider.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::OpenStackConfig;

use super::OpenStackError;
use super::types::{CatalogEntry, TokenEnvelope};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Compute microversion that returns the image id from `createImage`.
const COMPUTE_MICROVERSION: &str = "compute 2.45";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Service endpoints resolved from the catalogue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoints {
    /// Nova base URL.
    pub compute: String,
    /// Neutron base URL including `/v2.0`.
    pub network: String,
    /// Glance base URL including `/v2`.
    pub image: String,
    /// Region the endpoints were selected for, if one was requested.
    pub region: Option<String>,
}

/// An authenticated Keystone session.
#[derive(Clone, Debug)]
pub struct OpenStackSession {
    token: String,
    project_id: String,
    endpoints: Endpoints,
}

impl OpenStackSession {
    /// Authenticates against Keystone with the configured password.
    ///
    /// # Errors
    ///
    /// Returns [`OpenStackError::Config`] for incomplete configuration,
    /// [`OpenStackError::Auth`] when Keystone refuses the credentials and
    /// [`OpenStackError::MissingEndpoint`] when a required service is absent
    /// from the catalogue.
    pub async fn authenticate(config: &OpenStackConfig) -> Result<Self, OpenStackError> {
        config.validate()?;
        let url = format!("{}/auth/tokens", config.auth_url.trim_end_matches('/'));
        let response = HTTP_CLIENT
            .post(&url)
            .json(&password_auth_body(config))
            .send()
            .await
            .map_err(OpenStackError::transport)?;
        let status = response.status();
        let header_token = subject_token(response.headers());
        let body = response.bytes().await.map_err(OpenStackError::transport)?;
        if !status.is_success() {
            return Err(OpenStackError::Auth(format!(
                "{}: {}",
                status.as_u16(),
                error_message(&body)
            )));
        }
        let token = header_token.ok_or_else(|| {
            OpenStackError::Auth(String::from("response carried no X-Subject-Token"))
        })?;
        let envelope: TokenEnvelope =
            serde_json::from_slice(&body).map_err(OpenStackError::transport)?;

        let region = config.region_name.as_deref();
        let interface = config.interface.as_str();
        let catalog = &envelope.token.catalog;
        let endpoints = Endpoints {
            compute: select_endpoint(catalog, "compute", interface, region)?,
            network: versioned(&select_endpoint(catalog, "network", interface, region)?, "v2.0"),
            image: versioned(&select_endpoint(catalog, "image", interface, region)?, "v2"),
            region: config.region_name.clone(),
        };
        info!(project = %envelope.token.project.id, "keystone session established");
        Ok(Self::from_parts(token, envelope.token.project.id, endpoints))
    }

    /// Builds a session from an existing token, for callers that
    /// authenticate elsewhere.
    #[must_use]
    pub const fn from_parts(token: String, project_id: String, endpoints: Endpoints) -> Self {
        Self {
            token,
            project_id,
            endpoints,
        }
    }

    /// Project the token is scoped to.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Region label recorded on instance handles.
    pub(super) fn region_label(&self) -> &str {
        self.endpoints.region.as_deref().unwrap_or("default")
    }

    pub(super) fn compute_url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoints.compute)
    }

    pub(super) fn network_url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoints.network)
    }

    pub(super) fn image_url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoints.image)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!(%method, url, "openstack request");
        HTTP_CLIENT
            .request(method, url)
            .header("X-Auth-Token", &self.token)
            .header("OpenStack-API-Version", COMPUTE_MICROVERSION)
    }

    pub(super) async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, OpenStackError> {
        decode(&send(self.request(Method::GET, url)).await?)
    }

    pub(super) async fn send_json<B, T>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<T, OpenStackError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        decode(&send(self.request(method, url).json(body)).await?)
    }

    /// Sends a JSON body and returns the raw response body.
    pub(super) async fn send_raw<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<Vec<u8>, OpenStackError> {
        send(self.request(method, url).json(body)).await
    }

    pub(super) async fn delete(&self, url: &str) -> Result<(), OpenStackError> {
        send(self.request(Method::DELETE, url)).await.map(|_| ())
    }
}

fn password_auth_body(config: &OpenStackConfig) -> Value {
    json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": config.username,
                        "domain": { "name": config.user_domain_name },
                        "password": config.password
                    }
                }
            },
            "scope": {
                "project": {
                    "name": config.project_name,
                    "domain": { "name": config.project_domain_name }
                }
            }
        }
    })
}

fn subject_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Subject-Token")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Picks the endpoint for `service` with the given interface, restricted
/// to `region` when one is configured.
pub(crate) fn select_endpoint(
    catalog: &[CatalogEntry],
    service: &str,
    interface: &str,
    region: Option<&str>,
) -> Result<String, OpenStackError> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| {
            endpoint.interface == interface
                && region.is_none_or(|wanted| endpoint.region_id.as_deref() == Some(wanted))
        })
        .map(|endpoint| endpoint.url.trim_end_matches('/').to_owned())
        .ok_or_else(|| OpenStackError::MissingEndpoint {
            service: service.to_owned(),
            interface: interface.to_owned(),
        })
}

/// `base` with `pairs` appended as a form-encoded query string.
pub(crate) fn query_url(base: &str, pairs: &[(&str, &str)]) -> Result<String, OpenStackError> {
    let mut url = Url::parse(base).map_err(OpenStackError::transport)?;
    url.query_pairs_mut().extend_pairs(pairs);
    Ok(url.into())
}

/// Appends the API version unless the catalogue URL already carries it.
pub(crate) fn versioned(url: &str, version: &str) -> String {
    if url.ends_with(&format!("/{version}")) {
        url.to_owned()
    } else {
        format!("{url}/{version}")
    }
}

async fn send(request: RequestBuilder) -> Result<Vec<u8>, OpenStackError> {
    let response = request.send().await.map_err(OpenStackError::transport)?;
    let status = response.status();
    let body = response.bytes().await.map_err(OpenStackError::transport)?;
    if status.is_success() {
        return Ok(body.to_vec());
    }
    Err(OpenStackError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Extracts the human message from Nova (`{"itemNotFound": {"message"}}`),
/// Neutron (`{"NeutronError": {"message"}}`) or plain text bodies.
pub(crate) fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .as_object()
                .and_then(|object| object.values().find_map(|inner| inner.get("message")))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_owned())
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, OpenStackError> {
    serde_json::from_slice(body).map_err(OpenStackError::transport)
}
