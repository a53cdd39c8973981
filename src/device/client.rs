use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Auth;

/// Particle cloud API host
pub const PARTICLE_API_URL: &str = "https://api.particle.io";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Desk controller operations (enables testing via mocking)
///
/// Production code uses [`ParticleDevice`]; tests use `MockDeskDevice`.
#[cfg_attr(test, mockall::automock)]
pub trait DeskDevice: Send + Sync {
    /// Ask the controller to move to `height_cm`
    ///
    /// # Errors
    /// Returns error if the request fails or the cloud rejects it
    fn set_height(&self, height_cm: u32) -> Result<(), DeviceError>;

    /// Read the current height in cm
    ///
    /// # Errors
    /// Returns error if the request fails or the reply has no height
    fn get_height(&self) -> Result<u32, DeviceError>;
}

/// Errors talking to the desk controller
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Could not reach the cloud at all
    #[error("desk cloud unreachable: {0}")]
    Offline(#[source] reqwest::Error),

    /// Transport failure after connecting
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The cloud answered with an error status
    #[error("request failed with status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, for the log
        body: String,
    },

    /// The reply didn't contain what we asked for
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl DeviceError {
    /// Classify a transport error
    ///
    /// Only a failure to connect means offline; a server that stops
    /// answering is an ordinary error.
    #[must_use]
    pub fn from_transport(error: reqwest::Error) -> Self {
        if error.is_connect() {
            Self::Offline(error)
        } else {
            Self::Http(error)
        }
    }

    /// True if the network is the problem
    #[must_use]
    pub const fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }
}

#[derive(Debug, Deserialize)]
struct FunctionResponse {
    return_value: Option<serde_json::Value>,
}

/// Parse the reply of a cloud function call into a height
fn parse_height_response(body: &str) -> Result<u32, DeviceError> {
    let response: FunctionResponse = serde_json::from_str(body)
        .map_err(|e| DeviceError::InvalidResponse(format!("{e}: {body}")))?;

    response
        .return_value
        .as_ref()
        .and_then(serde_json::Value::as_u64)
        .and_then(|height| u32::try_from(height).ok())
        .ok_or_else(|| DeviceError::InvalidResponse(format!("no height in {body}")))
}

/// A desk controller attached to the Particle cloud
pub struct ParticleDevice {
    client: Client,
    base_url: String,
    access_token: String,
}

impl ParticleDevice {
    /// Create a client for the device in `auth`
    ///
    /// # Errors
    /// Returns error if the HTTP client can't be built
    pub fn new(auth: &Auth) -> Result<Self, DeviceError> {
        Self::with_api_url(auth, PARTICLE_API_URL)
    }

    /// Create a client against a different API host
    ///
    /// # Errors
    /// Returns error if the HTTP client can't be built
    pub fn with_api_url(auth: &Auth, api_url: &str) -> Result<Self, DeviceError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: device_url(api_url, &auth.device_id),
            access_token: auth.access_token.clone(),
        })
    }

    fn call_function(&self, name: &str, arg: Option<&str>) -> Result<String, DeviceError> {
        let url = format!("{}/{}", self.base_url, name);
        let body = arg.map_or_else(String::new, |arg| format!("arg={arg}"));

        debug!(function = name, arg = ?arg, "calling desk function");

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .map_err(DeviceError::from_transport)?;

        let status = response.status();
        let text = response.text().map_err(DeviceError::from_transport)?;

        if !status.is_success() {
            return Err(DeviceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(text)
    }
}

impl DeskDevice for ParticleDevice {
    fn set_height(&self, height_cm: u32) -> Result<(), DeviceError> {
        self.call_function("setHeight", Some(&height_cm.to_string()))?;
        info!(height_cm, "requested desk height");
        Ok(())
    }

    fn get_height(&self) -> Result<u32, DeviceError> {
        let body = self.call_function("getHeight", None)?;
        let height = parse_height_response(&body)?;
        debug!(height_cm = height, "read desk height");
        Ok(height)
    }
}

/// REST base for one device
#[must_use]
pub fn device_url(api_url: &str, device_id: &str) -> String {
    format!("{}/v1/devices/{}", api_url.trim_end_matches('/'), device_id)
}
