use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;

use crate::blocking::{deliver_on_worker, Outcome};
use crate::error::{BridgeError, Result};

use super::filesystem::{Transport, TransportCallback};

/// HTTP transport running each request on its own worker thread and
/// reporting back through the callback, the way OS session APIs do.
///
/// One client, and with it one connection pool, serves every request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::build(Client::builder())
    }

    pub fn with_user_agent(user_agent: impl Into<String>) -> Result<Self> {
        Self::build(Client::builder().user_agent(user_agent.into()))
    }

    fn build(builder: reqwest::blocking::ClientBuilder) -> Result<Self> {
        let client = builder
            .build()
            .map_err(|err| BridgeError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    fn get(client: &Client, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let network = |message: String| BridgeError::Network {
            url: url.to_string(),
            message,
        };
        let response = client.get(url).timeout(timeout).send().map_err(|err| {
            if err.is_timeout() {
                BridgeError::Timeout { after: timeout }
            } else {
                network(err.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(network(format!("server responded with {status}")));
        }
        let body = response.bytes().map_err(|err| network(err.to_string()))?;
        Ok(body.to_vec())
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str, timeout: Duration, callback: TransportCallback) {
        let client = self.client.clone();
        let url = url.to_string();
        deliver_on_worker(
            "bridge-http",
            move || {
                let result = Self::get(&client, &url, timeout);
                debug!("http transport finished {url}: ok={}", result.is_ok());
                result.map(Outcome::Ready)
            },
            callback,
        );
    }
}
