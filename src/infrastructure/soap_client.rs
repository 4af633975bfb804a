//! HTTP client delivering SOAP requests to charge points

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::application::ports::{PushCallback, SoapPush};
use crate::codec::soap;
use crate::support::BackendError;

#[derive(Clone)]
pub struct ReqwestSoapPush {
    http: Client,
}

impl ReqwestSoapPush {
    pub fn new(timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    async fn post(http: Client, address: String, envelope: String) -> Result<String, BackendError> {
        let response = http
            .post(&address)
            .header(reqwest::header::CONTENT_TYPE, soap::CONTENT_TYPE)
            .body(envelope)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(address = %address, status = %status, "SOAP push answered");
        // Faults come back with a 500 status and still carry an envelope.
        if !status.is_success() && body.trim().is_empty() {
            return Err(BackendError::InvalidReply(format!("HTTP {status} from {address}")));
        }
        Ok(body)
    }
}

impl SoapPush for ReqwestSoapPush {
    fn push(&self, address: &str, envelope: String, on_complete: PushCallback) {
        let http = self.http.clone();
        let address = address.to_string();
        tokio::spawn(async move {
            on_complete(Self::post(http, address, envelope).await);
        });
    }
}
