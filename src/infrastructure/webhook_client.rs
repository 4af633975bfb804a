//! HTTP client forwarding inbound Calls to the configured webhook

use std::time::Duration;

use reqwest::{Client, Request};
use serde_json::Value;
use tracing::debug;

use crate::application::ports::{CallWebhook, WebhookCallback, WebhookReply};
use crate::support::BackendError;

/// Credentials sent with every webhook request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAuth {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

#[derive(Clone)]
pub struct ReqwestWebhook {
    http: Client,
    url: String,
    auth: WebhookAuth,
}

impl ReqwestWebhook {
    pub fn new(url: impl Into<String>, auth: WebhookAuth, timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
            auth,
        })
    }

    fn build_request(&self, body: &Value) -> Result<Request, BackendError> {
        let builder = self.http.post(&self.url).json(body);
        let builder = match &self.auth {
            WebhookAuth::None => builder,
            WebhookAuth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            WebhookAuth::Bearer { token } => builder.bearer_auth(token),
        };
        Ok(builder.build()?)
    }

    async fn send(http: Client, request: Request) -> Result<WebhookReply, BackendError> {
        let url = request.url().to_string();
        let response = http.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(url = %url, status = %status, "Webhook answered");
        Ok(WebhookReply {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

impl CallWebhook for ReqwestWebhook {
    fn post(&self, body: Value, on_complete: WebhookCallback) {
        let request = match self.build_request(&body) {
            Ok(request) => request,
            Err(e) => return on_complete(Err(e)),
        };
        let http = self.http.clone();
        tokio::spawn(async move {
            on_complete(Self::send(http, request).await);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
    use serde_json::json;
    use tokio::sync::oneshot;

    fn webhook(url: &str, auth: WebhookAuth) -> ReqwestWebhook {
        ReqwestWebhook::new(url, auth, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn basic_auth_header() {
        let hook = webhook(
            "http://localhost:8080/api/v1/ocpp",
            WebhookAuth::Basic {
                username: "user".into(),
                password: "pass".into(),
            },
        );
        let request = hook.build_request(&json!({"action": "Heartbeat"})).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.headers()[AUTHORIZATION], "Basic dXNlcjpwYXNz");
        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn bearer_and_anonymous_headers() {
        let hook = webhook(
            "http://localhost:8080/api/v1/ocpp",
            WebhookAuth::Bearer { token: "s3cret".into() },
        );
        let request = hook.build_request(&json!({})).unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer s3cret");

        let hook = webhook("http://localhost:8080/api/v1/ocpp", WebhookAuth::None);
        let request = hook.build_request(&json!({})).unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn posts_call_and_returns_reply() {
        let app = Router::new().route(
            "/hook",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "messageTypeId": 3,
                    "uniqueId": body["uniqueId"],
                    "payload": {"echo": body["action"]}
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let hook = webhook(&format!("http://{addr}/hook"), WebhookAuth::None);
        let (tx, rx) = oneshot::channel();
        hook.post(
            json!({"uniqueId": "7", "action": "Heartbeat"}),
            Box::new(move |reply| {
                let _ = tx.send(reply);
            }),
        );
        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.reason, "OK");
        let body: Value = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(body["payload"]["echo"], "Heartbeat");
        assert_eq!(body["uniqueId"], "7");
    }
}
