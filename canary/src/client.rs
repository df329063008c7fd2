use crate::error::ClientError;
use std::future::Future;

/// The HTTP surface a worker needs: a GET that yields a status code or a failure.
pub trait HttpClient: Send + Sync + 'static {
    fn get(&self, url: &str) -> impl Future<Output = Result<u16, ClientError>> + Send;
}

/// Default client backed by `reqwest`.
///
/// Per-request timeouts are enforced by the worker, so none is configured here.
#[derive(Clone, Debug, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> impl Future<Output = Result<u16, ClientError>> + Send {
        let request = self.client.get(url);
        async move {
            let response = request.send().await.map_err(map_err)?;
            let status = response.status().as_u16();
            // Drain the body so the measured latency covers the whole response.
            response.bytes().await.map_err(map_err)?;
            Ok(status)
        }
    }
}

fn map_err(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Network(err.to_string())
    }
}
