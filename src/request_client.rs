use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Request, Response};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot, Semaphore};

/// Upstream call failure, carried with enough shape for the caller to map it
/// into its own error taxonomy.
#[derive(Debug)]
pub enum RequestError {
    /// Non-success HTTP status.
    Status { status: u16, url: String },
    /// Connect/transport level failure, DNS, TLS, closed socket.
    Transport(String),
    /// Body arrived but did not deserialize.
    Decode(String),
    /// The limiter task went away; only happens during shutdown.
    ChannelClosed,
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Worth retrying: transport failures, rate limiting and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            RequestError::Transport(_) => true,
            RequestError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Status { status, url } => {
                write!(f, "upstream responded with status {status} for {url}")
            }
            RequestError::Transport(e) => write!(f, "transport error: {e}"),
            RequestError::Decode(e) => write!(f, "failed to decode response: {e}"),
            RequestError::ChannelClosed => write!(f, "request channel closed"),
        }
    }
}

impl std::error::Error for RequestError {}

type Job = (Request, oneshot::Sender<Result<Response, reqwest::Error>>);

/// Rate limited wrapper around [`reqwest::Client`].
///
/// At most `limit_number` requests in flight per `limit_duration` window;
/// excess callers queue on the channel.
#[derive(Debug, Clone)]
pub struct LimitedRequestClient {
    request_tx: mpsc::Sender<Job>,
}

impl LimitedRequestClient {
    pub fn new(client: Client, limit_number: usize, limit_duration: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(100);
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(limit_number));
            while let Some((req, resp_tx)) = rx.recv().await {
                let semaphore = semaphore.clone();
                let client = client.clone();
                tokio::spawn(async move {
                    let permit = semaphore.acquire().await.expect("semaphore never closes");
                    let response = client.execute(req).await;
                    if resp_tx.send(response).is_err() {
                        tracing::debug!("Request abandoned: caller went away");
                    }
                    tokio::time::sleep(limit_duration).await;
                    drop(permit);
                });
            }
        });
        Self { request_tx: tx }
    }

    pub async fn request<T>(&self, req: Request) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
    {
        let response = self.request_raw(req).await?;
        response
            .json()
            .await
            .map_err(|e| RequestError::Decode(e.to_string()))
    }

    pub async fn request_text(&self, req: Request) -> Result<String, RequestError> {
        let response = self.request_raw(req).await?;
        response
            .text()
            .await
            .map_err(|e| RequestError::Decode(e.to_string()))
    }

    async fn request_raw(&self, req: Request) -> Result<Response, RequestError> {
        let (tx, rx) = oneshot::channel();
        let url = req.url().to_string();
        self.request_tx
            .send((req, tx))
            .await
            .map_err(|_| RequestError::ChannelClosed)?;
        let response = rx
            .await
            .map_err(|_| RequestError::ChannelClosed)?
            .map_err(|e| RequestError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            tracing::trace!(url, status = status.as_u16(), "Upstream returned error status");
            return Err(RequestError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response)
    }
}

/// Bounded retry for transient upstream failures: network errors, 429, 5xx.
pub async fn with_retries<T, F, Fut>(attempts: u32, base_delay: Duration, mut op: F) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RequestError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                attempt += 1;
                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                tracing::debug!("Retrying upstream call in {delay:?} after: {e}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, Duration::from_millis(10), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RequestError::Transport("connection reset".into()))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RequestError::Status {
                    status: 404,
                    url: "http://example".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
