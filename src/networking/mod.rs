use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::Client;

use crate::engine::models::{FINGERPRINT_FILE, Fingerprint};
use crate::util::join_path;

const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Fetches one asset body; the download workers only need this much.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, String>> + Send;
}

/// Download and parse `{asset_host}/{masterhash}/fingerprint.json`.
pub async fn fetch_fingerprint<F: AssetFetcher + ?Sized>(
    fetcher: &F,
    asset_host: &str,
    masterhash: &str,
) -> Result<Fingerprint, String> {
    let url = join_path(&[asset_host, masterhash, FINGERPRINT_FILE]);
    debug!("fetch_fingerprint: GET {url}");
    let body = fetcher
        .fetch(&url)
        .await
        .map_err(|e| format!("couldn't fetch any fingerprint for this masterhash: {e}"))?;
    let text =
        String::from_utf8(body).map_err(|e| format!("fingerprint is not valid UTF-8: {e}"))?;
    Fingerprint::from_json(&text)
}

#[derive(Clone)]
pub struct NetworkClient {
    client: Client,
}

impl Default for NetworkClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }
}

impl AssetFetcher for NetworkClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("download request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("download status error: {e}"))?;

        let total = response.content_length();
        let mut body = Vec::with_capacity(total.unwrap_or(0).min(MAX_PREALLOC) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("stream error: {e}"))?;
            body.extend_from_slice(&chunk);
        }

        if let Some(total) = total
            && (body.len() as u64) < total
        {
            return Err(format!(
                "download incomplete: received {} of {} bytes",
                body.len(),
                total
            ));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    /// Answer one HTTP request with `status` and `body`, returning the request line.
    async fn serve_once(status: &'static str, body: Vec<u8>) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request)
                .lines()
                .next()
                .unwrap_or_default()
                .to_owned()
        });
        (base, task)
    }

    #[tokio::test]
    async fn fetches_asset_bytes() {
        let (base, server) = serve_once("200 OK", vec![0, 159, 146, 150]).await;
        let body = NetworkClient::new()
            .fetch(&format!("{base}/{SHA}/sc/ui.sc"))
            .await
            .unwrap();
        assert_eq!(body, vec![0, 159, 146, 150]);
        assert_eq!(server.await.unwrap(), format!("GET /{SHA}/sc/ui.sc HTTP/1.1"));
    }

    #[tokio::test]
    async fn http_errors_are_reported() {
        let (base, _server) = serve_once("404 Not Found", b"missing".to_vec()).await;
        let err = NetworkClient::new()
            .fetch(&format!("{base}/{SHA}/nope.csv"))
            .await
            .unwrap_err();
        assert!(err.contains("404"), "{err}");
    }

    #[tokio::test]
    async fn fetches_and_parses_fingerprint() {
        let json = format!(r#"{{"version":"1.0","sha":"{SHA}","files":[{{"file":"a.csv"}}]}}"#);
        let (base, server) = serve_once("200 OK", json.into_bytes()).await;
        let fingerprint = fetch_fingerprint(&NetworkClient::new(), &base, SHA)
            .await
            .unwrap();
        assert_eq!(fingerprint.masterhash().unwrap(), SHA);
        assert_eq!(fingerprint.files.len(), 1);
        assert_eq!(
            server.await.unwrap(),
            format!("GET /{SHA}/{FINGERPRINT_FILE} HTTP/1.1")
        );
    }
}
