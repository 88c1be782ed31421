//! tus over HTTP.
//!
//! Async HTTP transport using `reqwest` with Bearer token authentication.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Response, StatusCode, Url};
use streamup_protocol::constants::{OFFSET_OCTET_STREAM, TUS_VERSION, headers};
use streamup_protocol::{encode_metadata, parse_offset};
use streamup_transfer::Chunk;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::transport::{ChunkResponse, CreatedUpload, TransportFuture, UploadTransport};
use crate::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};

/// Longest response body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client settings.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: concat!("streamup/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// [`UploadTransport`] speaking tus 1.0.0 over HTTP.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport that authenticates every request with `auth_token`.
    pub fn new(auth_token: &str, options: &HttpOptions) -> Result<Self, TransportError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {auth_token}"))
                .map_err(|_| TransportError::Request("auth token is not a valid header".into()))?,
        );
        default_headers.insert(
            HeaderName::from_bytes(headers::TUS_RESUMABLE.as_bytes())
                .map_err(|e| TransportError::Request(e.to_string()))?,
            HeaderValue::from_static(TUS_VERSION),
        );
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&options.user_agent)
                .map_err(|_| TransportError::Request("invalid user agent".into()))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .build()?;

        Ok(Self { http })
    }

    async fn create_upload(
        &self,
        endpoint: &str,
        upload_length: u64,
        metadata: &[(String, String)],
    ) -> Result<CreatedUpload, TransportError> {
        let base = Url::parse(endpoint)
            .map_err(|e| TransportError::Request(format!("invalid endpoint {endpoint}: {e}")))?;

        let mut req = self
            .http
            .post(base.clone())
            .header(headers::UPLOAD_LENGTH, upload_length.to_string());
        if !metadata.is_empty() {
            req = req.header(headers::UPLOAD_METADATA, encode_metadata(metadata)?);
        }

        let resp = check_status(req.send().await?).await?;

        let location = header_str(&resp, headers::LOCATION)
            .ok_or(TransportError::MissingHeader(headers::LOCATION))?;
        let location = base
            .join(location)
            .map_err(|_| TransportError::Protocol(streamup_protocol::ProtocolError::InvalidHeader {
                header: headers::LOCATION,
                value: location.to_string(),
            }))?
            .to_string();
        let media_id = header_str(&resp, headers::STREAM_MEDIA_ID).map(str::to_string);

        debug!(%location, media_id = ?media_id, "upload created");
        Ok(CreatedUpload { location, media_id })
    }

    async fn patch_chunk(
        &self,
        location: &str,
        chunk: &Chunk,
    ) -> Result<ChunkResponse, TransportError> {
        let mut req = self
            .http
            .patch(location)
            .header(headers::UPLOAD_OFFSET, chunk.offset.to_string())
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM);
        if let Some(checksum) = &chunk.checksum {
            req = req.header(headers::UPLOAD_CHECKSUM, format!("sha256 {checksum}"));
        }

        trace!(offset = chunk.offset, len = chunk.len(), "sending chunk");
        // Shares the buffer with `chunk`.
        let resp = req.body(chunk.data.clone()).send().await?;
        if resp.status() == StatusCode::CONFLICT {
            return Ok(ChunkResponse::Conflict);
        }
        let resp = check_status(resp).await?;
        let offset = read_offset(&resp)?;
        Ok(ChunkResponse::Accepted { offset })
    }

    async fn head_offset(&self, location: &str) -> Result<u64, TransportError> {
        let resp = check_status(self.http.head(location).send().await?).await?;
        read_offset(&resp)
    }
}

impl UploadTransport for HttpTransport {
    fn create<'a>(
        &'a self,
        endpoint: &'a str,
        upload_length: u64,
        metadata: &'a [(String, String)],
    ) -> TransportFuture<'a, CreatedUpload> {
        Box::pin(self.create_upload(endpoint, upload_length, metadata))
    }

    fn send_chunk<'a>(
        &'a self,
        location: &'a str,
        chunk: &'a Chunk,
    ) -> TransportFuture<'a, ChunkResponse> {
        Box::pin(self.patch_chunk(location, chunk))
    }

    fn query_offset<'a>(&'a self, location: &'a str) -> TransportFuture<'a, u64> {
        Box::pin(self.head_offset(location))
    }
}

/// Turns a non-2xx response into [`TransportError::Status`].
async fn check_status(resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

fn header_str<'r>(resp: &'r Response, name: &str) -> Option<&'r str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}

fn read_offset(resp: &Response) -> Result<u64, TransportError> {
    let value = header_str(resp, headers::UPLOAD_OFFSET)
        .ok_or(TransportError::MissingHeader(headers::UPLOAD_OFFSET))?;
    Ok(parse_offset(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Starts a mock HTTP server that answers one request with `response`
    /// and returns the raw request it received.
    async fn mock_server(response: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
            request
        });

        (url, handle)
    }

    /// Reads headers plus `content-length` body bytes.
    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            let n = stream.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let body_len = text[..end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn transport() -> HttpTransport {
        HttpTransport::new("test-token", &HttpOptions::default()).unwrap()
    }

    fn chunk(offset: u64, data: &[u8]) -> Chunk {
        Chunk {
            offset,
            data: Bytes::copy_from_slice(data),
            is_final: false,
            checksum: None,
        }
    }

    #[tokio::test]
    async fn create_sends_tus_headers_and_resolves_location() {
        let (url, handle) = mock_server(
            "HTTP/1.1 201 Created\r\nLocation: /uploads/abc123?tusv2=true\r\nstream-media-id: abc123\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .into(),
        )
        .await;

        let endpoint = format!("{url}/client/v4/accounts/acct/stream");
        let metadata = vec![("name".to_string(), "clip.mp4".to_string())];
        let created = transport().create(&endpoint, 1234, &metadata).await.unwrap();

        assert_eq!(created.location, format!("{url}/uploads/abc123?tusv2=true"));
        assert_eq!(created.media_id.as_deref(), Some("abc123"));

        let request = handle.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("post /client/v4/accounts/acct/stream"));
        assert!(request.contains("tus-resumable: 1.0.0"));
        assert!(request.contains("upload-length: 1234"));
        assert!(request.contains("upload-metadata: name y2xpcc5tcdq="));
        assert!(request.contains("authorization: bearer test-token"));
    }

    #[tokio::test]
    async fn create_keeps_absolute_location() {
        let (url, handle) = mock_server(
            "HTTP/1.1 201 Created\r\nLocation: https://upload.example.com/tus/xyz\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .into(),
        )
        .await;

        let created = transport().create(&url, 10, &[]).await.unwrap();
        assert_eq!(created.location, "https://upload.example.com/tus/xyz");
        assert!(created.media_id.is_none());

        let request = handle.await.unwrap().to_ascii_lowercase();
        assert!(!request.contains("upload-metadata"));
    }

    #[tokio::test]
    async fn create_without_location_is_error() {
        let (url, handle) = mock_server(
            "HTTP/1.1 201 Created\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".into(),
        )
        .await;

        let err = transport().create(&url, 10, &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::MissingHeader("Location")));
        handle.abort();
    }

    #[tokio::test]
    async fn create_unauthorized_is_auth_error() {
        let body = r#"{"success":false,"errors":[{"code":10000,"message":"Authentication error"}]}"#;
        let (url, handle) = mock_server(format!(
            "HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;

        let err = transport().create(&url, 10, &[]).await.unwrap_err();
        assert!(err.is_auth());
        assert!(err.to_string().contains("Authentication error"));
        handle.abort();
    }

    #[tokio::test]
    async fn patch_sends_offset_and_body() {
        let (url, handle) = mock_server(
            "HTTP/1.1 204 No Content\r\nUpload-Offset: 15\r\nTus-Resumable: 1.0.0\r\nConnection: close\r\n\r\n"
                .into(),
        )
        .await;

        let location = format!("{url}/uploads/abc");
        let resp = transport()
            .send_chunk(&location, &chunk(10, b"HELLO"))
            .await
            .unwrap();
        assert_eq!(resp, ChunkResponse::Accepted { offset: 15 });

        let request = handle.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(lower.starts_with("patch /uploads/abc"));
        assert!(lower.contains("upload-offset: 10"));
        assert!(lower.contains("content-type: application/offset+octet-stream"));
        assert!(request.ends_with("HELLO"));
    }

    #[tokio::test]
    async fn patch_sends_checksum_when_present() {
        let (url, handle) = mock_server(
            "HTTP/1.1 204 No Content\r\nUpload-Offset: 5\r\nConnection: close\r\n\r\n".into(),
        )
        .await;

        let mut c = chunk(0, b"hello");
        c.checksum = Some("LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=".into());
        transport().send_chunk(&url, &c).await.unwrap();

        let request = handle.await.unwrap().to_ascii_lowercase();
        assert!(request.contains("upload-checksum: sha256 lpjnul+wow4m6dsqxbninhswhlwfp0jecwqzypolmcq="));
    }

    #[tokio::test]
    async fn patch_conflict_maps_to_conflict() {
        let (url, handle) = mock_server(
            "HTTP/1.1 409 Conflict\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".into(),
        )
        .await;

        let resp = transport().send_chunk(&url, &chunk(0, b"x")).await.unwrap();
        assert_eq!(resp, ChunkResponse::Conflict);
        handle.abort();
    }

    #[tokio::test]
    async fn patch_server_error_is_transient() {
        let (url, handle) = mock_server(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy"
                .into(),
        )
        .await;

        let err = transport().send_chunk(&url, &chunk(0, b"x")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.status(), Some(503));
        handle.abort();
    }

    #[tokio::test]
    async fn patch_missing_offset_is_error() {
        let (url, handle) = mock_server(
            "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".into(),
        )
        .await;

        let err = transport().send_chunk(&url, &chunk(0, b"x")).await.unwrap_err();
        assert!(matches!(err, TransportError::MissingHeader("Upload-Offset")));
        assert!(!err.is_transient());
        handle.abort();
    }

    #[tokio::test]
    async fn head_reads_offset() {
        let (url, handle) = mock_server(
            "HTTP/1.1 200 OK\r\nUpload-Offset: 4096\r\nUpload-Length: 8192\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .into(),
        )
        .await;

        let offset = transport().query_offset(&url).await.unwrap();
        assert_eq!(offset, 4096);

        let request = handle.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("head /"));
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = transport()
            .query_offset(&format!("http://127.0.0.1:{port}/uploads/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn invalid_token_rejected() {
        assert!(HttpTransport::new("bad\ntoken", &HttpOptions::default()).is_err());
    }
}
