//! S3 wire client implementing the storage capability surface
//!
//! HTTP/1.1 over hyper with a tuned connection pool, native-tls, and
//! TCP_NODELAY. Responses are parsed with byte-slice tag matching to avoid
//! per-tag allocations. Throttling responses (429/503) retry with
//! exponential backoff and jitter; every other failure surfaces to the
//! caller with the provider's error code parsed out of the XML body.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

use super::signer::{self, S3SignerV4};
use super::types::{Credentials, DeleteFailure, DeleteOutcome, ListPage, SignMethod};
use super::{ClientError, Result, StorageClient};

/// Hex lookup table for URI encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// S3 bulk delete accepts at most this many keys per request
const MAX_BULK_DELETE_KEYS: usize = 1000;

const MAX_RETRIES: u32 = 3;

/// Pseudo-random jitter in 0.0..1.0 from the clock's nanoseconds,
/// avoiding a rand dependency for one backoff tweak.
fn rand_jitter() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

async fn backoff(attempt: u32) {
    let base_ms = 100u64 * (1 << attempt);
    let jitter = (base_ms as f64 * 0.2 * rand_jitter()) as u64;
    tokio::time::sleep(Duration::from_millis(base_ms + jitter)).await;
}

/// S3 client over a single endpoint.
///
/// Clone is cheap - the underlying HTTP client uses Arc internally, so
/// clones share one connection pool.
#[derive(Clone)]
pub struct S3Client {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    signer: S3SignerV4,
    endpoint: String,
}

impl S3Client {
    /// Create a client for `endpoint`, or the region's default AWS endpoint
    /// when none is given.
    pub fn new(
        access_key: String,
        secret_key: String,
        region: Option<String>,
        endpoint: Option<String>,
    ) -> Self {
        let region = region.unwrap_or_else(|| "us-east-1".to_string());
        let endpoint = endpoint
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", region))
            .trim_end_matches('/')
            .to_string();

        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = TlsConnector::new().expect("Failed to build TLS connector");
        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(64)
            .retry_canceled_requests(true)
            .set_host(true)
            .build(https);

        let signer = S3SignerV4::new(access_key, secret_key, Some(region));

        Self {
            client,
            signer,
            endpoint,
        }
    }

    /// Send a signed request, retrying 429/503 with backoff.
    ///
    /// Non-empty bodies are signed with UNSIGNED-PAYLOAD unless `sign_body`
    /// asks for a real payload hash (bulk delete requires one).
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
        sign_body: bool,
    ) -> Result<(StatusCode, Bytes)> {
        for attempt in 0..=MAX_RETRIES {
            // Re-sign on each attempt; the timestamp changes
            let signed_headers = if body.is_empty() {
                self.signer.sign(method.as_str(), url, headers.clone(), b"")
            } else if sign_body {
                self.signer.sign(method.as_str(), url, headers.clone(), &body)
            } else {
                self.signer
                    .sign_unsigned_payload(method.as_str(), url, headers.clone())
            };

            let mut req = Request::builder().method(method.clone()).uri(url);
            for (key, value) in signed_headers.iter() {
                req = req.header(key, value);
            }
            let request = req.body(Full::new(body.clone()))?;

            match self.client.request(request).await {
                Ok(response) => {
                    let status = response.status();
                    let retryable = status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE;

                    if retryable && attempt < MAX_RETRIES {
                        // Drain the body to return the connection to the pool
                        let _ = response.collect().await;
                        backoff(attempt).await;
                        continue;
                    }

                    let body_bytes = response.collect().await?.to_bytes();
                    return Ok((status, body_bytes));
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        backoff(attempt).await;
                        continue;
                    }
                    return Err(ClientError::Transport(e.to_string()));
                }
            }
        }
        unreachable!()
    }

    /// Turn a non-success response into a typed error, parsing the S3 error
    /// XML when the body carries one.
    fn error_from_response(status: StatusCode, body: &[u8]) -> ClientError {
        let (code, message) = parse_error_body(body).unwrap_or_else(|| {
            (
                String::new(),
                String::from_utf8_lossy(body).trim().to_string(),
            )
        });
        ClientError::Response {
            status: status.as_u16(),
            code,
            message,
        }
    }

    /// Encode an object key, preserving forward slashes.
    /// Borrowed when no encoding is needed - the common case.
    fn encode_key(key: &str) -> Cow<'_, str> {
        let needs_encoding = key.bytes().any(|b| {
            !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/')
        });

        if !needs_encoding {
            return Cow::Borrowed(key);
        }

        let mut result = String::with_capacity(key.len() + 32);
        for byte in key.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                    result.push(byte as char);
                }
                _ => {
                    result.push('%');
                    result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
        Cow::Owned(result)
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/{}", self.endpoint, bucket)
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, Self::encode_key(key))
    }

    fn list_url(&self, bucket: &str, prefix: &str) -> String {
        let mut url = self.bucket_url(bucket);
        url.push_str("/?list-type=2&max-keys=1000");
        if !prefix.is_empty() {
            url.push_str("&prefix=");
            url.push_str(&signer::uri_encode(prefix, true));
        }
        url
    }
}

#[async_trait]
impl StorageClient for S3Client {
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let url = self.bucket_url(bucket);
        let (status, body) = self
            .send(Method::PUT, &url, BTreeMap::new(), Bytes::new(), false)
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        let url = self.bucket_url(bucket);
        let (status, body) = self
            .send(Method::HEAD, &url, BTreeMap::new(), Bytes::new(), false)
            .await?;

        if status == StatusCode::NOT_FOUND {
            // HEAD responses carry no body to parse a code from
            return Err(ClientError::Response {
                status: 404,
                code: "NotFound".to_string(),
                message: format!("bucket {} not found", bucket),
            });
        }
        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let url = format!("{}/", self.endpoint);
        let (status, body) = self
            .send(Method::GET, &url, BTreeMap::new(), Bytes::new(), false)
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }
        parse_bucket_list(&body)
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        let url = self.object_url(bucket, key);

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/octet-stream".to_string(),
        );
        headers.insert("content-length".to_string(), body.len().to_string());

        let (status, resp_body) = self.send(Method::PUT, &url, headers, body, false).await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &resp_body));
        }
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let url = self.object_url(bucket, key);
        let (status, body) = self
            .send(Method::GET, &url, BTreeMap::new(), Bytes::new(), false)
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }
        Ok(body)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let url = self.object_url(bucket, key);
        let (status, body) = self
            .send(Method::DELETE, &url, BTreeMap::new(), Bytes::new(), false)
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteOutcome> {
        if keys.is_empty() {
            return Ok(DeleteOutcome::default());
        }
        if keys.len() > MAX_BULK_DELETE_KEYS {
            return Err(ClientError::InvalidRequest(format!(
                "cannot delete more than {} objects at once",
                MAX_BULK_DELETE_KEYS
            )));
        }

        let mut xml = String::with_capacity(keys.len() * 60 + 80);
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Delete>");
        for key in keys {
            xml.push_str("<Object><Key>");
            xml_escape_into(&mut xml, key);
            xml.push_str("</Key></Object>");
        }
        xml.push_str("</Delete>");
        let xml_bytes = Bytes::from(xml.into_bytes());

        let md5_hash = md5::compute(&xml_bytes);
        let md5_base64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &md5_hash[..]);

        // Explicit empty value so the canonical query string is "delete=",
        // matching SigV4 expectations for valueless params
        let url = format!("{}/?delete=", self.bucket_url(bucket));

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());
        headers.insert("content-length".to_string(), xml_bytes.len().to_string());
        headers.insert("content-md5".to_string(), md5_base64);

        // Bulk delete signs the real body hash; the XML is small
        let (status, body) = self.send(Method::POST, &url, headers, xml_bytes, true).await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }
        parse_delete_outcome(&body)
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<ListPage> {
        let url = self.list_url(bucket, prefix);
        let (status, body) = self
            .send(Method::GET, &url, BTreeMap::new(), Bytes::new(), false)
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }
        parse_list_page(&body)
    }

    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        method: SignMethod,
        expires_secs: u64,
        credentials: &Credentials,
    ) -> Result<String> {
        let url = self.object_url(bucket, key);
        Ok(signer::presign(credentials, method, &url, expires_secs))
    }
}

/// Parse a ListObjectsV2 response into keys plus the truncation flag.
fn parse_list_page(xml_data: &[u8]) -> Result<ListPage> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut page = ListPage::default();
    let mut in_contents = false;
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Contents" {
                    in_contents = true;
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" if in_contents => {
                        page.keys.push(std::mem::take(&mut current_text));
                    }
                    b"Contents" => {
                        in_contents = false;
                    }
                    b"IsTruncated" => {
                        page.truncated = current_text == "true";
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ClientError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(page)
}

/// Parse a DeleteObjects response into deleted keys and per-key failures.
fn parse_delete_outcome(xml_data: &[u8]) -> Result<DeleteOutcome> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut outcome = DeleteOutcome::default();
    let mut in_error = false;
    let mut error_key = String::new();
    let mut error_code = String::new();
    let mut error_message = String::new();
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Error" {
                    in_error = true;
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" => {
                        if in_error {
                            error_key = std::mem::take(&mut current_text);
                        } else {
                            outcome.deleted.push(std::mem::take(&mut current_text));
                        }
                    }
                    b"Code" if in_error => {
                        error_code = std::mem::take(&mut current_text);
                    }
                    b"Message" if in_error => {
                        error_message = std::mem::take(&mut current_text);
                    }
                    b"Error" => {
                        outcome.errors.push(DeleteFailure {
                            key: std::mem::take(&mut error_key),
                            code: std::mem::take(&mut error_code),
                            message: std::mem::take(&mut error_message),
                        });
                        in_error = false;
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ClientError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(outcome)
}

/// Parse a ListAllMyBucketsResult response into bucket names.
fn parse_bucket_list(xml_data: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut names = Vec::new();
    let mut in_bucket = false;
    let mut current_text = String::with_capacity(64);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Bucket" {
                    in_bucket = true;
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Name" if in_bucket => {
                        names.push(std::mem::take(&mut current_text));
                    }
                    b"Bucket" => {
                        in_bucket = false;
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ClientError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(names)
}

/// Parse an S3 error body (`<Error><Code>..<Message>..`) into (code, message).
/// Returns None when the body is not the expected XML shape.
fn parse_error_body(xml_data: &[u8]) -> Option<(String, String)> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut code = String::new();
    let mut message = String::new();
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().ok()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Code" => code = std::mem::take(&mut current_text),
                    b"Message" => message = std::mem::take(&mut current_text),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    if code.is_empty() {
        None
    } else {
        Some((code, message))
    }
}

/// Escape XML special characters into an existing buffer
fn xml_escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_key_no_encoding() {
        let key = "fizz/avatar.png";
        let result = S3Client::encode_key(key);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "fizz/avatar.png");
    }

    #[test]
    fn test_encode_key_with_encoding() {
        let key = "fizz/my avatar.png";
        let result = S3Client::encode_key(key);
        assert!(matches!(result, Cow::Owned(_)));
        assert_eq!(result, "fizz/my%20avatar.png");
    }

    #[test]
    fn test_xml_escape() {
        let mut buf = String::new();
        xml_escape_into(&mut buf, "a&b<c>");
        assert_eq!(buf, "a&amp;b&lt;c&gt;");
    }

    #[test]
    fn test_urls() {
        let client = S3Client::new(
            "access".to_string(),
            "secret".to_string(),
            None,
            Some("http://localhost:9000/".to_string()),
        );

        assert_eq!(client.bucket_url("b"), "http://localhost:9000/b");
        assert_eq!(
            client.object_url("b", "fizz/foo.jpg"),
            "http://localhost:9000/b/fizz/foo.jpg"
        );
        assert_eq!(
            client.list_url("b", "fizz"),
            "http://localhost:9000/b/?list-type=2&max-keys=1000&prefix=fizz"
        );
    }

    #[test]
    fn test_default_endpoint_from_region() {
        let client = S3Client::new(
            "access".to_string(),
            "secret".to_string(),
            Some("eu-west-1".to_string()),
            None,
        );
        assert_eq!(client.endpoint, "https://s3.eu-west-1.amazonaws.com");
    }

    #[test]
    fn test_parse_list_page_truncated() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>shared</Name>
  <Prefix>fizz</Prefix>
  <KeyCount>2</KeyCount>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>fizz/foo.jpg</Key><Size>10</Size></Contents>
  <Contents><Key>fizz/bar.png</Key><Size>20</Size></Contents>
</ListBucketResult>"#;

        let page = parse_list_page(xml).unwrap();
        assert_eq!(page.keys, vec!["fizz/foo.jpg", "fizz/bar.png"]);
        assert!(page.truncated);
    }

    #[test]
    fn test_parse_list_page_empty() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>shared</Name>
  <KeyCount>0</KeyCount>
  <IsTruncated>false</IsTruncated>
</ListBucketResult>"#;

        let page = parse_list_page(xml).unwrap();
        assert!(page.keys.is_empty());
        assert!(!page.truncated);
    }

    #[test]
    fn test_parse_delete_outcome_with_errors() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<DeleteResult>
  <Deleted><Key>fizz/foo.jpg</Key></Deleted>
  <Error><Key>fizz/locked.bin</Key><Code>AccessDenied</Code><Message>Access Denied</Message></Error>
</DeleteResult>"#;

        let outcome = parse_delete_outcome(xml).unwrap();
        assert_eq!(outcome.deleted, vec!["fizz/foo.jpg"]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].key, "fizz/locked.bin");
        assert_eq!(outcome.errors[0].code, "AccessDenied");
    }

    #[test]
    fn test_parse_bucket_list() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult>
  <Owner><ID>abc</ID><DisplayName>owner</DisplayName></Owner>
  <Buckets>
    <Bucket><Name>alpha</Name><CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket>
    <Bucket><Name>beta</Name><CreationDate>2024-01-02T00:00:00.000Z</CreationDate></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;

        let names = parse_bucket_list(xml).unwrap();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_parse_error_body() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>NoSuchKey</Code>
  <Message>The specified key does not exist.</Message>
  <Key>fizz/missing.png</Key>
</Error>"#;

        let (code, message) = parse_error_body(xml).unwrap();
        assert_eq!(code, "NoSuchKey");
        assert_eq!(message, "The specified key does not exist.");
    }

    #[test]
    fn test_parse_error_body_not_xml() {
        assert!(parse_error_body(b"upstream timed out").is_none());
    }
}
