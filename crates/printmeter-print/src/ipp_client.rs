// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network print backend: IPP Print-Job over HTTP.
//
// Requests are encoded by hand with `ipp_codec` and posted with `reqwest`:
//   - Print-Job     (RFC 8011 §4.2.1)
//   - printer list  (CUPS `/printers` HTML page)

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, error, info, instrument, warn};

use printmeter_core::error::{PrintmeterError, Result};
use printmeter_core::types::PrinterInfo;

use crate::dispatcher::{DispatchRequest, PrintDispatcher};
use crate::ipp_codec::{
    self, IPP_CONTENT_TYPE, IppMessage, PrintJobAttributes, TAG_JOB_ATTRIBUTES,
};

/// Default IPP port.
pub const IPP_DEFAULT_PORT: u16 = 631;

/// Transport timeout backing up a hung printer.
pub const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(60);

/// Anchor tags on the CUPS printer list, e.g. `<a href="/printers/lab">Lab</a>`.
static PRINTER_LINK: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a[^>]+href=["']/printers/([^"'/>]+)["'][^>]*>([^<]+)</a>"#).ok()
});

/// IPP-over-HTTP dispatcher.
///
/// Holds one pooled HTTP client; clone-free and safe to share.
pub struct IppDispatcher {
    http: reqwest::Client,
}

impl IppDispatcher {
    /// Create a dispatcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        // Printers are addressed directly, never through a proxy.
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| PrintmeterError::DispatchFailed(format!("http client: {e}")))?;
        Ok(Self { http })
    }

    /// Submit a Print-Job and return the printer's `job-uri` or `job-id`.
    #[instrument(skip(self, request), fields(printer = %request.printer, bytes = request.document.len()))]
    pub async fn print_job(&self, request: &DispatchRequest) -> Result<String> {
        let url = transport_url(&request.printer)?;

        let mut body = ipp_codec::encode_print_job(&PrintJobAttributes {
            printer_uri: &request.printer,
            user_name: request.user_name.as_deref(),
            job_name: request.job_name.as_deref(),
            document_format: Some(request.mime_type.as_str()),
        });
        body.extend_from_slice(&request.document);

        debug!(%url, "sending Print-Job");
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, IPP_CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, IPP_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| PrintmeterError::DispatchFailed(format!("Print-Job: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            error!(%status, "printer rejected HTTP request");
            return Err(PrintmeterError::DispatchFailed(format!("http status: {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PrintmeterError::DispatchFailed(format!("read response: {e}")))?;
        let message = IppMessage::parse(&bytes)
            .map_err(|e| PrintmeterError::DispatchFailed(format!("decode response: {e}")))?;

        if message.code != ipp_codec::STATUS_OK {
            let name = ipp_codec::status_name(message.code);
            error!(status = %name, "Print-Job failed");
            return Err(PrintmeterError::DispatchFailed(format!("ipp error: {name}")));
        }

        let dispatch_id = job_identifier(&message).unwrap_or_else(|| "ok".to_string());
        info!(%dispatch_id, "Print-Job accepted");
        Ok(dispatch_id)
    }

    /// Fetch the CUPS printer list page from `host` and extract printers.
    #[instrument(skip(self))]
    pub async fn fetch_printers(&self, host: &str) -> Result<Vec<PrinterInfo>> {
        let base = listing_base(host)?;
        let url = format!("{base}/printers");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PrintmeterError::DispatchFailed(format!("list printers: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PrintmeterError::DispatchFailed(format!("http status: {status}")));
        }
        let html = response
            .text()
            .await
            .map_err(|e| PrintmeterError::DispatchFailed(format!("read printer list: {e}")))?;

        let printers = parse_printer_list(&html, &base);
        info!(count = printers.len(), "printer list fetched");
        Ok(printers)
    }
}

impl PrintDispatcher for IppDispatcher {
    async fn send(&self, request: DispatchRequest) -> Result<String> {
        self.print_job(&request).await
    }

    async fn list_printers(&self, host: &str) -> Result<Vec<PrinterInfo>> {
        self.fetch_printers(host).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// First `job-uri` or `job-id` value in the job attributes group.
fn job_identifier(message: &IppMessage) -> Option<String> {
    message
        .groups_with(TAG_JOB_ATTRIBUTES)
        .flat_map(|group| group.attributes.iter())
        .find(|attr| attr.name == "job-uri" || attr.name == "job-id")
        .map(|attr| attr.value_string())
}

/// Split `scheme://authority/rest` into its three parts.
fn split_uri(uri: &str) -> Option<(&str, &str, &str)> {
    let (scheme, rest) = uri.split_once("://")?;
    let (authority, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return None;
    }
    Some((scheme, authority, path))
}

/// Whether an authority (`host`, `host:port`, `[v6]:port`) names a port.
fn has_port(authority: &str) -> bool {
    let host_end = authority.rfind(']').map_or(0, |idx| idx + 1);
    authority[host_end..]
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

fn with_default_port(authority: &str) -> String {
    if has_port(authority) {
        authority.to_string()
    } else {
        format!("{authority}:{IPP_DEFAULT_PORT}")
    }
}

/// HTTP URL to post a Print-Job to for the given printer URI.
///
/// `ipp://` maps to `http://` and `ipps://` to `https://`, both defaulting to
/// port 631; `http(s)://` URIs are used as given.
fn transport_url(printer_uri: &str) -> Result<String> {
    let invalid = || PrintmeterError::DispatchFailed(format!("invalid printer uri '{printer_uri}'"));
    let (scheme, authority, path) = split_uri(printer_uri).ok_or_else(invalid)?;
    match scheme.to_ascii_lowercase().as_str() {
        "http" | "https" => Ok(printer_uri.to_string()),
        "ipp" => Ok(format!("http://{}{path}", with_default_port(authority))),
        "ipps" => Ok(format!("https://{}{path}", with_default_port(authority))),
        other => {
            warn!(scheme = other, "unsupported printer uri scheme");
            Err(invalid())
        }
    }
}

/// `http://host:port` for a printer-listing host, port 631 by default.
///
/// Any scheme on `host` is dropped; CUPS serves the list over plain HTTP.
fn listing_base(host: &str) -> Result<String> {
    let host = host.trim().trim_end_matches('/');
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };
    let (_, authority, _) = split_uri(&with_scheme)
        .ok_or_else(|| PrintmeterError::InvalidRequest(format!("invalid printer host '{host}'")))?;
    Ok(format!("http://{}", with_default_port(authority)))
}

/// Extract printers from a CUPS `/printers` page.
pub fn parse_printer_list(html: &str, base: &str) -> Vec<PrinterInfo> {
    let Some(pattern) = PRINTER_LINK.as_ref() else {
        return Vec::new();
    };
    pattern
        .captures_iter(html)
        .map(|caps| PrinterInfo {
            name: caps[2].trim().to_string(),
            uri: format!("{base}/printers/{}", &caps[1]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipp_codec::{IppMessageBuilder, TAG_OPERATION_ATTRIBUTES};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one HTTP request, answer with `status` and `body`, and hand back
    /// the raw request bytes.
    async fn serve_once(
        status: &'static str,
        content_type: &'static str,
        body: Vec<u8>,
    ) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.expect("write head");
            socket.write_all(&body).await.expect("write body");
            socket.shutdown().await.ok();
            request
        });
        (addr, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= end + 4 + length
    }

    fn body_of(request: &[u8]) -> &[u8] {
        let end = request
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("header terminator");
        &request[end + 4..]
    }

    fn ipp_response(status: u16, job: Option<(&str, JobValue)>) -> Vec<u8> {
        let mut builder = IppMessageBuilder::new(status, 1);
        builder
            .begin_group(TAG_OPERATION_ATTRIBUTES)
            .charset("attributes-charset", "utf-8")
            .natural_language("attributes-natural-language", "en-US");
        if let Some((name, value)) = job {
            builder.begin_group(TAG_JOB_ATTRIBUTES);
            match value {
                JobValue::Int(v) => builder.integer(name, v),
                JobValue::Uri(v) => builder.uri(name, v),
            };
        }
        builder.build()
    }

    enum JobValue {
        Int(i32),
        Uri(&'static str),
    }

    fn dispatcher() -> IppDispatcher {
        IppDispatcher::new(Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn print_job_returns_job_uri() {
        let response = ipp_response(
            ipp_codec::STATUS_OK,
            Some(("job-uri", JobValue::Uri("ipp://printer/jobs/17"))),
        );
        let (addr, server) = serve_once("200 OK", IPP_CONTENT_TYPE, response).await;
        let printer = format!("http://{addr}/printers/lab");

        let id = dispatcher()
            .send(DispatchRequest {
                printer: printer.clone(),
                document: b"%PDF-1.7 body".to_vec(),
                mime_type: "application/pdf".into(),
                user_name: Some("alice".into()),
                job_name: Some("report.pdf".into()),
            })
            .await
            .expect("dispatch");
        assert_eq!(id, "ipp://printer/jobs/17");

        let request = server.await.expect("server");
        let head = String::from_utf8_lossy(&request).to_ascii_lowercase();
        assert!(head.starts_with("post /printers/lab "));
        assert!(head.contains("content-type: application/ipp"));

        let sent = IppMessage::parse(body_of(&request)).expect("decode request");
        assert_eq!(sent.code, ipp_codec::OP_PRINT_JOB);
        let ops = sent.groups_with(TAG_OPERATION_ATTRIBUTES).next().expect("ops");
        assert_eq!(ops.get("printer-uri").expect("uri").value_string(), printer);
        assert_eq!(ops.get("requesting-user-name").expect("user").value_string(), "alice");
        assert_eq!(ops.get("job-name").expect("job name").value_string(), "report.pdf");
        assert_eq!(sent.data, b"%PDF-1.7 body");
    }

    #[tokio::test]
    async fn integer_job_id_is_rendered_in_decimal() {
        let response = ipp_response(ipp_codec::STATUS_OK, Some(("job-id", JobValue::Int(1234))));
        let (addr, _server) = serve_once("200 OK", IPP_CONTENT_TYPE, response).await;
        let id = dispatcher()
            .send(DispatchRequest {
                printer: format!("http://{addr}/printers/lab"),
                document: vec![1, 2, 3],
                ..Default::default()
            })
            .await
            .expect("dispatch");
        assert_eq!(id, "1234");
    }

    #[tokio::test]
    async fn missing_job_attributes_yield_ok() {
        let response = ipp_response(ipp_codec::STATUS_OK, None);
        let (addr, _server) = serve_once("200 OK", IPP_CONTENT_TYPE, response).await;
        let id = dispatcher()
            .send(DispatchRequest {
                printer: format!("http://{addr}/printers/lab"),
                ..Default::default()
            })
            .await
            .expect("dispatch");
        assert_eq!(id, "ok");
    }

    #[tokio::test]
    async fn ipp_error_status_is_reported_by_name() {
        let response = ipp_response(0x0406, None);
        let (addr, _server) = serve_once("200 OK", IPP_CONTENT_TYPE, response).await;
        let err = dispatcher()
            .send(DispatchRequest {
                printer: format!("http://{addr}/printers/missing"),
                ..Default::default()
            })
            .await
            .expect_err("must fail");
        assert!(matches!(err, PrintmeterError::DispatchFailed(ref m) if m == "ipp error: client-error-not-found"));
    }

    #[tokio::test]
    async fn non_2xx_http_is_a_failure() {
        let (addr, _server) = serve_once("503 Service Unavailable", "text/plain", b"busy".to_vec()).await;
        let err = dispatcher()
            .send(DispatchRequest {
                printer: format!("http://{addr}/printers/lab"),
                ..Default::default()
            })
            .await
            .expect_err("must fail");
        assert!(matches!(err, PrintmeterError::DispatchFailed(ref m) if m.starts_with("http status: 503")));
    }

    #[tokio::test]
    async fn lists_printers_from_cups_page() {
        let html = br#"<html><body><table>
            <tr><td><A HREF="/printers/lab_laser">Lab Laser</A></td></tr>
            <tr><td><a class="x" href='/printers/Office'>Office Color</a></td></tr>
            <tr><td><a href="/classes/all">All</a></td></tr>
        </table></body></html>"#
            .to_vec();
        let (addr, server) = serve_once("200 OK", "text/html", html).await;

        let printers = dispatcher().list_printers(&addr).await.expect("list");
        assert_eq!(printers.len(), 2);
        assert_eq!(printers[0].name, "Lab Laser");
        assert_eq!(printers[0].uri, format!("http://{addr}/printers/lab_laser"));
        assert_eq!(printers[1].name, "Office Color");

        let request = server.await.expect("server");
        assert!(String::from_utf8_lossy(&request).starts_with("GET /printers "));
    }

    #[test]
    fn ipp_schemes_map_to_http_with_default_port() {
        assert_eq!(
            transport_url("ipp://printer.local/printers/lab").expect("url"),
            "http://printer.local:631/printers/lab"
        );
        assert_eq!(
            transport_url("ipps://printer.local:8443/ipp/print").expect("url"),
            "https://printer.local:8443/ipp/print"
        );
        assert_eq!(
            transport_url("http://10.0.0.5:631/printers/a").expect("url"),
            "http://10.0.0.5:631/printers/a"
        );
        assert_eq!(transport_url("ipp://[::1]/p").expect("url"), "http://[::1]:631/p");
        assert!(transport_url("lpd://host/queue").is_err());
        assert!(transport_url("not a uri").is_err());
    }

    #[test]
    fn listing_base_defaults() {
        assert_eq!(listing_base("localhost").expect("base"), "http://localhost:631");
        assert_eq!(listing_base("cups:8631").expect("base"), "http://cups:8631");
        assert_eq!(
            listing_base("https://print.example.org/").expect("base"),
            "http://print.example.org:631"
        );
        assert_eq!(listing_base("ipp://cups.lan:8631/x").expect("base"), "http://cups.lan:8631");
    }

    #[test]
    fn printer_uris_use_http_for_any_listing_scheme() {
        let base = listing_base("https://print.example.org").expect("base");
        let printers = parse_printer_list(r#"<a href="/printers/Office">Office</a>"#, &base);
        assert_eq!(printers.len(), 1);
        assert_eq!(printers[0].uri, "http://print.example.org:631/printers/Office");
    }
}
