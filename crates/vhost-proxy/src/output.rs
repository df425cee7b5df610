use std::net::SocketAddr;

use serde::Serialize;

use vhost_core::tls::grease::filter_grease_u16;
use vhost_core::{Protocol, Sniffed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => anyhow::bail!("Invalid output format '{}'. Expected 'text' or 'json'.", s),
        }
    }
}

/// What one sniffed connection asked for.
#[derive(Debug, Clone)]
pub struct Report {
    pub peer: SocketAddr,
    pub protocol: Protocol,
    pub host: String,
    pub detail: Detail,
}

#[derive(Debug, Clone)]
pub enum Detail {
    Tls {
        version: u16,
        supported_versions: Vec<u16>,
        /// GREASE values excluded
        cipher_suites: usize,
        extensions: usize,
        alpn: Vec<String>,
    },
    Http {
        method: String,
        path: String,
        version: u8,
    },
}

impl Report {
    pub fn from_sniffed<S>(peer: SocketAddr, conn: &Sniffed<S>) -> Self {
        let detail = match conn {
            Sniffed::Tls(tls) => {
                let hello = tls.client_hello();
                Detail::Tls {
                    version: hello.version,
                    supported_versions: filter_grease_u16(&hello.supported_versions),
                    cipher_suites: filter_grease_u16(&hello.cipher_suites).len(),
                    extensions: filter_grease_u16(&hello.extensions).len(),
                    alpn: hello.alpn_protocols.clone(),
                }
            }
            Sniffed::Http(http) => {
                let req = http.request();
                Detail::Http {
                    method: req.method.clone(),
                    path: req.path.clone(),
                    version: req.version,
                }
            }
        };
        Self {
            peer,
            protocol: conn.protocol(),
            host: conn.host().to_string(),
            detail,
        }
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    timestamp: String,
    peer: String,
    protocol: &'static str,
    host: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls_version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    supported_versions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cipher_suites: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extensions: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    alpn: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
}

pub fn print_report(report: &Report, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => println!("{}", render_text(report)),
        OutputFormat::Json => println!("{}", render_json(report)?),
    }
    Ok(())
}

fn hex_versions(versions: &[u16]) -> Vec<String> {
    versions.iter().map(|v| format!("0x{:04x}", v)).collect()
}

fn render_text(report: &Report) -> String {
    let host = if report.host.is_empty() {
        "(none)"
    } else {
        report.host.as_str()
    };

    let mut lines = vec![
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".to_string(),
        format!("  Client:     {}", report.peer),
        format!("  Protocol:   {}", report.protocol),
        format!("  Host:       {}", host),
    ];
    match &report.detail {
        Detail::Tls {
            version,
            supported_versions,
            cipher_suites,
            extensions,
            alpn,
        } => {
            lines.push(format!("  TLS ver:    0x{:04x}", version));
            if !supported_versions.is_empty() {
                lines.push(format!(
                    "  Sup. vers:  {}",
                    hex_versions(supported_versions).join(", ")
                ));
            }
            lines.push(format!("  Ciphers:    {} suites", cipher_suites));
            lines.push(format!("  Extensions: {} types", extensions));
            if !alpn.is_empty() {
                lines.push(format!("  ALPN:       {}", alpn.join(", ")));
            }
        }
        Detail::Http {
            method,
            path,
            version,
        } => {
            lines.push(format!("  Request:    {} {} HTTP/1.{}", method, path, version));
        }
    }
    lines.push("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n".to_string());
    lines.join("\n")
}

fn render_json(report: &Report) -> serde_json::Result<String> {
    let mut record = JsonRecord {
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        peer: report.peer.to_string(),
        protocol: report.protocol.as_str(),
        host: (!report.host.is_empty()).then_some(report.host.as_str()),
        tls_version: None,
        supported_versions: Vec::new(),
        cipher_suites: None,
        extensions: None,
        alpn: Vec::new(),
        method: None,
        path: None,
    };
    match &report.detail {
        Detail::Tls {
            version,
            supported_versions,
            cipher_suites,
            extensions,
            alpn,
        } => {
            record.tls_version = Some(format!("0x{:04x}", version));
            record.supported_versions = hex_versions(supported_versions);
            record.cipher_suites = Some(*cipher_suites);
            record.extensions = Some(*extensions);
            record.alpn = alpn.iter().map(String::as_str).collect();
        }
        Detail::Http { method, path, .. } => {
            record.method = Some(method.as_str());
            record.path = Some(path.as_str());
        }
    }
    serde_json::to_string(&record)
}
