//! Request/response model and the network fetch collaborator.

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::time::Duration;
use url::Url;

/// Header added to responses served from cache after a network failure.
pub const SERVED_BY_HEADER: &str = "X-Served-By";
pub const SERVED_BY_CACHE: &str = "service-worker-cache";

/// An outgoing request as seen at the interception boundary.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Bytes>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn post_json(url: Url, body: Vec<u8>) -> Self {
    Self {
      method: Method::POST,
      url,
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: Some(Bytes::from(body)),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }
}

/// A response snapshot: status, headers, and the full body.
///
/// Bodies are `Bytes`, so cloning a response for the cache is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn is_ok(&self) -> bool {
    self.status == 200
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Set a header, replacing any existing value with the same name.
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    self.headers.push((name.to_string(), value.to_string()));
    self
  }
}

/// Network access used by the strategies, install, prefetch, and replay.
///
/// An `Err` means the request never produced a response (DNS, connect,
/// timeout). HTTP error statuses are returned as `Ok` responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// reqwest-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = Response::new(200, "ok").with_header("Content-Type", "text/plain");
    assert_eq!(response.header("content-type"), Some("text/plain"));
  }

  #[test]
  fn test_with_header_replaces_existing() {
    let response = Response::new(200, "ok")
      .with_header("x-served-by", "network")
      .with_header(SERVED_BY_HEADER, SERVED_BY_CACHE);
    assert_eq!(response.headers.len(), 1);
    assert_eq!(response.header(SERVED_BY_HEADER), Some(SERVED_BY_CACHE));
  }
}
