//! Clips from a WebDAV collection.
//!
//! Listing walks the collection tree with `PROPFIND` and `Depth: 1`, at most
//! ten levels deep; every non-collection `href` becomes a clip id. Fetching is
//! a plain `GET` of that `href` against the server origin.

use async_trait::async_trait;
use bytes::Bytes;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, Method};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use url::Url;

use super::SoundSource;
use crate::error::{ChimeError, Result};
use crate::types::ClipId;

/// Collection levels walked below the pool root.
const MAX_DEPTH: usize = 10;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/></d:prop></d:propfind>"#;

/// Username/password pair taken from the pool URI.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// One `<response>` of a multistatus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavEntry {
    pub href: String,
    pub is_collection: bool,
}

pub struct WebDavSource {
    origin: Url,
    path: String,
    credentials: Option<Credentials>,
    /// `None` once closed.
    client: RwLock<Option<Client>>,
}

impl WebDavSource {
    /// `origin` is `scheme://host[:port]`, `path` the collection to list.
    pub fn new(
        origin: Url,
        path: impl Into<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChimeError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            origin,
            path: path.into(),
            credentials,
            client: RwLock::new(Some(client)),
        })
    }

    fn client(&self) -> Option<Client> {
        self.client
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(creds) => request.basic_auth(&creds.username, Some(&creds.password)),
            None => request,
        }
    }

    /// List one collection level. Deeper levels are walked by the caller.
    async fn propfind(&self, client: &Client, location: &str, url: Url) -> Result<Vec<DavEntry>> {
        let propfind =
            Method::from_bytes(b"PROPFIND").map_err(|e| ChimeError::listing(location, e))?;

        let response = self
            .authorize(client.request(propfind, url))
            .header("Depth", "1")
            .header(reqwest::header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(|e| ChimeError::listing(location, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChimeError::Listing {
                location: location.to_string(),
                reason: format!("WebDAV error {status} while listing directory"),
                status: Some(status.as_u16()),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChimeError::listing(location, e))?;
        parse_multistatus(&body).map_err(|e| ChimeError::listing(location, e))
    }

    /// Hrefs may come back absolute or origin-relative.
    fn resolve(&self, href: &str) -> std::result::Result<Url, url::ParseError> {
        match Url::parse(href) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.origin.join(href),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SoundSource for WebDavSource {
    async fn list_clips(&self) -> Result<Vec<ClipId>> {
        let location = self.describe();
        let client = self
            .client()
            .ok_or_else(|| ChimeError::listing(&location, "client closed"))?;

        tracing::info!(location = %location, "listing WebDAV collection");

        let mut clips = Vec::new();
        let mut listed = HashSet::new();
        let mut visited = HashSet::new();
        let mut pending = VecDeque::from([(self.path.clone(), 0usize)]);

        while let Some((collection, depth)) = pending.pop_front() {
            let url = self
                .resolve(&collection)
                .map_err(|e| ChimeError::listing(&location, e))?;
            let own = collection_key(&url);
            if !visited.insert(own.clone()) {
                continue;
            }

            for entry in self.propfind(&client, &location, url).await? {
                if !entry.is_collection {
                    if listed.insert(entry.href.clone()) {
                        clips.push(ClipId::new(entry.href));
                    }
                    continue;
                }

                let child = self
                    .resolve(&entry.href)
                    .map_err(|e| ChimeError::listing(&location, e))?;
                if collection_key(&child) == own {
                    continue;
                }
                if depth < MAX_DEPTH {
                    pending.push_back((entry.href, depth + 1));
                } else {
                    tracing::warn!(collection = %entry.href, "collection nested too deep, skipped");
                }
            }
        }

        if clips.is_empty() {
            return Err(ChimeError::listing(location, "no clips found"));
        }

        tracing::info!(
            location = %location,
            count = clips.len(),
            collections = visited.len(),
            "got clips from WebDAV"
        );
        Ok(clips)
    }

    async fn fetch_clip(&self, clip: &ClipId) -> Result<Bytes> {
        let client = self
            .client()
            .ok_or_else(|| ChimeError::fetch(clip.as_str(), "client closed"))?;
        let url = self
            .resolve(clip.as_str())
            .map_err(|e| ChimeError::fetch(clip.as_str(), e))?;

        let started = Instant::now();
        let response = self
            .authorize(client.get(url))
            .send()
            .await
            .map_err(|e| ChimeError::fetch(clip.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChimeError::Fetch {
                clip: clip.to_string(),
                reason: format!("WebDAV error {status} while getting file"),
                status: Some(status.as_u16()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChimeError::fetch(clip.as_str(), e))?;

        tracing::info!(
            clip = %clip,
            size = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched clip from WebDAV"
        );
        Ok(bytes)
    }

    async fn close(&self) {
        let client = self
            .client
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if client.is_some() {
            tracing::debug!(location = %self.describe(), "WebDAV client released");
        }
    }

    fn describe(&self) -> String {
        let mut url = self.origin.clone();
        url.set_path(&self.path);
        url.to_string()
    }
}

/// Collection path without its trailing slash, so `/a` and `/a/` compare equal.
fn collection_key(url: &Url) -> String {
    url.path().trim_end_matches('/').to_string()
}

/// Extract `href` and collection flag from every `<response>` element.
///
/// Namespace prefixes vary between servers (`d:`, `D:`, none), so elements
/// are matched on their local name.
pub fn parse_multistatus(xml: &str) -> std::result::Result<Vec<DavEntry>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut in_response = false;
    let mut in_href = false;
    let mut href = String::new();
    let mut is_collection = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"response" => {
                    in_response = true;
                    href.clear();
                    is_collection = false;
                }
                b"href" if in_response => in_href = true,
                b"collection" if in_response => is_collection = true,
                _ => {}
            },
            Event::Empty(e) => {
                if in_response && e.local_name().as_ref() == b"collection" {
                    is_collection = true;
                }
            }
            Event::Text(t) => {
                if in_href {
                    href.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"href" => in_href = false,
                b"response" => {
                    if in_response && !href.is_empty() {
                        entries.push(DavEntry {
                            href: std::mem::take(&mut href),
                            is_collection,
                        });
                    }
                    in_response = false;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}
