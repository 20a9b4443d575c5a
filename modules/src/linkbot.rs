//! Link Title Module
//!
//! Posts the page title of links mentioned in a room. Pages are fetched on
//! a spawned task so a slow site never holds up the session.

use jayk_core::{ClientHandle, Context, Error, Module, ModuleParams, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;
use tokio::task::AbortHandle;
use url::Url;

lazy_static! {
    static ref URL_RE: Regex = Regex::new(r"\S+://\S+").unwrap();
    static ref TITLE_RE: Regex = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap();
    static ref SPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Longest title posted, in characters
const MAX_TITLE_LENGTH: usize = 512;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Host names and addresses never fetched
    pub blacklist: Vec<String>,
    /// Fetch links that resolve to private or local addresses
    pub follow_local_urls: bool,
    /// Most titles posted per message
    pub max_urls: usize,
    /// Report non-200 responses to the room
    pub report_errors: bool,
    /// Seconds allowed per fetch
    pub timeout: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            blacklist: Vec::new(),
            follow_local_urls: false,
            max_urls: 3,
            report_errors: true,
            timeout: 10,
        }
    }
}

impl LinkConfig {
    fn is_blacklisted(&self, host: &str) -> bool {
        self.blacklist.iter().any(|entry| entry.eq_ignore_ascii_case(host))
    }

    /// Whether a resolved address may be fetched
    fn allows(&self, addr: IpAddr) -> bool {
        if self.is_blacklisted(&addr.to_string()) {
            return false;
        }
        if !self.follow_local_urls && !is_global(addr) {
            tracing::warn!("Linkbot refused non-global address {}", addr);
            return false;
        }
        true
    }
}

/// Whether `addr` is publicly routable
pub fn is_global(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || a == 0
                || (a == 100 && (64..128).contains(&b)))
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_global(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80)
        }
    }
}

/// Links in `text` worth fetching: http(s), with a host, not blacklisted
pub fn extract_urls(text: &str, config: &LinkConfig) -> Vec<Url> {
    URL_RE
        .find_iter(text)
        .filter_map(|m| Url::parse(m.as_str()).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .filter(|url| match url.host_str() {
            Some(host) => !host.is_empty() && !config.is_blacklisted(host),
            None => false,
        })
        .collect()
}

/// The page title, whitespace-collapsed and truncated
pub fn extract_title(html: &str) -> Option<String> {
    let raw = TITLE_RE.captures(html)?.get(1)?.as_str();
    let title = decode_entities(SPACE_RE.replace_all(raw, " ").trim());
    if title.is_empty() {
        return None;
    }
    Some(title.chars().take(MAX_TITLE_LENGTH).collect())
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Outcome of fetching one link
#[derive(Debug, PartialEq)]
enum Fetched {
    Title(String),
    Status(u16),
    Nothing,
}

pub struct LinkModule {
    rooms: BTreeSet<String>,
    config: LinkConfig,
    http: reqwest::Client,
    fetches: Vec<AbortHandle>,
}

impl LinkModule {
    pub fn new(rooms: BTreeSet<String>, config: LinkConfig) -> Result<Self> {
        let http = Self::http_client(&config)?;
        Ok(Self {
            rooms,
            config,
            http,
            fetches: Vec::new(),
        })
    }

    pub fn create(params: &ModuleParams) -> Result<Box<dyn Module>> {
        Ok(Box::new(Self::new(params.rooms.clone(), params.parse()?)?))
    }

    fn http_client(config: &LinkConfig) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(concat!("jayk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::module("linkbot", format!("cannot build HTTP client: {}", e)))
    }

    /// Resolve, check and fetch one link
    async fn fetch(http: &reqwest::Client, config: &LinkConfig, url: &Url) -> Fetched {
        let Some(host) = url.host_str() else {
            return Fetched::Nothing;
        };
        let port = url.port_or_known_default().unwrap_or(80);
        let addrs: Vec<IpAddr> = match tokio::net::lookup_host((host, port)).await {
            Ok(addrs) => addrs.map(|a| a.ip()).collect(),
            Err(e) => {
                tracing::debug!("Cannot resolve {}: {}", host, e);
                return Fetched::Nothing;
            }
        };
        if addrs.is_empty() || !addrs.iter().all(|addr| config.allows(*addr)) {
            return Fetched::Nothing;
        }

        tracing::debug!("Getting title for {}", url);
        let response = match http.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Fetching {} failed: {}", url, e);
                return Fetched::Nothing;
            }
        };
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Fetched::Status(status.as_u16());
        }

        let is_text = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("text/"))
            .unwrap_or(false);
        if !is_text {
            return Fetched::Nothing;
        }

        match response.text().await {
            Ok(body) => extract_title(&body).map(Fetched::Title).unwrap_or(Fetched::Nothing),
            Err(e) => {
                tracing::debug!("Reading {} failed: {}", url, e);
                Fetched::Nothing
            }
        }
    }

    async fn post_titles(client: ClientHandle, http: reqwest::Client, config: LinkConfig, room: String, nick: String, urls: Vec<Url>) {
        let mut posted = 0;
        for url in urls {
            if posted >= config.max_urls || client.is_closed() {
                break;
            }
            match Self::fetch(&http, &config, &url).await {
                Fetched::Title(title) => {
                    client.send_message(&room, &title);
                    posted += 1;
                }
                Fetched::Status(code) if config.report_errors => {
                    client.send_message(&room, &format!("{}: {} error", nick, code));
                }
                Fetched::Status(_) | Fetched::Nothing => {}
            }
        }
    }
}

impl Module for LinkModule {
    fn name(&self) -> &str {
        "Linkbot"
    }

    fn author(&self) -> &str {
        "intercal"
    }

    fn about(&self) -> &str {
        "Every link posted gets its title sent to the channel."
    }

    fn rooms(&self) -> &BTreeSet<String> {
        &self.rooms
    }

    fn set_rooms(&mut self, rooms: BTreeSet<String>) {
        self.rooms = rooms;
    }

    fn handles_all_messages(&self) -> bool {
        true
    }

    fn on_message(&mut self, ctx: &Context<'_>) -> Result<()> {
        let urls = extract_urls(ctx.text, &self.config);
        if urls.is_empty() {
            return Ok(());
        }

        self.fetches.retain(|fetch| !fetch.is_finished());
        let task = tokio::spawn(Self::post_titles(
            ctx.client.clone(),
            self.http.clone(),
            self.config.clone(),
            ctx.reply_to.to_string(),
            ctx.sender.nick.clone(),
            urls,
        ));
        self.fetches.push(task.abort_handle());
        Ok(())
    }

    fn on_update_params(&mut self, params: &ModuleParams) -> Result<()> {
        let config: LinkConfig = params.parse()?;
        if config.timeout != self.config.timeout {
            self.http = Self::http_client(&config)?;
        }
        self.config = config;
        Ok(())
    }

    fn on_unload(&mut self) {
        for fetch in self.fetches.drain(..) {
            fetch.abort();
        }
    }
}
