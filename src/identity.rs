//! # Identity — Canonical Post Identity Resolution
//!
//! Turns a raw discovery hit (`{platform?, raw_url, external_id_hint?}`) into
//! a stable `(platform, external_post_id)` key attributed to one tracked page.
//! Both discovery channels go through here, so a post found by the poller and
//! the same post delivered by a realtime trigger produce the same key.
//!
//! ## Canonicalization
//!
//! 1. Parse, defaulting the scheme to `https`.
//! 2. Expand short links (`lnkd.in`, `fb.me`, `bit.ly`, ...) through a
//!    [`LinkExpander`] when one is configured.
//! 3. Fold host aliases (`m.`, `web.`, `fb.com`, `instagr.am`) onto
//!    `www.<site>`, drop fragments, ports and trailing slashes, and keep only
//!    the query keys that identify a Facebook post (`story_fbid`, `id`,
//!    `fbid`, `v`).
//!
//! ## Post keys
//!
//! | Site | URL shape | Key |
//! |------|-----------|-----|
//! | LinkedIn | `.../urn:li:activity:N` or `/posts/<slug>-activity-N-..` | `urn:li:activity:N` |
//! | LinkedIn | `/posts/<slug>` without activity id | `posts/<slug>` |
//! | Instagram | `/p|reel|tv/<code>` | `ig_<code>` |
//! | Facebook | `permalink.php?story_fbid=S&id=P` | `P_S` |
//! | Facebook | `/photo?fbid=N`, `/watch?v=N`, `/reel/N`, `/posts/N` | `photo_N`, `video_N`, `reel_N`, `post_N` |
//!
//! ## Page attribution
//!
//! A URL belongs to an active page on the same platform and site whose handle
//! (last segment of `external_id`) appears as a path segment, as the prefix of
//! a LinkedIn post slug, or as a Facebook `id` query value. No match yields
//! [`EngineError::UnresolvedPage`].

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Platform, Surface, TrackedPage};

static LINKEDIN_URN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"urn:li:activity:(\d+)").expect("static regex"));
static LINKEDIN_SLUG_ACTIVITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"activity-(\d+)").expect("static regex"));
static INSTAGRAM_MEDIA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:p|reel|tv)/([A-Za-z0-9_-]+)").expect("static regex"));
static FACEBOOK_REEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/reel/(\d+)").expect("static regex"));
static FACEBOOK_POST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/posts/(\d+|pfbid[A-Za-z0-9]+)").expect("static regex"));

const SHORTENER_HOSTS: &[&str] = &["lnkd.in", "fb.me", "bit.ly", "t.co", "ow.ly", "buff.ly"];

/// Query keys that are part of a Facebook post's identity.
const IDENTITY_QUERY_KEYS: &[&str] = &["fbid", "id", "story_fbid", "v"];

const TRACKING_QUERY_PREFIXES: &[&str] = &["utm_", "fbclid", "igshid", "igsh", "trk", "rcm", "mibextid", "ref"];

// ── Short links ─────────────────────────────────────────────────

/// Follows a shortened link to its destination.
#[async_trait]
pub trait LinkExpander: Send + Sync {
    async fn expand(&self, url: &Url) -> anyhow::Result<Url>;
}

/// Redirect-following expander backed by `reqwest`.
pub struct HttpLinkExpander {
    http: reqwest::Client,
}

impl HttpLinkExpander {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()?;
        Ok(HttpLinkExpander { http })
    }
}

#[async_trait]
impl LinkExpander for HttpLinkExpander {
    async fn expand(&self, url: &Url) -> anyhow::Result<Url> {
        let head = self.http.head(url.as_str()).send().await?;
        if head.url() != url {
            return Ok(head.url().clone());
        }
        // Some shorteners only redirect GET.
        let get = self.http.get(url.as_str()).send().await?;
        Ok(get.url().clone())
    }
}

// ── URL helpers ─────────────────────────────────────────────────

/// Parse user- or collaborator-supplied text into a URL.
pub fn parse_raw_url(raw: &str) -> Result<Url, EngineError> {
    let trimmed = raw.trim();
    let unsupported = || EngineError::UnsupportedUrl {
        url: raw.to_string(),
    };
    if trimmed.is_empty() {
        return Err(unsupported());
    }
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = Url::parse(&with_scheme).map_err(|_| unsupported())?;
    match url.host_str() {
        Some(h) if h.contains('.') => Ok(url),
        _ => Err(unsupported()),
    }
}

/// Host with aliases folded onto the bare site domain.
fn site_host(host: &str) -> String {
    let mut h = host.trim_end_matches('.').to_ascii_lowercase();
    for prefix in ["www.", "m.", "web.", "mobile.", "touch."] {
        if let Some(rest) = h.strip_prefix(prefix) {
            h = rest.to_string();
            break;
        }
    }
    if h.ends_with(".linkedin.com") {
        return "linkedin.com".into();
    }
    match h.as_str() {
        "fb.com" => "facebook.com".into(),
        "instagr.am" => "instagram.com".into(),
        _ => h,
    }
}

fn surface_for_site(site: &str) -> Option<Surface> {
    match site {
        "linkedin.com" => Some(Surface::Linkedin),
        "instagram.com" => Some(Surface::Instagram),
        "facebook.com" => Some(Surface::Facebook),
        _ => None,
    }
}

/// Site a URL belongs to, if it is one the engine acts on.
pub fn detect_surface(url: &Url) -> Option<Surface> {
    url.host_str().and_then(|h| surface_for_site(&site_host(h)))
}

pub fn detect_platform(url: &Url) -> Option<Platform> {
    detect_surface(url).map(|s| s.platform())
}

pub fn is_short_link(url: &Url) -> bool {
    url.host_str()
        .map(|h| SHORTENER_HOSTS.contains(&site_host(h).as_str()))
        .unwrap_or(false)
}

fn is_tracking_key(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    TRACKING_QUERY_PREFIXES.iter().any(|p| k.starts_with(p))
}

/// Canonical form of a URL. Idempotent.
pub fn normalize_url(url: &Url) -> Url {
    let mut out = url.clone();
    let _ = out.set_scheme("https");
    let _ = out.set_port(None);
    out.set_fragment(None);

    let site = url.host_str().map(site_host);
    let known = site.as_deref().and_then(surface_for_site).is_some();
    if let Some(site) = &site {
        let host = if known {
            format!("www.{}", site)
        } else {
            site.clone()
        };
        let _ = out.set_host(Some(&host));
    }

    let mut kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            if known {
                IDENTITY_QUERY_KEYS.contains(&k.as_ref())
            } else {
                !is_tracking_key(k)
            }
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    kept.sort();
    out.set_query(None);
    if !kept.is_empty() {
        out.query_pairs_mut().extend_pairs(kept);
    }

    let path = url.path().trim_end_matches('/').to_string();
    out.set_path(if path.is_empty() { "/" } else { &path });
    out
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

fn extract_linkedin(url: &Url) -> Option<String> {
    let decoded = urlencoding::decode(url.as_str())
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| url.as_str().to_string());
    if let Some(c) = LINKEDIN_URN.captures(&decoded) {
        return Some(format!("urn:li:activity:{}", &c[1]));
    }
    let segments: Vec<&str> = url.path_segments()?.collect();
    for pair in segments.windows(2) {
        match pair[0] {
            "posts" => {
                if let Some(c) = LINKEDIN_SLUG_ACTIVITY.captures(pair[1]) {
                    return Some(format!("urn:li:activity:{}", &c[1]));
                }
                return Some(format!("posts/{}", pair[1]));
            }
            "pulse" => return Some(format!("pulse/{}", pair[1])),
            _ => {}
        }
    }
    if let Some(pos) = segments.iter().position(|s| *s == "update") {
        if pos > 0 && segments[pos - 1] == "feed" {
            return segments.get(pos + 1).map(|s| s.to_string());
        }
    }
    None
}

fn extract_instagram(url: &Url) -> Option<String> {
    INSTAGRAM_MEDIA
        .captures(url.path())
        .map(|c| format!("ig_{}", &c[1]))
}

fn extract_facebook(url: &Url) -> Option<String> {
    let path = url.path();
    if path.contains("permalink.php") || path.contains("story.php") {
        if let Some(story) = query_value(url, "story_fbid") {
            return Some(match query_value(url, "id") {
                Some(owner) => format!("{}_{}", owner, story),
                None => story,
            });
        }
    }
    if path.starts_with("/photo") {
        if let Some(fbid) = query_value(url, "fbid") {
            return Some(format!("photo_{}", fbid));
        }
    }
    if path.starts_with("/watch") {
        if let Some(v) = query_value(url, "v") {
            return Some(format!("video_{}", v));
        }
    }
    if let Some(c) = FACEBOOK_REEL.captures(path) {
        return Some(format!("reel_{}", &c[1]));
    }
    FACEBOOK_POST
        .captures(path)
        .map(|c| format!("post_{}", &c[1]))
}

/// Platform-specific post key for a canonical URL.
pub fn extract_post_id(url: &Url) -> Option<String> {
    match detect_surface(url)? {
        Surface::Linkedin => extract_linkedin(url),
        Surface::Instagram => extract_instagram(url),
        Surface::Facebook => extract_facebook(url),
    }
}

/// Lowercased handle a page's posts carry in their URLs.
pub fn page_handle(page: &TrackedPage) -> Option<String> {
    let from_external = page
        .external_id
        .as_deref()
        .and_then(|id| id.trim_matches('/').rsplit('/').next())
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    if from_external.is_some() {
        return from_external;
    }
    let url = parse_raw_url(&page.url).ok()?;
    let segments: Vec<String> = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect();
    match segments.first().map(String::as_str) {
        Some("in") | Some("company") => segments.get(1).cloned(),
        Some(first) => Some(first.to_string()),
        None => None,
    }
}

/// Whether a canonical post URL belongs to `page`.
pub fn page_matches(page: &TrackedPage, url: &Url) -> bool {
    if !page.active {
        return false;
    }
    let Some(surface) = detect_surface(url) else {
        return false;
    };
    if surface.platform() != page.platform {
        return false;
    }
    if let Some(page_surface) = parse_raw_url(&page.url).ok().and_then(|u| detect_surface(&u)) {
        if page_surface != surface {
            return false;
        }
    }
    let Some(handle) = page_handle(page) else {
        return false;
    };
    let segments: Vec<String> = url
        .path_segments()
        .map(|s| s.map(str::to_lowercase).collect())
        .unwrap_or_default();
    if segments.iter().any(|s| *s == handle) {
        return true;
    }
    match surface {
        Surface::Linkedin => {
            let prefix = format!("{}_", handle);
            segments
                .windows(2)
                .any(|w| w[0] == "posts" && w[1].starts_with(&prefix))
        }
        Surface::Facebook => query_value(url, "id")
            .map(|id| id.to_lowercase() == handle)
            .unwrap_or(false),
        Surface::Instagram => false,
    }
}

// ── Resolver ────────────────────────────────────────────────────

/// A discovery hit before canonicalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawHit {
    pub platform: Option<Platform>,
    pub raw_url: String,
    pub external_id_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPost {
    pub tracked_page_id: Uuid,
    pub org_id: Uuid,
    pub platform: Platform,
    pub external_post_id: String,
    pub canonical_url: String,
}

#[derive(Default)]
pub struct IdentityResolver {
    expander: Option<Arc<dyn LinkExpander>>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expander(mut self, expander: Arc<dyn LinkExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Parse, expand and normalize a raw URL.
    pub async fn canonicalize(&self, raw_url: &str) -> Result<Url, EngineError> {
        let mut url = parse_raw_url(raw_url)?;
        if is_short_link(&url) {
            match &self.expander {
                Some(expander) => match expander.expand(&url).await {
                    Ok(expanded) => {
                        debug!(from = %url, to = %expanded, "Expanded short link");
                        url = expanded;
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "Short link expansion failed");
                        return Err(EngineError::UnsupportedUrl {
                            url: raw_url.to_string(),
                        });
                    }
                },
                None => {
                    return Err(EngineError::UnsupportedUrl {
                        url: raw_url.to_string(),
                    })
                }
            }
        }
        Ok(normalize_url(&url))
    }

    /// Resolve a hit whose page is unknown (realtime trigger path).
    pub async fn resolve(
        &self,
        hit: &RawHit,
        pages: &[TrackedPage],
    ) -> Result<ResolvedPost, EngineError> {
        let url = self.canonicalize(&hit.raw_url).await?;
        let surface = detect_surface(&url).ok_or_else(|| EngineError::UnsupportedUrl {
            url: hit.raw_url.clone(),
        })?;
        if hit.platform.is_some_and(|p| p != surface.platform()) {
            return Err(EngineError::UnsupportedUrl {
                url: hit.raw_url.clone(),
            });
        }
        let page = attribute(&url, hit.external_id_hint.as_deref(), pages).ok_or_else(|| {
            EngineError::UnresolvedPage {
                url: url.to_string(),
            }
        })?;
        identify(&url, hit.external_id_hint.as_deref(), page)
    }

    /// Resolve a hit already attributed to `page` (polling path).
    ///
    /// The URL decides the key when it parses; the collaborator's id is only
    /// used when it does not.
    pub async fn resolve_for_page(
        &self,
        hit: &RawHit,
        page: &TrackedPage,
    ) -> Result<ResolvedPost, EngineError> {
        match self.canonicalize(&hit.raw_url).await {
            Ok(url) => identify(&url, hit.external_id_hint.as_deref(), page),
            Err(e) => match hit.external_id_hint.as_deref().map(str::trim) {
                Some(hint) if !hint.is_empty() => Ok(ResolvedPost {
                    tracked_page_id: page.id,
                    org_id: page.org_id,
                    platform: page.platform,
                    external_post_id: hint.to_string(),
                    canonical_url: hit.raw_url.trim().to_string(),
                }),
                _ => Err(e),
            },
        }
    }
}

fn attribute<'a>(
    url: &Url,
    hint: Option<&str>,
    pages: &'a [TrackedPage],
) -> Option<&'a TrackedPage> {
    let platform = detect_platform(url)?;
    if let Some(hint) = hint {
        let by_hint = pages.iter().find(|p| {
            p.active && p.platform == platform && p.external_id.as_deref() == Some(hint)
        });
        if by_hint.is_some() {
            return by_hint;
        }
    }
    // Longest handle wins so `acme` does not shadow `acme-labs`.
    pages
        .iter()
        .filter(|p| page_matches(p, url))
        .max_by_key(|p| page_handle(p).map(|h| h.len()).unwrap_or(0))
}

fn identify(
    url: &Url,
    hint: Option<&str>,
    page: &TrackedPage,
) -> Result<ResolvedPost, EngineError> {
    let external_post_id = extract_post_id(url)
        .or_else(|| {
            let path = url.path().trim_matches('/');
            (!path.is_empty()).then(|| format!("path:{}", path))
        })
        .or_else(|| hint.map(str::to_string))
        .ok_or_else(|| EngineError::UnsupportedUrl {
            url: url.to_string(),
        })?;
    Ok(ResolvedPost {
        tracked_page_id: page.id,
        org_id: page.org_id,
        platform: page.platform,
        external_post_id,
        canonical_url: url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageType;
    use chrono::Utc;

    fn page(platform: Platform, url: &str, external_id: Option<&str>) -> TrackedPage {
        TrackedPage {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            platform,
            external_id: external_id.map(str::to_string),
            url: url.into(),
            name: "page".into(),
            page_type: PageType::CompanyPage,
            active: true,
            created_at: Utc::now(),
        }
    }

    fn norm(raw: &str) -> Url {
        normalize_url(&parse_raw_url(raw).unwrap())
    }

    struct FixedExpander(&'static str);

    #[async_trait]
    impl LinkExpander for FixedExpander {
        async fn expand(&self, _url: &Url) -> anyhow::Result<Url> {
            Ok(Url::parse(self.0)?)
        }
    }

    #[test]
    fn normalize_strips_tracking_and_folds_hosts() {
        let u = norm("http://m.facebook.com/acme/posts/123/?fbclid=abc&utm_source=x#frag");
        assert_eq!(u.as_str(), "https://www.facebook.com/acme/posts/123");
        let u = norm("instagr.am/p/Cxyz/?igshid=1");
        assert_eq!(u.as_str(), "https://www.instagram.com/p/Cxyz");
        let u = norm("https://uk.linkedin.com/posts/jane_hello-activity-42-AbCd?trk=public");
        assert_eq!(u.as_str(), "https://www.linkedin.com/posts/jane_hello-activity-42-AbCd");
    }

    #[test]
    fn normalize_keeps_identity_query_keys_sorted() {
        let u = norm("https://fb.com/permalink.php?utm_medium=x&story_fbid=9&id=4");
        assert_eq!(u.as_str(), "https://www.facebook.com/permalink.php?id=4&story_fbid=9");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "https://www.linkedin.com/feed/update/urn:li:activity:7000/",
            "web.facebook.com/watch/?v=55&ref=share",
            "https://example.com/a/b/?utm_x=1&keep=2",
        ] {
            let once = norm(raw);
            assert_eq!(normalize_url(&once), once, "{raw}");
        }
    }

    #[test]
    fn linkedin_post_keys() {
        assert_eq!(
            extract_post_id(&norm("https://www.linkedin.com/feed/update/urn:li:activity:7123/")),
            Some("urn:li:activity:7123".into())
        );
        assert_eq!(
            extract_post_id(&norm("https://www.linkedin.com/posts/jane_title-activity-7123-xyz")),
            Some("urn:li:activity:7123".into())
        );
        assert_eq!(
            extract_post_id(&norm("https://www.linkedin.com/posts/jane_title-9")),
            Some("posts/jane_title-9".into())
        );
        assert_eq!(
            extract_post_id(&norm("https://www.linkedin.com/feed/update/urn%3Ali%3Aactivity%3A88")),
            Some("urn:li:activity:88".into())
        );
    }

    #[test]
    fn instagram_and_facebook_post_keys() {
        assert_eq!(
            extract_post_id(&norm("https://www.instagram.com/reel/AbC_-1/")),
            Some("ig_AbC_-1".into())
        );
        assert_eq!(
            extract_post_id(&norm("https://www.facebook.com/permalink.php?story_fbid=9&id=4")),
            Some("4_9".into())
        );
        assert_eq!(
            extract_post_id(&norm("https://www.facebook.com/photo/?fbid=77")),
            Some("photo_77".into())
        );
        assert_eq!(
            extract_post_id(&norm("https://www.facebook.com/watch/?v=5")),
            Some("video_5".into())
        );
        assert_eq!(
            extract_post_id(&norm("https://www.facebook.com/reel/31")),
            Some("reel_31".into())
        );
        assert_eq!(
            extract_post_id(&norm("https://www.facebook.com/acme/posts/pfbid0Ab12")),
            Some("post_pfbid0Ab12".into())
        );
    }

    #[test]
    fn unsupported_hosts_have_no_surface() {
        assert_eq!(detect_surface(&norm("https://example.com/posts/1")), None);
        assert!(parse_raw_url("   ").is_err());
        assert!(parse_raw_url("not a url").is_err());
    }

    #[test]
    fn linkedin_slug_matches_person_page() {
        let p = page(Platform::Linkedin, "https://www.linkedin.com/in/jane", Some("in/jane"));
        assert!(page_matches(&p, &norm("https://www.linkedin.com/posts/jane_hi-activity-1-x")));
        assert!(!page_matches(&p, &norm("https://www.linkedin.com/posts/janet_hi-activity-1-x")));
    }

    #[test]
    fn meta_pages_do_not_cross_sites() {
        let ig = page(Platform::Meta, "https://www.instagram.com/acme", Some("acme"));
        assert!(page_matches(&ig, &norm("https://www.instagram.com/acme/p/Cx1")));
        assert!(!page_matches(&ig, &norm("https://www.facebook.com/acme/posts/1")));
    }

    #[test]
    fn inactive_pages_never_match() {
        let mut p = page(Platform::Meta, "https://www.facebook.com/acme", Some("acme"));
        p.active = false;
        assert!(!page_matches(&p, &norm("https://www.facebook.com/acme/posts/1")));
    }

    #[tokio::test]
    async fn resolve_attributes_to_most_specific_page() {
        let short = page(Platform::Meta, "https://www.facebook.com/acme", Some("acme"));
        let long = page(Platform::Meta, "https://www.facebook.com/acme-labs", Some("acme-labs"));
        let resolver = IdentityResolver::new();
        let hit = RawHit {
            raw_url: "https://m.facebook.com/acme-labs/posts/12?fbclid=z".into(),
            ..Default::default()
        };
        let r = resolver.resolve(&hit, &[short, long.clone()]).await.unwrap();
        assert_eq!(r.tracked_page_id, long.id);
        assert_eq!(r.external_post_id, "post_12");
    }

    #[tokio::test]
    async fn resolve_unmatched_is_unresolved_page() {
        let p = page(Platform::Meta, "https://www.facebook.com/acme", Some("acme"));
        let hit = RawHit {
            raw_url: "https://www.facebook.com/other/posts/1".into(),
            ..Default::default()
        };
        let err = IdentityResolver::new().resolve(&hit, &[p]).await.unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedPage { .. }));
    }

    #[tokio::test]
    async fn resolve_rejects_platform_mismatch() {
        let p = page(Platform::Meta, "https://www.facebook.com/acme", Some("acme"));
        let hit = RawHit {
            platform: Some(Platform::Linkedin),
            raw_url: "https://www.facebook.com/acme/posts/1".into(),
            external_id_hint: None,
        };
        let err = IdentityResolver::new().resolve(&hit, &[p]).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedUrl { .. }));
    }

    #[tokio::test]
    async fn short_links_expand_before_matching() {
        let p = page(Platform::Linkedin, "https://www.linkedin.com/company/acme", Some("company/acme"));
        let resolver = IdentityResolver::new().with_expander(Arc::new(FixedExpander(
            "https://www.linkedin.com/posts/acme_launch-activity-555-q?utm_source=share",
        )));
        let hit = RawHit {
            raw_url: "https://lnkd.in/abc".into(),
            ..Default::default()
        };
        let r = resolver.resolve(&hit, &[p]).await.unwrap();
        assert_eq!(r.external_post_id, "urn:li:activity:555");
    }

    #[tokio::test]
    async fn short_links_without_expander_are_unsupported() {
        let hit = RawHit {
            raw_url: "https://bit.ly/xyz".into(),
            ..Default::default()
        };
        let err = IdentityResolver::new().resolve(&hit, &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedUrl { .. }));
    }

    #[tokio::test]
    async fn poll_and_trigger_paths_agree_on_key() {
        let p = page(Platform::Linkedin, "https://www.linkedin.com/in/jane", Some("in/jane"));
        let resolver = IdentityResolver::new();
        let trigger = RawHit {
            raw_url: "linkedin.com/posts/jane_x-activity-900-abc?utm_campaign=1".into(),
            ..Default::default()
        };
        let poll = RawHit {
            platform: Some(Platform::Linkedin),
            raw_url: "https://www.linkedin.com/feed/update/urn:li:activity:900/".into(),
            external_id_hint: Some("900".into()),
        };
        let a = resolver.resolve(&trigger, std::slice::from_ref(&p)).await.unwrap();
        let b = resolver.resolve_for_page(&poll, &p).await.unwrap();
        assert_eq!(a.external_post_id, b.external_post_id);
        assert_eq!(a.tracked_page_id, b.tracked_page_id);
    }

    #[tokio::test]
    async fn poll_hit_without_url_falls_back_to_hint() {
        let p = page(Platform::Meta, "https://www.instagram.com/acme", Some("acme"));
        let hit = RawHit {
            platform: Some(Platform::Meta),
            raw_url: String::new(),
            external_id_hint: Some("ig_Cabc".into()),
        };
        let r = IdentityResolver::new().resolve_for_page(&hit, &p).await.unwrap();
        assert_eq!(r.external_post_id, "ig_Cabc");
    }
}
