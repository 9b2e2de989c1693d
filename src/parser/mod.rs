pub mod css;
pub mod dom;
pub mod scan;

use serde::{Deserialize, Serialize};
use url::Url;

/// Ancestor tags that contribute a frame to an image's context.
pub const CONTEXT_TAGS: &[&str] = &["div", "section", "header", "a", "figure", "picture", "li"];
const CONTEXT_DEPTH: usize = 3;

/// Attributes checked for an `<img>` source, most authoritative first.
/// `currentsrc` is written by rendering backends that snapshot the displayed source.
const IMG_SOURCE_ATTRS: &[&str] = &["currentsrc", "src", "data-src", "data-lazy-src", "data-original"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceChannel {
    Img,
    ImgSrcset,
    Source,
    InlineStyle,
    StylesheetRule,
}

/// One sighting of a possible image, already resolved to an absolute URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageReference {
    pub url: String,
    pub alt: String,
    pub title: String,
    pub css_classes: String,
    pub width: u32,
    pub height: u32,
    pub context: Vec<String>,
    pub channel: SourceChannel,
}

impl ImageReference {
    fn bare(url: String, channel: SourceChannel, context: Vec<String>) -> Self {
        ImageReference {
            url,
            alt: String::new(),
            title: String::new(),
            css_classes: String::new(),
            width: 0,
            height: 0,
            context,
            channel,
        }
    }
}

/// Turns page HTML into image references. Implementations differ only in how
/// they tokenize; the attribute rules in [`element_references`] are shared.
pub trait ReferenceExtractor {
    fn name(&self) -> &'static str;
    fn extract(&self, html: &str, base: &Url) -> Vec<ImageReference>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    /// Full DOM parse (html5ever via `scraper`)
    #[default]
    Dom,
    /// Minimal tag scanner, tolerant of badly broken markup
    Scan,
}

pub fn extractor_for(kind: ParserKind) -> Box<dyn ReferenceExtractor + Send + Sync> {
    match kind {
        ParserKind::Dom => Box::new(dom::DomExtractor),
        ParserKind::Scan => Box::new(scan::TagScanner),
    }
}

pub fn extract_references(html: &str, base: &Url, kind: ParserKind) -> Vec<ImageReference> {
    let extractor = extractor_for(kind);
    let refs = extractor.extract(html, base);
    tracing::debug!("{} extractor produced {} references", extractor.name(), refs.len());
    refs
}

/// Attribute access shared by both extractor backends.
pub trait Attributes {
    fn lookup(&self, name: &str) -> Option<&str>;
}

/// Explicit ancestor stack: frames are pushed on entry to a context tag and
/// popped on exit, so a reference only ever sees its real ancestors.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Vec<(String, String)>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<A: Attributes + ?Sized>(&mut self, tag: &str, attrs: &A) {
        let class = attrs.lookup("class").unwrap_or_default().trim();
        let id = attrs.lookup("id").unwrap_or_default().trim();
        self.frames.push((tag.to_string(), format!("{}.{} #{}", tag, class, id)));
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Pop back through the innermost open frame for `tag`, discarding any
    /// frames left unclosed inside it. A stray end tag is ignored.
    pub fn pop_to(&mut self, tag: &str) {
        if let Some(pos) = self.frames.iter().rposition(|(t, _)| t == tag) {
            self.frames.truncate(pos);
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        let skip = self.frames.len().saturating_sub(CONTEXT_DEPTH);
        self.frames[skip..].iter().map(|(_, desc)| desc.clone()).collect()
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Emit every reference carried by one element: `<img>` sources and srcsets,
/// `<source>` srcsets, and inline background images on any tag.
pub fn element_references<A: Attributes + ?Sized>(
    tag: &str,
    attrs: &A,
    base: &Url,
    context: &ContextStack,
    out: &mut Vec<ImageReference>,
) {
    let class = attrs.lookup("class").unwrap_or_default().trim();

    match tag {
        "img" => {
            let alt = attrs.lookup("alt").unwrap_or_default().trim();
            let primary = IMG_SOURCE_ATTRS
                .iter()
                .filter_map(|name| attrs.lookup(name))
                .find_map(|raw| resolve(base, raw));

            if let Some(url) = primary {
                out.push(ImageReference {
                    url,
                    alt: alt.to_string(),
                    title: attrs.lookup("title").unwrap_or_default().trim().to_string(),
                    css_classes: class.to_string(),
                    width: parse_dim(attrs.lookup("width")),
                    height: parse_dim(attrs.lookup("height")),
                    context: context.snapshot(),
                    channel: SourceChannel::Img,
                });
            }

            for name in ["srcset", "data-srcset"] {
                for raw in srcset_urls(attrs.lookup(name).unwrap_or_default()) {
                    if let Some(url) = resolve(base, raw) {
                        let mut r = ImageReference::bare(url, SourceChannel::ImgSrcset, context.snapshot());
                        r.alt = alt.to_string();
                        out.push(r);
                    }
                }
            }
        }
        "source" => {
            for name in ["srcset", "data-srcset"] {
                for raw in srcset_urls(attrs.lookup(name).unwrap_or_default()) {
                    if let Some(url) = resolve(base, raw) {
                        let mut r = ImageReference::bare(url, SourceChannel::Source, context.snapshot());
                        r.css_classes = class.to_string();
                        out.push(r);
                    }
                }
            }
        }
        _ => {}
    }

    if let Some(style) = attrs.lookup("style") {
        for raw in css::inline_background_urls(style) {
            if let Some(url) = resolve(base, raw) {
                let mut r = ImageReference::bare(url, SourceChannel::InlineStyle, context.snapshot());
                r.css_classes = class.to_string();
                out.push(r);
            }
        }
    }
}

/// Resolve a raw reference against the page URL. Empty values, inline `data:`
/// URIs and unparseable references yield `None`.
pub fn resolve(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:")) {
        return None;
    }
    base.join(raw).ok().map(String::from)
}

/// `"728px"` → 728; anything non-numeric is unknown (0).
pub fn parse_dim(raw: Option<&str>) -> u32 {
    raw.map(|v| v.trim().trim_end_matches("px").trim())
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0)
}

/// URL tokens of a responsive source list. Size descriptors are dropped.
pub fn srcset_urls(srcset: &str) -> Vec<&str> {
    srcset
        .split(',')
        .filter_map(|part| part.split_whitespace().next())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    impl Attributes for HashMap<&str, &str> {
        fn lookup(&self, name: &str) -> Option<&str> {
            self.get(name).copied()
        }
    }

    fn base() -> Url {
        Url::parse("https://example.com/casino/").unwrap()
    }

    #[test]
    fn resolve_relative_and_rooted() {
        assert_eq!(resolve(&base(), "img/a.png").as_deref(), Some("https://example.com/casino/img/a.png"));
        assert_eq!(resolve(&base(), "/promo/b.jpg").as_deref(), Some("https://example.com/promo/b.jpg"));
        assert_eq!(resolve(&base(), "//cdn.example.net/c.webp").as_deref(), Some("https://cdn.example.net/c.webp"));
    }

    #[test]
    fn resolve_rejects_empty_and_data_uris() {
        assert_eq!(resolve(&base(), "   "), None);
        assert_eq!(resolve(&base(), "data:image/gif;base64,R0lGOD"), None);
        assert_eq!(resolve(&base(), "DATA:image/png;base64,iVBOR"), None);
    }

    #[test]
    fn dims() {
        assert_eq!(parse_dim(Some("728")), 728);
        assert_eq!(parse_dim(Some(" 90px ")), 90);
        assert_eq!(parse_dim(Some("100%")), 0);
        assert_eq!(parse_dim(Some("auto")), 0);
        assert_eq!(parse_dim(None), 0);
    }

    #[test]
    fn srcset_drops_descriptors() {
        let urls = srcset_urls("a-480.jpg 480w, b-800.jpg 800w,  c.jpg 2x ,");
        assert_eq!(urls, vec!["a-480.jpg", "b-800.jpg", "c.jpg"]);
    }

    #[test]
    fn context_keeps_last_three() {
        let mut ctx = ContextStack::new();
        for class in ["page", "main", "hero", "slide"] {
            let attrs: HashMap<&str, &str> = [("class", class)].into();
            ctx.push("div", &attrs);
        }
        let snap = ctx.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0], "div.main #");
        assert_eq!(snap[2], "div.slide #");
    }

    #[test]
    fn pop_to_discards_unclosed_children() {
        let mut ctx = ContextStack::new();
        let empty: HashMap<&str, &str> = HashMap::new();
        ctx.push("section", &empty);
        ctx.push("div", &empty);
        ctx.push("a", &empty);
        ctx.pop_to("div");
        assert_eq!(ctx.depth(), 1);
        ctx.pop_to("figure");
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn img_prefers_src_over_lazy_attrs() {
        let attrs: HashMap<&str, &str> = [
            ("src", "data:image/gif;base64,AAAA"),
            ("data-src", "/promo/lazy.jpg"),
            ("alt", "Lazy"),
        ]
        .into();
        let mut out = Vec::new();
        element_references("img", &attrs, &base(), &ContextStack::new(), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url, "https://example.com/promo/lazy.jpg");
        assert_eq!(out[0].channel, SourceChannel::Img);
    }

    #[test]
    fn img_srcset_entries_are_separate_references() {
        let attrs: HashMap<&str, &str> = [
            ("src", "hero.jpg"),
            ("srcset", "hero-1x.jpg 1x, hero-2x.jpg 2x"),
            ("width", "1200"),
            ("height", "400"),
        ]
        .into();
        let mut out = Vec::new();
        element_references("img", &attrs, &base(), &ContextStack::new(), &mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].width, 1200);
        assert!(out[1..].iter().all(|r| r.channel == SourceChannel::ImgSrcset && r.width == 0));
    }

    #[test]
    fn img_with_only_data_uri_is_skipped() {
        let attrs: HashMap<&str, &str> = [("src", "data:image/png;base64,iVBOR")].into();
        let mut out = Vec::new();
        element_references("img", &attrs, &base(), &ContextStack::new(), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn inline_background_on_any_tag() {
        let attrs: HashMap<&str, &str> = [
            ("class", "promo-tile"),
            ("style", "color: red; background-image: url('/img/tile.png')"),
        ]
        .into();
        let mut out = Vec::new();
        element_references("span", &attrs, &base(), &ContextStack::new(), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].channel, SourceChannel::InlineStyle);
        assert_eq!(out[0].css_classes, "promo-tile");
    }
}
