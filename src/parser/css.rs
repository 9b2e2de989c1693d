use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::{resolve, ImageReference, SourceChannel};

static BACKGROUND_DECL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bbackground(?:-image)?\s*:([^;}]*)").unwrap());
static URL_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)url\(\s*["']?([^"')\s]+)["']?\s*\)"#).unwrap());
static STYLE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>(.*?)</style>").unwrap());
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static RULE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([^{}]+)\{([^{}]*)\}").unwrap());

/// First `url(...)` of each background declaration in an inline `style`.
pub fn inline_background_urls(style: &str) -> Vec<&str> {
    BACKGROUND_DECL_RE
        .captures_iter(style)
        .filter_map(|decl| {
            let value = decl.get(1)?.as_str();
            URL_TOKEN_RE.captures(value).and_then(|u| u.get(1)).map(|m| m.as_str())
        })
        .collect()
}

/// Every `url(...)` declared as a background in a rule body.
fn rule_background_urls(body: &str) -> Vec<&str> {
    BACKGROUND_DECL_RE
        .captures_iter(body)
        .filter_map(|decl| decl.get(1))
        .flat_map(|value| {
            URL_TOKEN_RE
                .captures_iter(value.as_str())
                .filter_map(|u| u.get(1))
                .map(|m| m.as_str())
        })
        .collect()
}

/// Raw text of every `<style>` block in the document.
pub fn style_blocks(html: &str) -> Vec<&str> {
    STYLE_BLOCK_RE
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Background images declared by stylesheet rules. Nested at-rule wrappers
/// (`@media { ... }`) are skipped over; only innermost rules are read.
pub fn stylesheet_references(sheet: &str, base: &Url) -> Vec<ImageReference> {
    let sheet = COMMENT_RE.replace_all(sheet, "");
    let mut refs = Vec::new();

    for rule in RULE_RE.captures_iter(&sheet) {
        // `@import ...;` and `@charset ...;` statements end up in front of the next selector
        let prelude = rule[1].rsplit(';').next().unwrap_or_default();
        let selector = prelude.split_whitespace().collect::<Vec<_>>().join(" ");
        if selector.is_empty() || selector.starts_with('@') {
            continue;
        }
        for raw in rule_background_urls(&rule[2]) {
            if let Some(url) = resolve(base, raw) {
                refs.push(ImageReference {
                    url,
                    alt: String::new(),
                    title: String::new(),
                    css_classes: selector.clone(),
                    width: 0,
                    height: 0,
                    context: vec![format!("css({})", selector)],
                    channel: SourceChannel::StylesheetRule,
                });
            }
        }
    }

    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[test]
    fn inline_background_image() {
        let urls = inline_background_urls("background-image: url(\"/img/hero.jpg\"); height: 400px");
        assert_eq!(urls, vec!["/img/hero.jpg"]);
    }

    #[test]
    fn inline_background_shorthand_takes_first_url() {
        let urls = inline_background_urls("background: #000 url('/a.png') no-repeat, url(/b.png)");
        assert_eq!(urls, vec!["/a.png"]);
    }

    #[test]
    fn inline_ignores_other_properties() {
        assert!(inline_background_urls("background-color: red; mask: url(/m.svg)").is_empty());
    }

    #[test]
    fn style_block_rules() {
        let html = r#"<head><style>
            /* carousel */
            .slide-1 { background-image: url(/promo/slide-1.jpg); }
            #welcome, .hero  { color: #fff; background: url('https://cdn.example.net/w.webp') center; }
            .plain { color: red; }
        </style></head>"#;
        let refs: Vec<_> = style_blocks(html)
            .into_iter()
            .flat_map(|sheet| stylesheet_references(sheet, &base()))
            .collect();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].url, "https://example.com/promo/slide-1.jpg");
        assert_eq!(refs[0].css_classes, ".slide-1");
        assert_eq!(refs[0].context, vec!["css(.slide-1)".to_string()]);
        assert_eq!(refs[1].css_classes, "#welcome, .hero");
        assert!(refs.iter().all(|r| r.channel == SourceChannel::StylesheetRule));
    }

    #[test]
    fn media_query_inner_rules() {
        let sheet = "@media (max-width: 600px) { .banner-mobile { background: url(m.jpg) } }";
        let refs = stylesheet_references(sheet, &base());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].css_classes, ".banner-mobile");
    }

    #[test]
    fn rules_after_import_and_charset() {
        let sheet = "@import url(theme.css);\n.hero-slide { background-image: url(/promo/hero.jpg) }";
        let refs = stylesheet_references(sheet, &base());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].url, "https://example.com/promo/hero.jpg");
        assert_eq!(refs[0].css_classes, ".hero-slide");

        let sheet = "@charset \"utf-8\"; .welcome { background: url(/promo/w.jpg) }";
        let refs = stylesheet_references(sheet, &base());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].context, vec!["css(.welcome)".to_string()]);
    }

    #[test]
    fn bare_at_rule_blocks_skipped() {
        let sheet = "@page { background: url(/print.png) } .a { background: url(/a.png) }";
        let refs = stylesheet_references(sheet, &base());
        let urls: Vec<_> = refs.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a.png"]);
    }

    #[test]
    fn data_uri_backgrounds_dropped() {
        let sheet = ".x { background: url(data:image/png;base64,AAAA) } .y { background: url(/y.png) }";
        let refs = stylesheet_references(sheet, &base());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].url, "https://example.com/y.png");
    }
}
