use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::{css, element_references, Attributes, ContextStack, ImageReference, ReferenceExtractor, CONTEXT_TAGS};

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    // a quote only opens a value right after `=`; stray ones are plain text
    Regex::new(r#"(?s)<!--.*?-->|<(/?)([a-zA-Z][a-zA-Z0-9-]*)((?:=\s*"[^"]*"|=\s*'[^']*'|[^>])*)>"#).unwrap()
});
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s=/>"']+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>][^\s>]*)))?"#).unwrap()
});
static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());

struct TagAttrs(HashMap<String, String>);

impl Attributes for TagAttrs {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Minimal extractor for markup the DOM parser mangles: a regex tag tokenizer
/// with no tree, tracking ancestry from start/end tags alone.
pub struct TagScanner;

impl ReferenceExtractor for TagScanner {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn extract(&self, html: &str, base: &Url) -> Vec<ImageReference> {
        let mut refs = Vec::new();
        let mut context = ContextStack::new();
        let markup = SCRIPT_RE.replace_all(html, "");

        for caps in TAG_RE.captures_iter(&markup) {
            let Some(name) = caps.get(2) else {
                continue; // comment
            };
            let tag = name.as_str().to_ascii_lowercase();
            let closing = !caps[1].is_empty();
            let raw_attrs = caps.get(3).map_or("", |m| m.as_str());

            if closing {
                if CONTEXT_TAGS.contains(&tag.as_str()) {
                    context.pop_to(&tag);
                }
                continue;
            }

            let attrs = parse_attrs(raw_attrs);
            let self_closing = raw_attrs.trim_end().ends_with('/');
            if CONTEXT_TAGS.contains(&tag.as_str()) && !self_closing {
                context.push(&tag, &attrs);
            }
            element_references(&tag, &attrs, base, &context, &mut refs);
        }

        for sheet in css::style_blocks(html) {
            refs.extend(css::stylesheet_references(sheet, base));
        }
        refs
    }
}

fn parse_attrs(raw: &str) -> TagAttrs {
    let mut map = HashMap::new();
    for caps in ATTR_RE.captures_iter(raw) {
        let name = caps[1].to_ascii_lowercase();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str());
        // first occurrence wins, as in browsers
        map.entry(name).or_insert_with(|| decode_entities(value));
    }
    TagAttrs(map)
}

fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
