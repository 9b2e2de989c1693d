use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::Serialize;

use crate::parser::{ImageReference, SourceChannel};

/// One unique absolute image URL and the richest context seen for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub url: String,
    pub alt: String,
    pub title: String,
    pub css_classes: String,
    pub context: String,
    pub width: u32,
    pub height: u32,
    pub channels: BTreeSet<SourceChannel>,
}

impl Candidate {
    fn from_reference(r: ImageReference) -> Self {
        Candidate {
            context: r.context.join(" > "),
            url: r.url,
            alt: r.alt,
            title: r.title,
            css_classes: r.css_classes,
            width: r.width,
            height: r.height,
            channels: BTreeSet::from([r.channel]),
        }
    }

    /// First sighting wins; later sightings only fill what is still unknown.
    fn absorb(&mut self, r: ImageReference) {
        fill(&mut self.alt, r.alt);
        fill(&mut self.title, r.title);
        fill(&mut self.css_classes, r.css_classes);
        if self.context.is_empty() {
            self.context = r.context.join(" > ");
        }
        if self.width == 0 {
            self.width = r.width;
        }
        if self.height == 0 {
            self.height = r.height;
        }
        self.channels.insert(r.channel);
    }
}

fn fill(slot: &mut String, value: String) {
    if slot.is_empty() {
        *slot = value;
    }
}

/// Merge references into one candidate per URL, keeping first-seen order.
pub fn normalize(refs: Vec<ImageReference>) -> IndexMap<String, Candidate> {
    let mut out: IndexMap<String, Candidate> = IndexMap::with_capacity(refs.len());

    for r in refs {
        if r.url.is_empty() {
            continue;
        }
        match out.get_mut(&r.url) {
            Some(existing) => existing.absorb(r),
            None => {
                out.insert(r.url.clone(), Candidate::from_reference(r));
            }
        }
    }

    out
}
