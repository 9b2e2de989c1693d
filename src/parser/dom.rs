use scraper::node::Element;
use scraper::{ElementRef, Html};
use url::Url;

use super::{css, element_references, Attributes, ContextStack, ImageReference, ReferenceExtractor, CONTEXT_TAGS};

impl Attributes for Element {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.attr(name)
    }
}

/// Full-DOM extractor: parses with `scraper` and walks the element tree.
pub struct DomExtractor;

impl ReferenceExtractor for DomExtractor {
    fn name(&self) -> &'static str {
        "dom"
    }

    fn extract(&self, html: &str, base: &Url) -> Vec<ImageReference> {
        let document = Html::parse_document(html);
        let mut walker = Walker {
            base,
            context: ContextStack::new(),
            refs: Vec::new(),
            sheets: Vec::new(),
        };
        walker.walk(document.root_element());

        let Walker { mut refs, sheets, .. } = walker;
        for sheet in &sheets {
            refs.extend(css::stylesheet_references(sheet, base));
        }
        refs
    }
}

enum Step<'a> {
    Enter(ElementRef<'a>),
    Leave { scoped: bool },
}

struct Walker<'a> {
    base: &'a Url,
    context: ContextStack,
    refs: Vec<ImageReference>,
    sheets: Vec<String>,
}

impl Walker<'_> {
    /// Depth-first, document order, on an explicit stack so nesting depth
    /// is bounded by the heap rather than the thread stack.
    fn walk(&mut self, root: ElementRef) {
        let mut stack = vec![Step::Enter(root)];

        while let Some(step) = stack.pop() {
            let el = match step {
                Step::Enter(el) => el,
                Step::Leave { scoped } => {
                    if scoped {
                        self.context.pop();
                    }
                    continue;
                }
            };

            let element = el.value();
            let tag = element.name();

            let scoped = CONTEXT_TAGS.contains(&tag);
            if scoped {
                self.context.push(tag, element);
            }

            if tag == "style" {
                self.sheets.push(el.text().collect());
            }
            element_references(tag, element, self.base, &self.context, &mut self.refs);

            stack.push(Step::Leave { scoped });
            let children: Vec<_> = el.children().filter_map(ElementRef::wrap).collect();
            stack.extend(children.into_iter().rev().map(Step::Enter));
        }
    }
}
