// src/extract/html.rs
//! Just enough HTML structure for the extraction strategies: an arena of
//! elements and text nodes in document order, with parent links and subtree
//! ranges. Tolerant of unclosed and stray tags; never fails.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_DROP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>")
        .expect("drop regex")
});
static RE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(/)?([A-Za-z][A-Za-z0-9:-]*)([^>]*)>|<![^>]*>|([^<]+)|<")
        .expect("token regex")
});
static RE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("attr regex")
});
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\u{00A0}]+").expect("ws regex"));

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element { tag: String, attrs: String },
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<usize>,
    /// Index of the last node in this node's subtree (itself for leaves).
    pub end: usize,
}

/// Parsed document. Node 0 is a synthetic root.
#[derive(Debug, Clone)]
pub struct Dom {
    nodes: Vec<Node>,
}

/// Collapse whitespace (NBSP included) and trim.
pub fn collapse_ws(s: &str) -> String {
    RE_WS.replace_all(s, " ").trim().to_string()
}

impl Dom {
    pub fn parse(html: &str) -> Self {
        let cleaned = RE_DROP.replace_all(html, " ");
        let mut nodes = vec![Node {
            kind: NodeKind::Element {
                tag: "#root".into(),
                attrs: String::new(),
            },
            parent: None,
            end: 0,
        }];
        let mut stack: Vec<usize> = vec![0];

        for caps in RE_TOKEN.captures_iter(&cleaned) {
            let top = *stack.last().unwrap_or(&0);

            if let Some(text) = caps.get(4) {
                let decoded = html_escape::decode_html_entities(text.as_str()).to_string();
                if !decoded.trim().is_empty() {
                    let id = nodes.len();
                    nodes.push(Node {
                        kind: NodeKind::Text(decoded),
                        parent: Some(top),
                        end: id,
                    });
                }
                continue;
            }

            let Some(name) = caps.get(2) else {
                continue; // doctype or a lone '<'
            };
            let tag = name.as_str().to_ascii_lowercase();

            if caps.get(1).is_some() {
                // Closing tag: pop up to the matching open element, ignore strays.
                if let Some(pos) = stack.iter().rposition(|&i| nodes[i].tag() == Some(tag.as_str())) {
                    close_from(&mut nodes, &mut stack, pos);
                }
                continue;
            }

            if let Some(pos) = implicitly_closed(&nodes, &stack, &tag) {
                close_from(&mut nodes, &mut stack, pos);
            }
            let top = *stack.last().unwrap_or(&0);

            let attrs = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
            let self_closing = attrs.trim_end().ends_with('/');
            let id = nodes.len();
            nodes.push(Node {
                kind: NodeKind::Element {
                    tag: tag.clone(),
                    attrs: attrs.to_string(),
                },
                parent: Some(top),
                end: id,
            });
            if !self_closing && !VOID_TAGS.contains(&tag.as_str()) {
                stack.push(id);
            }
        }

        let last = nodes.len() - 1;
        for &i in &stack {
            nodes[i].end = last;
        }
        Self { nodes }
    }

    pub fn root(&self) -> usize {
        0
    }

    /// Number of nodes, synthetic root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    pub fn tag(&self, id: usize) -> Option<&str> {
        self.nodes.get(id).and_then(|n| n.tag())
    }

    /// Attribute value by name (case-insensitive), quotes stripped.
    pub fn attr(&self, id: usize, name: &str) -> Option<String> {
        let NodeKind::Element { attrs, .. } = &self.nodes.get(id)?.kind else {
            return None;
        };
        RE_ATTR.captures_iter(attrs).find_map(|caps| {
            if !caps[1].eq_ignore_ascii_case(name) {
                return None;
            }
            caps.get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
        })
    }

    pub fn contains(&self, ancestor: usize, id: usize) -> bool {
        id > ancestor && id <= self.nodes[ancestor].end
    }

    /// Elements (document order) whose tag is in `tags`.
    pub fn elements_by_tag(&self, tags: &[&str]) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.tag(i).is_some_and(|t| tags.contains(&t)))
            .collect()
    }

    /// First element with the given `id` attribute.
    pub fn element_by_id(&self, wanted: &str) -> Option<usize> {
        (1..self.nodes.len()).find(|&i| {
            self.tag(i).is_some() && self.attr(i, "id").is_some_and(|v| v == wanted)
        })
    }

    pub fn ancestors(&self, id: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.nodes[id].parent, move |&p| self.nodes[p].parent)
    }

    /// Non-empty text lines under `id`, in document order, tagged with the text
    /// node they came from. Line breaks inside one text node split segments.
    pub fn text_segments(&self, id: usize) -> Vec<(usize, String)> {
        let end = self.nodes[id].end;
        let mut out = Vec::new();
        for i in id..=end {
            if let NodeKind::Text(t) = &self.nodes[i].kind {
                for line in t.split('\n') {
                    let s = collapse_ws(line);
                    if !s.is_empty() {
                        out.push((i, s));
                    }
                }
            }
        }
        out
    }

    /// Flattened, whitespace-collapsed text of a subtree.
    pub fn text(&self, id: usize) -> String {
        self.text_segments(id)
            .into_iter()
            .map(|(_, s)| s)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Close every element from `pos` to the top of the stack.
fn close_from(nodes: &mut [Node], stack: &mut Vec<usize>, pos: usize) {
    let last = nodes.len() - 1;
    for &i in &stack[pos..] {
        nodes[i].end = last;
    }
    stack.truncate(pos.max(1));
}

/// `<li>`, `<tr>` and cells close an open sibling of the same kind, the way
/// browsers treat omitted end tags.
fn implicitly_closed(nodes: &[Node], stack: &[usize], tag: &str) -> Option<usize> {
    let boundary: &[&str] = match tag {
        "li" => &["ul", "ol"],
        "tr" => &["table", "tbody", "thead", "tfoot"],
        "td" | "th" => &["tr"],
        _ => return None,
    };
    for (pos, &i) in stack.iter().enumerate().rev() {
        let t = nodes[i].tag()?;
        if t == tag || (matches!(tag, "td" | "th") && matches!(t, "td" | "th")) {
            return Some(pos);
        }
        if boundary.contains(&t) {
            return None;
        }
    }
    None
}

impl Node {
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag, .. } => Some(tag.as_str()),
            NodeKind::Text(_) => None,
        }
    }
}
