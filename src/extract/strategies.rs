// src/extract/strategies.rs
//! The extraction strategies, in the order the extractor tries them.
//! Each one is a pure function of the parsed page.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::html::Dom;
use super::Page;
use crate::lines;
use crate::model::CandidateLine;

/// One way of reading line records out of a page.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, page: &Page) -> Vec<CandidateLine>;
}

static RE_LINE_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\blinha\s*(\d{1,2})\s*[-–—:]\s*(\p{L}+)").expect("line heading regex")
});
static RE_SITUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)situa(?:ç|c)(?:ã|a)o\s*:?").expect("situation regex"));
static RE_UPDATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)atualizad[oa]\s*(?:em|às|as|:)?\s*(.+)").expect("updated regex")
});
static RE_STATIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,3})\s+esta(?:ç|c)(?:õ|o)es").expect("stations regex")
});
static RE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:linha\s*)?(\d{1,2})$").expect("number regex"));
static RE_COLOR_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\p{L}[\p{L} ]{1,20}$").expect("color word regex"));
static RE_INLINE_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:linha\s*)?(\d{1,2})\s*[-–—]?\s*(\p{L}+)\s+(.+)$").expect("inline item regex")
});
static RE_FULLTEXT_LINE: Lazy<Regex> = Lazy::new(|| {
    let colors = lines::color_words()
        .iter()
        .map(|c| regex::escape(c))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r"(?i)(?:\blinha\s*)?\b(\d{{1,2}})\s*[-–—]?\s*({colors})\b"
    ))
    .expect("full text line regex")
});
static RE_ANY_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)").expect("any number regex"));
static RE_UPDATED_CUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\batualizad[oa]\b").expect("updated cut regex"));

/// Longest status phrase we accept from free text; anything longer is noise.
const MAX_STATUS_CHARS: usize = 80;

fn clean_status(s: &str) -> Option<String> {
    let t = s
        .trim()
        .trim_start_matches([':', '-', '–', '|'])
        .trim_end_matches(['.', ';', ',', '|', '-'])
        .trim();
    if t.is_empty() {
        None
    } else {
        Some(t.chars().take(MAX_STATUS_CHARS).collect())
    }
}

fn stations_in(s: &str) -> Option<u32> {
    RE_STATIONS
        .captures(s)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn updated_in(s: &str) -> Option<String> {
    RE_UPDATED
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

// ------------------------------------------------------------
// JSON status feed: `[{ "name" | "linha" | "id": ..., "status": ... }]`
// ------------------------------------------------------------

pub struct JsonFeedStrategy;

const JSON_NAME_KEYS: &[&str] = &["name", "linha", "id", "line", "nome"];
const JSON_STATUS_KEYS: &[&str] = &["status", "situacao", "situação", "mensagem", "message"];
const JSON_UPDATED_KEYS: &[&str] = &["updated_at", "atualizado_em", "lastUpdate", "ultima_atualizacao"];
const JSON_LIST_KEYS: &[&str] = &["lines", "linhas", "data", "items"];

fn json_text(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match item.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

impl JsonFeedStrategy {
    fn items(doc: &Value) -> Option<&Vec<Value>> {
        match doc {
            Value::Array(items) => Some(items),
            Value::Object(map) => JSON_LIST_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array)),
            _ => None,
        }
    }

    fn from_item(&self, item: &Value) -> Option<CandidateLine> {
        let name = json_text(item, JSON_NAME_KEYS)?;
        let number = RE_ANY_NUMBER.captures(&name)?[1].parse::<u32>().ok()?.to_string();
        // Only trust a color word that belongs to this line number.
        let color = name
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| w.chars().count() > 2)
            .find_map(lines::by_color)
            .filter(|l| l.number == number)
            .map(|l| l.color.to_string());

        let mut c = CandidateLine::new(number, self.name());
        c.color = color;
        c.raw_status = json_text(item, JSON_STATUS_KEYS).and_then(|s| clean_status(&s));
        c.updated_at = json_text(item, JSON_UPDATED_KEYS);
        Some(c)
    }
}

impl Strategy for JsonFeedStrategy {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extract(&self, page: &Page) -> Vec<CandidateLine> {
        let raw = page.raw.trim_start_matches('\u{feff}').trim_start();
        if !raw.starts_with('[') && !raw.starts_with('{') {
            return Vec::new();
        }
        let doc: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(target: "extract", error = %e, "document looks like JSON but does not parse");
                return Vec::new();
            }
        };
        Self::items(&doc)
            .map(|items| items.iter().filter_map(|i| self.from_item(i)).collect())
            .unwrap_or_default()
    }
}

// ------------------------------------------------------------
// (a) Structural: "Linha N - Cor" headings + nearest "Situação:" container
// ------------------------------------------------------------

pub struct HeadingStrategy;

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

impl HeadingStrategy {
    fn is_heading_like(dom: &Dom, id: usize) -> bool {
        match dom.tag(id) {
            Some(t) if HEADING_TAGS.contains(&t) => true,
            Some(_) => dom.attr(id, "class").is_some_and(|c| {
                let c = c.to_ascii_lowercase();
                c.contains("titulo") || c.contains("title") || c.contains("nome-linha")
            }),
            None => false,
        }
    }

    /// Status, updated-at and station count read from the text that follows
    /// `heading` inside its nearest ancestor carrying a "Situação" label, up to
    /// the next line heading.
    fn read_container(
        dom: &Dom,
        heading: usize,
        other_headings: &[usize],
    ) -> (Option<String>, Option<String>, Option<u32>) {
        let heading_end = dom.node(heading).end;
        for anc in dom.ancestors(heading) {
            let segs = dom.text_segments(anc);
            let region: Vec<&String> = segs
                .iter()
                .skip_while(|(id, _)| *id <= heading_end)
                .take_while(|(id, _)| {
                    !other_headings
                        .iter()
                        .any(|&h| h != heading && dom.contains(h, *id))
                })
                .map(|(_, s)| s)
                .collect();

            let Some(label_at) = region.iter().position(|s| RE_SITUATION.is_match(s)) else {
                continue;
            };

            let label_seg = region[label_at];
            let after_label = RE_SITUATION
                .find(label_seg)
                .map(|m| &label_seg[m.end()..])
                .unwrap_or_default();
            let status = clean_status(after_label).or_else(|| {
                region[label_at + 1..]
                    .iter()
                    .find(|s| !RE_SITUATION.is_match(s) && !RE_UPDATED_CUT.is_match(s))
                    .and_then(|s| clean_status(s))
            });
            let updated = region.iter().find_map(|s| updated_in(s));
            let stations = region.iter().find_map(|s| stations_in(s));
            return (status, updated, stations);
        }
        (None, None, None)
    }
}

impl Strategy for HeadingStrategy {
    fn name(&self) -> &'static str {
        "heading"
    }

    fn extract(&self, page: &Page) -> Vec<CandidateLine> {
        let dom = &page.dom;
        let headings: Vec<(usize, String, String)> = (1..dom.len())
            .filter(|&id| Self::is_heading_like(dom, id))
            .filter_map(|id| {
                let text = dom.text(id);
                let caps = RE_LINE_HEADING.captures(&text)?;
                Some((id, caps[1].to_string(), caps[2].to_string()))
            })
            .collect();
        // Keep the innermost match when a styled wrapper and a real heading both match.
        let headings: Vec<(usize, String, String)> = headings
            .iter()
            .filter(|(id, _, _)| !headings.iter().any(|(other, _, _)| dom.contains(*id, *other)))
            .cloned()
            .collect();
        let heading_ids: Vec<usize> = headings.iter().map(|(id, _, _)| *id).collect();

        let out: Vec<CandidateLine> = headings
            .into_iter()
            .map(|(id, number, color)| {
                let (status, updated, stations) = Self::read_container(dom, id, &heading_ids);
                CandidateLine {
                    number,
                    color: Some(color),
                    raw_status: status,
                    station_count: stations,
                    updated_at: updated,
                    strategy: self.name(),
                }
            })
            .collect();

        // Headings without any readable label mean the layout moved on; let the
        // next strategy try instead of reporting every line as unavailable.
        if out.iter().all(|c| c.raw_status.is_none()) {
            return Vec::new();
        }
        out
    }
}

// ------------------------------------------------------------
// (b) List items: "<number> <color> <status>"
// ------------------------------------------------------------

pub struct ListItemStrategy;

impl ListItemStrategy {
    fn from_segments(&self, segs: &[String]) -> Option<CandidateLine> {
        self.from_columns(segs).or_else(|| self.from_inline(segs))
    }

    /// `<number> | <color> | <status> | ...` as separate text segments.
    fn from_columns(&self, segs: &[String]) -> Option<CandidateLine> {
        if segs.len() < 3 {
            return None;
        }
        let number = RE_NUMBER.captures(&segs[0])?.get(1)?.as_str().to_string();
        if !RE_COLOR_WORD.is_match(&segs[1]) {
            return None;
        }
        let mut c = CandidateLine::new(number, self.name());
        c.color = Some(segs[1].clone());
        c.raw_status = clean_status(&segs[2]);
        c.updated_at = segs[3..].iter().find_map(|s| updated_in(s));
        c.station_count = segs[3..].iter().find_map(|s| stations_in(s));
        Some(c)
    }

    /// Everything in one run of text: only trusted with a catalog color.
    fn from_inline(&self, segs: &[String]) -> Option<CandidateLine> {
        let joined = segs.join(" ");
        let caps = RE_INLINE_ITEM.captures(&joined)?;
        let color = &caps[2];
        lines::by_color(color)?;
        let rest = &caps[3];
        let status_part = match RE_UPDATED_CUT.find(rest) {
            Some(m) => &rest[..m.start()],
            None => rest,
        };
        let mut c = CandidateLine::new(&caps[1], self.name());
        c.color = Some(color.to_string());
        c.raw_status = clean_status(status_part);
        c.updated_at = updated_in(rest);
        Some(c)
    }
}

impl Strategy for ListItemStrategy {
    fn name(&self) -> &'static str {
        "list"
    }

    fn extract(&self, page: &Page) -> Vec<CandidateLine> {
        let dom = &page.dom;
        let items = dom.elements_by_tag(&["li"]);
        items
            .iter()
            .filter(|&&li| !items.iter().any(|&other| dom.contains(li, other)))
            .filter_map(|&li| {
                let segs: Vec<String> =
                    dom.text_segments(li).into_iter().map(|(_, s)| s).collect();
                if segs.is_empty() {
                    return None;
                }
                let cand = self.from_segments(&segs);
                if cand.is_none() {
                    tracing::trace!(target: "extract", item = %segs.join(" | "), "list item skipped");
                }
                cand
            })
            .collect()
    }
}

// ------------------------------------------------------------
// (c) Regex over the flattened text
// ------------------------------------------------------------

pub struct FullTextStrategy;

impl FullTextStrategy {
    fn main_text(dom: &Dom) -> String {
        let main = dom
            .element_by_id("main")
            .or_else(|| dom.elements_by_tag(&["main"]).first().copied())
            .or_else(|| dom.elements_by_tag(&["body"]).first().copied())
            .unwrap_or_else(|| dom.root());
        dom.text(main)
    }
}

impl Strategy for FullTextStrategy {
    fn name(&self) -> &'static str {
        "fulltext"
    }

    fn extract(&self, page: &Page) -> Vec<CandidateLine> {
        let text = Self::main_text(&page.dom);
        let hits: Vec<_> = RE_FULLTEXT_LINE.captures_iter(&text).collect();

        hits.iter()
            .enumerate()
            .filter_map(|(i, caps)| {
                let whole = caps.get(0)?;
                let until = hits
                    .get(i + 1)
                    .and_then(|next| next.get(0))
                    .map(|m| m.start())
                    .unwrap_or(text.len());
                let tail = &text[whole.end()..until];
                let status_part = match RE_UPDATED_CUT.find(tail) {
                    Some(m) => &tail[..m.start()],
                    None => tail,
                };
                let status_part = match RE_SITUATION.find(status_part) {
                    Some(m) => &status_part[m.end()..],
                    None => status_part,
                };

                let mut c = CandidateLine::new(&caps[1], self.name());
                c.color = Some(caps[2].to_string());
                c.raw_status = clean_status(status_part);
                c.updated_at = updated_in(tail);
                c.station_count = stations_in(tail);
                Some(c)
            })
            .collect()
    }
}
