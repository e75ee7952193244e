//! Free-text lithology descriptions.
//!
//! Geologic-unit databases describe rock composition as loosely formatted
//! text. Three shapes are recognised, in priority order:
//!
//! 1. tagged: `Major:{sandstone} Minor:{shale, clay}`
//! 2. percentages: `limestone [92%] dolomite [8%]`
//! 3. anything else, read as a bag of lithology words

/// Share (in percent) at or above which a bracketed item counts as major.
pub const MAJOR_SHARE_THRESHOLD: f64 = 50.0;

/// Which textual pattern produced an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextPattern {
    Tagged,
    Percentages,
    Tokens,
}

/// Partial composition parsed from one description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LithologyUpdate {
    pub pattern: TextPattern,
    pub major: Option<String>,
    pub minors: Vec<String>,
    pub others: Vec<String>,
}

impl LithologyUpdate {
    /// Tagged and percentage descriptions carry major/minor information.
    pub fn is_specific(&self) -> bool {
        !matches!(self.pattern, TextPattern::Tokens)
    }
}

/// Parse one free-text description.
pub fn parse_free_text(description: &str) -> LithologyUpdate {
    let text = description.to_lowercase();

    if braced_after(&text, "major").is_some() || braced_after(&text, "minor").is_some() {
        return parse_tagged(&text);
    }

    if text.contains('%') && text.contains('[') {
        return parse_percentages(&text);
    }

    LithologyUpdate {
        pattern: TextPattern::Tokens,
        major: None,
        minors: Vec::new(),
        others: tokens(&text),
    }
}

fn parse_tagged(text: &str) -> LithologyUpdate {
    let major = braced_after(text, "major")
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    let minors = braced_after(text, "minor")
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    LithologyUpdate {
        pattern: TextPattern::Tagged,
        major,
        minors,
        others: Vec::new(),
    }
}

/// Contents of the first `{...}` directly following an occurrence of
/// `tag`, allowing only `:` and whitespace between the tag and the brace.
fn braced_after<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    text.match_indices(tag).find_map(|(at, _)| {
        let rest = &text[at + tag.len()..];
        let open = rest.find('{')?;
        if !rest[..open].chars().all(|c| c == ':' || c.is_whitespace()) {
            return None;
        }
        let body = &rest[open + 1..];
        let close = body.find('}')?;
        Some(&body[..close])
    })
}

fn parse_percentages(text: &str) -> LithologyUpdate {
    let mut items: Vec<(String, f64)> = Vec::new();

    // Every `]` closes one "name [share" item; trailing text is ignored.
    let mut pieces: Vec<&str> = text.split(']').collect();
    pieces.pop();

    for piece in pieces {
        let (name, share) = match piece.rsplit_once('[') {
            Some(parts) => parts,
            None => continue,
        };
        let name = clean(name);
        if name.is_empty() {
            continue;
        }
        items.push((name, largest_number(share).unwrap_or(0.0)));
    }

    let major_index = items
        .iter()
        .position(|(_, share)| *share >= MAJOR_SHARE_THRESHOLD);

    let major = major_index.map(|i| items[i].0.clone());
    let minors = items
        .into_iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != major_index)
        .map(|(_, (name, _))| name)
        .collect();

    LithologyUpdate {
        pattern: TextPattern::Percentages,
        major,
        minors,
        others: Vec::new(),
    }
}

/// Largest decimal number appearing in `text`, e.g. `40-60%` gives 60.
fn largest_number(text: &str) -> Option<f64> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter_map(|part| part.parse::<f64>().ok())
        .fold(None, |best: Option<f64>, n| Some(best.map_or(n, |b| b.max(n))))
}

/// Drop punctuation and collapse whitespace.
fn clean(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokens(text: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in clean(text).split_whitespace() {
        if word == "and" || words.iter().any(|w| w == word) {
            continue;
        }
        words.push(word.to_string());
    }
    words
}
