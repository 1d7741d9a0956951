//! Embedding translated formulas into Markdown before pandoc sees it.
//!
//! pandoc converts `$…$` LaTeX to Office Math on its own, but it passes raw
//! MathML in Markdown through untouched, and the DOCX writer then drops it.
//! This stage finds each `<math>…</math>` fragment, translates it with the
//! [`FormulaTranslator`], and splices the OMML back in as a raw OpenXML
//! element, which pandoc copies verbatim into `word/document.xml`:
//!
//! ```text
//! inline:  text <math>…</math> text   →  text `<m:oMath …>…</m:oMath>`{=openxml} text
//! block:   <math>…</math> (own para)  →  ```{=openxml}
//!                                         <w:p …><m:oMathPara …>…</m:oMathPara></w:p>
//!                                         ```
//! ```
//!
//! Fragments inside code spans and fenced code blocks are left alone.

use crate::config::MathFallback;
use crate::error::{ConvertError, MathError};
use crate::math::FormulaTranslator;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use tracing::{debug, warn};

const WORDML_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// Start tag of a MathML root, with or without a namespace prefix.
static MATH_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:([A-Za-z_][\w.-]*):)?math[\s/>]").unwrap());

/// Result of [`embed_formulas`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embedded {
    pub text: String,
    /// Fragments replaced with OMML.
    pub translated: usize,
    /// Fragments kept as code spans under [`MathFallback::Verbatim`].
    pub verbatim: usize,
}

/// Whether the text contains anything that looks like a MathML element.
pub fn contains_mathml(text: &str) -> bool {
    MATH_OPEN.is_match(text)
}

/// Replace every MathML fragment outside code with raw OpenXML.
///
/// Fragments are numbered from 1 in document order; that number is reported
/// in [`ConvertError::MalformedMathml`].
pub fn embed_formulas(
    markdown: &str,
    translator: &FormulaTranslator,
    fallback: MathFallback,
) -> Result<Embedded, ConvertError> {
    let code = code_regions(markdown);
    let mut region = 0;
    let mut out = String::with_capacity(markdown.len() * 2);
    let mut cursor = 0;
    let mut index = 0;
    let mut translated = 0;
    let mut verbatim = 0;

    for caps in MATH_OPEN.captures_iter(markdown) {
        let Some(open) = caps.get(0) else { continue };
        let start = open.start();
        while code.get(region).is_some_and(|r| r.end <= start) {
            region += 1;
        }
        if start < cursor || code.get(region).is_some_and(|r| r.contains(&start)) {
            continue;
        }
        index += 1;

        let prefix = caps.get(1).map(|m| m.as_str());
        let end = fragment_end(markdown, start, prefix)
            .ok_or(ConvertError::MalformedMathml {
                index,
                source: MathError::Unterminated,
            })?;
        let fragment = &markdown[start..end];
        let container = paragraph_prefix(&markdown[..start]).filter(|_| ends_paragraph(&markdown[end..]));

        let replacement = match translator.translate(fragment) {
            Ok(omml) => {
                translated += 1;
                if let Some(container) = container {
                    let xml = format!("<w:p xmlns:w=\"{WORDML_NS}\">{}</w:p>", omml.paragraph_xml());
                    raw_block(&xml, container)
                } else {
                    raw_inline(&omml.inline_xml())
                }
            }
            Err(source) => match fallback {
                MathFallback::Reject => {
                    return Err(ConvertError::MalformedMathml { index, source });
                }
                MathFallback::Verbatim => {
                    warn!("Formula {} kept verbatim: {}", index, source);
                    verbatim += 1;
                    code_span(&fragment.split_whitespace().collect::<Vec<_>>().join(" "))
                }
            },
        };

        out.push_str(&markdown[cursor..start]);
        out.push_str(&replacement);
        cursor = end;
    }
    out.push_str(&markdown[cursor..]);

    debug!("Embedded {} formula(s), {} verbatim", translated, verbatim);
    Ok(Embedded {
        text: out,
        translated,
        verbatim,
    })
}

/// Byte offset just past the fragment's closing tag.
fn fragment_end(text: &str, start: usize, prefix: Option<&str>) -> Option<usize> {
    let tag_end = start + text[start..].find('>')? + 1;
    if text[..tag_end].ends_with("/>") {
        return Some(tag_end);
    }
    let close = match prefix {
        Some(p) => format!("</{p}:math"),
        None => "</math".to_string(),
    };
    let close_start = tag_end + text[tag_end..].find(&close)?;
    let after = close_start + close.len();
    let gt = text[after..].find('>')?;
    if !text[after..after + gt].trim().is_empty() {
        return None;
    }
    Some(after + gt + 1)
}

// ── Paragraph detection ──────────────────────────────────────────────────

/// Container prefix of the fragment's line (indentation, `>` markers) when
/// the fragment opens a paragraph there; `None` when it follows other text.
fn paragraph_prefix(before: &str) -> Option<&str> {
    let prefix_len = before
        .bytes()
        .rev()
        .take_while(|b| matches!(b, b' ' | b'\t' | b'>'))
        .count();
    let line_start = before.len() - prefix_len;
    let prefix = &before[line_start..];
    if line_start == 0 {
        return Some(prefix);
    }
    if before.as_bytes()[line_start - 1] != b'\n' {
        return None;
    }
    let prev_end = line_start - 1;
    let prev_start = before[..prev_end].rfind('\n').map_or(0, |i| i + 1);
    is_blank(&before[prev_start..prev_end]).then_some(prefix)
}

fn ends_paragraph(after: &str) -> bool {
    let rest = after.trim_start_matches([' ', '\t', '\r']);
    if rest.is_empty() {
        return true;
    }
    let Some(rest) = rest.strip_prefix('\n') else {
        return false;
    };
    let next_end = rest.find('\n').unwrap_or(rest.len());
    is_blank(&rest[..next_end])
}

/// Blank once blockquote markers and indentation are stripped.
fn is_blank(line: &str) -> bool {
    line.trim_matches([' ', '\t', '\r', '>']).is_empty()
}

// ── Raw output ───────────────────────────────────────────────────────────

fn longest_backtick_run(s: &str) -> usize {
    s.split(|c| c != '`').map(str::len).max().unwrap_or(0)
}

fn raw_inline(xml: &str) -> String {
    let fence = "`".repeat(longest_backtick_run(xml) + 1);
    format!("{fence}{xml}{fence}{{=openxml}}")
}

/// A fenced raw block. The first line lands after `container` already; the
/// rest repeat it so the block stays inside a list item or blockquote.
fn raw_block(xml: &str, container: &str) -> String {
    let fence = "`".repeat((longest_backtick_run(xml) + 1).max(3));
    format!("{fence}{{=openxml}}\n{container}{xml}\n{container}{fence}")
}

fn code_span(text: &str) -> String {
    let fence = "`".repeat(longest_backtick_run(text) + 1);
    if text.starts_with('`') || text.ends_with('`') {
        format!("{fence} {text} {fence}")
    } else {
        format!("{fence}{text}{fence}")
    }
}

// ── Code regions ─────────────────────────────────────────────────────────

/// Byte ranges covered by fenced code blocks and inline code spans.
fn code_regions(text: &str) -> Vec<Range<usize>> {
    let mut regions = Vec::new();
    let mut prose_start = 0;
    let mut fence: Option<(char, usize, usize)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let indent = line.len() - line.trim_start_matches(' ').len();
        let body = line.trim_start_matches(' ').trim_end();

        match fence {
            Some((ch, len, open_at)) => {
                let run = body.chars().take_while(|&c| c == ch).count();
                if indent <= 3 && run >= len && body.chars().all(|c| c == ch) {
                    regions.push(open_at..offset);
                    fence = None;
                    prose_start = offset;
                }
            }
            None if indent <= 3 => {
                let ch = match body.chars().next() {
                    Some(c @ ('`' | '~')) => c,
                    _ => continue,
                };
                let run = body.chars().take_while(|&c| c == ch).count();
                if run >= 3 && !(ch == '`' && body[run..].contains('`')) {
                    inline_spans(text, prose_start..line_start, &mut regions);
                    fence = Some((ch, run, line_start));
                }
            }
            None => {}
        }
    }

    match fence {
        Some((_, _, open_at)) => regions.push(open_at..text.len()),
        None => inline_spans(text, prose_start..text.len(), &mut regions),
    }
    regions
}

/// Backtick code spans inside `range`.
///
/// A span closes at the next run of the same length. Runs are indexed by
/// length up front, so each run is looked at a bounded number of times.
fn inline_spans(text: &str, range: Range<usize>, regions: &mut Vec<Range<usize>>) {
    let bytes = text.as_bytes();
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut i = range.start;
    while i < range.end {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let open = i;
        while i < range.end && bytes[i] == b'`' {
            i += 1;
        }
        runs.push((open, i - open));
    }

    let mut by_len: HashMap<usize, VecDeque<usize>> = HashMap::new();
    for (n, &(_, len)) in runs.iter().enumerate() {
        by_len.entry(len).or_default().push_back(n);
    }

    let mut n = 0;
    while n < runs.len() {
        let (open, len) = runs[n];
        let closer = by_len.get_mut(&len).and_then(|queue| {
            while queue.front().is_some_and(|&k| k <= n) {
                queue.pop_front();
            }
            queue.front().copied()
        });
        match closer {
            Some(c) => {
                regions.push(open..runs[c].0 + len);
                n = c + 1;
            }
            None => n += 1,
        }
    }
}
