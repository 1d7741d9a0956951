//! MathML → Office Math (OMML) translation.
//!
//! DOCX files carry formulas as OMML (`m:oMath` elements), not MathML. Word
//! ships an XSL stylesheet, `MML2OMML.XSL`, that maps one onto the other; this
//! module expresses the same template rules directly in Rust so the mapping
//! runs in-process, without an XSLT engine, in microseconds.
//!
//! [`FormulaTranslator`] is built once at startup and shared behind an `Arc`.
//! Its lookup tables are read-only after construction, so any number of jobs
//! may translate concurrently. Translation is pure: the same MathML always
//! yields byte-identical OMML.
//!
//! ## Mapping
//!
//! ```text
//! math                       → m:oMath
//! mrow mstyle mpadded        → (flattened)
//! mi mn mo mtext ms          → m:r / m:t
//! msup msub msubsup          → m:sSup m:sSub m:sSubSup
//! mfrac                      → m:f
//! msqrt mroot                → m:rad
//! mfenced                    → m:d
//! munder mover munderover    → m:limLow m:limUpp m:acc m:bar
//! n-ary base (∑ ∏ ∫ …)       → m:nary (swallows the next sibling as m:e)
//! mtable                     → m:m
//! menclose                   → m:borderBox
//! ```

use crate::error::MathError;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

/// Namespace of the Office Math markup.
pub const OMML_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/math";

/// Deepest element nesting accepted. Parsing and emission recurse once per
/// level, so this bounds stack use on the worker thread.
pub const MAX_DEPTH: usize = 100;

/// How a formula sits in the surrounding text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathDisplay {
    Inline,
    Block,
}

/// A translated formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Omml {
    /// Children of the `m:oMath` element.
    body: String,
    pub display: MathDisplay,
}

impl Omml {
    /// The formula as a self-contained `m:oMath` element.
    pub fn inline_xml(&self) -> String {
        format!("<m:oMath xmlns:m=\"{OMML_NS}\">{}</m:oMath>", self.body)
    }

    /// The formula as a display paragraph (`m:oMathPara`).
    pub fn paragraph_xml(&self) -> String {
        format!(
            "<m:oMathPara xmlns:m=\"{OMML_NS}\"><m:oMath>{}</m:oMath></m:oMathPara>",
            self.body
        )
    }

    /// Inline or paragraph form, following the `display` attribute.
    pub fn to_xml(&self) -> String {
        match self.display {
            MathDisplay::Inline => self.inline_xml(),
            MathDisplay::Block => self.paragraph_xml(),
        }
    }
}

/// Process-wide MathML → OMML rule set.
#[derive(Debug)]
pub struct FormulaTranslator {
    nary: HashSet<char>,
    accents: HashSet<char>,
    bars: HashSet<char>,
    entities: HashMap<&'static str, &'static str>,
}

impl Default for FormulaTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl FormulaTranslator {
    pub fn new() -> Self {
        Self {
            nary: NARY_OPERATORS.iter().copied().collect(),
            accents: ACCENTS.iter().copied().collect(),
            bars: BARS.iter().copied().collect(),
            entities: ENTITIES.iter().copied().collect(),
        }
    }

    /// Translate one `<math>…</math>` fragment.
    pub fn translate(&self, mathml: &str) -> Result<Omml, MathError> {
        let root = self.parse(mathml)?;
        if root.name != "math" {
            return Err(MathError::WrongRoot(root.name));
        }
        let display = match root.attr("display") {
            Some("block") => MathDisplay::Block,
            _ => MathDisplay::Inline,
        };
        let mut out = String::with_capacity(mathml.len() * 2);
        self.emit_sequence(&root.elements(), &mut out)?;
        Ok(Omml { body: out, display })
    }

    // ── Parsing ──────────────────────────────────────────────────────────

    fn parse(&self, input: &str) -> Result<Element, MathError> {
        let mut reader = Reader::from_str(input);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| MathError::NotWellFormed(e.to_string()))?;
            match event {
                Event::Start(e) => {
                    if root.is_some() {
                        return Err(MathError::NotWellFormed("more than one root element".into()));
                    }
                    if stack.len() >= MAX_DEPTH {
                        return Err(too_deep());
                    }
                    stack.push(self.open(&e)?);
                }
                Event::Empty(e) => {
                    if stack.len() >= MAX_DEPTH {
                        return Err(too_deep());
                    }
                    let el = self.open(&e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Element(el)),
                        None if root.is_none() => root = Some(el),
                        None => {
                            return Err(MathError::NotWellFormed(
                                "more than one root element".into(),
                            ))
                        }
                    }
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| MathError::NotWellFormed("unexpected end tag".into()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Element(el)),
                        None => root = Some(el),
                    }
                }
                Event::Text(t) => {
                    let text = t
                        .unescape_with(|entity| self.entities.get(entity).copied())
                        .map_err(|e| MathError::NotWellFormed(e.to_string()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Text(text.into_owned())),
                        None if text.trim().is_empty() => {}
                        None => {
                            return Err(MathError::NotWellFormed(
                                "text outside of the root element".into(),
                            ))
                        }
                    }
                }
                Event::CData(c) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                        parent.children.push(Node::Text(text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(MathError::NotWellFormed(format!(
                "element <{}> is never closed",
                open.name
            )));
        }
        root.ok_or(MathError::Empty)
    }

    fn open(&self, start: &BytesStart<'_>) -> Result<Element, MathError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| MathError::NotWellFormed(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| MathError::NotWellFormed(e.to_string()))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(Element {
            name,
            attrs,
            children: Vec::new(),
        })
    }

    // ── Emission ─────────────────────────────────────────────────────────

    /// Emit a row of siblings. An n-ary operator takes the sibling that
    /// follows it as its operand, as the stylesheet does.
    fn emit_sequence(&self, items: &[&Element], out: &mut String) -> Result<(), MathError> {
        let mut i = 0;
        while i < items.len() {
            let el = items[i];
            if let Some(nary) = self.nary_parts(el)? {
                let operand = items.get(i + 1).copied();
                self.emit_nary(&nary, operand, out)?;
                i += if operand.is_some() { 2 } else { 1 };
                continue;
            }
            self.emit(el, out)?;
            i += 1;
        }
        Ok(())
    }

    fn emit(&self, el: &Element, out: &mut String) -> Result<(), MathError> {
        match el.name.as_str() {
            "mrow" | "mstyle" | "mpadded" | "merror" | "mtd" | "mtr" | "mlabeledtr" | "math" => {
                self.emit_sequence(&el.elements(), out)
            }
            "semantics" | "maction" => match el.elements().first() {
                Some(first) => self.emit(first, out),
                None => Ok(()),
            },
            "annotation" | "annotation-xml" | "mphantom" | "mspace" | "none" | "mprescripts"
            | "maligngroup" | "malignmark" => Ok(()),
            "mi" | "mn" | "mo" | "mtext" | "ms" => {
                self.emit_run(el, out);
                Ok(())
            }
            "msup" => {
                let [base, sup] = el.children_exact::<2>("2")?;
                out.push_str("<m:sSup>");
                self.wrap("m:e", base, out)?;
                self.wrap("m:sup", sup, out)?;
                out.push_str("</m:sSup>");
                Ok(())
            }
            "msub" => {
                let [base, sub] = el.children_exact::<2>("2")?;
                out.push_str("<m:sSub>");
                self.wrap("m:e", base, out)?;
                self.wrap("m:sub", sub, out)?;
                out.push_str("</m:sSub>");
                Ok(())
            }
            "msubsup" => {
                let [base, sub, sup] = el.children_exact::<3>("3")?;
                out.push_str("<m:sSubSup>");
                self.wrap("m:e", base, out)?;
                self.wrap("m:sub", sub, out)?;
                self.wrap("m:sup", sup, out)?;
                out.push_str("</m:sSubSup>");
                Ok(())
            }
            "mmultiscripts" => self.emit_multiscripts(el, out),
            "mfrac" => {
                let [num, den] = el.children_exact::<2>("2")?;
                out.push_str("<m:f>");
                if matches!(el.attr("linethickness"), Some("0" | "0px" | "0em")) {
                    out.push_str("<m:fPr><m:type m:val=\"noBar\"/></m:fPr>");
                } else if el.attr("bevelled") == Some("true") {
                    out.push_str("<m:fPr><m:type m:val=\"skw\"/></m:fPr>");
                }
                self.wrap("m:num", num, out)?;
                self.wrap("m:den", den, out)?;
                out.push_str("</m:f>");
                Ok(())
            }
            "msqrt" => {
                out.push_str("<m:rad><m:radPr><m:degHide m:val=\"1\"/></m:radPr><m:deg/><m:e>");
                self.emit_sequence(&el.elements(), out)?;
                out.push_str("</m:e></m:rad>");
                Ok(())
            }
            "mroot" => {
                let [base, index] = el.children_exact::<2>("2")?;
                out.push_str("<m:rad>");
                self.wrap("m:deg", index, out)?;
                self.wrap("m:e", base, out)?;
                out.push_str("</m:rad>");
                Ok(())
            }
            "mfenced" => self.emit_fenced(el, out),
            "munder" => {
                let [base, under] = el.children_exact::<2>("2")?;
                if self.single_char(under).is_some_and(|c| self.bars.contains(&c)) {
                    self.emit_bar("bot", base, out)
                } else {
                    self.emit_limit("m:limLow", base, under, out)
                }
            }
            "mover" => {
                let [base, over] = el.children_exact::<2>("2")?;
                match self.single_char(over) {
                    Some(ch) if self.bars.contains(&ch) => self.emit_bar("top", base, out),
                    Some(ch) if el.attr("accent") == Some("true") || self.accents.contains(&ch) => {
                        self.emit_accent(ch, base, out)
                    }
                    _ => self.emit_limit("m:limUpp", base, over, out),
                }
            }
            "munderover" => {
                let [base, under, over] = el.children_exact::<3>("3")?;
                out.push_str("<m:limUpp><m:e>");
                self.emit_limit("m:limLow", base, under, out)?;
                out.push_str("</m:e>");
                self.wrap("m:lim", over, out)?;
                out.push_str("</m:limUpp>");
                Ok(())
            }
            "mtable" => self.emit_table(el, out),
            "menclose" => {
                out.push_str("<m:borderBox><m:e>");
                self.emit_sequence(&el.elements(), out)?;
                out.push_str("</m:e></m:borderBox>");
                Ok(())
            }
            _ => self.emit_sequence(&el.elements(), out),
        }
    }

    /// `<tag>…</tag>` around one argument of a layout schema.
    fn wrap(&self, tag: &str, el: &Element, out: &mut String) -> Result<(), MathError> {
        let _ = write!(out, "<{tag}>");
        self.emit(el, out)?;
        let _ = write!(out, "</{tag}>");
        Ok(())
    }

    fn emit_run(&self, el: &Element, out: &mut String) {
        let mut text = collapse_whitespace(&el.text());
        if el.name == "ms" {
            let lquote = el.attr("lquote").unwrap_or("\"");
            let rquote = el.attr("rquote").unwrap_or("\"");
            text = format!("{lquote}{text}{rquote}");
        }
        if text.is_empty() {
            return;
        }

        let style = match el.attr("mathvariant") {
            Some("normal") => Some("p"),
            Some("bold") => Some("b"),
            Some("italic") => Some("i"),
            Some("bold-italic") => Some("bi"),
            _ if el.name == "mi" && text.chars().count() > 1 => Some("p"),
            _ => None,
        };

        out.push_str("<m:r>");
        if el.name == "mtext" || el.name == "ms" {
            out.push_str("<m:rPr><m:nor/></m:rPr>");
        } else if let Some(sty) = style {
            let _ = write!(out, "<m:rPr><m:sty m:val=\"{sty}\"/></m:rPr>");
        }
        if text.starts_with(' ') || text.ends_with(' ') {
            let _ = write!(out, "<m:t xml:space=\"preserve\">{}</m:t>", escape(&text));
        } else {
            let _ = write!(out, "<m:t>{}</m:t>", escape(&text));
        }
        out.push_str("</m:r>");
    }

    fn emit_fenced(&self, el: &Element, out: &mut String) -> Result<(), MathError> {
        let open = el.attr("open").unwrap_or("(");
        let close = el.attr("close").unwrap_or(")");
        let separators: String = el
            .attr("separators")
            .unwrap_or(",")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        out.push_str("<m:d><m:dPr>");
        let _ = write!(out, "<m:begChr m:val=\"{}\"/>", escape(open));
        if let Some(sep) = separators.chars().next() {
            let _ = write!(out, "<m:sepChr m:val=\"{}\"/>", escape(sep.to_string().as_str()));
        }
        let _ = write!(out, "<m:endChr m:val=\"{}\"/>", escape(close));
        out.push_str("</m:dPr>");
        let children = el.elements();
        if children.is_empty() {
            out.push_str("<m:e/>");
        }
        for child in children {
            self.wrap("m:e", child, out)?;
        }
        out.push_str("</m:d>");
        Ok(())
    }

    fn emit_limit(
        &self,
        tag: &str,
        base: &Element,
        limit: &Element,
        out: &mut String,
    ) -> Result<(), MathError> {
        let _ = write!(out, "<{tag}>");
        self.wrap("m:e", base, out)?;
        self.wrap("m:lim", limit, out)?;
        let _ = write!(out, "</{tag}>");
        Ok(())
    }

    fn emit_accent(&self, ch: char, base: &Element, out: &mut String) -> Result<(), MathError> {
        let _ = write!(
            out,
            "<m:acc><m:accPr><m:chr m:val=\"{}\"/></m:accPr>",
            escape(ch.to_string().as_str())
        );
        self.wrap("m:e", base, out)?;
        out.push_str("</m:acc>");
        Ok(())
    }

    fn emit_bar(&self, pos: &str, base: &Element, out: &mut String) -> Result<(), MathError> {
        let _ = write!(out, "<m:bar><m:barPr><m:pos m:val=\"{pos}\"/></m:barPr>");
        self.wrap("m:e", base, out)?;
        out.push_str("</m:bar>");
        Ok(())
    }

    fn emit_table(&self, el: &Element, out: &mut String) -> Result<(), MathError> {
        out.push_str("<m:m>");
        for row in el.elements() {
            out.push_str("<m:mr>");
            match row.name.as_str() {
                "mtr" | "mlabeledtr" => {
                    let cells = row.elements();
                    // The first cell of a labeled row is the equation label.
                    let skip = usize::from(row.name == "mlabeledtr");
                    for cell in cells.into_iter().skip(skip) {
                        self.wrap("m:e", cell, out)?;
                    }
                }
                _ => self.wrap("m:e", row, out)?,
            }
            out.push_str("</m:mr>");
        }
        out.push_str("</m:m>");
        Ok(())
    }

    fn emit_multiscripts(&self, el: &Element, out: &mut String) -> Result<(), MathError> {
        let children = el.elements();
        let Some((base, scripts)) = children.split_first() else {
            return Err(MathError::Arity {
                element: el.name.clone(),
                expected: "at least 1",
                found: 0,
            });
        };
        let post: Vec<&Element> = scripts
            .iter()
            .copied()
            .take_while(|c| c.name != "mprescripts")
            .collect();
        let sub = post.first().copied().filter(|c| c.name != "none");
        let sup = post.get(1).copied().filter(|c| c.name != "none");

        out.push_str("<m:sSubSup>");
        self.wrap("m:e", base, out)?;
        out.push_str("<m:sub>");
        if let Some(sub) = sub {
            self.emit(sub, out)?;
        }
        out.push_str("</m:sub><m:sup>");
        if let Some(sup) = sup {
            self.emit(sup, out)?;
        }
        out.push_str("</m:sup></m:sSubSup>");
        Ok(())
    }

    // ── n-ary operators ──────────────────────────────────────────────────

    fn nary_parts<'e>(&self, el: &'e Element) -> Result<Option<Nary<'e>>, MathError> {
        let (base, sub, sup, loc) = match el.name.as_str() {
            "mo" => (el, None, None, "undOvr"),
            "msub" | "munder" => {
                let [base, lim] = el.children_exact::<2>("2")?;
                let loc = if el.name == "msub" { "subSup" } else { "undOvr" };
                (base, Some(lim), None, loc)
            }
            "msup" | "mover" => {
                let [base, lim] = el.children_exact::<2>("2")?;
                let loc = if el.name == "msup" { "subSup" } else { "undOvr" };
                (base, None, Some(lim), loc)
            }
            "msubsup" | "munderover" => {
                let [base, lower, upper] = el.children_exact::<3>("3")?;
                let loc = if el.name == "msubsup" { "subSup" } else { "undOvr" };
                (base, Some(lower), Some(upper), loc)
            }
            _ => return Ok(None),
        };
        if base.name != "mo" {
            return Ok(None);
        }
        Ok(self
            .single_char(base)
            .filter(|c| self.nary.contains(c))
            .map(|chr| Nary { chr, sub, sup, loc }))
    }

    fn emit_nary(
        &self,
        nary: &Nary<'_>,
        operand: Option<&Element>,
        out: &mut String,
    ) -> Result<(), MathError> {
        let _ = write!(
            out,
            "<m:nary><m:naryPr><m:chr m:val=\"{}\"/><m:limLoc m:val=\"{}\"/>",
            escape(nary.chr.to_string().as_str()),
            nary.loc
        );
        if nary.sub.is_none() {
            out.push_str("<m:subHide m:val=\"1\"/>");
        }
        if nary.sup.is_none() {
            out.push_str("<m:supHide m:val=\"1\"/>");
        }
        out.push_str("</m:naryPr>");
        match nary.sub {
            Some(sub) => self.wrap("m:sub", sub, out)?,
            None => out.push_str("<m:sub/>"),
        }
        match nary.sup {
            Some(sup) => self.wrap("m:sup", sup, out)?,
            None => out.push_str("<m:sup/>"),
        }
        match operand {
            Some(op) => self.wrap("m:e", op, out)?,
            None => out.push_str("<m:e/>"),
        }
        out.push_str("</m:nary>");
        Ok(())
    }

    /// The sole character of an `mo`/`mi` token, if it has exactly one.
    fn single_char(&self, el: &Element) -> Option<char> {
        if !matches!(el.name.as_str(), "mo" | "mi" | "mtext") {
            return None;
        }
        let text = el.text();
        let mut chars = text.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    }
}

struct Nary<'e> {
    chr: char,
    sub: Option<&'e Element>,
    sup: Option<&'e Element>,
    loc: &'static str,
}

// ── Tree ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn elements(&self) -> Vec<&Element> {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Element(e) => Some(e),
                Node::Text(_) => None,
            })
            .collect()
    }

    /// Exactly `N` element children, or an arity error.
    fn children_exact<const N: usize>(&self, expected: &'static str) -> Result<[&Element; N], MathError> {
        let children = self.elements();
        let found = children.len();
        children.try_into().map_err(|_| MathError::Arity {
            element: self.name.clone(),
            expected,
            found,
        })
    }

    fn text(&self) -> String {
        let mut s = String::new();
        for child in &self.children {
            match child {
                Node::Text(t) => s.push_str(t),
                Node::Element(e) => s.push_str(&e.text()),
            }
        }
        s
    }
}

fn too_deep() -> MathError {
    MathError::NotWellFormed(format!("nesting too deep (more than {MAX_DEPTH} levels)"))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Rule tables ──────────────────────────────────────────────────────────

const NARY_OPERATORS: &[char] = &[
    '∑', '∏', '∐', '∫', '∬', '∭', '∮', '∯', '∰', '∱', '∲', '∳', '⋀', '⋁', '⋂', '⋃', '⨀', '⨁',
    '⨂', '⨄', '⨆',
];

const ACCENTS: &[char] = &[
    '^', 'ˆ', '̂', '~', '˜', '̃', '˙', '̇', '¨', '̈', '→', '⃗', '←', '´', '`', 'ˇ', '˘', '⌢', '⏞',
    '⏟',
];

const BARS: &[char] = &['¯', '‾', '_', '̅', '̲', '―', '−'];

/// Named entities common in MathML that XML itself does not predefine.
const ENTITIES: &[(&str, &str)] = &[
    ("nbsp", "\u{a0}"),
    ("InvisibleTimes", "\u{2062}"),
    ("it", "\u{2062}"),
    ("ApplyFunction", "\u{2061}"),
    ("af", "\u{2061}"),
    ("InvisibleComma", "\u{2063}"),
    ("ic", "\u{2063}"),
    ("PlusMinus", "±"),
    ("pm", "±"),
    ("times", "×"),
    ("minus", "−"),
    ("middot", "·"),
    ("sdot", "⋅"),
    ("le", "≤"),
    ("ge", "≥"),
    ("ne", "≠"),
    ("approx", "≈"),
    ("equiv", "≡"),
    ("infin", "∞"),
    ("sum", "∑"),
    ("prod", "∏"),
    ("int", "∫"),
    ("Integral", "∫"),
    ("partial", "∂"),
    ("nabla", "∇"),
    ("rarr", "→"),
    ("larr", "←"),
    ("harr", "↔"),
    ("rArr", "⇒"),
    ("lArr", "⇐"),
    ("hArr", "⇔"),
    ("isin", "∈"),
    ("notin", "∉"),
    ("sub", "⊂"),
    ("sup", "⊃"),
    ("cup", "∪"),
    ("cap", "∩"),
    ("forall", "∀"),
    ("exist", "∃"),
    ("empty", "∅"),
    ("radic", "√"),
    ("alpha", "α"),
    ("beta", "β"),
    ("gamma", "γ"),
    ("delta", "δ"),
    ("epsilon", "ε"),
    ("theta", "θ"),
    ("lambda", "λ"),
    ("mu", "μ"),
    ("pi", "π"),
    ("sigma", "σ"),
    ("tau", "τ"),
    ("phi", "φ"),
    ("omega", "ω"),
    ("Delta", "Δ"),
    ("Sigma", "Σ"),
    ("Omega", "Ω"),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn omml(mathml: &str) -> String {
        FormulaTranslator::new().translate(mathml).unwrap().inline_xml()
    }

    #[test]
    fn superscript() {
        let xml = omml("<math><msup><mi>x</mi><mn>2</mn></msup></math>");
        assert!(xml.starts_with("<m:oMath xmlns:m="), "got: {xml}");
        assert!(xml.contains(
            "<m:sSup><m:e><m:r><m:t>x</m:t></m:r></m:e><m:sup><m:r><m:t>2</m:t></m:r></m:sup></m:sSup>"
        ));
    }

    #[test]
    fn namespaced_input_is_accepted() {
        let xml = omml(
            r#"<mml:math xmlns:mml="http://www.w3.org/1998/Math/MathML"><mml:mi>y</mml:mi></mml:math>"#,
        );
        assert!(xml.contains("<m:t>y</m:t>"));
    }

    #[test]
    fn fraction_without_bar() {
        let xml = omml(r#"<math><mfrac linethickness="0"><mi>n</mi><mi>k</mi></mfrac></math>"#);
        assert!(xml.contains("<m:type m:val=\"noBar\"/>"));
        assert!(xml.contains("<m:num>"));
        assert!(xml.contains("<m:den>"));
    }

    #[test]
    fn square_root_hides_degree() {
        let xml = omml("<math><msqrt><mi>a</mi><mo>+</mo><mi>b</mi></msqrt></math>");
        assert!(xml.contains("<m:degHide m:val=\"1\"/>"));
        assert!(xml.contains("<m:t>+</m:t>"));
    }

    #[test]
    fn sum_takes_following_operand() {
        let xml = omml(
            "<math><munderover><mo>∑</mo><mrow><mi>i</mi><mo>=</mo><mn>1</mn></mrow><mi>n</mi></munderover><msub><mi>a</mi><mi>i</mi></msub></math>",
        );
        assert!(xml.contains("<m:nary><m:naryPr><m:chr m:val=\"∑\"/><m:limLoc m:val=\"undOvr\"/>"));
        assert!(xml.contains("<m:e><m:sSub>"), "operand should be inside nary: {xml}");
        assert_eq!(xml.matches("<m:nary>").count(), 1);
    }

    #[test]
    fn bare_integral_hides_limits() {
        let xml = omml("<math><mo>∫</mo><mi>f</mi></math>");
        assert!(xml.contains("<m:subHide m:val=\"1\"/><m:supHide m:val=\"1\"/>"));
    }

    #[test]
    fn accent_and_bar() {
        let hat = omml("<math><mover><mi>x</mi><mo>^</mo></mover></math>");
        assert!(hat.contains("<m:acc><m:accPr><m:chr m:val=\"^\"/></m:accPr>"));
        let bar = omml("<math><mover><mi>x</mi><mo>¯</mo></mover></math>");
        assert!(bar.contains("<m:pos m:val=\"top\"/>"));
    }

    #[test]
    fn function_names_are_upright() {
        let xml = omml("<math><mi>sin</mi><mi>x</mi></math>");
        assert!(xml.contains("<m:rPr><m:sty m:val=\"p\"/></m:rPr><m:t>sin</m:t>"));
        assert!(xml.contains("<m:r><m:t>x</m:t></m:r>"));
    }

    #[test]
    fn text_is_escaped() {
        let xml = omml("<math><mo>&lt;</mo><mtext>a &amp; b</mtext></math>");
        assert!(xml.contains("<m:t>&lt;</m:t>"));
        assert!(xml.contains("<m:rPr><m:nor/></m:rPr><m:t>a &amp; b</m:t>"));
    }

    #[test]
    fn mathml_entities_resolve() {
        let xml = omml("<math><mi>a</mi><mo>&InvisibleTimes;</mo><mi>b</mi><mo>&le;</mo></math>");
        assert!(xml.contains("\u{2062}"));
        assert!(xml.contains("≤"));
    }

    #[test]
    fn fenced_and_matrix() {
        let xml = omml(
            "<math><mfenced open=\"[\" close=\"]\"><mtable><mtr><mtd><mn>1</mn></mtd><mtd><mn>0</mn></mtd></mtr><mtr><mtd><mn>0</mn></mtd><mtd><mn>1</mn></mtd></mtr></mtable></mfenced></math>",
        );
        assert!(xml.contains("<m:begChr m:val=\"[\"/>"));
        assert!(xml.contains("<m:endChr m:val=\"]\"/>"));
        assert_eq!(xml.matches("<m:mr>").count(), 2);
        assert_eq!(xml.matches("<m:e>").count(), 5);
    }

    #[test]
    fn block_display_becomes_paragraph() {
        let out = FormulaTranslator::new()
            .translate(r#"<math display="block"><mi>E</mi></math>"#)
            .unwrap();
        assert_eq!(out.display, MathDisplay::Block);
        assert!(out.to_xml().starts_with("<m:oMathPara"));
    }

    #[test]
    fn deterministic() {
        let t = FormulaTranslator::new();
        let src = "<math><mroot><mi>x</mi><mn>3</mn></mroot><mo>+</mo><mfrac><mn>1</mn><mn>2</mn></mfrac></math>";
        assert_eq!(t.translate(src).unwrap(), t.translate(src).unwrap());
    }

    #[test]
    fn malformed_inputs() {
        let t = FormulaTranslator::new();
        assert!(matches!(
            t.translate("<math><mi>x</math>"),
            Err(MathError::NotWellFormed(_))
        ));
        assert!(matches!(
            t.translate("<math><mi>x</mi>"),
            Err(MathError::NotWellFormed(_))
        ));
        assert!(matches!(t.translate(""), Err(MathError::Empty)));
        assert!(matches!(
            t.translate("<mrow><mi>x</mi></mrow>"),
            Err(MathError::WrongRoot(r)) if r == "mrow"
        ));
        assert!(matches!(
            t.translate("<math><mfrac><mi>x</mi></mfrac></math>"),
            Err(MathError::Arity { found: 1, .. })
        ));
        assert!(matches!(
            t.translate("<math><mi>&bogus;</mi></math>"),
            Err(MathError::NotWellFormed(_))
        ));
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let levels = 50_000;
        let src = format!(
            "<math>{}<mi>x</mi>{}</math>",
            "<mrow>".repeat(levels),
            "</mrow>".repeat(levels)
        );
        // Run where a tokio worker would: a 2 MiB stack.
        let result = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || FormulaTranslator::new().translate(&src))
            .unwrap()
            .join()
            .unwrap();
        assert!(
            matches!(&result, Err(MathError::NotWellFormed(m)) if m.contains("nesting too deep")),
            "got: {result:?}"
        );

        let empty_leaf = format!(
            "<math>{}<mspace/>{}</math>",
            "<mrow>".repeat(MAX_DEPTH),
            "</mrow>".repeat(MAX_DEPTH)
        );
        assert!(FormulaTranslator::new().translate(&empty_leaf).is_err());
    }

    #[test]
    fn reasonable_nesting_is_accepted() {
        let depth = MAX_DEPTH - 2;
        let src = format!(
            "<math>{}<mi>x</mi>{}</math>",
            "<mrow>".repeat(depth),
            "</mrow>".repeat(depth)
        );
        let xml = FormulaTranslator::new().translate(&src).unwrap().to_xml();
        assert!(xml.contains("<m:t>x</m:t>"));
    }
}
