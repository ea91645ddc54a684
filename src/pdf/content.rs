//! Content-stream tokenizer and font usage extraction
//!
//! The tokenizer understands just enough content-stream syntax to find
//! operator boundaries: numbers, names, literal and hex strings, arrays,
//! inline dictionaries, comments and inline images. The usage scanner walks
//! each page's content (and the forms it invokes) and records, per font,
//! every string passed to a text-showing operator.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use lopdf::{Dictionary, Document, Object, ObjectId};
use crate::pdf::{filters, graph};

/// Deepest chain of nested form invocations followed
const MAX_FORM_DEPTH: usize = 32;

/// A content-stream operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f32),
    Name(Vec<u8>),
    /// Literal or hex string, as raw bytes
    String(Vec<u8>),
    Array(Vec<Operand>),
    Dictionary(Vec<(Vec<u8>, Operand)>),
    Boolean(bool),
    Null,
}

/// An operator together with the operands that preceded it
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub operator: Vec<u8>,
    pub operands: Vec<Operand>,
}

impl Operation {
    fn last_string(&self) -> Option<&[u8]> {
        match self.operands.last()? {
            Operand::String(bytes) => Some(bytes.as_slice()),
            _ => None,
        }
    }

    fn first_name(&self) -> Option<&[u8]> {
        match self.operands.first()? {
            Operand::Name(name) => Some(name.as_slice()),
            _ => None,
        }
    }
}

/// Split content-stream bytes into operations.
///
/// Never fails: unknown bytes and stray delimiters are skipped and
/// unterminated strings end at the end of input.
pub fn tokenize(input: &[u8]) -> Vec<Operation> {
    let mut lexer = Lexer { input, pos: 0 };
    let mut ops = Vec::new();
    let mut operands = Vec::new();

    loop {
        lexer.skip_whitespace_and_comments();
        let Some(b) = lexer.peek() else {
            break;
        };
        if is_regular(b) && !is_number_start(b) {
            let keyword = lexer.keyword();
            match keyword.as_slice() {
                b"true" => operands.push(Operand::Boolean(true)),
                b"false" => operands.push(Operand::Boolean(false)),
                b"null" => operands.push(Operand::Null),
                b"BI" => {
                    lexer.skip_inline_image();
                    operands.clear();
                }
                _ => ops.push(Operation {
                    operator: keyword,
                    operands: std::mem::take(&mut operands),
                }),
            }
        } else if let Some(operand) = lexer.operand(0) {
            operands.push(operand);
        }
    }
    ops
}

/// Nesting limit for arrays and dictionaries inside one operand
const MAX_OPERAND_DEPTH: usize = 64;

struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0C | 0x00)
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

fn is_number_start(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'+' | b'-' | b'.')
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(b) = self.peek() {
            if is_whitespace(b) {
                self.pos += 1;
            } else if b == b'%' {
                while let Some(c) = self.peek() {
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn keyword(&mut self) -> Vec<u8> {
        let start = self.pos;
        while self.peek().is_some_and(is_regular) {
            self.pos += 1;
        }
        self.input[start..self.pos].to_vec()
    }

    /// Parse one operand starting at the current byte.
    ///
    /// Returns `None` (after consuming at least one byte) for anything that
    /// is not an operand, such as a stray `]` or `}`.
    fn operand(&mut self, depth: usize) -> Option<Operand> {
        let b = self.peek()?;
        match b {
            b'(' => Some(Operand::String(self.literal_string())),
            b'<' if self.peek_at(1) == Some(b'<') => Some(self.dictionary(depth)),
            b'<' => Some(Operand::String(self.hex_string())),
            b'[' => Some(self.array(depth)),
            b'/' => Some(Operand::Name(self.name())),
            b if is_number_start(b) => Some(Operand::Number(self.number())),
            b if is_regular(b) => match self.keyword().as_slice() {
                b"true" => Some(Operand::Boolean(true)),
                b"false" => Some(Operand::Boolean(false)),
                _ => Some(Operand::Null),
            },
            _ => {
                self.pos += 1;
                None
            }
        }
    }

    fn number(&mut self) -> f32 {
        let start = self.pos;
        while self.peek().is_some_and(is_number_start) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<f32>().ok())
            .unwrap_or(0.0)
    }

    fn name(&mut self) -> Vec<u8> {
        self.pos += 1; // '/'
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            if !is_regular(b) {
                break;
            }
            if b == b'#' {
                if let (Some(h), Some(l)) = (
                    self.peek_at(1).and_then(hex_digit),
                    self.peek_at(2).and_then(hex_digit),
                ) {
                    out.push(h << 4 | l);
                    self.pos += 3;
                    continue;
                }
            }
            out.push(b);
            self.pos += 1;
        }
        out
    }

    fn literal_string(&mut self) -> Vec<u8> {
        self.pos += 1; // '('
        let mut out = Vec::new();
        let mut depth = 1usize;

        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'(' => {
                    depth += 1;
                    out.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    out.push(b);
                }
                b'\\' => self.escape(&mut out),
                _ => out.push(b),
            }
        }
        out
    }

    fn escape(&mut self, out: &mut Vec<u8>) {
        let Some(b) = self.peek() else {
            return;
        };
        self.pos += 1;
        match b {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'0'..=b'7' => {
                let mut value = u32::from(b - b'0');
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                out.push((value & 0xFF) as u8);
            }
            // Line continuation
            b'\r' => {
                if self.peek() == Some(b'\n') {
                    self.pos += 1;
                }
            }
            b'\n' => {}
            // \( \) \\ and unknown escapes yield the character itself
            other => out.push(other),
        }
    }

    fn hex_string(&mut self) -> Vec<u8> {
        self.pos += 1; // '<'
        let mut out = Vec::new();
        let mut high: Option<u8> = None;
        while let Some(b) = self.peek() {
            self.pos += 1;
            if b == b'>' {
                break;
            }
            let Some(nibble) = hex_digit(b) else {
                continue;
            };
            match high.take() {
                Some(h) => out.push(h << 4 | nibble),
                None => high = Some(nibble),
            }
        }
        if let Some(h) = high {
            out.push(h << 4);
        }
        out
    }

    fn array(&mut self, depth: usize) -> Operand {
        self.pos += 1; // '['
        let mut items = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            match self.peek() {
                None => break,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(_) if depth >= MAX_OPERAND_DEPTH => self.pos += 1,
                Some(_) => {
                    if let Some(item) = self.operand(depth + 1) {
                        items.push(item);
                    }
                }
            }
        }
        Operand::Array(items)
    }

    fn dictionary(&mut self, depth: usize) -> Operand {
        self.pos += 2; // '<<'
        let mut entries = Vec::new();
        let mut key: Option<Vec<u8>> = None;
        loop {
            self.skip_whitespace_and_comments();
            match self.peek() {
                None => break,
                Some(b'>') => {
                    self.pos += if self.peek_at(1) == Some(b'>') { 2 } else { 1 };
                    break;
                }
                Some(_) if depth >= MAX_OPERAND_DEPTH => self.pos += 1,
                Some(_) => match (key.take(), self.operand(depth + 1)) {
                    (None, Some(Operand::Name(name))) => key = Some(name),
                    (Some(k), Some(value)) => entries.push((k, value)),
                    _ => {}
                },
            }
        }
        Operand::Dictionary(entries)
    }

    /// Skip `<dict> ID <data> EI` after a `BI` keyword
    fn skip_inline_image(&mut self) {
        // Dictionary entries up to the ID keyword
        loop {
            self.skip_whitespace_and_comments();
            match self.peek() {
                None => return,
                Some(b) if is_regular(b) && !is_number_start(b) => {
                    if self.keyword() == b"ID" {
                        break;
                    }
                }
                Some(_) => {
                    self.operand(0);
                }
            }
        }
        // One whitespace byte separates ID from the data
        self.pos += 1;

        // Data ends at whitespace + "EI" + whitespace-or-end
        while self.pos < self.input.len() {
            let at_end = self.pos + 2 >= self.input.len()
                || !is_regular(self.input[self.pos + 2]);
            if self.input[self.pos..].starts_with(b"EI")
                && self.pos > 0
                && is_whitespace(self.input[self.pos - 1])
                && at_end
            {
                self.pos += 2;
                return;
            }
            self.pos += 1;
        }
    }
}

/// Strings shown with one font, in document order.
///
/// Each entry is the raw operand of one text-showing operation (one array
/// element for `TJ`). Repeats are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontUsage {
    pub codes: Vec<Vec<u8>>,
}

impl FontUsage {
    /// Distinct single-byte codes across all recorded strings
    pub fn byte_codes(&self) -> BTreeSet<u8> {
        self.codes.iter().flatten().copied().collect()
    }
}

/// Usage records keyed by the font's indirect identity
pub type FontUsageMap = BTreeMap<ObjectId, FontUsage>;

/// Collect the character codes each font is shown with across all pages.
///
/// Covers page content, forms invoked through `Do` (recursively), and the
/// normal appearance streams of page annotations. Fonts defined directly
/// inside a resource dictionary have no identity and are not recorded.
pub fn extract_used_char_codes(doc: &Document) -> FontUsageMap {
    let mut scanner = UsageScanner {
        doc,
        usage: FontUsageMap::new(),
        active_forms: HashSet::new(),
    };
    for page_id in graph::page_ids(doc) {
        scanner.scan_page(page_id);
    }
    scanner.usage
}

/// Decoded, concatenated content of a page (single stream or array)
pub fn page_content(doc: &Document, page_id: ObjectId) -> Vec<u8> {
    let Some(page) = doc.objects.get(&page_id).and_then(|o| o.as_dict().ok()) else {
        return Vec::new();
    };
    let parts: Vec<&Object> = match page.get(b"Contents").ok() {
        Some(Object::Array(items)) => items.iter().collect(),
        Some(single) => match graph::resolve(doc, single) {
            Some(Object::Array(items)) => items.iter().collect(),
            _ => vec![single],
        },
        None => Vec::new(),
    };

    let mut content = Vec::new();
    for part in parts {
        let Some(stream) = graph::resolve_stream(doc, part) else {
            continue;
        };
        match filters::decode_stream(doc, stream) {
            Ok(bytes) => {
                content.extend_from_slice(&bytes);
                // Streams are separated as if by whitespace
                content.push(b'\n');
            }
            Err(e) => log::debug!("Skipping undecodable content stream on page {:?}: {}", page_id, e),
        }
    }
    content
}

struct UsageScanner<'a> {
    doc: &'a Document,
    usage: FontUsageMap,
    active_forms: HashSet<ObjectId>,
}

impl<'a> UsageScanner<'a> {
    fn scan_page(&mut self, page_id: ObjectId) {
        let doc = self.doc;
        let resources = graph::page_resources(doc, page_id);
        let content = page_content(doc, page_id);
        self.scan(&content, resources, None, 0);

        let Some(page) = doc.objects.get(&page_id).and_then(|o| o.as_dict().ok()) else {
            return;
        };
        let Some(Object::Array(annots)) = graph::get(doc, page, b"Annots") else {
            return;
        };
        for annot in annots {
            let Some(appearance) = graph::resolve_dict(doc, annot)
                .and_then(|a| graph::get(doc, a, b"AP"))
                .and_then(|ap| graph::resolve_dict(doc, ap))
            else {
                continue;
            };
            let Some(normal) = appearance.get(b"N").ok() else {
                continue;
            };
            match normal {
                Object::Reference(id) => match doc.objects.get(id) {
                    Some(Object::Stream(_)) => self.scan_form(*id, None, None, 1),
                    // A dictionary of appearance states
                    Some(Object::Dictionary(states)) => self.scan_appearance_states(states),
                    _ => {}
                },
                Object::Dictionary(states) => self.scan_appearance_states(states),
                _ => {}
            }
        }
    }

    fn scan_appearance_states(&mut self, states: &'a Dictionary) {
        for (_, state) in states.iter() {
            if let Object::Reference(id) = state {
                self.scan_form(*id, None, None, 1);
            }
        }
    }

    fn scan(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        initial_font: Option<ObjectId>,
        depth: usize,
    ) {
        let doc = self.doc;
        let mut font = initial_font;
        let mut saved_fonts: Vec<Option<ObjectId>> = Vec::new();

        for op in tokenize(content) {
            match op.operator.as_slice() {
                b"q" => saved_fonts.push(font),
                b"Q" => {
                    if let Some(previous) = saved_fonts.pop() {
                        font = previous;
                    }
                }
                b"Tf" => {
                    font = op
                        .first_name()
                        .zip(resources)
                        .and_then(|(name, res)| graph::resource_entry(doc, res, b"Font", name))
                        .and_then(|entry| match entry {
                            Object::Reference(id) => Some(*id),
                            _ => None,
                        });
                }
                b"Tj" | b"'" | b"\"" => {
                    if let Some(codes) = op.last_string() {
                        self.record(font, codes);
                    }
                }
                b"TJ" => {
                    if let Some(Operand::Array(items)) = op.operands.last() {
                        for item in items {
                            if let Operand::String(codes) = item {
                                self.record(font, codes);
                            }
                        }
                    }
                }
                b"Do" => {
                    let target = op
                        .first_name()
                        .zip(resources)
                        .and_then(|(name, res)| graph::resource_entry(doc, res, b"XObject", name));
                    if let Some(Object::Reference(id)) = target {
                        self.scan_form(*id, font, resources, depth + 1);
                    }
                }
                _ => {}
            }
        }
    }

    /// Scan a form XObject with its own resources (falling back to the
    /// invoker's), starting from the invoker's current font
    fn scan_form(
        &mut self,
        form_id: ObjectId,
        font: Option<ObjectId>,
        fallback_resources: Option<&'a Dictionary>,
        depth: usize,
    ) {
        let doc = self.doc;
        if depth > MAX_FORM_DEPTH || self.active_forms.contains(&form_id) {
            return;
        }
        let Some(Object::Stream(form)) = doc.objects.get(&form_id) else {
            return;
        };
        if !graph::has_name(doc, &form.dict, b"Subtype", b"Form") {
            return;
        }
        let content = match filters::decode_stream(doc, form) {
            Ok(content) => content,
            Err(e) => {
                log::debug!("Skipping undecodable form {:?}: {}", form_id, e);
                return;
            }
        };
        let resources = match graph::get(doc, &form.dict, b"Resources") {
            Some(Object::Dictionary(dict)) => Some(dict),
            _ => fallback_resources,
        };

        self.active_forms.insert(form_id);
        self.scan(&content, resources, font, depth);
        self.active_forms.remove(&form_id);
    }

    fn record(&mut self, font: Option<ObjectId>, codes: &[u8]) {
        if let Some(font_id) = font {
            self.usage
                .entry(font_id)
                .or_default()
                .codes
                .push(codes.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn ops(input: &[u8]) -> Vec<Operation> {
        tokenize(input)
    }

    #[test]
    fn test_tokenize_simple_text_block() {
        let parsed = ops(b"BT /F1 12 Tf (Hello) Tj ET");
        let names: Vec<&[u8]> = parsed.iter().map(|o| o.operator.as_slice()).collect();
        assert_eq!(names, vec![&b"BT"[..], b"Tf", b"Tj", b"ET"]);
        assert_eq!(
            parsed[1].operands,
            vec![Operand::Name(b"F1".to_vec()), Operand::Number(12.0)]
        );
        assert_eq!(parsed[2].operands, vec![Operand::String(b"Hello".to_vec())]);
    }

    #[test]
    fn test_literal_string_escapes_and_nesting() {
        let parsed = ops(br"(a\(b\) (nested) \101\n\\) Tj");
        assert_eq!(
            parsed[0].operands,
            vec![Operand::String(b"a(b) (nested) A\n\\".to_vec())]
        );
    }

    #[test]
    fn test_line_continuation_in_string() {
        let parsed = ops(b"(ab\\\ncd) Tj");
        assert_eq!(parsed[0].operands, vec![Operand::String(b"abcd".to_vec())]);
    }

    #[test]
    fn test_hex_string_and_tj_array() {
        let parsed = ops(b"[<48 65> -120 (llo) 3.5] TJ <0041> Tj");
        assert_eq!(
            parsed[0].operands,
            vec![Operand::Array(vec![
                Operand::String(b"He".to_vec()),
                Operand::Number(-120.0),
                Operand::String(b"llo".to_vec()),
                Operand::Number(3.5),
            ])]
        );
        assert_eq!(parsed[1].operands, vec![Operand::String(vec![0x00, 0x41])]);
    }

    #[test]
    fn test_inline_dictionary_and_comment() {
        let parsed = ops(b"% comment (Tj)\n/Span << /ActualText (x) /MCID 3 >> BDC EMC");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].operator, b"BDC".to_vec());
        assert!(matches!(&parsed[0].operands[1], Operand::Dictionary(entries) if entries.len() == 2));
    }

    #[test]
    fn test_inline_image_skipped() {
        let parsed = ops(b"q BI /W 2 /H 1 /BPC 8 /CS /G ID \x00Tj) EI Q (x) Tj");
        let names: Vec<&[u8]> = parsed.iter().map(|o| o.operator.as_slice()).collect();
        assert_eq!(names, vec![&b"q"[..], b"Q", b"Tj"]);
    }

    #[test]
    fn test_name_hex_escape() {
        let parsed = ops(b"/A#20B Tf");
        assert_eq!(parsed[0].operands, vec![Operand::Name(b"A B".to_vec())]);
    }

    #[test]
    fn test_unterminated_input_does_not_panic() {
        assert!(ops(b"(never closed").is_empty());
        assert!(ops(b"[1 2 <<").is_empty());
        assert!(ops(b"]]>> }").is_empty());
    }

    struct Fixture {
        doc: Document,
        page_id: ObjectId,
        font1: ObjectId,
        font2: ObjectId,
    }

    fn fixture(page_content: &[u8], xobjects: Dictionary) -> Fixture {
        let mut doc = Document::with_version("1.5");
        let font1 = doc.add_object(dictionary! { "Type" => "Font", "BaseFont" => "Helvetica" });
        let font2 = doc.add_object(dictionary! { "Type" => "Font", "BaseFont" => "Courier" });
        let content_id = doc.add_object(Stream::new(Dictionary::new(), page_content.to_vec()));
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font1 },
                "XObject" => xobjects,
            },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        Fixture { doc, page_id, font1, font2 }
    }

    fn add_form(doc: &mut Document, content: &[u8], resources: Option<Dictionary>) -> ObjectId {
        let mut dict = dictionary! { "Type" => "XObject", "Subtype" => "Form" };
        if let Some(resources) = resources {
            dict.set("Resources", resources);
        }
        doc.add_object(Stream::new(dict, content.to_vec()))
    }

    fn set_page_xobject(doc: &mut Document, page_id: ObjectId, name: &str, form: ObjectId) {
        if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
            if let Ok(Object::Dictionary(resources)) = page.get_mut(b"Resources") {
                resources.set("XObject", dictionary! { name => form });
            }
        }
    }

    #[test]
    fn test_hello_attributed_to_selected_font() {
        let f = fixture(b"BT /F1 12 Tf (Hello) Tj ET", Dictionary::new());
        let usage = extract_used_char_codes(&f.doc);
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[&f.font1].codes[0], b"Hello".to_vec());
    }

    #[test]
    fn test_all_show_operators_and_duplicates_kept() {
        let f = fixture(
            b"BT /F1 10 Tf (A) Tj [(B) 50 (C)] TJ (D) ' 1 2 (E) \" (A) Tj ET",
            Dictionary::new(),
        );
        let usage = extract_used_char_codes(&f.doc);
        let codes = &usage[&f.font1].codes;
        let expected: Vec<Vec<u8>> = ["A", "B", "C", "D", "E", "A"]
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();
        assert_eq!(codes, &expected);
        assert_eq!(usage[&f.font1].byte_codes().len(), 5);
    }

    #[test]
    fn test_text_without_font_is_dropped() {
        let f = fixture(b"BT (orphan) Tj ET", Dictionary::new());
        assert!(extract_used_char_codes(&f.doc).is_empty());
    }

    #[test]
    fn test_form_uses_its_own_resources() {
        let mut f = fixture(b"BT /F1 10 Tf (Outer) Tj ET /Fm0 Do", Dictionary::new());
        let font2 = f.font2;
        let form = add_form(
            &mut f.doc,
            b"BT /F1 9 Tf (Inner) Tj ET",
            Some(dictionary! { "Font" => dictionary! { "F1" => font2 } }),
        );
        set_page_xobject(&mut f.doc, f.page_id, "Fm0", form);

        let usage = extract_used_char_codes(&f.doc);
        assert_eq!(usage[&f.font1].codes, vec![b"Outer".to_vec()]);
        assert_eq!(usage[&f.font2].codes, vec![b"Inner".to_vec()]);
    }

    #[test]
    fn test_form_inherits_current_font_and_restores_it() {
        let mut f = fixture(b"BT /F1 10 Tf /Fm0 Do (After) Tj ET", Dictionary::new());
        let font2 = f.font2;
        let form = add_form(
            &mut f.doc,
            b"(Inherited) Tj /F2 8 Tf (Own) Tj",
            Some(dictionary! { "Font" => dictionary! { "F2" => font2 } }),
        );
        set_page_xobject(&mut f.doc, f.page_id, "Fm0", form);

        let usage = extract_used_char_codes(&f.doc);
        assert_eq!(
            usage[&f.font1].codes,
            vec![b"Inherited".to_vec(), b"After".to_vec()]
        );
        assert_eq!(usage[&f.font2].codes, vec![b"Own".to_vec()]);
    }

    #[test]
    fn test_self_invoking_form_terminates() {
        let mut f = fixture(b"BT /F1 10 Tf /Fm0 Do ET", Dictionary::new());
        let form_id = f.doc.new_object_id();
        let font1 = f.font1;
        f.doc.objects.insert(
            form_id,
            Object::Stream(Stream::new(
                dictionary! {
                    "Subtype" => "Form",
                    "Resources" => dictionary! {
                        "Font" => dictionary! { "F1" => font1 },
                        "XObject" => dictionary! { "Fm0" => form_id },
                    },
                },
                b"(Loop) Tj /Fm0 Do".to_vec(),
            )),
        );
        set_page_xobject(&mut f.doc, f.page_id, "Fm0", form_id);

        let usage = extract_used_char_codes(&f.doc);
        assert_eq!(usage[&f.font1].codes, vec![b"Loop".to_vec()]);
    }

    #[test]
    fn test_q_restores_font() {
        let mut f = fixture(b"BT /F1 10 Tf q /F2 9 Tf (In) Tj Q (Out) Tj ET", Dictionary::new());
        let font2 = f.font2;
        if let Ok(Object::Dictionary(page)) = f.doc.get_object_mut(f.page_id) {
            if let Ok(Object::Dictionary(resources)) = page.get_mut(b"Resources") {
                resources.set("Font", dictionary! { "F1" => f.font1, "F2" => font2 });
            }
        }
        let usage = extract_used_char_codes(&f.doc);
        assert_eq!(usage[&f.font2].codes, vec![b"In".to_vec()]);
        assert_eq!(usage[&f.font1].codes, vec![b"Out".to_vec()]);
    }

    #[test]
    fn test_empty_and_missing_content() {
        let f = fixture(b"", Dictionary::new());
        assert!(extract_used_char_codes(&f.doc).is_empty());

        let doc = Document::with_version("1.5");
        assert!(extract_used_char_codes(&doc).is_empty());
    }

    #[test]
    fn test_content_array_concatenated() {
        let mut f = fixture(b"BT /F1 10 Tf", Dictionary::new());
        let second = f
            .doc
            .add_object(Stream::new(Dictionary::new(), b"(Split) Tj ET".to_vec()));
        if let Ok(Object::Dictionary(page)) = f.doc.get_object_mut(f.page_id) {
            let first = page.get(b"Contents").unwrap().clone();
            page.set("Contents", vec![first, second.into()]);
        }
        let usage = extract_used_char_codes(&f.doc);
        assert_eq!(usage[&f.font1].codes, vec![b"Split".to_vec()]);
    }
}
