//! Font metrics for glyph positioning.
//!
//! Redaction needs exactly one thing from a font: where each glyph of a
//! shown string lands on the page. That takes per-code advance widths plus
//! an ascent/descent band. Widths come from the font dictionary
//! (`/Widths`, or `/W`+`/DW` for CID fonts), from built-in metrics for the
//! standard families, or from a fixed-width fallback that keeps positioning
//! monotonic when a font is unknown.

use super::error::RedactResult;
use super::parser::{Dict, PdfObject};
use super::xref::XRef;
use rustc_hash::FxHashMap;

/// PDF font subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontType {
    Type1,
    TrueType,
    Type3,
    /// Composite font wrapping a CID-keyed descendant
    Type0,
    Unknown,
}

impl FontType {
    pub fn from_subtype(subtype: &str) -> Self {
        match subtype {
            "Type1" | "MMType1" | "Type1C" => FontType::Type1,
            "TrueType" => FontType::TrueType,
            "Type3" => FontType::Type3,
            "Type0" => FontType::Type0,
            _ => FontType::Unknown,
        }
    }
}

/// A character code with its byte span inside the string operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharCode {
    pub code: u32,
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone)]
enum WidthSource {
    /// /Widths array indexed from /FirstChar
    Simple {
        first_char: u32,
        widths: Vec<f64>,
        missing: f64,
    },
    /// CID font: /W ranges over /DW default
    Cid { map: FxHashMap<u32, f64>, default: f64 },
    /// Built-in standard-14 metrics
    Builtin(&'static BuiltinMetrics),
    /// No metrics available anywhere: constant advance
    Fallback(f64),
}

/// Loaded font: everything needed to position glyphs.
#[derive(Debug, Clone)]
pub struct Font {
    pub base_font: String,
    pub font_type: FontType,
    /// Glyph-space ascent, thousandths of an em
    pub ascent: f64,
    /// Glyph-space descent (negative), thousandths of an em
    pub descent: f64,
    /// False when positioning runs on the fixed-width fallback, which
    /// makes the filter treat intersecting text ops conservatively.
    pub has_metrics: bool,
    /// Whether string operands carry two-byte codes
    two_byte: bool,
    widths: WidthSource,
}

impl Font {
    /// Builds a font from its dictionary, resolving indirect pieces.
    pub fn from_dict(dict: &Dict, xref: &mut XRef) -> RedactResult<Self> {
        let subtype = dict
            .get("Subtype")
            .and_then(PdfObject::as_name)
            .unwrap_or("Unknown");
        let font_type = FontType::from_subtype(subtype);
        let base_font = dict
            .get("BaseFont")
            .and_then(PdfObject::as_name)
            .unwrap_or("Unknown")
            .to_string();

        if font_type == FontType::Type0 {
            return Self::from_type0(dict, base_font, xref);
        }

        let descriptor = xref.resolve_dict_entry(dict, "FontDescriptor")?;
        let (ascent, descent, missing_width) = descriptor_metrics(descriptor.as_dict());

        let widths_obj = xref.resolve_dict_entry(dict, "Widths")?;
        let first_char = dict
            .get("FirstChar")
            .and_then(PdfObject::as_integer)
            .unwrap_or(0) as u32;

        let (widths, has_metrics) = match widths_obj.as_array() {
            Some(arr) if !arr.is_empty() => {
                let mut values = Vec::with_capacity(arr.len());
                for item in arr {
                    let value = xref.resolve(item)?;
                    values.push(value.as_number().unwrap_or(0.0));
                }
                (
                    WidthSource::Simple {
                        first_char,
                        widths: values,
                        missing: missing_width,
                    },
                    true,
                )
            }
            _ => match builtin_metrics(&base_font) {
                Some(metrics) => (WidthSource::Builtin(metrics), true),
                None => (WidthSource::Fallback(FALLBACK_WIDTH), false),
            },
        };

        let (ascent, descent) = default_band(&base_font, ascent, descent);

        Ok(Font {
            base_font,
            font_type,
            ascent,
            descent,
            has_metrics,
            two_byte: false,
            widths,
        })
    }

    fn from_type0(dict: &Dict, base_font: String, xref: &mut XRef) -> RedactResult<Self> {
        let descendants = xref.resolve_dict_entry(dict, "DescendantFonts")?;
        let descendant = match descendants.as_array().and_then(|a| a.first()) {
            Some(first) => xref.resolve(first)?,
            None => PdfObject::Null,
        };

        let mut default_width = 1000.0;
        let mut map = FxHashMap::default();
        let mut ascent = 0.0;
        let mut descent = 0.0;
        let mut has_metrics = false;

        if let Some(desc_dict) = descendant.as_dict() {
            default_width = desc_dict
                .get("DW")
                .and_then(PdfObject::as_number)
                .unwrap_or(1000.0);
            let descriptor = xref.resolve_dict_entry(desc_dict, "FontDescriptor")?;
            let (a, d, _) = descriptor_metrics(descriptor.as_dict());
            ascent = a;
            descent = d;

            let w = xref.resolve_dict_entry(desc_dict, "W")?;
            if let Some(items) = w.as_array() {
                parse_cid_widths(items, &mut map);
                has_metrics = true;
            }
        }

        let (ascent, descent) = default_band(&base_font, ascent, descent);

        Ok(Font {
            base_font,
            font_type: FontType::Type0,
            ascent,
            descent,
            // /DW alone still gives usable positioning
            has_metrics: has_metrics || default_width != 0.0,
            two_byte: true,
            widths: WidthSource::Cid {
                map,
                default: default_width,
            },
        })
    }

    /// A font that positions text with a constant advance; used when the
    /// resources dictionary has no entry for a referenced font name.
    pub fn fallback() -> Self {
        Font {
            base_font: "Unknown".to_string(),
            font_type: FontType::Unknown,
            ascent: 800.0,
            descent: -200.0,
            has_metrics: false,
            two_byte: false,
            widths: WidthSource::Fallback(FALLBACK_WIDTH),
        }
    }

    /// Splits a string operand into character codes with byte spans.
    pub fn decode(&self, bytes: &[u8]) -> Vec<CharCode> {
        let mut out = Vec::with_capacity(if self.two_byte {
            bytes.len() / 2 + 1
        } else {
            bytes.len()
        });
        if self.two_byte {
            let mut i = 0;
            while i + 1 < bytes.len() {
                out.push(CharCode {
                    code: u16::from_be_bytes([bytes[i], bytes[i + 1]]) as u32,
                    offset: i,
                    len: 2,
                });
                i += 2;
            }
            if i < bytes.len() {
                out.push(CharCode {
                    code: bytes[i] as u32,
                    offset: i,
                    len: 1,
                });
            }
        } else {
            for (i, &b) in bytes.iter().enumerate() {
                out.push(CharCode {
                    code: b as u32,
                    offset: i,
                    len: 1,
                });
            }
        }
        out
    }

    /// Advance width for a code, in thousandths of an em.
    pub fn width_1000(&self, code: u32) -> f64 {
        match &self.widths {
            WidthSource::Simple {
                first_char,
                widths,
                missing,
            } => {
                if code >= *first_char {
                    match widths.get((code - first_char) as usize) {
                        Some(w) if *w > 0.0 => *w,
                        _ => *missing,
                    }
                } else {
                    *missing
                }
            }
            WidthSource::Cid { map, default } => map.get(&code).copied().unwrap_or(*default),
            WidthSource::Builtin(metrics) => metrics.width(code),
            WidthSource::Fallback(w) => *w,
        }
    }

    /// Whether word spacing applies to this code (single-byte code 32).
    pub fn applies_word_spacing(&self, char_code: &CharCode) -> bool {
        char_code.len == 1 && char_code.code == 32
    }

    /// Best-effort unicode for reports and text extraction.
    pub fn unicode(&self, code: u32) -> Option<char> {
        if self.two_byte {
            char::from_u32(code)
        } else {
            // Latin-1 view of the byte code
            char::from_u32(code)
        }
    }
}

const FALLBACK_WIDTH: f64 = 500.0;

fn descriptor_metrics(descriptor: Option<&Dict>) -> (f64, f64, f64) {
    match descriptor {
        Some(d) => (
            d.get("Ascent").and_then(PdfObject::as_number).unwrap_or(0.0),
            d.get("Descent")
                .and_then(PdfObject::as_number)
                .unwrap_or(0.0),
            d.get("MissingWidth")
                .and_then(PdfObject::as_number)
                .unwrap_or(0.0),
        ),
        None => (0.0, 0.0, 0.0),
    }
}

fn default_band(base_font: &str, ascent: f64, descent: f64) -> (f64, f64) {
    if ascent != 0.0 || descent != 0.0 {
        return (ascent, descent);
    }
    let name = normalized_base(base_font);
    if name.contains("Times") {
        (683.0, -217.0)
    } else if name.contains("Courier") {
        (629.0, -157.0)
    } else if name.contains("Helvetica") || name.contains("Arial") {
        (718.0, -207.0)
    } else {
        (800.0, -200.0)
    }
}

/// Strips the `ABCDEF+` subset prefix.
fn normalized_base(base_font: &str) -> &str {
    match base_font.split_once('+') {
        Some((prefix, rest)) if prefix.len() == 6 => rest,
        _ => base_font,
    }
}

/// `/W` array: `c [w1 w2 ...]` assigns consecutive widths from `c`;
/// `c1 c2 w` assigns `w` to the whole range.
fn parse_cid_widths(items: &[PdfObject], map: &mut FxHashMap<u32, f64>) {
    let mut i = 0;
    while i < items.len() {
        let Some(start) = items[i].as_integer() else {
            i += 1;
            continue;
        };
        match items.get(i + 1) {
            Some(PdfObject::Array(ws)) => {
                for (k, w) in ws.iter().enumerate() {
                    if let Some(width) = w.as_number() {
                        map.insert(start as u32 + k as u32, width);
                    }
                }
                i += 2;
            }
            Some(end_obj) => {
                let (Some(end), Some(width)) = (
                    end_obj.as_integer(),
                    items.get(i + 2).and_then(PdfObject::as_number),
                ) else {
                    i += 1;
                    continue;
                };
                for code in start..=end {
                    map.insert(code as u32, width);
                }
                i += 3;
            }
            None => break,
        }
    }
}

/// Width table for one standard-14 family over ASCII 32..=126.
#[derive(Debug)]
pub struct BuiltinMetrics {
    widths: &'static [u16; 95],
    fixed: Option<f64>,
}

impl BuiltinMetrics {
    fn width(&self, code: u32) -> f64 {
        if let Some(fixed) = self.fixed {
            return fixed;
        }
        if (32..=126).contains(&code) {
            self.widths[(code - 32) as usize] as f64
        } else {
            // Outside the printable range use the space width
            self.widths[0] as f64
        }
    }
}

#[rustfmt::skip]
static HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333,
    278, 278, 556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278,
    584, 584, 584, 556, 1015, 667, 667, 722, 722, 667, 611, 778, 722, 278,
    500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944,
    667, 667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556,
    278, 556, 556, 222, 222, 500, 222, 833, 556, 556, 556, 556, 333, 500,
    278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
static TIMES_WIDTHS: [u16; 95] = [
    250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333,
    250, 278, 500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 278, 278,
    564, 564, 564, 444, 921, 722, 667, 667, 722, 611, 556, 722, 722, 333,
    389, 722, 611, 889, 722, 722, 556, 722, 667, 556, 611, 722, 722, 944,
    722, 722, 611, 333, 278, 333, 469, 500, 333, 444, 500, 444, 500, 444,
    333, 500, 500, 278, 278, 500, 278, 778, 500, 500, 500, 500, 333, 389,
    278, 500, 500, 722, 500, 500, 444, 480, 200, 480, 541,
];

static HELVETICA: BuiltinMetrics = BuiltinMetrics {
    widths: &HELVETICA_WIDTHS,
    fixed: None,
};
static TIMES: BuiltinMetrics = BuiltinMetrics {
    widths: &TIMES_WIDTHS,
    fixed: None,
};
static COURIER: BuiltinMetrics = BuiltinMetrics {
    widths: &HELVETICA_WIDTHS, // unused when fixed is set
    fixed: Some(600.0),
};

fn builtin_metrics(base_font: &str) -> Option<&'static BuiltinMetrics> {
    let name = normalized_base(base_font);
    if name.contains("Courier") || name.contains("Mono") {
        Some(&COURIER)
    } else if name.contains("Times") {
        Some(&TIMES)
    } else if name.contains("Helvetica") || name.contains("Arial") {
        Some(&HELVETICA)
    } else {
        None
    }
}
