//! Minimal ESC/POS binary command builder for thermal receipt printers.
//!
//! Generates the raw byte sequences written to the printer over the serial
//! port. Supports text formatting, alignment, Korean text encoding (EUC-KR
//! double-byte mode), and paper cutting.

// ESC/POS command bytes
const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const FS: u8 = 0x1C;
const LF: u8 = 0x0A;

/// Paper width in print columns. Hangul glyphs occupy two columns each.
#[derive(Debug, Clone, Copy)]
pub enum PaperWidth {
    Mm58,
    Mm80,
}

impl PaperWidth {
    pub fn chars(self) -> usize {
        match self {
            PaperWidth::Mm58 => 32,
            PaperWidth::Mm80 => 42,
        }
    }

    pub fn from_mm(mm: i32) -> Self {
        if mm <= 58 {
            PaperWidth::Mm58
        } else {
            PaperWidth::Mm80
        }
    }
}

/// Builder for generating ESC/POS binary command buffers.
///
/// ```rust,ignore
/// let data = EscPosBuilder::new()
///     .init()
///     .center()
///     .bold(true).text("영수증\n").bold(false)
///     .left()
///     .separator()
///     .feed(3)
///     .cut()
///     .build();
/// ```
pub struct EscPosBuilder {
    buffer: Vec<u8>,
    paper: PaperWidth,
    korean_mode: bool,
}

impl EscPosBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(512),
            paper: PaperWidth::Mm80,
            korean_mode: false,
        }
    }

    pub fn with_paper(mut self, paper: PaperWidth) -> Self {
        self.paper = paper;
        self
    }

    pub fn paper(&self) -> PaperWidth {
        self.paper
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    /// ESC @ — Initialize printer, reset to defaults.
    pub fn init(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    /// FS & + ESC R 13 — Enable double-byte Hangul mode and select the
    /// Korean international character set. Text appended afterwards is
    /// encoded as EUC-KR.
    pub fn korean_mode(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[FS, 0x26]);
        self.buffer.extend_from_slice(&[ESC, 0x52, 13]);
        self.korean_mode = true;
        self
    }

    // -----------------------------------------------------------------------
    // Text formatting
    // -----------------------------------------------------------------------

    /// ESC E n — Bold on/off.
    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buffer
            .extend_from_slice(&[ESC, 0x45, if on { 1 } else { 0 }]);
        self
    }

    /// GS ! n — Set text size (width × height multiplier, 1–8 each).
    pub fn text_size(&mut self, width: u8, height: u8) -> &mut Self {
        let w = width.clamp(1, 8) - 1;
        let h = height.clamp(1, 8) - 1;
        self.buffer.extend_from_slice(&[GS, 0x21, (w << 4) | h]);
        self
    }

    /// Reset text size to 1×1.
    pub fn normal_size(&mut self) -> &mut Self {
        self.text_size(1, 1)
    }

    /// Double-width, double-height text (2×2).
    pub fn double_size(&mut self) -> &mut Self {
        self.text_size(2, 2)
    }

    // -----------------------------------------------------------------------
    // Alignment
    // -----------------------------------------------------------------------

    /// ESC a 0 — Left-align.
    pub fn left(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 0]);
        self
    }

    /// ESC a 1 — Centre-align.
    pub fn center(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 1]);
        self
    }

    /// ESC a 2 — Right-align.
    pub fn right(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 2]);
        self
    }

    // -----------------------------------------------------------------------
    // Text output
    // -----------------------------------------------------------------------

    /// Append text. Characters are encoded as EUC-KR in Korean mode, or
    /// ASCII with `?` substitution otherwise.
    pub fn text(&mut self, s: &str) -> &mut Self {
        if self.korean_mode {
            self.buffer.extend(encode_euc_kr(s));
        } else {
            for ch in s.chars() {
                let code = ch as u32;
                if code < 0x80 {
                    self.buffer.push(code as u8);
                } else {
                    self.buffer.push(b'?');
                }
            }
        }
        self
    }

    /// Append raw bytes (e.g. pre-encoded text).
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(data);
        self
    }

    /// Append a line-feed.
    pub fn lf(&mut self) -> &mut Self {
        self.buffer.push(LF);
        self
    }

    /// Print a horizontal separator using dashes, matching paper width.
    pub fn separator(&mut self) -> &mut Self {
        let width = self.paper.chars();
        for _ in 0..width {
            self.buffer.push(b'-');
        }
        self.buffer.push(LF);
        self
    }

    /// Print a line with left-aligned label and right-aligned value.
    /// Padding is computed in print columns, so Hangul text (two columns
    /// per glyph) stays aligned with ASCII.
    pub fn line_pair(&mut self, label: &str, value: &str) -> &mut Self {
        let width = self.paper.chars();
        let gap = width.saturating_sub(display_width(label) + display_width(value));
        self.text(label);
        for _ in 0..gap {
            self.buffer.push(b' ');
        }
        self.text(value);
        self.lf()
    }

    // -----------------------------------------------------------------------
    // Feed / cut
    // -----------------------------------------------------------------------

    /// ESC d n — Feed n lines.
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x64, lines]);
        self
    }

    /// GS V A 16 — Partial cut with 16-dot feed.
    pub fn cut(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x56, 0x41, 0x10]);
        self
    }

    // -----------------------------------------------------------------------
    // Build
    // -----------------------------------------------------------------------

    /// Consume the builder and return the binary ESC/POS payload.
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// EUC-KR text encoding
// ---------------------------------------------------------------------------

/// Encode a string to EUC-KR bytes. ASCII passes through single-byte;
/// Hangul and CJK map to their double-byte EUC-KR values. Characters the
/// code page cannot represent are replaced with `?` (0x3F).
pub fn encode_euc_kr(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let code = ch as u32;
        if code < 0x80 {
            bytes.push(code as u8);
            continue;
        }
        let mut utf8 = [0u8; 4];
        let s: &str = ch.encode_utf8(&mut utf8);
        let (encoded, _, had_errors) = encoding_rs::EUC_KR.encode(s);
        if had_errors {
            bytes.push(b'?');
        } else {
            bytes.extend_from_slice(&encoded);
        }
    }
    bytes
}

/// Print-column width of a string: Hangul, CJK, and fullwidth characters
/// occupy two columns on the printer, everything else one.
pub fn display_width(text: &str) -> usize {
    text.chars().map(|ch| if is_wide(ch) { 2 } else { 1 }).sum()
}

fn is_wide(ch: char) -> bool {
    matches!(ch as u32,
        0x1100..=0x115F     // Hangul Jamo
        | 0x2E80..=0x303E   // CJK radicals, punctuation
        | 0x3041..=0x33FF   // Kana, CJK symbols
        | 0x3400..=0x4DBF   // CJK extension A
        | 0x4E00..=0x9FFF   // CJK unified ideographs
        | 0xA000..=0xA4CF   // Yi
        | 0xAC00..=0xD7A3   // Hangul syllables
        | 0xF900..=0xFAFF   // CJK compatibility ideographs
        | 0xFE30..=0xFE4F   // CJK compatibility forms
        | 0xFF00..=0xFF60   // Fullwidth forms
        | 0xFFE0..=0xFFE6)
}

// ===========================================================================
// Tests
// ===========================================================================
