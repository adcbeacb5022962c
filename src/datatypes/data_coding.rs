// ABOUTME: data_coding values and text conversion for short_message payloads
// ABOUTME: GSM 03.38 default alphabet (unpacked, one septet per octet) and UCS-2 big endian

use bytes::Bytes;
use std::fmt;

/// The data_coding values the gateway distinguishes
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataCoding {
    /// SMSC default alphabet, GSM 03.38
    #[default]
    SmscDefault,
    /// IA5 / ASCII
    Ascii,
    /// 8-bit binary
    Binary,
    /// ISO-8859-1
    Latin1,
    /// UCS-2 (UTF-16BE on the wire)
    Ucs2,
    Custom(u8),
}

impl DataCoding {
    pub fn from_byte(value: u8) -> Self {
        match value {
            0x00 => DataCoding::SmscDefault,
            0x01 => DataCoding::Ascii,
            0x02 | 0x04 => DataCoding::Binary,
            0x03 => DataCoding::Latin1,
            0x08 => DataCoding::Ucs2,
            _ => DataCoding::Custom(value),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            DataCoding::SmscDefault => 0x00,
            DataCoding::Ascii => 0x01,
            DataCoding::Binary => 0x04,
            DataCoding::Latin1 => 0x03,
            DataCoding::Ucs2 => 0x08,
            DataCoding::Custom(value) => value,
        }
    }

    pub fn is_unicode(self) -> bool {
        matches!(self, DataCoding::Ucs2)
    }

    /// Decode a payload to text. Undecodable input is replaced, never rejected.
    pub fn decode(self, data: &[u8]) -> String {
        match self {
            DataCoding::SmscDefault => gsm7_decode(data),
            DataCoding::Ucs2 => {
                let units: Vec<u16> = data
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            DataCoding::Latin1 => data.iter().map(|&b| b as char).collect(),
            DataCoding::Ascii | DataCoding::Binary | DataCoding::Custom(_) => {
                String::from_utf8_lossy(data).into_owned()
            }
        }
    }

    /// Encode text for the wire in this coding
    pub fn encode(self, text: &str) -> Bytes {
        match self {
            DataCoding::SmscDefault => Bytes::from(gsm7_encode(text)),
            DataCoding::Ucs2 => Bytes::from(
                text.encode_utf16()
                    .flat_map(|unit| unit.to_be_bytes())
                    .collect::<Vec<u8>>(),
            ),
            DataCoding::Latin1 => Bytes::from(
                text.chars()
                    .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
                    .collect::<Vec<u8>>(),
            ),
            DataCoding::Ascii | DataCoding::Binary | DataCoding::Custom(_) => {
                Bytes::copy_from_slice(text.as_bytes())
            }
        }
    }

    /// Pick the narrowest coding able to carry `text`
    pub fn for_text(text: &str) -> Self {
        if is_gsm7(text) {
            DataCoding::SmscDefault
        } else {
            DataCoding::Ucs2
        }
    }
}

impl fmt::Debug for DataCoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataCoding::SmscDefault => write!(f, "SmscDefault(0x00)"),
            DataCoding::Ascii => write!(f, "Ascii(0x01)"),
            DataCoding::Binary => write!(f, "Binary(0x04)"),
            DataCoding::Latin1 => write!(f, "Latin1(0x03)"),
            DataCoding::Ucs2 => write!(f, "Ucs2(0x08)"),
            DataCoding::Custom(value) => write!(f, "Custom({value:#04x})"),
        }
    }
}

const GSM7_ESCAPE: u8 = 0x1B;

#[rustfmt::skip]
const GSM7_BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1B}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

const GSM7_EXTENSION: [(u8, char); 10] = [
    (0x0A, '\u{0C}'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

fn gsm7_basic_code(c: char) -> Option<u8> {
    if c == '\u{1B}' {
        return None;
    }
    GSM7_BASIC.iter().position(|&g| g == c).map(|i| i as u8)
}

fn gsm7_extension_code(c: char) -> Option<u8> {
    GSM7_EXTENSION
        .iter()
        .find(|(_, g)| *g == c)
        .map(|(code, _)| *code)
}

/// True when every character exists in the GSM 03.38 default or extension table
pub fn is_gsm7(text: &str) -> bool {
    text.chars()
        .all(|c| gsm7_basic_code(c).is_some() || gsm7_extension_code(c).is_some())
}

/// Septets needed to carry `text`; extension characters cost two
pub fn gsm7_septets(text: &str) -> usize {
    text.chars()
        .map(|c| if gsm7_extension_code(c).is_some() { 2 } else { 1 })
        .sum()
}

fn gsm7_encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        if let Some(code) = gsm7_basic_code(c) {
            out.push(code);
        } else if let Some(code) = gsm7_extension_code(c) {
            out.push(GSM7_ESCAPE);
            out.push(code);
        } else {
            out.push(b'?');
        }
    }
    out
}

fn gsm7_decode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    let mut bytes = data.iter().copied();
    while let Some(b) = bytes.next() {
        if b == GSM7_ESCAPE {
            let ext = bytes
                .next()
                .and_then(|code| GSM7_EXTENSION.iter().find(|(c, _)| *c == code))
                .map(|(_, ch)| *ch);
            out.push(ext.unwrap_or(' '));
        } else {
            out.push(GSM7_BASIC[(b & 0x7F) as usize]);
        }
    }
    out
}
