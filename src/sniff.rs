use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
        }
    }

    /// Best-effort guess from a declared `Content-Type`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.to_ascii_lowercase();
        [
            ("jpeg", ImageFormat::Jpg),
            ("jpg", ImageFormat::Jpg),
            ("png", ImageFormat::Png),
            ("gif", ImageFormat::Gif),
            ("webp", ImageFormat::Webp),
        ]
        .into_iter()
        .find_map(|(needle, fmt)| ct.contains(needle).then_some(fmt))
    }
}

/// Identify an image by its leading magic bytes.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageFormat::Jpg)
    } else if bytes.starts_with(b"\x89PNG") {
        Some(ImageFormat::Png)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageFormat::Gif)
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
        Some(ImageFormat::Webp)
    } else {
        None
    }
}

/// Pixel size read from the header alone. `(0, 0)` means unknown, never an error.
pub fn read_dimensions(bytes: &[u8]) -> (u32, u32) {
    let dims = match detect_format(bytes) {
        Some(ImageFormat::Png) => png_dimensions(bytes),
        Some(ImageFormat::Jpg) => jpeg_dimensions(bytes),
        Some(ImageFormat::Gif) => gif_dimensions(bytes),
        Some(ImageFormat::Webp) => webp_dimensions(bytes),
        None => None,
    };
    dims.unwrap_or((0, 0))
}

fn be_u16(b: &[u8], at: usize) -> Option<u32> {
    let s = b.get(at..at + 2)?;
    Some(u16::from_be_bytes([s[0], s[1]]) as u32)
}

fn le_u16(b: &[u8], at: usize) -> Option<u32> {
    let s = b.get(at..at + 2)?;
    Some(u16::from_le_bytes([s[0], s[1]]) as u32)
}

fn be_u32(b: &[u8], at: usize) -> Option<u32> {
    let s = b.get(at..at + 4)?;
    Some(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}

fn le_u24(b: &[u8], at: usize) -> Option<u32> {
    let s = b.get(at..at + 3)?;
    Some(u32::from_le_bytes([s[0], s[1], s[2], 0]))
}

// IHDR width/height follow the 8-byte signature and the 8-byte chunk header.
fn png_dimensions(b: &[u8]) -> Option<(u32, u32)> {
    Some((be_u32(b, 16)?, be_u32(b, 20)?))
}

fn gif_dimensions(b: &[u8]) -> Option<(u32, u32)> {
    Some((le_u16(b, 6)?, le_u16(b, 8)?))
}

/// Walk markers from just after SOI until a baseline or progressive SOF.
fn jpeg_dimensions(b: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 1 < b.len() {
        if b[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = b[i + 1];
        match marker {
            0xC0 | 0xC2 => {
                let height = be_u16(b, i + 5)?;
                let width = be_u16(b, i + 7)?;
                return Some((width, height));
            }
            // fill byte
            0xFF => i += 1,
            // standalone markers carry no length
            0x00 | 0x01 | 0xD0..=0xD9 => i += 2,
            _ => {
                let len = be_u16(b, i + 2)? as usize;
                if len < 2 {
                    return None;
                }
                i += 2 + len;
            }
        }
    }
    None
}

fn webp_dimensions(b: &[u8]) -> Option<(u32, u32)> {
    let payload = 20;
    match b.get(12..16)? {
        b"VP8 " => {
            // 3-byte frame tag, then the 9D 01 2A start code
            if b.get(payload + 3..payload + 6)? != [0x9D, 0x01, 0x2A] {
                return None;
            }
            let w = le_u16(b, payload + 6)? & 0x3FFF;
            let h = le_u16(b, payload + 8)? & 0x3FFF;
            Some((w, h))
        }
        b"VP8L" => {
            if *b.get(payload)? != 0x2F {
                return None;
            }
            let p = b.get(payload + 1..payload + 5)?;
            let (b0, b1, b2, b3) = (p[0] as u32, p[1] as u32, p[2] as u32, p[3] as u32);
            let w = 1 + (((b1 & 0x3F) << 8) | b0);
            let h = 1 + (((b3 & 0x0F) << 10) | (b2 << 2) | ((b1 & 0xC0) >> 6));
            Some((w, h))
        }
        b"VP8X" => Some((1 + le_u24(b, payload + 4)?, 1 + le_u24(b, payload + 7)?)),
        _ => None,
    }
}
