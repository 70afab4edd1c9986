//! Capture-time extraction from embedded image metadata
//!
//! Three metadata sources are consulted in priority order (EXIF, IPTC, XMP)
//! and the first one yielding a parseable date wins. Every failure along the
//! way simply moves on to the next source; a file without any usable date
//! produces `None`, which callers cache like any other result.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use exif::{In, Reader, Tag, Value};
use log::{debug, trace};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

/// EXIF tags to try for date extraction, in priority order
const EXIF_DATE_TAGS: &[Tag] = &[
    Tag::DateTimeOriginal,  // When the original image was taken
    Tag::DateTimeDigitized, // When the image was created/digitized
    Tag::DateTime,          // File modification date/time
];

/// XMP properties to look for, in priority order
const XMP_DATE_TAGS: &[&str] = &[
    "xmp:CreateDate",
    "xmp:DateCreated",
    "xmp:ModifyDate",
    "exif:DateTimeOriginal",
];

/// Characters after an XMP tag that may hold its value
const XMP_WINDOW_CHARS: usize = 200;

/// Signature opening an APP1 XMP payload
const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// Bytes of a non-JPEG file searched for metadata
const HEADER_PREFIX_BYTES: u64 = 256 * 1024;

/// Upper bound on the JPEG header segments kept before SOS
const MAX_JPEG_HEADER_BYTES: usize = 8 * 1024 * 1024;

/// Last-resort `strptime`-style layouts
const FALLBACK_FORMATS: &[&str] = &[
    "%Y:%m:%d %H:%M:%S",
    "%Y:%m:%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// ISO-8601 layouts carrying a UTC offset
const ISO_OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
];

/// ISO-8601 layouts without offset, read as UTC
const ISO_NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

type MetadataSource = fn(&[u8]) -> Option<i64>;

/// Metadata sources in priority order
const SOURCES: &[(&str, MetadataSource)] = &[
    ("exif", exif_taken_ms),
    ("iptc", iptc_taken_ms),
    ("xmp", xmp_taken_ms),
];

/// Recover the capture time of an image file, in epoch milliseconds.
///
/// Only the metadata headers are read: JPEG segments up to the start of scan,
/// or a fixed prefix of other formats.
pub fn extract_taken_ms(path: &Path) -> Option<i64> {
    let header = File::open(path).and_then(|file| {
        let mut reader = BufReader::with_capacity(64 * 1024, file);
        read_metadata_header(&mut reader)
    });
    let bytes = match header {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Cannot read {} for metadata: {}", path.display(), e);
            return None;
        }
    };
    let taken = extract_taken_ms_from_bytes(&bytes);
    if taken.is_none() {
        trace!("No capture date in {}", path.display());
    }
    taken
}

/// Recover the capture time from an in-memory image
pub fn extract_taken_ms_from_bytes(bytes: &[u8]) -> Option<i64> {
    SOURCES.iter().find_map(|(name, source)| {
        let ms = source(bytes)?;
        trace!("Capture date found in {} block: {}", name, ms);
        Some(ms)
    })
}

fn exif_taken_ms(bytes: &[u8]) -> Option<i64> {
    let exif = Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;

    EXIF_DATE_TAGS.iter().find_map(|tag| {
        let field = exif.get_field(*tag, In::PRIMARY)?;
        match field.value {
            Value::Ascii(ref parts) => {
                let raw = parts.first()?;
                parse_date_ms(&String::from_utf8_lossy(raw))
            }
            _ => parse_date_ms(&field.display_value().to_string()),
        }
    })
}

fn iptc_taken_ms(bytes: &[u8]) -> Option<i64> {
    let iptc = jpeg_segments(bytes)
        .filter(|(marker, _)| *marker == 0xED)
        .find_map(|(_, payload)| photoshop_iptc_block(payload))?;

    let (date, time) = iptc_date_time(iptc);
    let date = date?;
    let time = time.unwrap_or_else(|| "000000".to_string());
    if date.len() < 8 || time.len() < 6 || !date.is_ascii() || !time.is_ascii() {
        return None;
    }

    let iso = format!(
        "{}-{}-{} {}:{}:{}",
        &date[..4],
        &date[4..6],
        &date[6..8],
        &time[..2],
        &time[2..4],
        &time[4..6]
    );
    parse_date_ms(&iso)
}

fn xmp_taken_ms(bytes: &[u8]) -> Option<i64> {
    let packet = xmp_packet(bytes)?;
    let text = String::from_utf8_lossy(packet);

    XMP_DATE_TAGS.iter().find_map(|tag| {
        let start = text.find(tag)?;
        let window: String = text[start..].chars().take(XMP_WINDOW_CHARS).collect();
        let open = window.find('>')?;
        let close = window[open + 1..].find('<')? + open + 1;
        parse_date_ms(window[open + 1..close].trim())
    })
}

/// Parse a metadata date string into epoch milliseconds (UTC).
///
/// Accepts ISO-8601 (with or without offset, `Z` suffix, colon-separated date
/// part), the EXIF `YYYY:MM:DD HH:MM:SS` layout and a few close relatives.
pub fn parse_date_ms(input: &str) -> Option<i64> {
    let s = input.trim().trim_matches('\0').trim();
    if s.is_empty() {
        return None;
    }

    if s.contains('T') || s.ends_with('Z') {
        if let Some(ms) = parse_iso_ms(s).or_else(|| parse_colon_dated_iso_ms(s)) {
            return Some(ms);
        }
    } else if has_exif_date_layout(s) {
        let hyphenated = format!("{}-{}-{}", &s[..4], &s[5..7], &s[8..]);
        if let Some(ms) = parse_iso_ms(&hyphenated) {
            return Some(ms);
        }
    }

    FALLBACK_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

fn parse_iso_ms(s: &str) -> Option<i64> {
    let s = s.replace('Z', "+00:00");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.timestamp_millis());
    }
    if let Some(dt) = ISO_OFFSET_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(&s, format).ok())
    {
        return Some(dt.timestamp_millis());
    }
    if let Some(naive) = ISO_NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&s, format).ok())
    {
        return Some(naive.and_utc().timestamp_millis());
    }

    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// ISO string whose date part uses EXIF colons, e.g. `2023:11:14T10:00:00`
fn parse_colon_dated_iso_ms(s: &str) -> Option<i64> {
    let (date, time) = s.split_once('T')?;
    if !date.contains(':') {
        return None;
    }
    parse_iso_ms(&format!("{}T{}", date.replacen(':', "-", 2), time))
}

fn has_exif_date_layout(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 10 && bytes[4] == b':' && bytes[7] == b':'
}

/// Iterator over `(marker, payload)` pairs of a JPEG's header segments
struct JpegSegments<'a> {
    data: &'a [u8],
    pos: usize,
}

fn jpeg_segments(data: &[u8]) -> JpegSegments<'_> {
    let pos = if data.starts_with(&[0xFF, 0xD8]) {
        2
    } else {
        data.len()
    };
    JpegSegments { data, pos }
}

impl<'a> Iterator for JpegSegments<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Markers are 0xFF followed by a non-0xFF byte.
            while *self.data.get(self.pos)? != 0xFF {
                self.pos += 1;
            }
            while *self.data.get(self.pos)? == 0xFF {
                self.pos += 1;
            }
            let marker = self.data[self.pos];
            self.pos += 1;

            if marker == 0xD9 || marker == 0xDA {
                // EOI / SOS
                self.pos = self.data.len();
                return None;
            }
            if (0xD0..=0xD7).contains(&marker) || marker == 0x01 {
                continue;
            }

            let len_bytes = self.data.get(self.pos..self.pos + 2)?;
            let seg_len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
            if seg_len < 2 {
                self.pos = self.data.len();
                return None;
            }
            let payload = self.data.get(self.pos + 2..self.pos + seg_len)?;
            self.pos += seg_len;
            return Some((marker, payload));
        }
    }
}

/// IPTC-NAA resource (0x0404) of a Photoshop APP13 payload
fn photoshop_iptc_block(app13: &[u8]) -> Option<&[u8]> {
    const HEADER: &[u8] = b"Photoshop 3.0\0";
    let mut rest = app13.strip_prefix(HEADER)?;

    while rest.len() >= 12 && rest.starts_with(b"8BIM") {
        let id = u16::from_be_bytes([rest[4], rest[5]]);
        let name_len = rest[6] as usize;
        // Pascal name, padded so length byte plus name is even
        let name_total = (name_len + 2) & !1;
        let size_at = 6 + name_total;
        let size_bytes = rest.get(size_at..size_at + 4)?;
        let size = u32::from_be_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]])
            as usize;
        let data_at = size_at + 4;
        let data = rest.get(data_at..data_at + size)?;

        if id == 0x0404 {
            return Some(data);
        }
        let next = data_at + size + (size & 1);
        rest = rest.get(next..)?;
    }
    None
}

/// DateCreated (2:55) and TimeCreated (2:60) of an IPTC record stream
fn iptc_date_time(mut data: &[u8]) -> (Option<String>, Option<String>) {
    let mut date = None;
    let mut time = None;

    while data.len() >= 5 && data[0] == 0x1C {
        let record = data[1];
        let dataset = data[2];
        let size = u16::from_be_bytes([data[3], data[4]]) as usize;
        if size & 0x8000 != 0 {
            // Extended datasets never carry dates
            break;
        }
        let Some(value) = data.get(5..5 + size) else {
            break;
        };
        if record == 2 {
            let text = String::from_utf8_lossy(value).trim().to_string();
            match dataset {
                55 => date = Some(text),
                60 => time = Some(text),
                _ => {}
            }
        }
        data = &data[5 + size..];
    }
    (date, time)
}

/// Header bytes of an image stream.
///
/// A JPEG is copied segment by segment until SOS or EOI and closed with an
/// EOI marker, so entropy-coded data is never read. Anything else yields its
/// first [`HEADER_PREFIX_BYTES`].
fn read_metadata_header<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let mut soi = [0u8; 2];
    let got = read_up_to(r, &mut soi)?;
    let mut out = soi[..got].to_vec();
    if soi != [0xFF, 0xD8] {
        r.by_ref()
            .take(HEADER_PREFIX_BYTES - got as u64)
            .read_to_end(&mut out)?;
        return Ok(out);
    }

    while out.len() < MAX_JPEG_HEADER_BYTES {
        let Some(marker) = read_marker(r)? else {
            break;
        };
        if marker == 0xD9 || marker == 0xDA {
            // EOI / SOS
            break;
        }
        if (0xD0..=0xD7).contains(&marker) || marker == 0x01 {
            continue;
        }
        let mut len = [0u8; 2];
        if read_up_to(r, &mut len)? < 2 {
            break;
        }
        let seg_len = u16::from_be_bytes(len) as usize;
        if seg_len < 2 {
            break;
        }
        let mut payload = vec![0u8; seg_len - 2];
        if read_up_to(r, &mut payload)? < payload.len() {
            break;
        }
        out.extend_from_slice(&[0xFF, marker]);
        out.extend_from_slice(&len);
        out.extend_from_slice(&payload);
    }
    out.extend_from_slice(&[0xFF, 0xD9]);
    Ok(out)
}

/// Next marker byte: 0xFF followed by a non-0xFF byte
fn read_marker<R: Read>(r: &mut R) -> io::Result<Option<u8>> {
    let mut b = [0u8; 1];
    loop {
        if read_up_to(r, &mut b)? == 0 {
            return Ok(None);
        }
        if b[0] == 0xFF {
            break;
        }
    }
    loop {
        if read_up_to(r, &mut b)? == 0 {
            return Ok(None);
        }
        if b[0] != 0xFF {
            return Ok(Some(b[0]));
        }
    }
}

/// Fill `buf` as far as the stream allows, returning the count read
fn read_up_to<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Raw XMP packet from the header area.
///
/// JPEGs only consult APP1 XMP segments before SOS; other formats are
/// searched within their first [`HEADER_PREFIX_BYTES`].
fn xmp_packet(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.starts_with(&[0xFF, 0xD8]) {
        return jpeg_segments(bytes)
            .filter(|(marker, _)| *marker == 0xE1)
            .find_map(|(_, payload)| payload.strip_prefix(XMP_SIGNATURE))
            .and_then(xmp_packet_in);
    }
    let prefix = bytes.len().min(HEADER_PREFIX_BYTES as usize);
    xmp_packet_in(&bytes[..prefix])
}

fn xmp_packet_in(bytes: &[u8]) -> Option<&[u8]> {
    let start = find_bytes(bytes, b"<x:xmpmeta").or_else(|| find_bytes(bytes, b"<rdf:RDF"))?;
    let tail = &bytes[start..];
    let end = find_bytes(tail, b"</x:xmpmeta>")
        .or_else(|| find_bytes(tail, b"</rdf:RDF>"))
        .unwrap_or(tail.len());
    Some(&tail[..end])
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
