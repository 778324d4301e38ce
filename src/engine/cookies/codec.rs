//! Binary cookie file codec.
//!
//! The file starts with a fixed header:
//!
//! ```text
//! +----------------+----------------+-----------+-----------+
//! | file version   | app version    | tag len   | len len   |
//! | u32 BE         | u32 BE         | u16 BE =1 | u16 BE =2 |
//! +----------------+----------------+-----------+-----------+
//! ```
//!
//! followed by a stream of records. A record is a one byte tag; tags with the
//! high bit set carry no payload (presence flags, end markers), every other
//! tag is followed by a `u16` BE length and that many payload bytes. Domain,
//! path and cookie entries carry their fields as nested records.
//!
//! ```text
//! DOMAIN_ENTRY { name, [cookie mode], [third-party mode], [class] }
//!   COOKIE_ENTRY*                 cookies at "/"
//!   PATH_ENTRY { name }
//!     COOKIE_ENTRY* PATH_ENTRY* PATH_END
//!   DOMAIN_ENTRY* (subdomains)
//! DOMAIN_END
//! ```
//!
//! Decoding is forgiving: a corrupt cookie is skipped, a corrupt domain or
//! path entry loses only its own branch, and truncated input keeps whatever
//! was decoded before the cut.

use crate::engine::cookies::cookies::{Cookie, CookieFlags, Expiry, PortList};
use crate::engine::cookies::domain_index::DomainNode;
use crate::engine::cookies::path_index::PathNode;
use crate::engine::cookies::policy::{DomainClass, SiteCookieMode, SiteThirdPartyMode};
use crate::engine::errors::{CookieError, CookieResult};
use std::io::{self, Write};

pub const FILE_VERSION: u32 = 0x0000_1000;
pub const APP_VERSION: u32 = 0x0000_2000;

const TAG_LEN: u16 = 1;
const LEN_LEN: u16 = 2;
const HEADER_LEN: usize = 12;

/// Tags with this bit have no length and no payload.
const NO_PAYLOAD: u8 = 0x80;

const DOMAIN_ENTRY: u8 = 0x01;
const PATH_ENTRY: u8 = 0x02;
const COOKIE_ENTRY: u8 = 0x03;
const DOMAIN_END: u8 = 0x84;
const PATH_END: u8 = 0x85;

const DOMAIN_NAME: u8 = 0x1E;
const DOMAIN_COOKIE_MODE: u8 = 0x1F;
const DOMAIN_THIRD_PARTY_MODE: u8 = 0x21;
const DOMAIN_CLASS: u8 = 0x25;

const PATH_NAME: u8 = 0x1D;

const COOKIE_NAME: u8 = 0x10;
const COOKIE_VALUE: u8 = 0x11;
const COOKIE_EXPIRES: u8 = 0x12;
const COOKIE_LAST_USED: u8 = 0x13;
const COOKIE_COMMENT: u8 = 0x14;
const COOKIE_COMMENT_URL: u8 = 0x15;
const COOKIE_RECEIVED_DOMAIN: u8 = 0x16;
const COOKIE_RECEIVED_PATH: u8 = 0x17;
const COOKIE_PORT: u8 = 0x18;
const COOKIE_VERSION: u8 = 0x1A;
const COOKIE_LAST_SYNC: u8 = 0x28;

/// Presence flags of a cookie entry.
const FLAG_TAGS: [(u8, CookieFlags); 10] = [
    (0x99, CookieFlags::SECURE),
    (0x9B, CookieFlags::EXACT_SERVER_ONLY),
    (0x9C, CookieFlags::PROTECTED),
    (0xA0, CookieFlags::FULL_PATH_ONLY),
    (0xA2, CookieFlags::HAVE_PASSWORD),
    (0xA3, CookieFlags::HAVE_AUTHENTICATION),
    (0xA4, CookieFlags::THIRD_PARTY),
    (0xA5, CookieFlags::HTTP_ONLY),
    (0xA6, CookieFlags::ASSIGNED),
    (0xA7, CookieFlags::ACCEPT_UPDATES),
];

/// Deepest domain/path nesting accepted when reading.
const MAX_DEPTH: usize = 128;

// ---------- Writing ----------

/// Counts the bytes written through it; over `io::sink()` it is the dry run.
pub(crate) struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Builds the payload of one record.
#[derive(Default)]
struct Payload {
    buf: Vec<u8>,
}

impl Payload {
    fn flag(&mut self, tag: u8) {
        self.buf.push(tag);
    }

    fn bytes(&mut self, tag: u8, data: &[u8]) {
        // Oversized fields are caught when the enclosing record is written.
        let len = data.len().min(u16::MAX as usize) as u16;
        self.buf.push(tag);
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(&data[..len as usize]);
    }

    fn str(&mut self, tag: u8, s: &str) {
        self.bytes(tag, s.as_bytes());
    }

    fn int(&mut self, tag: u8, v: i64) {
        self.bytes(tag, &v.to_be_bytes());
    }

    fn byte(&mut self, tag: u8, v: u8) {
        self.bytes(tag, &[v]);
    }
}

fn write_record<W: Write>(w: &mut W, tag: u8, payload: &[u8]) -> io::Result<bool> {
    let Ok(len) = u16::try_from(payload.len()) else {
        log::warn!("cookie file record 0x{tag:02x} of {} bytes is too large, skipped", payload.len());
        return Ok(false);
    };
    w.write_all(&[tag])?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(payload)?;
    Ok(true)
}

fn cookie_payload(c: &Cookie) -> Payload {
    let mut p = Payload::default();
    p.str(COOKIE_NAME, &c.name);
    p.str(COOKIE_VALUE, &c.value);
    if let Expiry::At(t) = c.expires {
        p.int(COOKIE_EXPIRES, t);
    }
    p.int(COOKIE_LAST_USED, c.last_used);
    p.int(COOKIE_LAST_SYNC, c.last_sync);
    if c.version > 0 {
        p.byte(COOKIE_VERSION, c.version);
    }
    if let Some(v) = &c.comment {
        p.str(COOKIE_COMMENT, v);
    }
    if let Some(v) = &c.comment_url {
        p.str(COOKIE_COMMENT_URL, v);
    }
    if let Some(v) = &c.received_domain {
        p.str(COOKIE_RECEIVED_DOMAIN, v);
    }
    if let Some(v) = &c.received_path {
        p.str(COOKIE_RECEIVED_PATH, v);
    }
    if let Some(port) = &c.port {
        p.str(COOKIE_PORT, &port.joined());
    }
    for (tag, flag) in FLAG_TAGS {
        if c.flags.contains(flag) {
            p.flag(tag);
        }
    }
    p
}

fn path_has_content(node: &PathNode, now: i64) -> bool {
    node.cookies.iter().any(|c| c.is_persistent(now))
        || node.children.iter().any(|c| path_has_content(c, now))
}

fn domain_has_content(node: &DomainNode, now: i64) -> bool {
    !node.policy.is_default()
        || path_has_content(&node.paths, now)
        || node.children.iter().any(|c| domain_has_content(c, now))
}

struct Encoder<W> {
    w: CountingWriter<W>,
    now: i64,
}

impl<W: Write> Encoder<W> {
    fn header(&mut self) -> io::Result<()> {
        self.w.write_all(&FILE_VERSION.to_be_bytes())?;
        self.w.write_all(&APP_VERSION.to_be_bytes())?;
        self.w.write_all(&TAG_LEN.to_be_bytes())?;
        self.w.write_all(&LEN_LEN.to_be_bytes())
    }

    fn cookies(&mut self, list: &[Cookie]) -> io::Result<()> {
        let now = self.now;
        for c in list.iter().filter(|c| c.is_persistent(now)) {
            write_record(&mut self.w, COOKIE_ENTRY, &cookie_payload(c).buf)?;
        }
        Ok(())
    }

    fn path(&mut self, node: &PathNode) -> io::Result<()> {
        if !path_has_content(node, self.now) {
            return Ok(());
        }
        let mut p = Payload::default();
        p.str(PATH_NAME, &node.segment);
        if !write_record(&mut self.w, PATH_ENTRY, &p.buf)? {
            return Ok(());
        }
        self.cookies(&node.cookies)?;
        for child in &node.children {
            self.path(child)?;
        }
        self.w.write_all(&[PATH_END])
    }

    fn domain(&mut self, node: &DomainNode) -> io::Result<()> {
        if !domain_has_content(node, self.now) {
            return Ok(());
        }
        let mut p = Payload::default();
        p.str(DOMAIN_NAME, &node.label);
        if node.policy.cookie_mode != SiteCookieMode::Default {
            p.byte(DOMAIN_COOKIE_MODE, node.policy.cookie_mode.to_byte());
        }
        if node.policy.third_party != SiteThirdPartyMode::Default {
            p.byte(DOMAIN_THIRD_PARTY_MODE, node.policy.third_party.to_byte());
        }
        if let Some(class) = node.class.and_then(DomainClass::to_byte) {
            p.byte(DOMAIN_CLASS, class);
        }
        if !write_record(&mut self.w, DOMAIN_ENTRY, &p.buf)? {
            return Ok(());
        }
        self.cookies(&node.paths.cookies)?;
        for child in &node.paths.children {
            self.path(child)?;
        }
        for child in &node.children {
            self.domain(child)?;
        }
        self.w.write_all(&[DOMAIN_END])
    }
}

/// Writes every persistent cookie under `root`. Returns the bytes written.
pub(crate) fn encode<W: Write>(root: &DomainNode, now: i64, out: W) -> io::Result<u64> {
    let mut enc = Encoder { w: CountingWriter::new(out), now };
    enc.header()?;
    for child in &root.children {
        enc.domain(child)?;
    }
    enc.w.flush()?;
    Ok(enc.w.count())
}

/// Size [`encode`] would produce, without writing anything.
pub(crate) fn encoded_size(root: &DomainNode, now: i64) -> u64 {
    // Writing into a sink cannot fail.
    encode(root, now, io::sink()).unwrap_or(u64::MAX)
}

// ---------- Reading ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record<'a> {
    Flag(u8),
    Data(u8, &'a [u8]),
}

/// The input ended inside a record, or nesting went too deep.
#[derive(Debug)]
struct Truncated;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// `Ok(None)` at a clean end of input.
    fn next(&mut self) -> Result<Option<Record<'a>>, Truncated> {
        let Some(&tag) = self.buf.get(self.pos) else {
            return Ok(None);
        };
        if tag & NO_PAYLOAD != 0 {
            self.pos += 1;
            return Ok(Some(Record::Flag(tag)));
        }
        let len_bytes = self.buf.get(self.pos + 1..self.pos + 3).ok_or(Truncated)?;
        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        let start = self.pos + 3;
        let payload = self.buf.get(start..start + len).ok_or(Truncated)?;
        self.pos = start + len;
        Ok(Some(Record::Data(tag, payload)))
    }
}

fn read_int(data: &[u8]) -> Option<i64> {
    if data.is_empty() || data.len() > 8 {
        return None;
    }
    if data.len() == 8 {
        let mut b = [0u8; 8];
        b.copy_from_slice(data);
        return Some(i64::from_be_bytes(b));
    }
    Some(data.iter().fold(0i64, |acc, &b| (acc << 8) | b as i64))
}

fn read_str(data: &[u8]) -> Option<String> {
    std::str::from_utf8(data).ok().map(str::to_string)
}

fn decode_cookie(payload: &[u8]) -> Option<Cookie> {
    let mut c = Cookie::new("", "");
    c.flags = CookieFlags::empty();
    let mut have_name = false;
    let mut have_expiry = false;

    let mut fields = Reader::new(payload);
    while let Some(field) = fields.next().ok()? {
        match field {
            Record::Flag(tag) => {
                if let Some((_, flag)) = FLAG_TAGS.iter().find(|(t, _)| *t == tag) {
                    c.flags |= *flag;
                }
            }
            Record::Data(COOKIE_NAME, d) => {
                c.name = read_str(d)?;
                have_name = !c.name.is_empty();
            }
            Record::Data(COOKIE_VALUE, d) => c.value = read_str(d)?,
            Record::Data(COOKIE_EXPIRES, d) => {
                c.expires = Expiry::At(read_int(d)?);
                have_expiry = true;
            }
            Record::Data(COOKIE_LAST_USED, d) => c.last_used = read_int(d)?,
            Record::Data(COOKIE_LAST_SYNC, d) => c.last_sync = read_int(d)?,
            Record::Data(COOKIE_VERSION, d) => c.version = u8::try_from(read_int(d)?).ok()?,
            Record::Data(COOKIE_COMMENT, d) => c.comment = Some(read_str(d)?),
            Record::Data(COOKIE_COMMENT_URL, d) => c.comment_url = Some(read_str(d)?),
            Record::Data(COOKIE_RECEIVED_DOMAIN, d) => c.received_domain = Some(read_str(d)?),
            Record::Data(COOKIE_RECEIVED_PATH, d) => c.received_path = Some(read_str(d)?),
            Record::Data(COOKIE_PORT, d) => c.port = Some(PortList::parse(&read_str(d)?)?),
            Record::Data(_, _) => {}
        }
    }

    (have_name && have_expiry).then_some(c)
}

struct DomainFields {
    label: String,
    cookie_mode: SiteCookieMode,
    third_party: SiteThirdPartyMode,
    class: Option<DomainClass>,
}

fn decode_domain_fields(payload: &[u8]) -> Option<DomainFields> {
    let mut out = DomainFields {
        label: String::new(),
        cookie_mode: SiteCookieMode::Default,
        third_party: SiteThirdPartyMode::Default,
        class: None,
    };
    let mut fields = Reader::new(payload);
    while let Some(field) = fields.next().ok()? {
        match field {
            Record::Data(DOMAIN_NAME, d) => out.label = read_str(d)?.to_ascii_lowercase(),
            Record::Data(DOMAIN_COOKIE_MODE, d) => {
                out.cookie_mode = SiteCookieMode::from_byte(u8::try_from(read_int(d)?).ok()?)?
            }
            Record::Data(DOMAIN_THIRD_PARTY_MODE, d) => {
                out.third_party = SiteThirdPartyMode::from_byte(u8::try_from(read_int(d)?).ok()?)?
            }
            Record::Data(DOMAIN_CLASS, d) => out.class = DomainClass::from_byte(u8::try_from(read_int(d)?).ok()?),
            _ => {}
        }
    }
    (!out.label.is_empty() && !out.label.contains('.') || out.label.parse::<std::net::Ipv4Addr>().is_ok())
        .then_some(out)
}

fn decode_path_name(payload: &[u8]) -> Option<String> {
    let mut fields = Reader::new(payload);
    let mut name = None;
    while let Some(field) = fields.next().ok()? {
        if let Record::Data(PATH_NAME, d) = field {
            name = Some(read_str(d)?);
        }
    }
    name.filter(|n| !n.is_empty() && !n.contains('/'))
}

fn insert_cookie(list: &mut Vec<Cookie>, cookie: Cookie) {
    match list.iter_mut().find(|c| c.name == cookie.name) {
        Some(existing) => *existing = cookie,
        None => list.push(cookie),
    }
}

/// What a decode produced besides the tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DecodeStats {
    pub cookies: usize,
    pub skipped: usize,
    pub expired: usize,
    pub truncated: bool,
}

struct Decoder<'a> {
    reader: Reader<'a>,
    now: i64,
    stats: DecodeStats,
}

impl<'a> Decoder<'a> {
    fn cookie(&mut self, payload: &[u8], list: &mut Vec<Cookie>) {
        match decode_cookie(payload) {
            Some(c) if c.is_expired(self.now) => self.stats.expired += 1,
            Some(c) => {
                self.stats.cookies += 1;
                insert_cookie(list, c);
            }
            None => self.stats.skipped += 1,
        }
    }

    /// Reads a path body up to its `PATH_END`. Returns `true` when a
    /// `DOMAIN_END` closed the enclosing domain first.
    fn path_body(&mut self, node: &mut PathNode, depth: usize) -> Result<bool, Truncated> {
        if depth > MAX_DEPTH {
            return Err(Truncated);
        }
        loop {
            match self.reader.next()?.ok_or(Truncated)? {
                Record::Data(COOKIE_ENTRY, p) => self.cookie(p, &mut node.cookies),
                Record::Data(PATH_ENTRY, p) => {
                    if self.path_entry(node, p, depth + 1)? {
                        return Ok(true);
                    }
                }
                Record::Flag(PATH_END) => return Ok(false),
                Record::Flag(DOMAIN_END) => return Ok(true),
                _ => {}
            }
        }
    }

    fn path_entry(&mut self, parent: &mut PathNode, payload: &[u8], depth: usize) -> Result<bool, Truncated> {
        let Some(name) = decode_path_name(payload) else {
            self.stats.skipped += 1;
            return self.path_body(&mut PathNode::default(), depth);
        };
        let i = match parent.child_index(&name) {
            Ok(i) => i,
            Err(i) => {
                parent.children.insert(i, PathNode::new(&name));
                i
            }
        };
        self.path_body(&mut parent.children[i], depth)
    }

    fn domain_body(&mut self, node: &mut DomainNode, depth: usize) -> Result<(), Truncated> {
        if depth > MAX_DEPTH {
            return Err(Truncated);
        }
        loop {
            match self.reader.next()?.ok_or(Truncated)? {
                Record::Data(COOKIE_ENTRY, p) => self.cookie(p, &mut node.paths.cookies),
                Record::Data(PATH_ENTRY, p) => {
                    if self.path_entry(&mut node.paths, p, depth + 1)? {
                        return Ok(());
                    }
                }
                Record::Data(DOMAIN_ENTRY, p) => self.domain_entry(node, p, depth + 1)?,
                Record::Flag(DOMAIN_END) => return Ok(()),
                _ => {}
            }
        }
    }

    fn domain_entry(&mut self, parent: &mut DomainNode, payload: &[u8], depth: usize) -> Result<(), Truncated> {
        let Some(fields) = decode_domain_fields(payload) else {
            self.stats.skipped += 1;
            return self.domain_body(&mut DomainNode::default(), depth);
        };
        let i = match parent.child_index(&fields.label) {
            Ok(i) => i,
            Err(i) => {
                parent.children.insert(i, DomainNode::new(&fields.label));
                i
            }
        };
        let node = &mut parent.children[i];
        node.policy.cookie_mode = fields.cookie_mode;
        node.policy.third_party = fields.third_party;
        node.class = fields.class;
        self.domain_body(node, depth)
    }
}

/// Rebuilds a domain tree from a cookie file.
///
/// Only an unusable header is an error; damage further in costs the affected
/// branch only.
pub(crate) fn decode(bytes: &[u8], now: i64) -> CookieResult<(DomainNode, DecodeStats)> {
    if bytes.len() < HEADER_LEN {
        return Err(CookieError::Format(format!("cookie file too short ({} bytes)", bytes.len())));
    }
    let file_version = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let tag_len = u16::from_be_bytes([bytes[8], bytes[9]]);
    let len_len = u16::from_be_bytes([bytes[10], bytes[11]]);
    if file_version >> 12 != FILE_VERSION >> 12 {
        return Err(CookieError::Format(format!("unsupported cookie file version 0x{file_version:08x}")));
    }
    if tag_len != TAG_LEN || len_len != LEN_LEN {
        return Err(CookieError::Format(format!("unsupported record layout {tag_len}/{len_len}")));
    }

    let mut root = DomainNode::default();
    let mut dec = Decoder {
        reader: Reader::new(&bytes[HEADER_LEN..]),
        now,
        stats: DecodeStats::default(),
    };

    loop {
        let record = match dec.reader.next() {
            Ok(Some(r)) => r,
            Ok(None) => break,
            Err(Truncated) => {
                dec.stats.truncated = true;
                break;
            }
        };
        if let Record::Data(DOMAIN_ENTRY, p) = record {
            if dec.domain_entry(&mut root, p, 1).is_err() {
                dec.stats.truncated = true;
                break;
            }
        }
    }

    if dec.stats.truncated {
        log::warn!("cookie file truncated, kept {} cookies", dec.stats.cookies);
    }
    Ok((root, dec.stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn persistent(name: &str, value: &str) -> Cookie {
        let mut c = Cookie::new(name, value);
        c.expires = Expiry::At(NOW + 3600);
        c.last_sync = NOW - 10;
        c
    }

    fn put(root: &mut DomainNode, host: &str, path: &str, c: Cookie) {
        let loc = root.find_or_create(host, path).unwrap();
        root.node_mut(&loc.domain).unwrap().paths.node_mut(&loc.path).unwrap().cookies.push(c);
    }

    fn encode_to_vec(root: &DomainNode) -> Vec<u8> {
        let mut out = Vec::new();
        encode(root, NOW, &mut out).unwrap();
        out
    }

    #[test]
    fn header_layout() {
        let bytes = encode_to_vec(&DomainNode::default());
        assert_eq!(bytes, vec![0, 0, 0x10, 0, 0, 0, 0x20, 0, 0, 1, 0, 2]);
    }

    #[test]
    fn domains_are_written_as_nested_records() {
        let mut root = DomainNode::default();
        put(&mut root, "example.com", "/", persistent("a", "1"));
        let bytes = encode_to_vec(&root);

        // com
        assert_eq!(bytes[12], DOMAIN_ENTRY);
        assert_eq!(&bytes[13..15], &[0, 6]);
        assert_eq!(&bytes[15..21], &[DOMAIN_NAME, 0, 3, b'c', b'o', b'm']);
        // example
        assert_eq!(bytes[21], DOMAIN_ENTRY);
        // closing markers for both domains
        assert_eq!(&bytes[bytes.len() - 2..], &[DOMAIN_END, DOMAIN_END]);
    }

    #[test]
    fn dry_run_matches_real_size() {
        let mut root = DomainNode::default();
        put(&mut root, "www.example.com", "/a/b", persistent("a", "1"));
        put(&mut root, "example.org", "/", persistent("b", "2"));
        assert_eq!(encoded_size(&root, NOW), encode_to_vec(&root).len() as u64);
    }

    #[test]
    fn decode_restores_tree_and_attributes() {
        let mut root = DomainNode::default();
        let mut c = persistent("Customer", "\"WILE\"");
        c.version = 1;
        c.received_path = Some("/acme".into());
        c.port = Some(PortList { ports: vec![80, 8080], bare: false });
        c.flags |= CookieFlags::SECURE | CookieFlags::PROTECTED | CookieFlags::FULL_PATH_ONLY;
        c.last_used = NOW - 5;
        put(&mut root, "shop.example.com", "/acme/x", c.clone());
        put(&mut root, "example.com", "/", persistent("root", "1"));
        root.find_or_create("example.com", "/").unwrap();
        let (ex, _) = root.locate(&crate::engine::cookies::domain_index::labels("example.com"));
        root.node_mut(&ex).unwrap().policy.cookie_mode = SiteCookieMode::Reject;

        let (decoded, stats) = decode(&encode_to_vec(&root), NOW).unwrap();
        assert_eq!(stats.cookies, 2);
        assert!(!stats.truncated);

        let loc = decoded.find("shop.example.com", "/acme/x");
        assert!(loc.exact_server && loc.full_path);
        let got = decoded.node(&loc.domain).unwrap().paths.node(&loc.path).unwrap().cookie("Customer").unwrap();
        assert_eq!(got, &c);

        let (ex, _) = decoded.locate(&crate::engine::cookies::domain_index::labels("example.com"));
        assert_eq!(decoded.node(&ex).unwrap().policy.cookie_mode, SiteCookieMode::Reject);
    }

    #[test]
    fn only_persistent_cookies_are_written() {
        let mut root = DomainNode::default();
        put(&mut root, "example.com", "/", Cookie::new("session", "1"));
        let mut discard = persistent("discard", "1");
        discard.flags |= CookieFlags::DISCARD_AT_EXIT;
        put(&mut root, "example.com", "/", discard);

        assert_eq!(encode_to_vec(&root).len(), HEADER_LEN, "nothing but the header");
    }

    #[test]
    fn truncated_input_keeps_earlier_cookies() {
        let mut root = DomainNode::default();
        put(&mut root, "a.com", "/", persistent("first", "1"));
        put(&mut root, "b.com", "/", persistent("second", "2"));
        let bytes = encode_to_vec(&root);

        let (decoded, stats) = decode(&bytes[..bytes.len() - 8], NOW).unwrap();
        assert!(stats.truncated);
        assert_eq!(decoded.count(), 1);
        assert!(decoded.find("a.com", "/").exact_server);
    }

    #[test]
    fn corrupt_cookie_is_skipped() {
        let mut root = DomainNode::default();
        put(&mut root, "a.com", "/", persistent("good", "1"));
        let mut bytes = encode_to_vec(&root);

        // Hand-made cookie entry without a name, spliced in before the first DOMAIN_END.
        let mut bad = Payload::default();
        bad.str(COOKIE_VALUE, "orphan");
        bad.int(COOKIE_EXPIRES, NOW + 100);
        let mut rec = Vec::new();
        write_record(&mut rec, COOKIE_ENTRY, &bad.buf).unwrap();
        let end = bytes.iter().position(|&b| b == DOMAIN_END).unwrap();
        bytes.splice(end..end, rec);

        let (decoded, stats) = decode(&bytes, NOW).unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(decoded.count(), 1);
    }

    #[test]
    fn corrupt_domain_and_path_entries_lose_only_their_branch() {
        let mut bytes = encode_to_vec(&DomainNode::default());
        let cookie = |name: &str| cookie_payload(&persistent(name, "1")).buf;

        // A domain entry without a name, holding one cookie.
        write_record(&mut bytes, DOMAIN_ENTRY, &Payload::default().buf).unwrap();
        write_record(&mut bytes, COOKIE_ENTRY, &cookie("lost")).unwrap();
        bytes.push(DOMAIN_END);

        // A good domain with a bad path (`a/b`) followed by a good one.
        let mut net = Payload::default();
        net.str(DOMAIN_NAME, "net");
        write_record(&mut bytes, DOMAIN_ENTRY, &net.buf).unwrap();
        let mut bad_path = Payload::default();
        bad_path.str(PATH_NAME, "a/b");
        write_record(&mut bytes, PATH_ENTRY, &bad_path.buf).unwrap();
        write_record(&mut bytes, COOKIE_ENTRY, &cookie("lost")).unwrap();
        bytes.push(PATH_END);
        let mut ok_path = Payload::default();
        ok_path.str(PATH_NAME, "ok");
        write_record(&mut bytes, PATH_ENTRY, &ok_path.buf).unwrap();
        write_record(&mut bytes, COOKIE_ENTRY, &cookie("in_path")).unwrap();
        bytes.push(PATH_END);
        bytes.push(DOMAIN_END);

        // A sibling domain after both.
        let mut org = Payload::default();
        org.str(DOMAIN_NAME, "org");
        write_record(&mut bytes, DOMAIN_ENTRY, &org.buf).unwrap();
        write_record(&mut bytes, COOKIE_ENTRY, &cookie("in_domain")).unwrap();
        bytes.push(DOMAIN_END);

        let (decoded, stats) = decode(&bytes, NOW).unwrap();
        assert_eq!(stats.skipped, 2);
        assert!(!stats.truncated);
        assert_eq!(decoded.count(), 2);

        let loc = decoded.find("net", "/ok");
        assert!(loc.exact_server && loc.full_path);
        let node = decoded.node(&loc.domain).unwrap().paths.node(&loc.path).unwrap();
        assert!(node.cookie("in_path").is_some());

        let loc = decoded.find("org", "/");
        assert!(decoded.node(&loc.domain).unwrap().paths.cookie("in_domain").is_some());
    }

    #[test]
    fn expired_cookies_are_dropped_on_read() {
        let mut root = DomainNode::default();
        put(&mut root, "a.com", "/", persistent("soon", "1"));
        let bytes = encode_to_vec(&root);

        let (decoded, stats) = decode(&bytes, NOW + 7200).unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(decoded.count(), 0);
    }

    #[test]
    fn bad_header_is_a_format_error() {
        assert!(matches!(decode(&[0, 0, 0x10], NOW), Err(CookieError::Format(_))));
        let mut bytes = encode_to_vec(&DomainNode::default());
        bytes[2] = 0x30;
        assert!(matches!(decode(&bytes, NOW), Err(CookieError::Format(_))));
    }

    #[test]
    fn short_integers_are_accepted() {
        assert_eq!(read_int(&[0x01, 0x00]), Some(256));
        assert_eq!(read_int(&(-5i64).to_be_bytes()), Some(-5));
        assert_eq!(read_int(&[]), None);
        assert_eq!(read_int(&[0; 9]), None);
    }
}
