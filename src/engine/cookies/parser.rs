//! `Set-Cookie` / `Set-Cookie2` header parsing.
//!
//! Parsing only decodes the header; whether the cookie may be stored for the
//! request it arrived on is decided by the jar.

use crate::engine::cookies::cookies::{Expiry, PortList};
use crate::engine::errors::{CookieError, CookieResult};
use time::{Date, Month, PrimitiveDateTime, Time};

/// Which response header a cookie directive came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    /// Netscape style `Set-Cookie` (version 0).
    SetCookie,
    /// RFC 2965 `Set-Cookie2` (version 1).
    SetCookie2,
}

impl HeaderKind {
    pub fn header_name(&self) -> &'static str {
        match self {
            HeaderKind::SetCookie => "set-cookie",
            HeaderKind::SetCookie2 => "set-cookie2",
        }
    }
}

/// One raw response header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookieHeader {
    pub kind: HeaderKind,
    pub value: String,
}

impl SetCookieHeader {
    pub fn set_cookie(value: impl Into<String>) -> Self {
        Self { kind: HeaderKind::SetCookie, value: value.into() }
    }

    pub fn set_cookie2(value: impl Into<String>) -> Self {
        Self { kind: HeaderKind::SetCookie2, value: value.into() }
    }
}

/// The `Port` attribute of a version 1 cookie, before the request port is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PortSpec {
    /// `Port` without a value: the request port.
    Bare,
    List(PortList),
}

/// A decoded cookie directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedCookie {
    pub name: String,
    pub value: String,
    pub assigned: bool,
    pub expires: Expiry,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub discard: bool,
    pub comment: Option<String>,
    pub comment_url: Option<String>,
    pub port: Option<PortSpec>,
    pub version: u8,
}

impl ParsedCookie {
    fn new(name: &str, value: Option<&str>, version: u8) -> Self {
        Self {
            name: name.to_string(),
            value: value.unwrap_or_default().to_string(),
            assigned: value.is_some(),
            expires: Expiry::Session,
            domain: None,
            path: None,
            secure: false,
            http_only: false,
            discard: false,
            comment: None,
            comment_url: None,
            port: None,
            version,
        }
    }
}

/// Parses every cookie carried by one header value.
///
/// `Set-Cookie` carries exactly one cookie (its `Expires` dates contain
/// commas); `Set-Cookie2` may carry several, separated by commas outside
/// quoted strings. Each entry is parsed independently.
pub(crate) fn parse_header(header: &SetCookieHeader, now: i64) -> Vec<CookieResult<ParsedCookie>> {
    match header.kind {
        HeaderKind::SetCookie => vec![parse_set_cookie(&header.value, now)],
        HeaderKind::SetCookie2 => split_outside_quotes(&header.value, ',')
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .map(|part| parse_set_cookie2(part, now))
            .collect(),
    }
}

pub(crate) fn parse_set_cookie(header: &str, now: i64) -> CookieResult<ParsedCookie> {
    let mut parts = header.split(';');
    let (name, value) = split_pair(parts.next().unwrap_or_default());
    if name.is_empty() {
        return Err(CookieError::MalformedInput(format!("cookie without a name: {header:?}")));
    }

    let mut cookie = ParsedCookie::new(name, value, 0);
    let mut max_age = None;

    for part in parts {
        let (key, val) = split_pair(part);
        let val = val.unwrap_or_default();
        match key.to_ascii_lowercase().as_str() {
            "expires" => {
                if let Some(t) = parse_cookie_date(val) {
                    cookie.expires = Expiry::At(t);
                }
            }
            "max-age" => max_age = parse_max_age(val).or(max_age),
            "domain" if !val.is_empty() => cookie.domain = Some(val.to_string()),
            "path" => cookie.path = Some(val.to_string()),
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            _ => {}
        }
    }

    if let Some(secs) = max_age {
        cookie.expires = expiry_from_max_age(secs, now);
    }
    Ok(cookie)
}

pub(crate) fn parse_set_cookie2(header: &str, now: i64) -> CookieResult<ParsedCookie> {
    let parts = split_outside_quotes(header, ';');
    let mut parts = parts.into_iter();
    let (name, value) = split_pair(parts.next().unwrap_or_default());
    if name.is_empty() {
        return Err(CookieError::MalformedInput(format!("cookie without a name: {header:?}")));
    }
    if name.starts_with('$') {
        return Err(CookieError::MalformedInput(format!("reserved cookie name {name:?}")));
    }

    let mut cookie = ParsedCookie::new(name, value, 1);
    let mut max_age = None;

    for part in parts {
        let (key, val) = split_pair(part);
        let val = val.map(unquote);
        match (key.to_ascii_lowercase().as_str(), val) {
            ("version", Some(v)) => {
                cookie.version = v.parse::<u8>().map_err(|_| {
                    CookieError::MalformedInput(format!("bad Version {v:?}"))
                })?;
            }
            ("max-age", Some(v)) => max_age = parse_max_age(v).or(max_age),
            ("domain", Some(v)) if !v.is_empty() => cookie.domain = Some(v.to_string()),
            ("path", Some(v)) => cookie.path = Some(v.to_string()),
            ("comment", Some(v)) => cookie.comment = Some(v.to_string()),
            ("commenturl", Some(v)) => cookie.comment_url = Some(v.to_string()),
            ("port", None) => cookie.port = Some(PortSpec::Bare),
            ("port", Some(v)) => {
                let list = PortList::parse(v)
                    .ok_or_else(|| CookieError::MalformedInput(format!("bad Port {v:?}")))?;
                cookie.port = Some(PortSpec::List(list));
            }
            ("discard", _) => cookie.discard = true,
            ("secure", _) => cookie.secure = true,
            ("httponly", _) => cookie.http_only = true,
            _ => {}
        }
    }

    if cookie.version == 0 {
        cookie.version = 1;
    }
    if let Some(secs) = max_age {
        cookie.expires = expiry_from_max_age(secs, now);
    }
    Ok(cookie)
}

fn split_pair(part: &str) -> (&str, Option<&str>) {
    match part.split_once('=') {
        Some((k, v)) => (k.trim(), Some(v.trim())),
        None => (part.trim(), None),
    }
}

fn unquote(v: &str) -> &str {
    v.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(v)
}

fn parse_max_age(v: &str) -> Option<i64> {
    let v = v.trim();
    let digits = v.strip_prefix('-').unwrap_or(v);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Overlong values saturate instead of failing.
    Some(v.parse::<i64>().unwrap_or(if v.starts_with('-') { i64::MIN } else { i64::MAX }))
}

fn expiry_from_max_age(secs: i64, now: i64) -> Expiry {
    if secs <= 0 {
        Expiry::At(now)
    } else {
        Expiry::At(now.saturating_add(secs))
    }
}

fn split_outside_quotes(s: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                out.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

// ---------- Cookie dates ----------

fn is_date_delimiter(b: u8) -> bool {
    matches!(b, 0x09 | 0x20..=0x2F | 0x3B..=0x40 | 0x5B..=0x60 | 0x7B..=0x7E)
}

/// Leading run of 1..=`max` digits followed by nothing or a non-digit.
fn leading_number(token: &str, min: usize, max: usize) -> Option<(u32, &str)> {
    let len = token.bytes().take_while(u8::is_ascii_digit).count();
    if len < min || len > max {
        return None;
    }
    let n = token[..len].parse().ok()?;
    Some((n, &token[len..]))
}

fn parse_time_token(token: &str) -> Option<(u8, u8, u8)> {
    let (h, rest) = leading_number(token, 1, 2)?;
    let (m, rest) = leading_number(rest.strip_prefix(':')?, 1, 2)?;
    let (s, _) = leading_number(rest.strip_prefix(':')?, 1, 2)?;
    Some((h as u8, m as u8, s as u8))
}

fn parse_month_token(token: &str) -> Option<Month> {
    let prefix = token.get(..3)?.to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => Month::January,
        "feb" => Month::February,
        "mar" => Month::March,
        "apr" => Month::April,
        "may" => Month::May,
        "jun" => Month::June,
        "jul" => Month::July,
        "aug" => Month::August,
        "sep" => Month::September,
        "oct" => Month::October,
        "nov" => Month::November,
        "dec" => Month::December,
        _ => return None,
    };
    Some(month)
}

/// Parses a cookie date (`Expires`) into a Unix timestamp.
///
/// Follows the token algorithm of RFC 6265 §5.1.1, so Netscape dates
/// (`Wed, 09-Jun-2021 10:18:14 GMT`), RFC 1123 dates and two-digit years are
/// all accepted. Returns `None` for anything that does not yield a valid
/// calendar date.
pub fn parse_cookie_date(input: &str) -> Option<i64> {
    let mut time = None;
    let mut day = None;
    let mut month = None;
    let mut year = None;

    let tokens = input
        .split(|c: char| c.is_ascii() && is_date_delimiter(c as u8))
        .filter(|t| !t.is_empty());

    for token in tokens {
        if time.is_none() {
            if let Some(t) = parse_time_token(token) {
                time = Some(t);
                continue;
            }
        }
        if day.is_none() {
            if let Some((d, _)) = leading_number(token, 1, 2) {
                day = Some(d as u8);
                continue;
            }
        }
        if month.is_none() {
            if let Some(m) = parse_month_token(token) {
                month = Some(m);
                continue;
            }
        }
        if year.is_none() {
            if let Some((y, _)) = leading_number(token, 2, 4) {
                year = Some(y as i32);
                continue;
            }
        }
    }

    let mut year = year?;
    if (70..=99).contains(&year) {
        year += 1900;
    } else if (0..=69).contains(&year) {
        year += 2000;
    }
    let (hour, minute, second) = time?;
    let day = day?;
    if year < 1601 || !(1..=31).contains(&day) || hour > 23 || minute > 59 || second > 59 {
        return None;
    }

    let date = Date::from_calendar_date(year, month?, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}
