//! CPE 2.3 data model, formatted-string binding, and language tags.
//!
//! Grounded on the attribute-value grammar and fail-fast scanner described
//! in the NVD CPE 2.3 formatted string binding.

use std::fmt;

use regex::Regex;

/// `[A-Za-z0-9\-._]` plus CPE's escaped punctuation, with optional
/// leading/trailing `*`/`?` wildcards. Anchored per-field by the caller.
fn av_string_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r##"^(?:\?+|\*)?(?:\\[\\*?!"#$%&'()+,/:;<=>@\[\]^`{|}~.]|[A-Za-z0-9\-._])+(?:\?+|\*)?$"##,
        )
        .expect("static AV string regex is valid")
    })
}

/// An error encountered while parsing a CPE formatted string, a language
/// tag, or a canonical applicability-tree serialization. Carries the byte
/// offset and failing segment so callers can report a precise location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("CPE format error at offset {offset}: {message} (near {segment:?})")]
pub struct CpeError {
    pub offset: usize,
    pub message: String,
    pub segment: String,
}

impl CpeError {
    fn new(offset: usize, message: impl Into<String>, segment: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
            segment: segment.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CpeError>;

/// The logical sentinels usable in any CPE field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Logical {
    Any,
    Na,
}

impl Logical {
    fn as_str(self) -> &'static str {
        match self {
            Logical::Any => "*",
            Logical::Na => "-",
        }
    }
}

/// `part`: hardware, OS, application, or a logical sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Part {
    Hardware,
    Os,
    Application,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartField {
    Concrete(Part),
    Logical(Logical),
}

impl PartField {
    pub(crate) fn to_av(&self) -> String {
        match self {
            PartField::Concrete(Part::Hardware) => "h".to_string(),
            PartField::Concrete(Part::Os) => "o".to_string(),
            PartField::Concrete(Part::Application) => "a".to_string(),
            PartField::Logical(l) => l.as_str().to_string(),
        }
    }

    fn parse(s: &str, offset: usize) -> Result<Self> {
        match s {
            "h" => Ok(PartField::Concrete(Part::Hardware)),
            "o" => Ok(PartField::Concrete(Part::Os)),
            "a" => Ok(PartField::Concrete(Part::Application)),
            "*" => Ok(PartField::Logical(Logical::Any)),
            "-" => Ok(PartField::Logical(Logical::Na)),
            other => Err(CpeError::new(
                offset,
                "part must be one of a/o/h/*/-",
                other,
            )),
        }
    }
}

/// An attribute-value field: the `*`/`-` logical sentinels, or a string
/// conforming to the AV grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AvString {
    Value(String),
    Logical(Logical),
}

impl AvString {
    pub(crate) fn to_av(&self) -> String {
        match self {
            AvString::Value(s) => s.clone(),
            AvString::Logical(l) => l.as_str().to_string(),
        }
    }

    fn parse(s: &str, offset: usize) -> Result<Self> {
        match s {
            "*" => Ok(AvString::Logical(Logical::Any)),
            "-" => Ok(AvString::Logical(Logical::Na)),
            other => {
                if av_string_regex().is_match(other) {
                    Ok(AvString::Value(other.to_string()))
                } else {
                    Err(CpeError::new(offset, "invalid AV string", other))
                }
            }
        }
    }
}

/// A region qualifier on a language tag: ISO 3166-1 alpha-2 or UN M.49
/// numeric (serialized zero-padded to three digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    Alpha(String),
    Numeric(u16),
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Alpha(a) => write!(f, "{}", a.to_uppercase()),
            Region::Numeric(n) => write!(f, "{:03}", n),
        }
    }
}

/// An ISO 639 language code with an optional region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Language {
    pub code: String,
    pub region: Option<Region>,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(r) => write!(f, "{}-{}", self.code, r),
            None => write!(f, "{}", self.code),
        }
    }
}

fn langtag_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i)([a-z]{2,3})(?:-([a-z]{2}|[0-9]{3}))?$").expect("static langtag regex")
    })
}

impl Language {
    fn parse(s: &str, offset: usize) -> Result<Self> {
        let caps = langtag_regex()
            .captures(s)
            .ok_or_else(|| CpeError::new(offset, "invalid language tag", s))?;
        let code = caps
            .get(1)
            .expect("capture group 1 always present on match")
            .as_str()
            .to_lowercase();
        let region = match caps.get(2) {
            None => None,
            Some(m) => {
                let text = m.as_str();
                if text.chars().all(|c| c.is_ascii_digit()) {
                    Some(Region::Numeric(text.parse().expect("3 ascii digits fit u16")))
                } else {
                    Some(Region::Alpha(text.to_lowercase()))
                }
            }
        };
        Ok(Language { code, region })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LangField {
    Tag(Language),
    Logical(Logical),
}

impl LangField {
    pub(crate) fn to_av(&self) -> String {
        match self {
            LangField::Tag(l) => l.to_string(),
            LangField::Logical(l) => l.as_str().to_string(),
        }
    }

    fn parse(s: &str, offset: usize) -> Result<Self> {
        match s {
            "*" => Ok(LangField::Logical(Logical::Any)),
            "-" => Ok(LangField::Logical(Logical::Na)),
            other => Ok(LangField::Tag(Language::parse(other, offset)?)),
        }
    }
}

/// A CPE 2.3 identifier: an 11-tuple of attribute-value fields or logical
/// sentinels. Value type: equal iff all fields equal, hashable, totally
/// ordered by lexicographic tuple order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cpe {
    pub part: PartField,
    pub vendor: AvString,
    pub product: AvString,
    pub version: AvString,
    pub update: AvString,
    pub edition: AvString,
    pub lang: LangField,
    pub sw_edition: AvString,
    pub target_sw: AvString,
    pub target_hw: AvString,
    pub other: AvString,
}

impl Cpe {
    /// A CPE with every field set to the `ANY` logical sentinel.
    pub fn any() -> Self {
        Cpe {
            part: PartField::Logical(Logical::Any),
            vendor: AvString::Logical(Logical::Any),
            product: AvString::Logical(Logical::Any),
            version: AvString::Logical(Logical::Any),
            update: AvString::Logical(Logical::Any),
            edition: AvString::Logical(Logical::Any),
            lang: LangField::Logical(Logical::Any),
            sw_edition: AvString::Logical(Logical::Any),
            target_sw: AvString::Logical(Logical::Any),
            target_hw: AvString::Logical(Logical::Any),
            other: AvString::Logical(Logical::Any),
        }
    }

    /// True iff every field is the `ANY` logical sentinel.
    pub fn is_complete_wildcard(&self) -> bool {
        *self == Cpe::any()
    }

    /// Parses a CPE 2.3 formatted string: `cpe:2.3:<11 colon-delimited
    /// fields>`. Fail-fast: reports the offset and failing segment, never
    /// consumes beyond the 11th field (trailing content is a format error).
    pub fn parse(s: &str) -> Result<Self> {
        let prefix = "cpe:2.3:";
        if !s.starts_with(prefix) {
            return Err(CpeError::new(0, "missing cpe:2.3: prefix", s));
        }
        let rest = &s[prefix.len()..];
        let fields = split_fields(rest, prefix.len())?;
        if fields.len() != 11 {
            return Err(CpeError::new(
                prefix.len(),
                format!("expected 11 fields, found {}", fields.len()),
                rest,
            ));
        }
        let (part_s, part_off) = &fields[0];
        let (vendor_s, vendor_off) = &fields[1];
        let (product_s, product_off) = &fields[2];
        let (version_s, version_off) = &fields[3];
        let (update_s, update_off) = &fields[4];
        let (edition_s, edition_off) = &fields[5];
        let (lang_s, lang_off) = &fields[6];
        let (sw_edition_s, sw_edition_off) = &fields[7];
        let (target_sw_s, target_sw_off) = &fields[8];
        let (target_hw_s, target_hw_off) = &fields[9];
        let (other_s, other_off) = &fields[10];

        Ok(Cpe {
            part: PartField::parse(part_s, *part_off)?,
            vendor: AvString::parse(vendor_s, *vendor_off)?,
            product: AvString::parse(product_s, *product_off)?,
            version: AvString::parse(version_s, *version_off)?,
            update: AvString::parse(update_s, *update_off)?,
            edition: AvString::parse(edition_s, *edition_off)?,
            lang: LangField::parse(lang_s, *lang_off)?,
            sw_edition: AvString::parse(sw_edition_s, *sw_edition_off)?,
            target_sw: AvString::parse(target_sw_s, *target_sw_off)?,
            target_hw: AvString::parse(target_hw_s, *target_hw_off)?,
            other: AvString::parse(other_s, *other_off)?,
        })
    }

    /// Renders the canonical CPE 2.3 formatted string.
    pub fn to_formatted_string(&self) -> String {
        format!(
            "cpe:2.3:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.part.to_av(),
            self.vendor.to_av(),
            self.product.to_av(),
            self.version.to_av(),
            self.update.to_av(),
            self.edition.to_av(),
            self.lang.to_av(),
            self.sw_edition.to_av(),
            self.target_sw.to_av(),
            self.target_hw.to_av(),
            self.other.to_av(),
        )
    }

    /// Matches `self` (a pattern, e.g. drawn from a `configurations` tree)
    /// against `target_cpe`. For each field, either side being `ANY`
    /// matches anything; either side being `NA` matches only an `NA`
    /// counterpart; otherwise string equality. When `include_version` is
    /// false the version field is skipped (used by `VersionRange` to
    /// delegate without re-checking the bare version string).
    pub fn matches(&self, target: &Cpe, include_version: bool) -> bool {
        part_matches(&self.part, &target.part)
            && av_matches(&self.vendor, &target.vendor)
            && av_matches(&self.product, &target.product)
            && (!include_version || av_matches(&self.version, &target.version))
            && av_matches(&self.update, &target.update)
            && av_matches(&self.edition, &target.edition)
            && lang_matches(&self.lang, &target.lang)
            && av_matches(&self.sw_edition, &target.sw_edition)
            && av_matches(&self.target_sw, &target.target_sw)
            && av_matches(&self.target_hw, &target.target_hw)
            && av_matches(&self.other, &target.other)
    }
}

impl fmt::Display for Cpe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_formatted_string())
    }
}

fn av_matches(a: &AvString, b: &AvString) -> bool {
    match (a, b) {
        (AvString::Logical(Logical::Any), _) | (_, AvString::Logical(Logical::Any)) => true,
        (AvString::Logical(Logical::Na), AvString::Logical(Logical::Na)) => true,
        (AvString::Logical(Logical::Na), _) | (_, AvString::Logical(Logical::Na)) => false,
        (AvString::Value(x), AvString::Value(y)) => x == y,
    }
}

fn part_matches(a: &PartField, b: &PartField) -> bool {
    match (a, b) {
        (PartField::Logical(Logical::Any), _) | (_, PartField::Logical(Logical::Any)) => true,
        (PartField::Logical(Logical::Na), PartField::Logical(Logical::Na)) => true,
        (PartField::Logical(Logical::Na), _) | (_, PartField::Logical(Logical::Na)) => false,
        (PartField::Concrete(x), PartField::Concrete(y)) => x == y,
    }
}

fn lang_matches(a: &LangField, b: &LangField) -> bool {
    match (a, b) {
        (LangField::Logical(Logical::Any), _) | (_, LangField::Logical(Logical::Any)) => true,
        (LangField::Logical(Logical::Na), LangField::Logical(Logical::Na)) => true,
        (LangField::Logical(Logical::Na), _) | (_, LangField::Logical(Logical::Na)) => false,
        (LangField::Tag(x), LangField::Tag(y)) => x == y,
    }
}

/// Splits the 11 colon-delimited fields of a CPE formatted string, honoring
/// backslash-escaped colons within a field. Returns each field's text and
/// its starting byte offset (for error reporting).
fn split_fields(rest: &str, base_offset: usize) -> Result<Vec<(String, usize)>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut field_start = base_offset;
    let mut escaped = false;
    let mut offset = base_offset;

    for ch in rest.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            current.push(ch);
            escaped = true;
        } else if ch == ':' {
            fields.push((std::mem::take(&mut current), field_start));
            field_start = offset + 1;
        } else {
            current.push(ch);
        }
        offset += ch.len_utf8();
    }
    if escaped {
        return Err(CpeError::new(offset, "dangling escape at end of string", &current));
    }
    fields.push((current, field_start));
    Ok(fields)
}
