//! The applicability expression tree: CPE leaves composed with AND/OR/NOT
//! and version ranges, plus its canonical textual serialization.
//!
//! The source implementation dispatches on an abstract base class keyed by
//! a UID; here the tree is a closed tagged sum instead, with the same
//! single-character type tag (`c`/`a`/`o`/`!`/`v`/`C`) kept as the wire
//! discriminator so the canonical serialization is stable.

use thiserror::Error;

use crate::cpe::{Cpe, CpeError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplicabilityError {
    #[error("unexpected end of input while parsing applicability tree")]
    UnexpectedEof,
    #[error("unknown type tag {0:?}")]
    UnknownTag(char),
    #[error("malformed count field: {0:?}")]
    MalformedCount(String),
    #[error("malformed version-range marker: {0:?}")]
    MalformedRangeMarker(String),
    #[error(transparent)]
    Cpe(#[from] CpeError),
}

pub type Result<T> = std::result::Result<T, ApplicabilityError>;

/// A node in the applicability expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Cpe(Cpe),
    And {
        children: Vec<Node>,
        negate: bool,
    },
    Or {
        children: Vec<Node>,
        negate: bool,
    },
    Not(Box<Node>),
    VersionRange {
        wrapped: Box<Node>,
        start: Option<String>,
        end: Option<String>,
        include_start: bool,
        include_end: bool,
    },
}

impl Node {
    /// Matches `target_cpe` against this node. Lexicographic string
    /// comparison governs `VersionRange` bounds: this is the documented
    /// semantics (see Open Questions in the design notes), not a bug to be
    /// silently patched — `"10"` sorting before `"9"` is a known, accepted
    /// limitation rather than an accidental one.
    pub fn matches(&self, target: &Cpe) -> bool {
        self.matches_with(target, true)
    }

    fn matches_with(&self, target: &Cpe, include_version: bool) -> bool {
        match self {
            Node::Cpe(pattern) => pattern.matches(target, include_version),
            Node::And { children, negate } => {
                children.iter().all(|c| c.matches_with(target, true)) ^ negate
            }
            Node::Or { children, negate } => {
                children.iter().any(|c| c.matches_with(target, true)) ^ negate
            }
            Node::Not(inner) => !inner.matches_with(target, true),
            Node::VersionRange {
                wrapped,
                start,
                end,
                include_start,
                include_end,
            } => {
                let version_ok = match &target.version {
                    crate::cpe::AvString::Value(v) => {
                        let lo_ok = match start {
                            Some(s) => {
                                if *include_start {
                                    v.as_str() >= s.as_str()
                                } else {
                                    v.as_str() > s.as_str()
                                }
                            }
                            None => true,
                        };
                        let hi_ok = match end {
                            Some(e) => {
                                if *include_end {
                                    v.as_str() <= e.as_str()
                                } else {
                                    v.as_str() < e.as_str()
                                }
                            }
                            None => true,
                        };
                        lo_ok && hi_ok
                    }
                    // Logical ANY/NA versions aren't constrained by a range;
                    // only the wrapped pattern (with version ignored) applies.
                    _ => true,
                };
                version_ok && wrapped.matches_with(target, false)
            }
        }
    }

    /// Enumerates the concrete CPE leaves reachable without crossing a
    /// negation (used by persistence to populate the `cpes` and
    /// `configurations` tables).
    pub fn vulnerable_cpes(&self) -> Vec<Cpe> {
        let mut out = Vec::new();
        self.collect_vulnerable_cpes(&mut out);
        out
    }

    fn collect_vulnerable_cpes(&self, out: &mut Vec<Cpe>) {
        match self {
            Node::Cpe(cpe) => out.push(cpe.clone()),
            Node::And { children, negate } | Node::Or { children, negate } => {
                if !negate {
                    for child in children {
                        child.collect_vulnerable_cpes(out);
                    }
                }
            }
            Node::Not(_) => {}
            Node::VersionRange { wrapped, .. } => wrapped.collect_vulnerable_cpes(out),
        }
    }

    /// Writes this node's canonical textual serialization onto `out`.
    pub fn dump(&self, out: &mut String) {
        match self {
            Node::Cpe(cpe) => {
                out.push('c');
                out.push_str(&cpe.to_formatted_string());
                out.push('\n');
            }
            Node::And { children, negate } => {
                out.push('a');
                dump_compound(children, *negate, out);
            }
            Node::Or { children, negate } => {
                out.push('o');
                dump_compound(children, *negate, out);
            }
            Node::Not(wrapped) => {
                out.push('!');
                wrapped.dump(out);
            }
            Node::VersionRange {
                wrapped,
                start,
                end,
                include_start,
                include_end,
            } => {
                out.push('v');
                out.push(if *include_start { 'I' } else { 'E' });
                out.push_str(start.as_deref().unwrap_or(""));
                out.push('\n');
                out.push(if *include_end { 'I' } else { 'E' });
                out.push_str(end.as_deref().unwrap_or(""));
                out.push('\n');
                wrapped.dump(out);
            }
        }
    }

    pub fn dumps(&self) -> String {
        let mut out = String::new();
        self.dump(&mut out);
        out
    }

    pub fn loads(s: &str) -> Result<Self> {
        let mut cursor = Cursor::new(s);
        let node = parse_node(&mut cursor)?;
        Ok(node)
    }
}

fn dump_compound(children: &[Node], negate: bool, out: &mut String) {
    out.push(if negate { '~' } else { '=' });
    out.push_str(&children.len().to_string());
    out.push('\n');
    for child in children {
        child.dump(out);
    }
}

/// The top-level applicability expression attached to a CVE: an ordered
/// tuple of trees. `matches` takes the union of every child's match
/// (computed with a single scan per child; the source implementation's
/// redundant double-scan is not reproduced — see Open Questions).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Configurations(pub Vec<Node>);

impl Configurations {
    pub fn matches(&self, target: &Cpe) -> bool {
        self.0.iter().any(|node| node.matches(target))
    }

    pub fn vulnerable_cpes(&self) -> Vec<Cpe> {
        self.0.iter().flat_map(|node| node.vulnerable_cpes()).collect()
    }

    pub fn dumps(&self) -> String {
        let mut out = String::new();
        out.push('C');
        out.push_str(&self.0.len().to_string());
        out.push('\n');
        for node in &self.0 {
            node.dump(&mut out);
        }
        out
    }

    pub fn loads(s: &str) -> Result<Self> {
        let mut cursor = Cursor::new(s);
        let tag = cursor.next_char()?;
        if tag != 'C' {
            return Err(ApplicabilityError::UnknownTag(tag));
        }
        let count = cursor.read_count()?;
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            nodes.push(parse_node(&mut cursor)?);
        }
        Ok(Configurations(nodes))
    }
}

struct Cursor<'a> {
    chars: std::str::Chars<'a>,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Cursor { chars: s.chars() }
    }

    fn next_char(&mut self) -> Result<char> {
        self.chars.next().ok_or(ApplicabilityError::UnexpectedEof)
    }

    /// Reads up to (and consuming) the next newline, returning the content
    /// before it.
    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        loop {
            match self.chars.next() {
                None => return Err(ApplicabilityError::UnexpectedEof),
                Some('\n') => return Ok(line),
                Some(c) => line.push(c),
            }
        }
    }

    fn read_count(&mut self) -> Result<usize> {
        let line = self.read_line()?;
        line.parse()
            .map_err(|_| ApplicabilityError::MalformedCount(line))
    }
}

fn parse_node(cursor: &mut Cursor) -> Result<Node> {
    let tag = cursor.next_char()?;
    match tag {
        'c' => {
            let line = cursor.read_line()?;
            let cpe = Cpe::parse(&line)?;
            Ok(Node::Cpe(cpe))
        }
        'a' | 'o' => {
            let negate_ch = cursor.next_char()?;
            let negate = match negate_ch {
                '~' => true,
                '=' => false,
                other => return Err(ApplicabilityError::MalformedRangeMarker(other.to_string())),
            };
            let count = cursor.read_count()?;
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                children.push(parse_node(cursor)?);
            }
            if tag == 'a' {
                Ok(Node::And { children, negate })
            } else {
                Ok(Node::Or { children, negate })
            }
        }
        '!' => {
            let wrapped = parse_node(cursor)?;
            Ok(Node::Not(Box::new(wrapped)))
        }
        'v' => {
            let (include_start, start) = parse_range_marker(cursor)?;
            let (include_end, end) = parse_range_marker(cursor)?;
            let wrapped = parse_node(cursor)?;
            Ok(Node::VersionRange {
                wrapped: Box::new(wrapped),
                start,
                end,
                include_start,
                include_end,
            })
        }
        other => Err(ApplicabilityError::UnknownTag(other)),
    }
}

fn parse_range_marker(cursor: &mut Cursor) -> Result<(bool, Option<String>)> {
    let line = cursor.read_line()?;
    let mut chars = line.chars();
    let marker = chars
        .next()
        .ok_or_else(|| ApplicabilityError::MalformedRangeMarker(line.clone()))?;
    let include = match marker {
        'I' => true,
        'E' => false,
        _ => return Err(ApplicabilityError::MalformedRangeMarker(line)),
    };
    let rest: String = chars.collect();
    let literal = if rest.is_empty() { None } else { Some(rest) };
    Ok((include, literal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpe::Cpe;

    fn cpe(s: &str) -> Cpe {
        Cpe::parse(s).unwrap()
    }

    #[test]
    fn single_cpe_leaf_round_trips() {
        let node = Node::Cpe(cpe("cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*"));
        let dumped = node.dumps();
        assert_eq!(Node::loads(&dumped).unwrap(), node);
    }

    #[test]
    fn and_or_not_version_range_round_trip() {
        let leaf = Node::Cpe(cpe("cpe:2.3:a:acme:widget:*:*:*:*:*:*:*:*"));
        let ranged = Node::VersionRange {
            wrapped: Box::new(leaf.clone()),
            start: Some("1.0".to_string()),
            end: Some("2.0".to_string()),
            include_start: true,
            include_end: false,
        };
        let tree = Node::And {
            children: vec![
                ranged,
                Node::Not(Box::new(Node::Or {
                    children: vec![leaf],
                    negate: false,
                })),
            ],
            negate: true,
        };
        let dumped = tree.dumps();
        assert_eq!(Node::loads(&dumped).unwrap(), tree);
    }

    #[test]
    fn configurations_round_trip() {
        let configs = Configurations(vec![
            Node::Cpe(cpe("cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*")),
            Node::Cpe(cpe("cpe:2.3:a:other:thing:*:*:*:*:*:*:*:*")),
        ]);
        let dumped = configs.dumps();
        assert_eq!(Configurations::loads(&dumped).unwrap(), configs);
    }

    #[test]
    fn version_range_with_no_bounds_still_delegates() {
        let leaf = Node::Cpe(cpe("cpe:2.3:a:acme:widget:*:*:*:*:*:*:*:*"));
        let node = Node::VersionRange {
            wrapped: Box::new(leaf),
            start: None,
            end: None,
            include_start: true,
            include_end: true,
        };
        let target = cpe("cpe:2.3:a:acme:widget:5.0:*:*:*:*:*:*:*");
        assert!(node.matches(&target));
    }

    #[test]
    fn version_range_bounds_apply_on_concrete_version() {
        let leaf = Node::Cpe(cpe("cpe:2.3:a:acme:widget:*:*:*:*:*:*:*:*"));
        let node = Node::VersionRange {
            wrapped: Box::new(leaf),
            start: Some("1.0".to_string()),
            end: Some("2.0".to_string()),
            include_start: true,
            include_end: false,
        };
        assert!(node.matches(&cpe("cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*")));
        assert!(node.matches(&cpe("cpe:2.3:a:acme:widget:1.5:*:*:*:*:*:*:*")));
        assert!(!node.matches(&cpe("cpe:2.3:a:acme:widget:2.0:*:*:*:*:*:*:*")));
        assert!(!node.matches(&cpe("cpe:2.3:a:acme:widget:0.9:*:*:*:*:*:*:*")));
    }

    #[test]
    fn and_with_single_child_matches_like_the_child() {
        let target = cpe("cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*");
        let leaf = Node::Cpe(cpe("cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*"));
        let wrapped_and = Node::And {
            children: vec![leaf.clone()],
            negate: false,
        };
        let wrapped_or = Node::Or {
            children: vec![leaf.clone()],
            negate: false,
        };
        assert_eq!(leaf.matches(&target), wrapped_and.matches(&target));
        assert_eq!(leaf.matches(&target), wrapped_or.matches(&target));
    }

    #[test]
    fn double_negation_is_identity() {
        let target = cpe("cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*");
        let leaf = Node::Cpe(cpe("cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*"));
        let double_not = Node::Not(Box::new(Node::Not(Box::new(leaf.clone()))));
        assert_eq!(leaf.matches(&target), double_not.matches(&target));
    }

    #[test]
    fn negation_stops_vulnerable_cpes_collection() {
        let leaf = Node::Cpe(cpe("cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*"));
        let not = Node::Not(Box::new(leaf));
        assert!(not.vulnerable_cpes().is_empty());
    }

    #[test]
    fn negated_and_or_does_not_collect_children() {
        let leaf = Node::Cpe(cpe("cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*"));
        let negated = Node::And {
            children: vec![leaf],
            negate: true,
        };
        assert!(negated.vulnerable_cpes().is_empty());
    }

    #[test]
    fn e5_cpe_query_over_or_configuration() {
        let config = Configurations(vec![Node::Or {
            children: vec![
                Node::Cpe(cpe("cpe:2.3:a:acme:a:*:*:*:*:*:*:*:*")),
                Node::Cpe(cpe("cpe:2.3:a:other:thing:*:*:*:*:*:*:*:*")),
            ],
            negate: false,
        }]);
        let mut pattern = Cpe::any();
        pattern.vendor = crate::cpe::AvString::Value("acme".to_string());
        assert!(config.matches(&pattern));
    }
}
