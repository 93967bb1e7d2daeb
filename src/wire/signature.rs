//! The type tag alphabet and the `name(args)ret` signature grammar.

use std::fmt;

/// One argument or result slot on the wire.
///
/// `i` is a signed machine integer, `p` is a virtual address (opaque handle
/// into the child's address space), `d` is an IEEE 754 double, and `v` is
/// void — only ever a result tag, never an argument tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Int,
    Ptr,
    Double,
    Void,
}

impl Tag {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(Tag::Int),
            'p' => Some(Tag::Ptr),
            'd' => Some(Tag::Double),
            'v' => Some(Tag::Void),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Tag::Int => 'i',
            Tag::Ptr => 'p',
            Tag::Double => 'd',
            Tag::Void => 'v',
        }
    }

    /// A human-readable name for this tag, used in configuration-error
    /// messages (e.g. [`crate::error::ConfigError::StubReturnTypeMismatch`])
    /// where a bare tag letter would be cryptic.
    pub fn name(self) -> &'static str {
        match self {
            Tag::Int => "int",
            Tag::Ptr => "ptr",
            Tag::Double => "double",
            Tag::Void => "void",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A parsed `name(argTags)retTag` signature string, e.g. `"open(pii)i"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub name: String,
    pub args: Vec<Tag>,
    pub ret: Tag,
}

impl Signature {
    /// Parses a signature string. Returns `None` if the string is not of the
    /// form `name(args)ret` with every tag drawn from `i|p|d|v`.
    pub fn parse(raw: &str) -> Option<Self> {
        let open = raw.find('(')?;
        let close = raw.find(')')?;
        if close < open {
            return None;
        }
        let name = raw[..open].to_string();
        if name.is_empty() {
            return None;
        }
        let args_str = &raw[open + 1..close];
        let ret_str = &raw[close + 1..];
        let mut ret_chars = ret_str.chars();
        let ret = Tag::from_char(ret_chars.next()?)?;
        if ret_chars.next().is_some() {
            return None;
        }
        let mut args = Vec::with_capacity(args_str.len());
        for c in args_str.chars() {
            args.push(Tag::from_char(c)?);
        }
        Some(Signature { name, args, ret })
    }

    /// Re-renders the canonical wire form, e.g. `"open(pii)i"`.
    pub fn text(&self) -> String {
        let mut s = String::with_capacity(self.name.len() + self.args.len() + 3);
        s.push_str(&self.name);
        s.push('(');
        for tag in &self.args {
            s.push(tag.as_char());
        }
        s.push(')');
        s.push(self.ret.as_char());
        s
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}
