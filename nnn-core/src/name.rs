use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single opaque label inside a [`Name`].
pub type NameComponent = Vec<u8>;

/// Hierarchical node name.
///
/// Names are ordered lexicographically over their components, so a prefix always
/// sorts before every name it is a prefix of. Once built, a name is shared through
/// [`SharedName`] and never mutated again.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Name {
    pub components: Vec<NameComponent>,
}

/// Reference-counted handle used by every table that stores a name.
pub type SharedName = Arc<Name>;

impl Name {
    /// Create a new empty name
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Build a name from already split components.
    pub fn from_components<I, C>(components: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<NameComponent>,
    {
        Self {
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a URI style name such as `/a/b/c`. Empty segments are skipped.
    ///
    /// Segments are percent-decoded, and a segment of three or more periods
    /// loses three of them, so `/...` is a name with one empty component.
    pub fn from_uri(uri: &str) -> Self {
        let components = uri
            .split('/')
            .filter(|part| !part.is_empty())
            .map(unescape_component)
            .collect();
        Self { components }
    }

    /// Parse a dotted address such as `1.2.3`.
    pub fn from_dotted(addr: &str) -> Result<Self, NameParseError> {
        if addr.is_empty() {
            return Ok(Self::new());
        }

        let mut components = Vec::new();
        for label in addr.split('.') {
            if label.is_empty() {
                return Err(NameParseError::EmptyComponent(addr.to_string()));
            }
            components.push(label.as_bytes().to_vec());
        }
        Ok(Self { components })
    }

    pub fn append(&mut self, component: impl Into<NameComponent>) -> &mut Self {
        self.components.push(component.into());
        self
    }

    /// Return a copy of this name extended by one component.
    pub fn child(&self, component: impl Into<NameComponent>) -> Name {
        let mut name = self.clone();
        name.append(component);
        name
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NameComponent> {
        self.components.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NameComponent> {
        self.components.iter()
    }

    /// Check if this name is a prefix of another name
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.len() <= other.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    /// Get a prefix of this name with at most `length` components
    pub fn get_prefix(&self, length: usize) -> Name {
        let end = length.min(self.components.len());
        Name {
            components: self.components[..end].to_vec(),
        }
    }

    pub fn to_uri(&self) -> String {
        self.to_string()
    }

    pub fn into_shared(self) -> SharedName {
        Arc::new(self)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for component in &self.components {
            f.write_str("/")?;
            write_component(f, component)?;
        }
        Ok(())
    }
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

/// Percent-escape everything outside the URI unreserved set. Components made
/// only of periods, the empty one included, get three extra periods.
fn write_component(f: &mut fmt::Formatter<'_>, component: &[u8]) -> fmt::Result {
    if component.iter().all(|&byte| byte == b'.') {
        f.write_str("...")?;
    }
    for &byte in component {
        if is_unreserved(byte) {
            write!(f, "{}", byte as char)?;
        } else {
            write!(f, "%{byte:02X}")?;
        }
    }
    Ok(())
}

fn unescape_component(segment: &str) -> NameComponent {
    let bytes = segment.as_bytes();
    if bytes.len() >= 3 && bytes.iter().all(|&byte| byte == b'.') {
        return bytes[3..].to_vec();
    }

    let mut component = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escaped = bytes
                .get(i + 1..i + 3)
                .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = escaped {
                component.push(byte);
                i += 3;
                continue;
            }
        }
        // a stray '%' is kept as is
        component.push(bytes[i]);
        i += 1;
    }
    component
}

/// `/a/b` parses as a URI, anything else as a dotted address.
impl FromStr for Name {
    type Err = NameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('/') {
            Ok(Name::from_uri(s))
        } else {
            Name::from_dotted(s)
        }
    }
}

impl<'a> IntoIterator for &'a Name {
    type Item = &'a NameComponent;
    type IntoIter = std::slice::Iter<'a, NameComponent>;

    fn into_iter(self) -> Self::IntoIter {
        self.components.iter()
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameParseError {
    #[error("Empty component in name: {0}")]
    EmptyComponent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_creation() {
        let name: Name = "/hello/world/test".parse().unwrap();
        assert_eq!(name.len(), 3);
        assert_eq!(name.get(0).unwrap(), b"hello");
        assert_eq!(name.get(2).unwrap(), b"test");
        assert_eq!(name.to_uri(), "/hello/world/test");
    }

    #[test]
    fn test_dotted_address() {
        let name: Name = "1.2.3".parse().unwrap();
        assert_eq!(name.len(), 3);
        assert_eq!(name.to_string(), "/1/2/3");
        assert!(matches!(
            Name::from_dotted("1..3"),
            Err(NameParseError::EmptyComponent(_))
        ));
    }

    #[test]
    fn test_empty_name() {
        let name: Name = "/".parse().unwrap();
        assert!(name.is_empty());
        assert_eq!(name.to_uri(), "/");
        assert_eq!(Name::from_dotted("").unwrap(), Name::new());
    }

    #[test]
    fn test_prefix_relation() {
        let a = Name::from_uri("/a/b");
        let ab = Name::from_uri("/a/b/c");
        let other = Name::from_uri("/a/x/c");

        assert!(a.is_prefix_of(&ab));
        assert!(a.is_prefix_of(&a));
        assert!(!ab.is_prefix_of(&a));
        assert!(!a.is_prefix_of(&other));
        assert!(Name::new().is_prefix_of(&a));
        assert_eq!(ab.get_prefix(2), a);
        assert_eq!(ab.get_prefix(10), ab);
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut names: Vec<Name> = ["/b", "/a/c", "/a", "/a/b/z", "/a/b"]
            .iter()
            .map(|s| Name::from_uri(s))
            .collect();
        names.sort();
        let printed: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        assert_eq!(printed, vec!["/a", "/a/b", "/a/b/z", "/a/c", "/b"]);
    }

    #[test]
    fn test_uri_escapes_reserved_bytes() {
        let name = Name::from_components([
            b"a/b".to_vec(),
            vec![0xFF, 0x00],
            b"caf\xc3\xa9 bar".to_vec(),
            Vec::new(),
            b"..".to_vec(),
        ]);
        let uri = name.to_string();
        assert_eq!(uri, "/a%2Fb/%FF%00/caf%C3%A9%20bar/.../.....");
        assert_eq!(Name::from_uri(&uri), name);

        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(serde_json::from_str::<Name>(&json).unwrap(), name);
    }

    #[test]
    fn test_stray_percent_is_literal() {
        let name = Name::from_uri("/100%/a%2/%+1");
        assert_eq!(name.get(0).unwrap(), b"100%");
        assert_eq!(name.get(1).unwrap(), b"a%2");
        assert_eq!(name.get(2).unwrap(), b"%+1");
    }

    #[test]
    fn test_serde_uses_uri_form() {
        let name = Name::from_uri("/n1/home");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"/n1/home\"");
        let back: Name = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }
}
