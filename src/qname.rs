use std::fmt;
use std::hash::{Hash, Hasher};

/// A qualified name: optional prefix plus local name.
///
/// Two names are equal when their full `prefix:name` text is equal.
#[derive(Clone, Debug)]
pub struct QName {
    prefix: Option<String>,
    local_name: String,
    qualified: String,
}

impl QName {
    pub fn new(prefix: Option<&str>, local_name: &str) -> Self {
        let prefix = prefix.filter(|p| !p.is_empty()).map(str::to_string);
        let qualified = match &prefix {
            Some(p) => format!("{p}:{local_name}"),
            None => local_name.to_string(),
        };
        Self {
            prefix,
            local_name: local_name.to_string(),
            qualified,
        }
    }

    pub fn local(local_name: &str) -> Self {
        Self::new(None, local_name)
    }

    /// Split `p:name` on the first colon.
    pub fn parse(qualified: &str) -> Self {
        match qualified.split_once(':') {
            Some((prefix, local)) => Self::new(Some(prefix), local),
            None => Self::new(None, qualified),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn qualified(&self) -> &str {
        &self.qualified
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.qualified == other.qualified
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.qualified.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified)
    }
}

impl From<&str> for QName {
    fn from(s: &str) -> Self {
        QName::parse(s)
    }
}
