use serde::{Deserialize, Serialize};

/// Target type of a canonical field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Integer,
    Number,
}

/// One field of the canonical record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    /// Canonical output name
    pub name: String,
    /// Other raw names accepted for this field, in priority order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            kind,
            required: false,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Canonical name followed by the aliases. When a row carries several
    /// of these, the earliest one wins.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(|a| a.trim()))
    }

    /// Whether a raw key names this field. Keys are compared trimmed and
    /// case-insensitively.
    pub fn accepts(&self, raw_key: &str) -> bool {
        let key = raw_key.trim();
        self.names().any(|name| key.eq_ignore_ascii_case(name))
    }
}

/// The stable record shape produced by normalization
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalSchema {
    pub fields: Vec<FieldSpec>,
}

impl CanonicalSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
