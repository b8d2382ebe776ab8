//! Validated SQL identifiers.
//!
//! Table and column names are the only parts of a statement that cannot be bound as parameters,
//! so they are checked here once and carried as [`Ident`] / [`TableName`] afterwards.

use std::fmt;

use crate::error::{PipelineError, PipelineResult};

const MAX_IDENT_LEN: usize = 63;

/// A lower-case SQL identifier: `[a-z_][a-z0-9_]*`, at most 63 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    /// Validate `raw` as an identifier.
    pub fn new(raw: impl Into<String>) -> PipelineResult<Self> {
        let raw = raw.into();
        let invalid = |message: &str| PipelineError::InvalidIdentifier {
            ident: raw.clone(),
            message: message.to_string(),
        };

        let mut chars = raw.chars();
        match chars.next() {
            None => return Err(invalid("empty identifier")),
            Some(c) if !(c.is_ascii_lowercase() || c == '_') => {
                return Err(invalid("must start with a lower-case letter or '_'"));
            }
            Some(_) => {}
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return Err(invalid("only lower-case letters, digits and '_' are allowed"));
        }
        if raw.len() > MAX_IDENT_LEN {
            return Err(invalid("longer than 63 bytes"));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Warehouse layer a table belongs to, identified by its name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// `stg__*`: raw landed records.
    Staging,
    /// `wh__*`: transformed, normalized records.
    Warehouse,
    /// `mart__*`: report-ready aggregates.
    Mart,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Staging, Layer::Warehouse, Layer::Mart];

    /// Table-name prefix of this layer.
    pub fn prefix(self) -> &'static str {
        match self {
            Layer::Staging => "stg__",
            Layer::Warehouse => "wh__",
            Layer::Mart => "mart__",
        }
    }
}

/// A validated table name on the layer allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName(Ident);

impl TableName {
    /// Validate `raw` as an identifier carrying one of the [`Layer`] prefixes.
    pub fn new(raw: impl Into<String>) -> PipelineResult<Self> {
        let ident = Ident::new(raw)?;
        let allowed = Layer::ALL
            .iter()
            .any(|l| ident.as_str().len() > l.prefix().len() && ident.as_str().starts_with(l.prefix()));
        if !allowed {
            return Err(PipelineError::InvalidIdentifier {
                ident: ident.0,
                message: "table name must start with stg__, wh__ or mart__".to_string(),
            });
        }
        Ok(Self(ident))
    }

    /// Table `entity` in `layer`: `in_layer(Staging, "courses")` is `stg__courses`.
    pub fn in_layer(layer: Layer, entity: &str) -> PipelineResult<Self> {
        Self::new(format!("{}{entity}", layer.prefix()))
    }

    pub fn layer(&self) -> Layer {
        Layer::ALL
            .into_iter()
            .find(|l| self.as_str().starts_with(l.prefix()))
            .unwrap_or(Layer::Staging)
    }

    /// Name without its layer prefix.
    pub fn entity(&self) -> &str {
        &self.as_str()[self.layer().prefix().len()..]
    }

    /// The same entity in another layer.
    pub fn to_layer(&self, layer: Layer) -> PipelineResult<Self> {
        Self::in_layer(layer, self.entity())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
