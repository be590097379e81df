//! Field mapping registry
//!
//! Declares, per table, the ordered set of column specifications that map
//! raw accounting fields to typed table columns. Schemas are built once at
//! startup, validated on construction, and never mutated afterwards.
//!
//! Column parameter positions are assigned by an explicit enumeration when
//! the [`TableSchema`] is constructed, so schema construction is
//! deterministic and reentrant.

use crate::error::{FieldError, SchemaError};
use crate::value::{RawValue, SqlValue};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Transform function applied to a raw value before it lands in a column.
pub type Transform = fn(&RawValue) -> Result<SqlValue, FieldError>;

/// Base column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Text,
    BigInt,
    Double,
    Timestamp,
}

impl BaseType {
    /// Postgres type name used in DDL.
    pub fn pg_name(&self) -> &'static str {
        match self {
            BaseType::Text => "TEXT",
            BaseType::BigInt => "BIGINT",
            BaseType::Double => "DOUBLE PRECISION",
            BaseType::Timestamp => "TIMESTAMPTZ",
        }
    }
}

/// Parsed type descriptor: base type, optional max length (bounded text
/// only), nullability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlType {
    pub base: BaseType,
    pub max_len: Option<usize>,
    pub nullable: bool,
}

impl FromStr for SqlType {
    type Err = String;

    /// Parse a fully qualified type descriptor, e.g. `text(255) not null`,
    /// `bigint`, `double`, `timestamp not null`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Kept as a local: type parsing happens a few dozen times at startup,
        // not per record.
        let re = Regex::new(r"^(?P<base>\w+)(?:\((?P<len>\d+)\))?(?P<notnull>\s+not\s+null)?$")
            .map_err(|e| e.to_string())?;
        let lower = s.trim().to_lowercase();
        let caps = re.captures(&lower).ok_or_else(|| format!("bad descriptor '{}'", s))?;

        let base = match &caps["base"] {
            "text" | "varchar" => BaseType::Text,
            "bigint" | "int" | "integer" => BaseType::BigInt,
            "double" | "float" => BaseType::Double,
            "timestamp" | "date" => BaseType::Timestamp,
            other => return Err(format!("unknown base type '{}'", other)),
        };

        let max_len = match caps.name("len") {
            Some(m) => Some(m.as_str().parse::<usize>().map_err(|e| e.to_string())?),
            None => None,
        };
        if max_len.is_some() && base != BaseType::Text {
            return Err(format!("length only applies to text columns, not '{}'", s));
        }

        Ok(SqlType { base, max_len, nullable: caps.name("notnull").is_none() })
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.base, self.max_len) {
            (BaseType::Text, Some(n)) => write!(f, "VARCHAR({})", n)?,
            (base, _) => write!(f, "{}", base.pg_name())?,
        }
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// Declarative mapping between one raw accounting field and one table
/// column. Immutable after registry construction.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: SqlType,
    src: Option<String>,
    pub transform: Option<Transform>,
    /// Constant default. When set, the column is never read from the raw
    /// record; the default is still fed through the transform.
    pub default: Option<RawValue>,
    /// 1-based positional index, assigned by `TableSchema::new`.
    pub pos: usize,
}

impl ColumnSpec {
    pub fn new(name: &str, descriptor: &str) -> Result<Self, SchemaError> {
        let ty = descriptor.parse::<SqlType>().map_err(|_| SchemaError::BadTypeDescriptor {
            column: name.to_string(),
            descriptor: descriptor.to_string(),
        })?;
        Ok(ColumnSpec {
            name: name.to_string(),
            ty,
            src: None,
            transform: None,
            default: None,
            pos: 0,
        })
    }

    /// Originating field name as seen in the accounting file. Defaults to
    /// the column name.
    pub fn source(&self) -> &str {
        self.src.as_deref().unwrap_or(&self.name)
    }

    pub fn with_source(mut self, src: &str) -> Self {
        self.src = Some(src.to_string());
        self
    }

    pub fn with_transform(mut self, f: Transform) -> Self {
        self.transform = Some(f);
        self
    }

    pub fn with_default(mut self, v: RawValue) -> Self {
        self.default = Some(v);
        self
    }
}

/// Ordered sequence of column specifications plus key and index metadata.
/// The column order is significant: it defines positional parameter
/// binding for inserts.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<Vec<String>>,
}

impl TableSchema {
    /// Validate and build a table schema. Fails if column names repeat or
    /// a key/index column is not in the column list. Assigns positional
    /// indices in declaration order.
    pub fn new(
        name: &str,
        mut columns: Vec<ColumnSpec>,
        primary_key: Vec<&str>,
        indexes: Vec<Vec<&str>>,
    ) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for (i, col) in columns.iter_mut().enumerate() {
            if !seen.insert(col.name.clone()) {
                return Err(SchemaError::DuplicateColumn {
                    table: name.to_string(),
                    column: col.name.clone(),
                });
            }
            col.pos = i + 1;
        }

        for pk in &primary_key {
            if !seen.contains(*pk) {
                return Err(SchemaError::UnknownPrimaryKey {
                    table: name.to_string(),
                    column: pk.to_string(),
                });
            }
        }
        for idx in &indexes {
            for col in idx {
                if !seen.contains(*col) {
                    return Err(SchemaError::UnknownIndexColumn {
                        table: name.to_string(),
                        column: col.to_string(),
                    });
                }
            }
        }

        Ok(TableSchema {
            name: name.to_string(),
            columns,
            primary_key: primary_key.into_iter().map(String::from).collect(),
            indexes: indexes
                .into_iter()
                .map(|idx| idx.into_iter().map(String::from).collect())
                .collect(),
        })
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Registry of the fixed table shapes, keyed by table name.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    tables: HashMap<String, Arc<TableSchema>>,
}

impl TableRegistry {
    pub fn from_schemas(schemas: Vec<TableSchema>) -> Self {
        let tables = schemas.into_iter().map(|s| (s.name.clone(), Arc::new(s))).collect();
        TableRegistry { tables }
    }

    /// Build the registry with the organization's standard tables.
    pub fn standard() -> Result<Self, SchemaError> {
        Ok(Self::from_schemas(vec![crate::tables::local_jobs()?, crate::tables::ce_jobs()?]))
    }

    pub fn get(&self, name: &str) -> Result<&Arc<TableSchema>, SchemaError> {
        self.tables.get(name).ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }
}
