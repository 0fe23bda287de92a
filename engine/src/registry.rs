//! Table registry and payload validation.
//!
//! Every synced table is described by a [`TableDescriptor`] carrying its
//! dependency rank. The registry is validated once, at construction, so the
//! rest of the engine can rely on a strict total order in which every table
//! ranks above all tables it references.

use crate::{error::Result, Error, Payload, Rank, TableName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Field types supported in payload schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// RFC 3339 string or integer epoch
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<()> {
        match value {
            None | Some(serde_json::Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => match value {
                serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
                other => other.is_i64() || other.is_u64(),
            },
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Whether rows of a table are partitioned by tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableScope {
    /// Rows belong to one tenant; pulls filter by tenant id
    #[default]
    Tenant,
    /// Shared reference data visible to every tenant
    Global,
}

/// Describes one synced table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    /// Table name, identical locally and remotely
    pub name: TableName,
    /// Position in the dependency order
    pub rank: Rank,
    /// Tables this one holds foreign keys to
    #[serde(default)]
    pub references: Vec<TableName>,
    #[serde(default)]
    pub scope: TableScope,
    /// Payload fields; empty means any object is accepted
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl TableDescriptor {
    /// Create a tenant-scoped table with no references and no field schema.
    pub fn new(name: impl Into<TableName>, rank: Rank) -> Self {
        Self {
            name: name.into(),
            rank,
            references: Vec::new(),
            scope: TableScope::Tenant,
            fields: Vec::new(),
        }
    }

    /// Builder-style method to declare a foreign key target.
    pub fn references(mut self, table: impl Into<TableName>) -> Self {
        self.references.push(table.into());
        self
    }

    /// Builder-style method to mark the table as shared across tenants.
    pub fn global(mut self) -> Self {
        self.scope = TableScope::Global;
        self
    }

    /// Builder-style method to set the payload schema.
    pub fn with_fields(mut self, fields: Vec<FieldDef>) -> Self {
        self.fields = fields;
        self
    }

    /// Validate a payload against this table's fields.
    pub fn validate_payload(&self, payload: &Payload) -> Result<()> {
        for field in &self.fields {
            field.validate(payload.get(&field.name))?;
        }
        Ok(())
    }
}

/// Validated, rank-ordered set of table descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TableDescriptor>", into = "Vec<TableDescriptor>")]
pub struct TableRegistry {
    /// Descriptors sorted by ascending rank
    tables: Vec<TableDescriptor>,
    /// Name -> position in `tables`
    index: HashMap<TableName, usize>,
}

impl TableRegistry {
    /// Build a registry, rejecting duplicate names, duplicate ranks, dangling
    /// references and any reference that does not point strictly downwards in
    /// rank. The last rule makes the dependency graph acyclic by construction.
    pub fn new(mut tables: Vec<TableDescriptor>) -> Result<Self> {
        tables.sort_by_key(|t| t.rank);

        let mut index = HashMap::with_capacity(tables.len());
        let mut ranks: BTreeMap<Rank, &TableName> = BTreeMap::new();
        for (pos, table) in tables.iter().enumerate() {
            if index.insert(table.name.clone(), pos).is_some() {
                return Err(Error::DuplicateTable(table.name.clone()));
            }
            if let Some(first) = ranks.insert(table.rank, &table.name) {
                return Err(Error::DuplicateRank {
                    rank: table.rank,
                    first: first.clone(),
                    second: table.name.clone(),
                });
            }
        }

        for table in &tables {
            for referenced in &table.references {
                let target = index
                    .get(referenced)
                    .map(|&pos| &tables[pos])
                    .ok_or_else(|| Error::UnknownReference {
                        table: table.name.clone(),
                        referenced: referenced.clone(),
                    })?;
                if target.rank >= table.rank {
                    return Err(Error::RankOrder {
                        table: table.name.clone(),
                        rank: table.rank,
                        referenced: referenced.clone(),
                        referenced_rank: target.rank,
                    });
                }
            }
        }

        Ok(Self { tables, index })
    }

    /// Get a table descriptor by name.
    pub fn get(&self, name: &str) -> Option<&TableDescriptor> {
        self.index.get(name).map(|&pos| &self.tables[pos])
    }

    /// Get a table descriptor or fail with [`Error::TableNotFound`].
    pub fn require(&self, name: &str) -> Result<&TableDescriptor> {
        self.get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tables in ascending rank: the create/update order.
    pub fn ascending(&self) -> impl DoubleEndedIterator<Item = &TableDescriptor> {
        self.tables.iter()
    }

    /// Tables in descending rank: the delete order.
    pub fn descending(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.iter().rev()
    }

    /// Resolve a list of names into descriptors sorted by ascending rank.
    pub fn select(&self, names: &[&str]) -> Result<Vec<&TableDescriptor>> {
        let mut selected = names
            .iter()
            .map(|name| self.require(name))
            .collect::<Result<Vec<_>>>()?;
        selected.sort_by_key(|t| t.rank);
        selected.dedup_by_key(|t| t.rank);
        Ok(selected)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl TryFrom<Vec<TableDescriptor>> for TableRegistry {
    type Error = Error;

    fn try_from(tables: Vec<TableDescriptor>) -> Result<Self> {
        Self::new(tables)
    }
}

impl From<TableRegistry> for Vec<TableDescriptor> {
    fn from(registry: TableRegistry) -> Self {
        registry.tables
    }
}
