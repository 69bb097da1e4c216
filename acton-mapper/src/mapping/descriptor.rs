//! Table, column, foreign-key and filter descriptors

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use heck::ToSnakeCase;

use super::value::DbType;
use super::{describe_entity, Entity};
use crate::error::{Error, Result};

/// Derive a table alias from the first letter of each underscore-delimited segment
///
/// ```rust
/// use acton_mapper::mapping::derive_alias;
///
/// assert_eq!(derive_alias("widget"), "w");
/// assert_eq!(derive_alias("order_line_item"), "oli");
/// ```
pub fn derive_alias(table_name: &str) -> String {
    table_name
        .split('_')
        .filter_map(|segment| segment.chars().next())
        .collect::<String>()
        .to_lowercase()
}

/// Derive a column name from a PascalCase property name
///
/// ```rust
/// use acton_mapper::mapping::column_name;
///
/// assert_eq!(column_name("CreatedAt"), "created_at");
/// assert_eq!(column_name("Id"), "id");
/// ```
pub fn column_name(property_name: &str) -> String {
    property_name.to_snake_case()
}

/// Whether `name` can be spliced into SQL text as an identifier
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Table identity of a mapped type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableDescriptor {
    /// Table name, optionally schema qualified (`inventory.widget`)
    pub name: String,
    /// Alias used to qualify the table's columns
    pub alias: String,
}

impl TableDescriptor {
    /// Describe a table whose alias is derived from its name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let unqualified = name.rsplit('.').next().unwrap_or(&name);
        let alias = derive_alias(unqualified);
        Self { name, alias }
    }

    /// Describe a table with an explicit alias
    pub fn with_alias(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
        }
    }

    pub(crate) fn validate(&self, owner: &str) -> Result<()> {
        if !self.name.split('.').all(is_identifier) {
            return Err(Error::configuration(format!(
                "{} declares invalid table name '{}'",
                owner, self.name
            )));
        }
        if !is_identifier(&self.alias) {
            return Err(Error::configuration(format!(
                "{} declares invalid alias '{}' for table '{}'",
                owner, self.alias, self.name
            )));
        }
        Ok(())
    }
}

/// Join emitted for a foreign-key column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "INNER"),
            Self::Left => write!(f, "LEFT"),
            Self::Right => write!(f, "RIGHT"),
        }
    }
}

/// Reference to another mapped type, resolved lazily
#[derive(Clone, Copy)]
pub struct EntityRef {
    type_id: TypeId,
    type_name: &'static str,
    describe: fn() -> Result<Arc<EntityDescriptor>>,
}

impl EntityRef {
    pub fn of<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            describe: describe_entity::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Resolve the referenced type's descriptor
    pub fn describe(&self) -> Result<Arc<EntityDescriptor>> {
        (self.describe)()
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityRef").field(&self.type_name).finish()
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

/// Join target of a foreign-key column
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDescriptor {
    pub referenced: EntityRef,
    /// Column of the referenced table to join on; its primary key when absent
    pub referenced_property: Option<String>,
    pub join_kind: JoinKind,
}

/// Column identity of one mapped property
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub property_name: String,
    pub column_name: String,
    pub db_type: DbType,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub foreign_key: Option<ForeignKeyDescriptor>,
    /// Declared by an embedded base record rather than the entity itself
    pub embedded: bool,
}

impl ColumnDescriptor {
    /// Declare a column; its name is the snake_case form of the property
    pub fn new(property_name: impl Into<String>, db_type: DbType) -> Self {
        let property_name = property_name.into();
        Self {
            column_name: column_name(&property_name),
            property_name,
            db_type,
            is_primary_key: false,
            is_unique: false,
            foreign_key: None,
            embedded: false,
        }
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    /// Join `T` on its primary key
    #[must_use]
    pub fn references<T: Entity>(mut self, join_kind: JoinKind) -> Self {
        self.foreign_key = Some(ForeignKeyDescriptor {
            referenced: EntityRef::of::<T>(),
            referenced_property: None,
            join_kind,
        });
        self
    }

    /// Join `T` on the column mapped by `property`
    #[must_use]
    pub fn references_property<T: Entity>(
        mut self,
        property: impl Into<String>,
        join_kind: JoinKind,
    ) -> Self {
        self.foreign_key = Some(ForeignKeyDescriptor {
            referenced: EntityRef::of::<T>(),
            referenced_property: Some(property.into()),
            join_kind,
        });
        self
    }
}

/// Resolved shape of a mapped type
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub type_name: &'static str,
    pub table: TableDescriptor,
    /// Embedded columns first, then the type's own, each in declaration order
    pub columns: Vec<ColumnDescriptor>,
}

impl EntityDescriptor {
    /// The single primary-key column
    pub fn primary_key(&self) -> Result<&ColumnDescriptor> {
        let mut keys = self.columns.iter().filter(|c| c.is_primary_key);
        match (keys.next(), keys.next()) {
            (Some(key), None) => Ok(key),
            (None, _) => Err(Error::configuration(format!(
                "{} declares no primary key column",
                self.type_name
            ))),
            (Some(_), Some(_)) => Err(Error::configuration(format!(
                "{} declares more than one primary key column",
                self.type_name
            ))),
        }
    }

    /// Columns declared by the type itself
    pub fn own_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.embedded)
    }

    pub fn unique_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.is_unique)
    }

    /// Columns written by an insert: own columns other than the primary key
    pub fn insert_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.own_columns().filter(|c| !c.is_primary_key)
    }

    /// Look a column up by property or column name, ignoring case
    pub fn find_column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| {
            c.property_name.eq_ignore_ascii_case(name) || c.column_name.eq_ignore_ascii_case(name)
        })
    }

    /// Column name a foreign key joins on in the referenced table
    pub(crate) fn join_column(&self, foreign_key: &ForeignKeyDescriptor) -> Result<String> {
        match &foreign_key.referenced_property {
            Some(property) => self
                .find_column(property)
                .map(|c| c.column_name.clone())
                .ok_or_else(|| {
                    Error::configuration(format!(
                        "{} has no column for referenced property '{}'",
                        self.type_name, property
                    ))
                }),
            None => Ok(self.primary_key()?.column_name.clone()),
        }
    }
}

/// SQL comparison applied by a filter column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterOperator {
    /// Equal to (=)
    #[default]
    Equal,
    /// Not equal to (!=)
    NotEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal to (>=)
    GreaterThanOrEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal to (<=)
    LessThanOrEqual,
    /// Pattern match (LIKE); the value is wrapped in `%...%`
    Like,
    /// Case-insensitive pattern match (ILIKE); the value is wrapped in `%...%`
    ILike,
}

impl FilterOperator {
    /// Whether the bound value is wrapped in `%` wildcards
    pub fn is_pattern(self) -> bool {
        matches!(self, Self::Like | Self::ILike)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqual => write!(f, "<="),
            Self::Like => write!(f, "LIKE"),
            Self::ILike => write!(f, "ILIKE"),
        }
    }
}

/// Binding of one filter property to a column and comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterColumnDescriptor {
    /// Filter property holding the value; also the parameter name
    pub property_name: String,
    pub clause: FilterOperator,
    /// Entity property the column is derived from, when it differs
    pub bound_property: Option<String>,
    /// Name of the joined table holding the column
    pub table_qualifier: Option<String>,
}

impl FilterColumnDescriptor {
    pub fn new(property_name: impl Into<String>, clause: FilterOperator) -> Self {
        Self {
            property_name: property_name.into(),
            clause,
            bound_property: None,
            table_qualifier: None,
        }
    }

    #[must_use]
    pub fn bound_to(mut self, property: impl Into<String>) -> Self {
        self.bound_property = Some(property.into());
        self
    }

    #[must_use]
    pub fn on_table(mut self, table_name: impl Into<String>) -> Self {
        self.table_qualifier = Some(table_name.into());
        self
    }

    /// Column compared by this filter column
    pub fn column_name(&self) -> String {
        column_name(self.bound_property.as_deref().unwrap_or(&self.property_name))
    }
}

/// Resolved shape of a filter type
#[derive(Debug, Clone)]
pub struct FilterDescriptor {
    pub type_name: &'static str,
    /// Table of the filtered entity
    pub table: TableDescriptor,
    /// Tables joined through the entity's foreign keys, keyed by table name
    pub joined_tables: BTreeMap<String, TableDescriptor>,
    pub columns: Vec<FilterColumnDescriptor>,
}

impl FilterDescriptor {
    /// Alias qualifying a filter column
    pub fn alias_for(&self, column: &FilterColumnDescriptor) -> Result<&str> {
        match &column.table_qualifier {
            None => Ok(&self.table.alias),
            Some(table) if *table == self.table.name => Ok(&self.table.alias),
            Some(table) => self
                .joined_tables
                .get(table)
                .map(|t| t.alias.as_str())
                .ok_or_else(|| {
                    Error::configuration(format!(
                        "{} qualifies '{}' with table '{}', which is not joined to '{}'",
                        self.type_name, column.property_name, table, self.table.name
                    ))
                }),
        }
    }
}
