//! Mapping metadata for record types
//!
//! A mapped type describes its table and columns by implementing [`Entity`];
//! a filter type describes its predicates by implementing [`Filter`]. The
//! declarations are turned into descriptors once per type, at first use, and
//! shared for the lifetime of the process.
//!
//! # Example
//!
//! ```rust
//! use acton_mapper::mapping::{
//!     ColumnDescriptor, DbType, Entity, EntityBase, Record, SqlValue, TableDescriptor, ValueError,
//! };
//!
//! #[derive(Debug, Default)]
//! struct Widget {
//!     base: EntityBase,
//!     name: String,
//! }
//!
//! impl Record for Widget {
//!     fn columns() -> Vec<ColumnDescriptor> {
//!         vec![ColumnDescriptor::new("Name", DbType::Text).unique()]
//!     }
//!
//!     fn value_of(&self, property: &str) -> Option<SqlValue> {
//!         match property {
//!             "Name" => Some(self.name.clone().into()),
//!             _ => self.base.value_of(property),
//!         }
//!     }
//!
//!     fn assign(&mut self, property: &str, value: SqlValue) -> Result<(), ValueError> {
//!         match property {
//!             "Name" => self.name = value.try_into()?,
//!             _ => self.base.assign(property, value)?,
//!         }
//!         Ok(())
//!     }
//! }
//!
//! impl Entity for Widget {
//!     fn table() -> TableDescriptor {
//!         TableDescriptor::new("widget")
//!     }
//!
//!     fn embedded_columns() -> Vec<ColumnDescriptor> {
//!         EntityBase::columns()
//!     }
//! }
//!
//! let columns = acton_mapper::mapping::describe_columns::<Widget>().unwrap();
//! let names: Vec<_> = columns.iter().map(|c| c.column_name.as_str()).collect();
//! assert_eq!(names, ["id", "creation_timestamp", "name"]);
//! ```

mod descriptor;
mod value;

use std::any::TypeId;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::error::{Error, Result};

pub use descriptor::{
    column_name, derive_alias, ColumnDescriptor, EntityDescriptor, EntityRef, FilterColumnDescriptor,
    FilterDescriptor, FilterOperator, ForeignKeyDescriptor, JoinKind, TableDescriptor,
};
pub use value::{DbType, SqlValue, ValueError, ValueKey};

pub(crate) use descriptor::is_identifier;

/// A record whose properties map onto columns
///
/// Property names are PascalCase; column names are derived from them.
pub trait Record: Default + Send + Sync + 'static {
    /// Columns declared by this record, in declaration order
    fn columns() -> Vec<ColumnDescriptor>;

    /// Current value of a declared property
    fn value_of(&self, property: &str) -> Option<SqlValue>;

    /// Store a non-NULL database value into a declared property
    fn assign(&mut self, property: &str, value: SqlValue) -> std::result::Result<(), ValueError>;
}

/// A record stored as one row of a table
pub trait Entity: Record {
    fn table() -> TableDescriptor;

    /// Columns of an embedded base record, listed ahead of the entity's own
    fn embedded_columns() -> Vec<ColumnDescriptor> {
        Vec::new()
    }
}

/// A record whose populated properties constrain queries over `Self::Entity`
pub trait Filter: Send + Sync + 'static {
    type Entity: Entity;

    fn filter_columns() -> Vec<FilterColumnDescriptor>;

    /// Current value of a filter property; `None` or NULL means unconstrained
    fn value_of(&self, property: &str) -> Option<SqlValue>;
}

/// Columns shared by every stored entity: a generated key and a creation time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityBase {
    pub id: i64,
    pub creation_timestamp: DateTime<Utc>,
}

impl Record for EntityBase {
    fn columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("Id", DbType::Integer).primary_key(),
            ColumnDescriptor::new("CreationTimestamp", DbType::Timestamp),
        ]
    }

    fn value_of(&self, property: &str) -> Option<SqlValue> {
        match property {
            "Id" => Some(self.id.into()),
            "CreationTimestamp" => Some(self.creation_timestamp.into()),
            _ => None,
        }
    }

    fn assign(&mut self, property: &str, value: SqlValue) -> std::result::Result<(), ValueError> {
        match property {
            "Id" => self.id = value.try_into()?,
            "CreationTimestamp" => self.creation_timestamp = value.try_into()?,
            _ => {}
        }
        Ok(())
    }
}

static ENTITIES: Lazy<DashMap<TypeId, Arc<EntityDescriptor>>> = Lazy::new(DashMap::new);
static FILTERS: Lazy<DashMap<TypeId, Arc<FilterDescriptor>>> = Lazy::new(DashMap::new);

/// Descriptor of a mapped type, built on first use
pub fn describe_entity<T: Entity>() -> Result<Arc<EntityDescriptor>> {
    let key = TypeId::of::<T>();
    if let Some(found) = ENTITIES.get(&key) {
        return Ok(Arc::clone(found.value()));
    }

    let descriptor = Arc::new(build_entity::<T>()?);
    tracing::debug!(
        entity = descriptor.type_name,
        table = %descriptor.table.name,
        columns = descriptor.columns.len(),
        "Described mapped type"
    );
    Ok(Arc::clone(ENTITIES.entry(key).or_insert(descriptor).value()))
}

pub fn describe_table<T: Entity>() -> Result<TableDescriptor> {
    Ok(describe_entity::<T>()?.table.clone())
}

/// Columns of a mapped type: embedded columns first, then its own
pub fn describe_columns<T: Entity>() -> Result<Vec<ColumnDescriptor>> {
    Ok(describe_entity::<T>()?.columns.clone())
}

/// The single primary-key column of a mapped type
pub fn describe_primary_key<T: Entity>() -> Result<ColumnDescriptor> {
    describe_entity::<T>()?.primary_key().cloned()
}

/// Descriptor of a filter type, with the tables its entity joins
pub fn describe_filter<F: Filter>() -> Result<Arc<FilterDescriptor>> {
    let key = TypeId::of::<F>();
    if let Some(found) = FILTERS.get(&key) {
        return Ok(Arc::clone(found.value()));
    }

    let descriptor = Arc::new(build_filter::<F>()?);
    Ok(Arc::clone(FILTERS.entry(key).or_insert(descriptor).value()))
}

fn build_entity<T: Entity>() -> Result<EntityDescriptor> {
    let type_name = std::any::type_name::<T>();
    let table = T::table();
    table.validate(type_name)?;

    let embedded = T::embedded_columns().into_iter().map(|mut column| {
        column.embedded = true;
        column
    });
    let own = T::columns().into_iter().map(|mut column| {
        column.embedded = false;
        column
    });
    let columns: Vec<ColumnDescriptor> = embedded.chain(own).collect();

    if columns.is_empty() {
        return Err(Error::configuration(format!(
            "{} declares no columns",
            type_name
        )));
    }

    let mut seen = HashSet::new();
    for column in &columns {
        if !is_identifier(&column.property_name) || !is_identifier(&column.column_name) {
            return Err(Error::configuration(format!(
                "{} declares invalid property '{}'",
                type_name, column.property_name
            )));
        }
        if !seen.insert(column.column_name.to_ascii_lowercase()) {
            return Err(Error::configuration(format!(
                "{} declares column '{}' more than once",
                type_name, column.column_name
            )));
        }
    }

    Ok(EntityDescriptor {
        type_name,
        table,
        columns,
    })
}

fn build_filter<F: Filter>() -> Result<FilterDescriptor> {
    let type_name = std::any::type_name::<F>();
    let entity = describe_entity::<F::Entity>()?;

    let mut joined_tables = BTreeMap::new();
    for column in &entity.columns {
        if let Some(foreign_key) = &column.foreign_key {
            let referenced = foreign_key.referenced.describe()?;
            joined_tables.insert(referenced.table.name.clone(), referenced.table.clone());
        }
    }

    let columns = F::filter_columns();
    for column in &columns {
        if !is_identifier(&column.property_name) || !is_identifier(&column.column_name()) {
            return Err(Error::configuration(format!(
                "{} declares invalid filter property '{}'",
                type_name, column.property_name
            )));
        }
    }

    let descriptor = FilterDescriptor {
        type_name,
        table: entity.table.clone(),
        joined_tables,
        columns,
    };
    // Unknown table qualifiers are a declaration defect; surface them now.
    for column in &descriptor.columns {
        descriptor.alias_for(column)?;
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Customer, SalesOrderFilter, Widget};

    #[derive(Debug, Default)]
    struct Keyless {
        name: String,
    }

    impl Record for Keyless {
        fn columns() -> Vec<ColumnDescriptor> {
            vec![ColumnDescriptor::new("Name", DbType::Text)]
        }

        fn value_of(&self, property: &str) -> Option<SqlValue> {
            (property == "Name").then(|| self.name.clone().into())
        }

        fn assign(&mut self, _property: &str, value: SqlValue) -> std::result::Result<(), ValueError> {
            self.name = value.try_into()?;
            Ok(())
        }
    }

    impl Entity for Keyless {
        fn table() -> TableDescriptor {
            TableDescriptor::new("keyless")
        }
    }

    #[derive(Debug, Default)]
    struct Duplicated;

    impl Record for Duplicated {
        fn columns() -> Vec<ColumnDescriptor> {
            vec![ColumnDescriptor::new("Id", DbType::Integer)]
        }

        fn value_of(&self, _property: &str) -> Option<SqlValue> {
            None
        }

        fn assign(&mut self, _property: &str, _value: SqlValue) -> std::result::Result<(), ValueError> {
            Ok(())
        }
    }

    impl Entity for Duplicated {
        fn table() -> TableDescriptor {
            TableDescriptor::new("duplicated")
        }

        fn embedded_columns() -> Vec<ColumnDescriptor> {
            EntityBase::columns()
        }
    }

    #[test]
    fn test_embedded_columns_come_first() {
        let columns = describe_columns::<Customer>().unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.property_name.as_str()).collect();
        assert_eq!(names, ["Id", "CreationTimestamp", "Name", "Region"]);
        assert!(columns[0].embedded && columns[1].embedded);
        assert!(!columns[2].embedded);
    }

    #[test]
    fn test_describe_is_memoized() {
        let first = describe_entity::<Widget>().unwrap();
        let second = describe_entity::<Widget>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_describe_table_and_key() {
        let table = describe_table::<Widget>().unwrap();
        assert_eq!(table.name, "widget");
        assert_eq!(table.alias, "w");
        assert_eq!(describe_primary_key::<Widget>().unwrap().column_name, "id");
    }

    #[test]
    fn test_missing_primary_key_is_configuration_error() {
        assert!(describe_entity::<Keyless>().is_ok());
        assert!(matches!(
            describe_primary_key::<Keyless>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_column_is_configuration_error() {
        assert!(matches!(
            describe_entity::<Duplicated>(),
            Err(Error::Configuration(msg)) if msg.contains("'id'")
        ));
    }

    #[test]
    fn test_filter_descriptor_joins_foreign_tables() {
        let filter = describe_filter::<SalesOrderFilter>().unwrap();
        assert_eq!(filter.table.alias, "so");
        assert_eq!(filter.joined_tables.len(), 2);
        assert_eq!(filter.joined_tables["customer"].alias, "c");
        assert_eq!(filter.joined_tables["widget"].alias, "w");
    }

    #[test]
    fn test_entity_base_round_trip() {
        let mut base = EntityBase::default();
        base.assign("Id", SqlValue::Integer(7)).unwrap();
        assert_eq!(base.value_of("Id"), Some(SqlValue::Integer(7)));
        assert!(base.assign("Id", SqlValue::from("seven")).is_err());
    }
}
