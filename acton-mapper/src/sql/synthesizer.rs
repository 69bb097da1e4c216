//! SQL template synthesis from entity descriptors
//!
//! [`synthesize`] is a pure function of the descriptor, the operation and the
//! batch size. Identifiers come from validated descriptors; values never
//! appear in the text, only `@Name` placeholders.

use std::collections::HashSet;
use std::fmt;

use super::skeleton;
use super::template::{SqlTemplate, Token};
use crate::error::{Error, Result};
use crate::mapping::{ColumnDescriptor, EntityDescriptor};

/// Statement shape produced by the synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Select,
    /// Own columns only, `SELECT DISTINCT`
    SelectDistinct,
    SelectByKey,
    Count,
    ExistsByKey,
    Insert,
    /// Delete rows matching a filter, then insert a batch
    InsertWithUpsert,
    BulkInsert,
    Update,
    UpdateByKey,
    Delete,
    DeleteByKey,
}

impl OperationKind {
    /// Whether the template is sized by a batch
    pub fn is_batched(self) -> bool {
        matches!(self, Self::BulkInsert | Self::InsertWithUpsert)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "select"),
            Self::SelectDistinct => write!(f, "select_distinct"),
            Self::SelectByKey => write!(f, "select_by_key"),
            Self::Count => write!(f, "count"),
            Self::ExistsByKey => write!(f, "exists_by_key"),
            Self::Insert => write!(f, "insert"),
            Self::InsertWithUpsert => write!(f, "insert_with_upsert"),
            Self::BulkInsert => write!(f, "bulk_insert"),
            Self::Update => write!(f, "update"),
            Self::UpdateByKey => write!(f, "update_by_key"),
            Self::Delete => write!(f, "delete"),
            Self::DeleteByKey => write!(f, "delete_by_key"),
        }
    }
}

/// Name of the parameter bound to `property` in batch group `index`
pub(crate) fn batch_parameter(property: &str, index: usize) -> String {
    format!("{}_{}", property, index)
}

/// Name of the array parameter holding every batch value of a unique `property`
pub(crate) fn key_set_parameter(property: &str) -> String {
    format!("{}_keys", property)
}

/// Build the SQL template for one operation over one mapped type
///
/// Templates for `Select`, `SelectDistinct`, `Count`, `Update`, `Delete` and
/// `InsertWithUpsert` keep their per-call tokens (`#WHERE`, and for the select
/// family `#ORDERBY`, `#LIMIT`, `#OFFSET`); all other templates are complete.
pub fn synthesize(
    entity: &EntityDescriptor,
    kind: OperationKind,
    batch_size: Option<usize>,
) -> Result<String> {
    let primary_key = entity.primary_key()?;
    let batch = match (kind.is_batched(), batch_size) {
        (true, Some(size)) if size > 0 => size,
        (true, _) => {
            return Err(Error::configuration(format!(
                "{} of {} requires a positive batch size",
                kind, entity.type_name
            )))
        }
        (false, None) => 0,
        (false, Some(_)) => {
            return Err(Error::configuration(format!(
                "{} of {} does not take a batch size",
                kind, entity.type_name
            )))
        }
    };

    let table = &entity.table;
    let key_predicate = format!(
        "WHERE {}.{} = @{}",
        table.alias, primary_key.column_name, primary_key.property_name
    );

    let all_columns = select_list(entity.columns.iter(), entity);

    let sql = match kind {
        OperationKind::Select => select(entity, skeleton::SELECT, &all_columns)?.render(),
        OperationKind::SelectDistinct => {
            let own: Vec<_> = entity.own_columns().collect();
            let columns = if own.is_empty() {
                all_columns
            } else {
                select_list(own.into_iter(), entity)
            };
            select(entity, skeleton::SELECT_DISTINCT, &columns)?.render()
        }
        OperationKind::SelectByKey => select(entity, skeleton::SELECT, &all_columns)?
            .fill(Token::Where, &key_predicate)
            .finish(),
        OperationKind::Count => count(entity)?.render(),
        OperationKind::ExistsByKey => count(entity)?.fill(Token::Where, &key_predicate).finish(),
        OperationKind::Insert => insert(entity, primary_key)?,
        OperationKind::BulkInsert => {
            let skeleton = if has_unique_keys(entity) {
                skeleton::BULK_INSERT_WITH_CONFLICT_CHECK
            } else {
                skeleton::BULK_INSERT
            };
            bulk_insert(entity, primary_key, skeleton, batch)?.finish()
        }
        OperationKind::InsertWithUpsert => {
            let skeleton = if has_unique_keys(entity) {
                skeleton::UPSERT_WITH_CONFLICT_CHECK
            } else {
                skeleton::UPSERT
            };
            bulk_insert(entity, primary_key, skeleton, batch)?.render()
        }
        OperationKind::Update => update(entity)?.render(),
        OperationKind::UpdateByKey => update(entity)?.fill(Token::Where, &key_predicate).finish(),
        OperationKind::Delete => target(skeleton::DELETE, entity).render(),
        OperationKind::DeleteByKey => target(skeleton::DELETE, entity)
            .fill(Token::Where, &key_predicate)
            .finish(),
    };
    Ok(sql)
}

fn target(skeleton: &str, entity: &EntityDescriptor) -> SqlTemplate {
    SqlTemplate::new(skeleton)
        .fill(Token::TableName, &entity.table.name)
        .fill(Token::TableAlias, &entity.table.alias)
}

fn select(entity: &EntityDescriptor, skeleton: &str, columns: &str) -> Result<SqlTemplate> {
    let joins = joins(entity)?;
    Ok(target(skeleton, entity)
        .fill(Token::Columns, columns)
        .fill(Token::Join, &joins))
}

fn count(entity: &EntityDescriptor) -> Result<SqlTemplate> {
    Ok(select(entity, skeleton::SELECT, "COUNT(1)")?
        .remove(Token::OrderBy)
        .remove(Token::Limit)
        .remove(Token::Offset))
}

fn select_list<'a>(
    columns: impl Iterator<Item = &'a ColumnDescriptor>,
    entity: &EntityDescriptor,
) -> String {
    columns
        .map(|c| format!("{}.{} AS \"{}\"", entity.table.alias, c.column_name, c.property_name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One join line per foreign-key column, in column order
fn joins(entity: &EntityDescriptor) -> Result<String> {
    let mut aliases = HashSet::from([entity.table.alias.clone()]);
    let mut lines = Vec::new();
    for column in &entity.columns {
        let Some(foreign_key) = &column.foreign_key else {
            continue;
        };
        let referenced = foreign_key.referenced.describe()?;
        referenced.primary_key()?;
        let join_column = referenced.join_column(foreign_key)?;
        if !aliases.insert(referenced.table.alias.clone()) {
            return Err(Error::configuration(format!(
                "{} joins '{}' through '{}' with alias '{}', which is already in use",
                entity.type_name, referenced.table.name, column.property_name, referenced.table.alias
            )));
        }
        lines.push(format!(
            "{} JOIN {} AS {} ON {}.{} = {}.{}",
            foreign_key.join_kind,
            referenced.table.name,
            referenced.table.alias,
            referenced.table.alias,
            join_column,
            entity.table.alias,
            column.column_name
        ));
    }
    Ok(lines.join("\n"))
}

fn has_unique_keys(entity: &EntityDescriptor) -> bool {
    entity.unique_columns().next().is_some()
}

fn insert_columns(entity: &EntityDescriptor) -> Result<Vec<&ColumnDescriptor>> {
    let columns: Vec<_> = entity.insert_columns().collect();
    if columns.is_empty() {
        return Err(Error::configuration(format!(
            "{} declares no insertable columns",
            entity.type_name
        )));
    }
    Ok(columns)
}

fn column_names(columns: &[&ColumnDescriptor]) -> String {
    columns
        .iter()
        .map(|c| c.column_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn unique_keys(entity: &EntityDescriptor) -> String {
    entity
        .unique_columns()
        .map(|c| c.column_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert(entity: &EntityDescriptor, primary_key: &ColumnDescriptor) -> Result<String> {
    let columns = insert_columns(entity)?;
    let parameters = columns
        .iter()
        .map(|c| format!("@{}", c.property_name))
        .collect::<Vec<_>>()
        .join(", ");

    let template = if has_unique_keys(entity) {
        let filters = entity
            .unique_columns()
            .map(|c| format!("{}.{} = @{}", entity.table.alias, c.column_name, c.property_name))
            .collect::<Vec<_>>()
            .join(" AND ");
        target(skeleton::INSERT_WITH_CONFLICT_CHECK, entity)
            .fill(Token::UniqueKeyFilters, &filters)
            .fill(Token::UniqueKeys, &unique_keys(entity))
    } else {
        target(skeleton::INSERT, entity)
    };

    Ok(template
        .fill(Token::Columns, &column_names(&columns))
        .fill(Token::ParameterNames, &parameters)
        .fill(Token::PrimaryKey, &primary_key.column_name)
        .finish())
}

fn bulk_insert(
    entity: &EntityDescriptor,
    primary_key: &ColumnDescriptor,
    skeleton: &str,
    batch: usize,
) -> Result<SqlTemplate> {
    let columns = insert_columns(entity)?;
    let groups = (0..batch)
        .map(|index| {
            let names = columns
                .iter()
                .map(|c| format!("@{}", batch_parameter(&c.property_name, index)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({}, {})", names, index)
        })
        .collect::<Vec<_>>()
        .join(",\n        ");

    let filters = entity
        .unique_columns()
        .map(|c| {
            format!(
                "{}.{} = ANY(@{})",
                entity.table.alias,
                c.column_name,
                key_set_parameter(&c.property_name)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    Ok(target(skeleton, entity)
        .fill(Token::Columns, &column_names(&columns))
        .fill(Token::Values, &groups)
        .fill(Token::UniqueKeyFilters, &filters)
        .fill(Token::UniqueKeys, &unique_keys(entity))
        .fill(Token::PrimaryKey, &primary_key.column_name))
}

fn update(entity: &EntityDescriptor) -> Result<SqlTemplate> {
    let assignments = entity
        .columns
        .iter()
        .filter(|c| !c.is_primary_key)
        .map(|c| format!("{} = @{}", c.column_name, c.property_name))
        .collect::<Vec<_>>();
    if assignments.is_empty() {
        return Err(Error::configuration(format!(
            "{} declares no updatable columns",
            entity.type_name
        )));
    }
    Ok(target(skeleton::UPDATE, entity).fill(Token::ValuesToUpdate, &assignments.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{describe_entity, EntityDescriptor};
    use crate::testing::{Customer, SalesOrder, Widget};

    fn widget() -> std::sync::Arc<EntityDescriptor> {
        describe_entity::<Widget>().unwrap()
    }

    fn no_tokens_remain(sql: &str) -> bool {
        Token::ALL.iter().all(|t| !sql.contains(t.as_str()))
    }

    #[test]
    fn test_widget_select_by_key() {
        let sql = synthesize(&widget(), OperationKind::SelectByKey, None).unwrap();
        assert_eq!(
            sql,
            "SELECT w.id AS \"Id\", w.name AS \"Name\", w.created_at AS \"CreatedAt\"\n\
             FROM widget AS w\n\
             WHERE w.id = @Id"
        );
        assert!(no_tokens_remain(&sql));
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let entity = describe_entity::<SalesOrder>().unwrap();
        for kind in [
            OperationKind::Select,
            OperationKind::Count,
            OperationKind::Insert,
            OperationKind::Update,
        ] {
            assert_eq!(
                synthesize(&entity, kind, None).unwrap(),
                synthesize(&entity, kind, None).unwrap()
            );
        }
    }

    #[test]
    fn test_select_keeps_call_tokens_and_joins() {
        let entity = describe_entity::<SalesOrder>().unwrap();
        let sql = synthesize(&entity, OperationKind::Select, None).unwrap();
        assert_eq!(
            sql,
            "SELECT so.id AS \"Id\", so.creation_timestamp AS \"CreationTimestamp\", \
             so.customer_id AS \"CustomerId\", so.widget_id AS \"WidgetId\", \
             so.quantity AS \"Quantity\", so.status AS \"Status\", so.reference AS \"Reference\"\n\
             FROM sales_order AS so\n\
             INNER JOIN customer AS c ON c.id = so.customer_id\n\
             LEFT JOIN widget AS w ON w.id = so.widget_id\n\
             #WHERE\n#ORDERBY\n#LIMIT\n#OFFSET"
        );
    }

    #[test]
    fn test_base_columns_precede_own_columns() {
        let entity = describe_entity::<Customer>().unwrap();
        let sql = synthesize(&entity, OperationKind::Select, None).unwrap();
        let id = sql.find("c.id").unwrap();
        let created = sql.find("c.creation_timestamp").unwrap();
        let name = sql.find("c.name").unwrap();
        assert!(id < created && created < name);
    }

    #[test]
    fn test_select_distinct_lists_own_columns() {
        let entity = describe_entity::<Customer>().unwrap();
        let sql = synthesize(&entity, OperationKind::SelectDistinct, None).unwrap();
        assert!(sql.starts_with("SELECT DISTINCT c.name AS \"Name\", c.region AS \"Region\"\n"));
    }

    #[test]
    fn test_count_and_exists() {
        let sql = synthesize(&widget(), OperationKind::Count, None).unwrap();
        assert_eq!(sql, "SELECT COUNT(1)\nFROM widget AS w\n#WHERE");

        let sql = synthesize(&widget(), OperationKind::ExistsByKey, None).unwrap();
        assert_eq!(sql, "SELECT COUNT(1)\nFROM widget AS w\nWHERE w.id = @Id");
    }

    #[test]
    fn test_insert_without_unique_keys() {
        let sql = synthesize(&widget(), OperationKind::Insert, None).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO widget (name, created_at)\n\
             VALUES (@Name, @CreatedAt)\n\
             RETURNING id"
        );
    }

    #[test]
    fn test_insert_with_unique_keys_removes_conflicts() {
        let entity = describe_entity::<Customer>().unwrap();
        let sql = synthesize(&entity, OperationKind::Insert, None).unwrap();
        assert_eq!(
            sql,
            "WITH removed AS (\n    \
                 DELETE FROM customer AS c\n    \
                 WHERE c.name = @Name\n    \
                 RETURNING name\n\
             )\n\
             INSERT INTO customer (name, region)\n\
             SELECT @Name, @Region\n\
             WHERE (SELECT COUNT(1) FROM removed) >= 0\n\
             RETURNING id"
        );
    }

    #[test]
    fn test_bulk_insert_sizes_value_groups() {
        let sql = synthesize(&widget(), OperationKind::BulkInsert, Some(3)).unwrap();
        assert!(sql.contains("(@Name_0, @CreatedAt_0, 0),\n        (@Name_1, @CreatedAt_1, 1),\n        (@Name_2, @CreatedAt_2, 2)"));
        assert!(sql.ends_with("SELECT array_agg(id ORDER BY id) FROM inserted"));
        assert!(no_tokens_remain(&sql));
    }

    #[test]
    fn test_bulk_insert_with_unique_keys_uses_any() {
        let entity = describe_entity::<Customer>().unwrap();
        let sql = synthesize(&entity, OperationKind::BulkInsert, Some(2)).unwrap();
        assert!(sql.contains("WHERE c.name = ANY(@Name_keys)"));
        assert!(sql.contains(") AS batch (name, region, batch_ordinal)"));
        assert!(no_tokens_remain(&sql));
    }

    #[test]
    fn test_bulk_rows_are_inserted_in_input_order() {
        let entity = describe_entity::<Customer>().unwrap();
        for (kind, sql) in [
            (OperationKind::BulkInsert, synthesize(&widget(), OperationKind::BulkInsert, Some(2))),
            (OperationKind::BulkInsert, synthesize(&entity, OperationKind::BulkInsert, Some(2))),
            (OperationKind::InsertWithUpsert, synthesize(&widget(), OperationKind::InsertWithUpsert, Some(2))),
            (OperationKind::InsertWithUpsert, synthesize(&entity, OperationKind::InsertWithUpsert, Some(2))),
        ] {
            let sql = sql.unwrap();
            let feed = sql.find("SELECT name, ").unwrap();
            let order = sql.find("    ORDER BY batch_ordinal\n    RETURNING id").unwrap();
            assert!(feed < order, "{}: {}", kind, sql);
            assert!(sql.contains(", 1)"), "{}: {}", kind, sql);
        }
    }

    #[test]
    fn test_upsert_keeps_where_token() {
        let entity = describe_entity::<Customer>().unwrap();
        let sql = synthesize(&entity, OperationKind::InsertWithUpsert, Some(1)).unwrap();
        assert!(sql.starts_with("WITH purged AS (\n    DELETE FROM customer AS c\n    #WHERE\n"));
        assert!(sql.contains("(@Name_0, @Region_0, 0)"));
        assert!(sql.contains("FROM purged) + (SELECT COUNT(1) FROM removed) >= 0"));
    }

    #[test]
    fn test_batch_size_is_validated() {
        assert!(matches!(
            synthesize(&widget(), OperationKind::BulkInsert, None),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            synthesize(&widget(), OperationKind::BulkInsert, Some(0)),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            synthesize(&widget(), OperationKind::Select, Some(2)),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_update_and_delete() {
        let entity = describe_entity::<Customer>().unwrap();
        let sql = synthesize(&entity, OperationKind::UpdateByKey, None).unwrap();
        assert_eq!(
            sql,
            "UPDATE customer AS c\n\
             SET creation_timestamp = @CreationTimestamp, name = @Name, region = @Region\n\
             WHERE c.id = @Id"
        );

        let sql = synthesize(&entity, OperationKind::Delete, None).unwrap();
        assert_eq!(sql, "DELETE FROM customer AS c\n#WHERE");

        let sql = synthesize(&entity, OperationKind::DeleteByKey, None).unwrap();
        assert_eq!(sql, "DELETE FROM customer AS c\nWHERE c.id = @Id");
    }

    #[test]
    fn test_alias_collision_is_configuration_error() {
        use crate::mapping::{ColumnDescriptor, DbType, JoinKind, TableDescriptor};

        let descriptor = EntityDescriptor {
            type_name: "Wheel",
            table: TableDescriptor::new("wheel"),
            columns: vec![
                ColumnDescriptor::new("Id", DbType::Integer).primary_key(),
                ColumnDescriptor::new("WidgetId", DbType::Integer).references::<Widget>(JoinKind::Inner),
            ],
        };
        assert!(matches!(
            synthesize(&descriptor, OperationKind::Select, None),
            Err(Error::Configuration(msg)) if msg.contains("alias 'w'")
        ));
    }
}
