//! Translation of filter instances into WHERE clauses
//!
//! Every populated filter property becomes one predicate of the form
//! `<alias>.<column> <operator> @<Property>`; predicates are AND-ed. Values
//! are always bound, never spliced into the text.

use crate::error::Result;
use crate::mapping::{describe_filter, Filter, SqlValue};
use crate::sql::ParameterSet;

/// WHERE clause and parameters produced from one filter instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translation {
    /// `WHERE ...` text, absent when no property is populated
    pub where_clause: Option<String>,
    pub parameters: ParameterSet,
    /// Whether any predicate is qualified by a joined table's alias
    pub uses_joined_tables: bool,
}

impl Translation {
    pub fn is_unconstrained(&self) -> bool {
        self.where_clause.is_none()
    }
}

/// Build the WHERE clause for `filter`
///
/// Properties that are unset, NULL or whitespace-only are skipped. Enum
/// values bind as their integer discriminant; `LIKE`/`ILIKE` values are
/// wrapped in `%` wildcards.
pub fn translate<F: Filter>(filter: &F) -> Result<Translation> {
    let descriptor = describe_filter::<F>()?;
    let mut predicates = Vec::new();
    let mut parameters = ParameterSet::new();
    let mut uses_joined_tables = false;

    for column in &descriptor.columns {
        let value = match filter.value_of(&column.property_name) {
            Some(value) if !value.is_blank() => value,
            _ => continue,
        };
        let value = match value {
            SqlValue::Enum(discriminant) => SqlValue::Integer(discriminant),
            SqlValue::Text(text) if column.clause.is_pattern() => {
                SqlValue::Text(format!("%{}%", text))
            }
            other => other,
        };
        let Some(db_type) = value.db_type() else {
            continue;
        };

        let alias = descriptor.alias_for(column)?;
        uses_joined_tables |= alias != descriptor.table.alias;
        predicates.push(format!(
            "{}.{} {} @{}",
            alias,
            column.column_name(),
            column.clause,
            column.property_name
        ));
        parameters.insert(column.property_name.clone(), db_type, value)?;
    }

    let where_clause =
        (!predicates.is_empty()).then(|| format!("WHERE {}", predicates.join("\n    AND ")));
    Ok(Translation {
        where_clause,
        parameters,
        uses_joined_tables,
    })
}
