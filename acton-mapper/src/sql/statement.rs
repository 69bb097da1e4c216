//! Executable statements with named, typed parameters

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::mapping::{DbType, SqlValue};

/// Most parameters one PostgreSQL statement can bind
pub const MAX_PARAMETERS: usize = u16::MAX as usize;

/// A value bound to a named placeholder
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    /// Type sent to the server, needed when the value is NULL
    pub db_type: DbType,
    pub value: SqlValue,
}

/// Parameters keyed by name, in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    entries: Vec<Parameter>,
    index: HashMap<String, usize>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter; names must be unique within the set
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        db_type: DbType,
        value: SqlValue,
    ) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(Error::configuration(format!(
                "parameter @{} is bound more than once",
                name
            )));
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(Parameter {
            name,
            db_type,
            value,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn extend(&mut self, other: ParameterSet) -> Result<()> {
        self.entries.reserve(other.len());
        self.index.reserve(other.len());
        for parameter in other.entries {
            self.insert(parameter.name, parameter.db_type, parameter.value)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.entries.iter()
    }
}

/// SQL text plus the parameters its placeholders refer to
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub parameters: ParameterSet,
}

impl Statement {
    pub fn new(sql: impl Into<String>, parameters: ParameterSet) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }

    /// Rewrite `@Name` placeholders as PostgreSQL `$n` positions
    ///
    /// Returns the rewritten text and the parameters in position order. A name
    /// used twice maps to the same position. Placeholders inside quoted
    /// literals and identifiers are left alone; parameters the text never
    /// mentions are not bound.
    ///
    /// ```rust
    /// use acton_mapper::mapping::{DbType, SqlValue};
    /// use acton_mapper::sql::{ParameterSet, Statement};
    ///
    /// let mut parameters = ParameterSet::new();
    /// parameters.insert("Id", DbType::Integer, SqlValue::Integer(7)).unwrap();
    /// let statement = Statement::new("SELECT w.id AS \"Id\" FROM widget AS w WHERE w.id = @Id", parameters);
    ///
    /// let (sql, bound) = statement.to_positional().unwrap();
    /// assert_eq!(sql, "SELECT w.id AS \"Id\" FROM widget AS w WHERE w.id = $1");
    /// assert_eq!(bound.len(), 1);
    /// ```
    pub fn to_positional(&self) -> Result<(String, Vec<&Parameter>)> {
        let mut sql = String::with_capacity(self.sql.len());
        let mut bound: Vec<&Parameter> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut quote: Option<char> = None;

        let text = self.sql.as_str();
        let mut chars = text.char_indices().peekable();
        while let Some((index, c)) = chars.next() {
            if let Some(open) = quote {
                if c == open {
                    quote = None;
                }
                sql.push(c);
                continue;
            }
            match c {
                '\'' | '"' => {
                    quote = Some(c);
                    sql.push(c);
                }
                '@' if matches!(chars.peek(), Some((_, next)) if next.is_ascii_alphabetic() || *next == '_') =>
                {
                    let start = index + 1;
                    let mut end = start;
                    while let Some((i, next)) = chars.peek() {
                        if next.is_ascii_alphanumeric() || *next == '_' {
                            end = i + next.len_utf8();
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let name = &text[start..end];
                    let position = match positions.get(name) {
                        Some(position) => *position,
                        None => {
                            let parameter = self.parameters.get(name).ok_or_else(|| {
                                Error::configuration(format!(
                                    "statement references unbound parameter @{}",
                                    name
                                ))
                            })?;
                            bound.push(parameter);
                            positions.insert(name, bound.len());
                            bound.len()
                        }
                    };
                    sql.push('$');
                    sql.push_str(&position.to_string());
                }
                _ => sql.push(c),
            }
        }
        Ok((sql, bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameters(names: &[&str]) -> ParameterSet {
        let mut set = ParameterSet::new();
        for (i, name) in names.iter().enumerate() {
            set.insert(*name, DbType::Integer, SqlValue::Integer(i as i64))
                .unwrap();
        }
        set
    }

    #[test]
    fn test_duplicate_parameter_is_rejected() {
        let mut set = parameters(&["Id"]);
        assert!(matches!(
            set.insert("Id", DbType::Integer, SqlValue::Null),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_positions_follow_first_use() {
        let statement = Statement::new(
            "SELECT @B, @A, @B, @A_1",
            parameters(&["A", "B", "A_1", "Unused"]),
        );
        let (sql, bound) = statement.to_positional().unwrap();
        assert_eq!(sql, "SELECT $1, $2, $1, $3");
        let names: Vec<_> = bound.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["B", "A", "A_1"]);
    }

    #[test]
    fn test_quoted_text_is_not_rewritten() {
        let statement = Statement::new("SELECT '@Id', \"@Id\", @Id", parameters(&["Id"]));
        let (sql, _) = statement.to_positional().unwrap();
        assert_eq!(sql, "SELECT '@Id', \"@Id\", $1");
    }

    #[test]
    fn test_operators_are_not_placeholders() {
        let statement = Statement::new("SELECT tags @> @Tags", parameters(&["Tags"]));
        let (sql, bound) = statement.to_positional().unwrap();
        assert_eq!(sql, "SELECT tags @> $1");
        assert_eq!(bound.len(), 1);
    }

    #[test]
    fn test_unbound_placeholder_is_configuration_error() {
        let statement = Statement::new("SELECT @Missing", ParameterSet::new());
        assert!(matches!(
            statement.to_positional(),
            Err(Error::Configuration(msg)) if msg.contains("@Missing")
        ));
    }

    #[test]
    fn test_large_sets_bind_without_rescanning() {
        let count = 200_000;
        let mut set = ParameterSet::with_capacity(count);
        let mut sql = String::from("SELECT ");
        for i in 0..count {
            set.insert(format!("Name_{}", i), DbType::Integer, SqlValue::Integer(i as i64))
                .unwrap();
            sql.push_str(&format!("@Name_{}, ", i));
        }
        sql.push_str("@Name_0");

        let started = std::time::Instant::now();
        let statement = Statement::new(sql, set);
        let (_, bound) = statement.to_positional().unwrap();
        assert_eq!(bound.len(), count);
        assert_eq!(bound[count - 1].value, SqlValue::Integer(count as i64 - 1));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn test_extend_detects_collisions() {
        let mut set = parameters(&["Name"]);
        assert!(set.extend(parameters(&["Region"])).is_ok());
        assert_eq!(set.len(), 2);
        assert!(set.extend(parameters(&["Name"])).is_err());
    }
}
