//! Placeholder tokens and token substitution

use std::fmt;

/// Placeholder token embedded in SQL skeletons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    TableName,
    TableAlias,
    Columns,
    Join,
    Where,
    OrderBy,
    Limit,
    Offset,
    Values,
    ParameterNames,
    PrimaryKey,
    UniqueKeys,
    UniqueKeyFilters,
    ValuesToUpdate,
}

impl Token {
    pub const ALL: [Token; 14] = [
        Token::TableName,
        Token::TableAlias,
        Token::Columns,
        Token::Join,
        Token::Where,
        Token::OrderBy,
        Token::Limit,
        Token::Offset,
        Token::Values,
        Token::ParameterNames,
        Token::PrimaryKey,
        Token::UniqueKeys,
        Token::UniqueKeyFilters,
        Token::ValuesToUpdate,
    ];

    /// Token text as it appears in a skeleton
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TableName => "#TABLE_NAME",
            Self::TableAlias => "#TABLE_ALIAS",
            Self::Columns => "#COLUMNS",
            Self::Join => "#JOIN",
            Self::Where => "#WHERE",
            Self::OrderBy => "#ORDERBY",
            Self::Limit => "#LIMIT",
            Self::Offset => "#OFFSET",
            Self::Values => "#VALUES",
            Self::ParameterNames => "#PARAMETER_NAMES",
            Self::PrimaryKey => "#PRIMARY_KEY",
            Self::UniqueKeys => "#UNIQUE_KEYS",
            Self::UniqueKeyFilters => "#UNIQUE_KEY_FILTERS",
            Self::ValuesToUpdate => "#VALUES_TO_UPDATE",
        }
    }

    fn from_name(name: &str) -> Option<Token> {
        Self::ALL.into_iter().find(|token| &token.as_str()[1..] == name)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL text that may still contain placeholder tokens
///
/// Substitution matches whole tokens only: filling `#VALUES` leaves
/// `#VALUES_TO_UPDATE` untouched.
///
/// ```rust
/// use acton_mapper::sql::{SqlTemplate, Token};
///
/// let sql = SqlTemplate::new("SELECT 1\nFROM #TABLE_NAME\n#WHERE\n#LIMIT")
///     .fill(Token::TableName, "widget")
///     .fill(Token::Limit, "LIMIT 5")
///     .finish();
/// assert_eq!(sql, "SELECT 1\nFROM widget\nLIMIT 5");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTemplate {
    text: String,
}

impl SqlTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Replace every occurrence of `token` with `value`
    #[must_use]
    pub fn fill(self, token: Token, value: &str) -> Self {
        Self {
            text: substitute(&self.text, |found| found == token, value),
        }
    }

    /// Fill `token` when a value is present, otherwise remove it
    #[must_use]
    pub fn fill_opt(self, token: Token, value: Option<&str>) -> Self {
        self.fill(token, value.unwrap_or_default())
    }

    #[must_use]
    pub fn remove(self, token: Token) -> Self {
        self.fill(token, "")
    }

    pub fn contains(&self, token: Token) -> bool {
        let mut found = false;
        substitute(
            &self.text,
            |candidate| {
                found |= candidate == token;
                false
            },
            "",
        );
        found
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Text with unfilled tokens kept and lines emptied by removals dropped
    pub fn render(self) -> String {
        tidy(&self.text)
    }

    /// Text with every remaining token removed
    pub fn finish(self) -> String {
        tidy(&substitute(&self.text, |_| true, ""))
    }
}

impl fmt::Display for SqlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn substitute(text: &str, mut matches: impl FnMut(Token) -> bool, value: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('#') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let len = after
            .find(|c: char| !(c.is_ascii_uppercase() || c == '_'))
            .unwrap_or(after.len());
        match Token::from_name(&after[..len]) {
            Some(token) if matches(token) => out.push_str(value),
            _ => out.push_str(&rest[pos..pos + 1 + len]),
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    out
}

fn tidy(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
