//! Read-only SQL guard.
//!
//! Statements are parsed with `sqlparser` in the target database's dialect.
//! Only a single query statement is accepted, and queries without a row
//! limit get `LIMIT max_rows` appended through the AST.

use sqlparser::ast::{Expr, LimitClause, Query, SetExpr, Statement, Value};
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SqlGuardError {
    #[error("Empty SQL statement")]
    Empty,

    #[error("Invalid SQL syntax: {0}")]
    Parse(String),

    #[error("Multiple statements are not allowed")]
    MultipleStatements,

    #[error("Only SELECT statements are allowed. Got: {0}")]
    NonSelect(String),
}

/// Parses `sql` and checks that it is one read-only query.
pub fn validate_sql(sql: &str, dialect: &dyn Dialect) -> Result<Box<Query>, SqlGuardError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() || trimmed.trim_matches(';').trim().is_empty() {
        return Err(SqlGuardError::Empty);
    }

    let mut statements = Parser::parse_sql(dialect, trimmed)
        .map_err(|err| SqlGuardError::Parse(err.to_string()))?;

    if statements.len() > 1 {
        return Err(SqlGuardError::MultipleStatements);
    }

    match statements.pop() {
        Some(Statement::Query(query)) => {
            check_query(&query)?;
            Ok(query)
        }
        Some(_) => Err(SqlGuardError::NonSelect(leading_keyword(trimmed))),
        None => Err(SqlGuardError::Empty),
    }
}

/// Validates `sql` and returns the text to execute.
///
/// A trailing semicolon is dropped. When the query has neither `LIMIT` nor
/// `FETCH` and the database understands `LIMIT`, one is added.
pub fn transform_sql(
    sql: &str,
    dialect: &dyn Dialect,
    max_rows: usize,
    supports_limit: bool,
) -> Result<String, SqlGuardError> {
    let mut query = validate_sql(sql, dialect)?;
    let stripped = strip_trailing_semicolons(sql);

    if !supports_limit || query.fetch.is_some() {
        return Ok(stripped.to_string());
    }

    let offset = match query.limit_clause.take() {
        None => None,
        Some(LimitClause::LimitOffset {
            limit: None,
            offset,
            ..
        }) => offset,
        Some(_) => return Ok(stripped.to_string()),
    };

    query.limit_clause = Some(LimitClause::LimitOffset {
        limit: Some(Expr::value(Value::Number(max_rows.to_string(), false))),
        offset,
        limit_by: Vec::new(),
    });

    Ok(Statement::Query(query).to_string())
}

/// Looks up a `sqlparser` dialect by database type name.
pub fn dialect_for(db_type: &str) -> Option<Box<dyn Dialect>> {
    match db_type.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => Some(Box::new(PostgreSqlDialect {})),
        "mysql" => Some(Box::new(MySqlDialect {})),
        "sqlite" => Some(Box::new(SQLiteDialect {})),
        _ => None,
    }
}

fn check_query(query: &Query) -> Result<(), SqlGuardError> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_query(&cte.query)?;
        }
    }
    check_body(&query.body)
}

fn check_body(body: &SetExpr) -> Result<(), SqlGuardError> {
    match body {
        SetExpr::Select(select) => {
            if select.into.is_some() {
                return Err(SqlGuardError::NonSelect("SELECT INTO".to_string()));
            }
            Ok(())
        }
        SetExpr::Query(query) => check_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            check_body(left)?;
            check_body(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => Ok(()),
        other => Err(SqlGuardError::NonSelect(leading_keyword(&other.to_string()))),
    }
}

fn leading_keyword(sql: &str) -> String {
    sql.split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .find(|word| !word.is_empty())
        .unwrap_or_default()
        .to_uppercase()
}

fn strip_trailing_semicolons(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}
