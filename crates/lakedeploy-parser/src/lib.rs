//! Athena DDL parser
//!
//! Parses rendered `CREATE EXTERNAL TABLE` and `CREATE [OR REPLACE] VIEW`
//! scripts into the desired table definition used for drift detection.

use lakedeploy_core::backend::DdlParser;
use lakedeploy_core::types::{Column, DesiredTable, TableKind};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct AthenaGrammar;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid DDL: {0}")]
    Syntax(Box<pest::error::Error<Rule>>),

    #[error("invalid DDL: {0}")]
    Structure(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Parse one DDL statement
pub fn parse_ddl(sql: &str) -> Result<DesiredTable> {
    let ddl = AthenaGrammar::parse(Rule::ddl, sql.trim())
        .map_err(|e| ParseError::Syntax(Box::new(e)))?
        .next()
        .ok_or_else(|| ParseError::Structure("empty statement".to_string()))?;

    for pair in ddl.into_inner() {
        match pair.as_rule() {
            Rule::create_table => return parse_create_table(pair),
            Rule::create_view => return parse_create_view(pair),
            _ => {}
        }
    }

    Err(ParseError::Structure(
        "expected CREATE TABLE or CREATE VIEW".to_string(),
    ))
}

/// [`DdlParser`] backed by the pest grammar
#[derive(Debug, Clone, Copy, Default)]
pub struct AthenaDdlParser;

impl DdlParser for AthenaDdlParser {
    fn parse(&self, ddl: &str) -> anyhow::Result<DesiredTable> {
        Ok(parse_ddl(ddl)?)
    }
}

fn parse_create_table(pair: Pair<Rule>) -> Result<DesiredTable> {
    let mut name = None;
    let mut columns = Vec::new();
    let mut partition_keys = Vec::new();
    let mut location = None;
    let mut stored_as = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::qualified_name => name = Some(parse_qualified_name(inner)),
            Rule::column_list => columns = parse_columns(inner),
            Rule::partitioned_by => {
                if let Some(list) = inner.into_inner().next() {
                    partition_keys = parse_columns(list);
                }
            }
            Rule::location => location = first_string(inner),
            Rule::stored_as => stored_as = parse_stored_as(inner),
            _ => {}
        }
    }

    let (database, name) =
        name.ok_or_else(|| ParseError::Structure("missing table name".to_string()))?;

    let mut seen = std::collections::HashSet::new();
    for column in columns.iter().chain(&partition_keys) {
        if !seen.insert(column.normalized_name()) {
            return Err(ParseError::Structure(format!(
                "column '{}' is declared more than once",
                column.name
            )));
        }
    }

    Ok(DesiredTable {
        database,
        name,
        kind: TableKind::External,
        columns,
        partition_keys,
        location,
        stored_as,
    })
}

fn parse_create_view(pair: Pair<Rule>) -> Result<DesiredTable> {
    let mut name = None;
    let mut has_query = false;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::qualified_name => name = Some(parse_qualified_name(inner)),
            Rule::view_query => has_query = !inner.as_str().trim().is_empty(),
            _ => {}
        }
    }

    let (database, name) =
        name.ok_or_else(|| ParseError::Structure("missing view name".to_string()))?;
    if !has_query {
        return Err(ParseError::Structure(format!("view '{}' has no query", name)));
    }

    Ok(DesiredTable {
        database,
        name,
        kind: TableKind::View,
        columns: Vec::new(),
        partition_keys: Vec::new(),
        location: None,
        stored_as: None,
    })
}

/// `db.table` or `table`
fn parse_qualified_name(pair: Pair<Rule>) -> (Option<String>, String) {
    let mut parts: Vec<String> = pair.into_inner().map(|p| unquote(p.as_str())).collect();
    let name = parts.pop().unwrap_or_default();
    (parts.pop(), name)
}

fn parse_columns(pair: Pair<Rule>) -> Vec<Column> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::column)
        .filter_map(|column| {
            let mut inner = column.into_inner();
            let name = inner.next()?;
            let data_type = inner.next()?;
            Some(Column::new(unquote(name.as_str()), canonical_type(data_type.as_str())))
        })
        .collect()
}

fn parse_stored_as(pair: Pair<Rule>) -> Option<String> {
    let format = pair.into_inner().next()?;
    match format.as_rule() {
        Rule::file_format => Some(format.as_str().to_lowercase()),
        // INPUTFORMAT class name
        Rule::input_output_format => first_string(format),
        _ => None,
    }
}

fn first_string(pair: Pair<Rule>) -> Option<String> {
    pair.into_inner()
        .find(|p| p.as_rule() == Rule::string_literal)
        .and_then(|literal| literal.into_inner().next())
        .map(|body| unescape(body.as_str()))
}

fn unquote(identifier: &str) -> String {
    identifier.trim_matches('`').to_string()
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('\'' | '"' | '\\')) => out.push(next),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Lowercase, whitespace-free rendering, e.g. `array<struct<a:int>>`
fn canonical_type(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
