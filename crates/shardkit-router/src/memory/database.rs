//! In-memory table store
//!
//! Understands the statement forms rendered by [`crate::query::Query`]:
//!
//! ```text
//! INSERT INTO <table> <json object>
//! SELECT * FROM <table> [WHERE c = <json> [AND ...]] [ORDER BY c [ASC|DESC]] [LIMIT n] [OFFSET n]
//! SELECT COUNT(*) FROM <table> [WHERE ...]
//! DELETE FROM <table> [WHERE ...]
//! ```
//!
//! Literal values are JSON. Clause keywords inside string literals are not
//! supported.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::driver::QueryResult;
use crate::error::DriverError;

const CLAUSES: [&str; 4] = [" WHERE ", " ORDER BY ", " LIMIT ", " OFFSET "];

#[derive(Debug, Clone, PartialEq)]
enum Statement {
    Insert {
        table: String,
        row: Map<String, Value>,
    },
    Select {
        table: String,
        count: bool,
        filters: Vec<(String, Value)>,
        order: Option<(String, bool)>,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    Delete {
        table: String,
        filters: Vec<(String, Value)>,
    },
}

/// One named in-memory database
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    name: String,
    tables: RwLock<BTreeMap<String, Vec<Map<String, Value>>>>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of rows currently stored in `table`
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map(Vec::len).unwrap_or(0)
    }

    pub fn execute(&self, sql: &str) -> Result<QueryResult, DriverError> {
        match parse(sql)? {
            Statement::Insert { table, row } => {
                self.tables.write().entry(table).or_default().push(row);
                Ok(QueryResult::affected(1))
            }
            Statement::Delete { table, filters } => {
                let mut tables = self.tables.write();
                let Some(rows) = tables.get_mut(&table) else {
                    return Ok(QueryResult::affected(0));
                };
                let before = rows.len();
                rows.retain(|row| !matches_all(row, &filters));
                Ok(QueryResult::affected((before - rows.len()) as u64))
            }
            Statement::Select {
                table,
                count,
                filters,
                order,
                limit,
                offset,
            } => {
                let tables = self.tables.read();
                let mut rows: Vec<&Map<String, Value>> = tables
                    .get(&table)
                    .map(|rows| rows.iter().filter(|row| matches_all(row, &filters)).collect())
                    .unwrap_or_default();

                if count {
                    let mut result = Map::new();
                    result.insert("count".to_string(), Value::from(rows.len() as u64));
                    return Ok(QueryResult::rows(vec![Value::Object(result)]));
                }

                if let Some((column, descending)) = &order {
                    rows.sort_by(|a, b| {
                        let ordering = compare(a.get(column), b.get(column));
                        if *descending {
                            ordering.reverse()
                        } else {
                            ordering
                        }
                    });
                }

                let rows = rows
                    .into_iter()
                    .skip(offset.unwrap_or(0))
                    .take(limit.unwrap_or(usize::MAX))
                    .map(|row| Value::Object(row.clone()))
                    .collect();
                Ok(QueryResult::rows(rows))
            }
        }
    }
}

fn matches_all(row: &Map<String, Value>, filters: &[(String, Value)]) -> bool {
    filters
        .iter()
        .all(|(column, expected)| row.get(column).unwrap_or(&Value::Null) == expected)
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    }
}

fn syntax(sql: &str, reason: &str) -> DriverError {
    DriverError::Statement(format!("{}: {}", reason, sql))
}

fn parse(sql: &str) -> Result<Statement, DriverError> {
    let statement = sql.trim().trim_end_matches(';');

    if let Some(rest) = statement.strip_prefix("INSERT INTO ") {
        let (table, row) = rest
            .split_once(' ')
            .ok_or_else(|| syntax(sql, "missing row"))?;
        let row = match serde_json::from_str(row.trim()) {
            Ok(Value::Object(row)) => row,
            _ => return Err(syntax(sql, "row must be a JSON object")),
        };
        return Ok(Statement::Insert {
            table: table.to_string(),
            row,
        });
    }

    if let Some(rest) = statement.strip_prefix("DELETE FROM ") {
        let (table, clauses) = split_clauses(rest);
        return Ok(Statement::Delete {
            table,
            filters: parse_filters(sql, clauses.get(" WHERE ").copied())?,
        });
    }

    if let Some(rest) = statement.strip_prefix("SELECT ") {
        let (count, rest) = if let Some(rest) = rest.strip_prefix("COUNT(*) FROM ") {
            (true, rest)
        } else if let Some(rest) = rest.strip_prefix("* FROM ") {
            (false, rest)
        } else {
            return Err(syntax(sql, "only SELECT * and SELECT COUNT(*) are supported"));
        };

        let (table, clauses) = split_clauses(rest);
        let order = match clauses.get(" ORDER BY ") {
            Some(order) => {
                let mut parts = order.split_whitespace();
                let column = parts
                    .next()
                    .ok_or_else(|| syntax(sql, "ORDER BY without column"))?;
                let descending = match parts.next() {
                    None | Some("ASC") => false,
                    Some("DESC") => true,
                    Some(_) => return Err(syntax(sql, "bad ORDER BY direction")),
                };
                Some((column.to_string(), descending))
            }
            None => None,
        };

        return Ok(Statement::Select {
            table,
            count,
            filters: parse_filters(sql, clauses.get(" WHERE ").copied())?,
            order,
            limit: parse_number(sql, clauses.get(" LIMIT ").copied())?,
            offset: parse_number(sql, clauses.get(" OFFSET ").copied())?,
        });
    }

    Err(syntax(sql, "unsupported statement"))
}

/// Split `table [CLAUSE body]...` into the table and each clause body
fn split_clauses(rest: &str) -> (String, BTreeMap<&'static str, &str>) {
    let mut marks: Vec<(usize, &'static str)> = CLAUSES
        .iter()
        .filter_map(|keyword| rest.find(keyword).map(|at| (at, *keyword)))
        .collect();
    marks.sort();

    let table_end = marks.first().map(|(at, _)| *at).unwrap_or(rest.len());
    let mut clauses = BTreeMap::new();
    for (i, (at, keyword)) in marks.iter().enumerate() {
        let start = at + keyword.len();
        let end = marks.get(i + 1).map(|(next, _)| *next).unwrap_or(rest.len());
        clauses.insert(*keyword, rest[start..end].trim());
    }
    (rest[..table_end].trim().to_string(), clauses)
}

fn parse_filters(sql: &str, clause: Option<&str>) -> Result<Vec<(String, Value)>, DriverError> {
    let Some(clause) = clause else {
        return Ok(Vec::new());
    };
    clause
        .split(" AND ")
        .map(|condition| {
            let (column, literal) = condition
                .split_once(" = ")
                .ok_or_else(|| syntax(sql, "only `column = value` conditions are supported"))?;
            let value = serde_json::from_str(literal.trim())
                .map_err(|_| syntax(sql, "condition value must be a JSON literal"))?;
            Ok((column.trim().to_string(), value))
        })
        .collect()
}

fn parse_number(sql: &str, clause: Option<&str>) -> Result<Option<usize>, DriverError> {
    clause
        .map(|raw| raw.parse().map_err(|_| syntax(sql, "expected a number")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> MemoryDatabase {
        let db = MemoryDatabase::new("test");
        for (id, name) in [(1, "mike"), (2, "anna"), (3, "zoe")] {
            db.execute(&format!(
                r#"INSERT INTO users {{"id":{},"name":"{}"}}"#,
                id, name
            ))
            .unwrap();
        }
        db
    }

    #[test]
    fn test_select_with_clauses() {
        let db = seeded();
        let result = db
            .execute("SELECT * FROM users ORDER BY name DESC LIMIT 2 OFFSET 1")
            .unwrap();
        let names: Vec<_> = result.rows.iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![json!("mike"), json!("anna")]);

        let result = db.execute(r#"SELECT * FROM users WHERE name = "zoe""#).unwrap();
        assert_eq!(result.rows, vec![json!({"id": 3, "name": "zoe"})]);
    }

    #[test]
    fn test_count_and_delete() {
        let db = seeded();
        let count = db.execute("SELECT COUNT(*) FROM users WHERE id = 2").unwrap();
        assert_eq!(count.rows, vec![json!({"count": 1})]);

        let deleted = db.execute("DELETE FROM users WHERE id = 2").unwrap();
        assert_eq!(deleted.rows_affected, 1);
        assert_eq!(db.row_count("users"), 2);
    }

    #[test]
    fn test_unknown_table_is_empty() {
        let db = MemoryDatabase::new("empty");
        assert!(db.execute("SELECT * FROM ghosts").unwrap().rows.is_empty());
    }

    #[test]
    fn test_rejects_unsupported_statements() {
        let db = MemoryDatabase::new("strict");
        for sql in [
            "UPDATE users SET name = 1",
            "SELECT id FROM users",
            "INSERT INTO users [1]",
            "SELECT * FROM users WHERE id > 1",
            "SELECT * FROM users LIMIT many",
        ] {
            assert!(
                matches!(db.execute(sql), Err(DriverError::Statement(_))),
                "{} should fail",
                sql
            );
        }
    }
}
