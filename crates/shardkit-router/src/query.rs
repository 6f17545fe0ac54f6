//! Query builder
//!
//! A [`Query`] is a pending, composable description of a read. Nothing runs
//! until a terminal operation (`all`, `first`, `count`, `exists`, `delete`)
//! is handed an [`Executor`]; the executor decides where the statement goes.

use serde_json::Value;
use tracing::debug;

use crate::driver::QueryResult;
use crate::error::{DriverError, Result, ShardingError};
use crate::types::{Row, Rows};

/// Something that can run a statement
pub trait Executor {
    fn run(&self, sql: &str) -> Result<QueryResult>;

    /// Run a write, returning the number of affected rows
    fn execute(&self, sql: &str) -> Result<u64> {
        Ok(self.run(sql)?.rows_affected)
    }

    /// Run a read, returning its rows
    fn query(&self, sql: &str) -> Result<Rows> {
        Ok(self.run(sql)?.rows)
    }
}

/// A value that can still be composed before it is executed
pub trait Composable {
    /// The statement this value would execute
    fn to_sql(&self) -> String;
}

/// Pending read against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    filters: Vec<(String, Value)>,
    order_by: Option<(String, bool)>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Keep rows whose `column` equals `value`. Filters are ANDed.
    pub fn filter(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some((column.to_string(), false));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by = Some((column.to_string(), true));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    fn push_filters(&self, sql: &mut String) {
        if self.filters.is_empty() {
            return;
        }
        let conditions: Vec<String> = self
            .filters
            .iter()
            .map(|(column, value)| format!("{} = {}", column, value))
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    fn count_sql(&self) -> String {
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.table);
        self.push_filters(&mut sql);
        sql
    }

    fn delete_sql(&self) -> String {
        let mut sql = format!("DELETE FROM {}", self.table);
        self.push_filters(&mut sql);
        sql
    }

    pub fn all<E: Executor + ?Sized>(&self, executor: &E) -> Result<Rows> {
        let sql = self.to_sql();
        debug!(sql = %sql, "Executing query");
        executor.query(&sql)
    }

    pub fn first<E: Executor + ?Sized>(&self, executor: &E) -> Result<Option<Row>> {
        let mut rows = self.clone().limit(1).all(executor)?;
        Ok(rows.pop())
    }

    pub fn count<E: Executor + ?Sized>(&self, executor: &E) -> Result<u64> {
        let sql = self.count_sql();
        debug!(sql = %sql, "Executing count");
        let rows = executor.query(&sql)?;
        rows.first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                ShardingError::from(DriverError::Statement(format!(
                    "`{}` must return one row with an unsigned `count` column, got {:?}",
                    sql, rows
                )))
            })
    }

    pub fn exists<E: Executor + ?Sized>(&self, executor: &E) -> Result<bool> {
        Ok(self.count(executor)? > 0)
    }

    /// Delete every row matching the filters
    pub fn delete<E: Executor + ?Sized>(&self, executor: &E) -> Result<u64> {
        let sql = self.delete_sql();
        debug!(sql = %sql, "Executing delete");
        executor.execute(&sql)
    }

    /// Insert `row` (a JSON object) into this query's table
    pub fn insert<E: Executor + ?Sized>(&self, executor: &E, row: Value) -> Result<u64> {
        if !row.is_object() {
            return Err(ShardingError::WrongUsage(format!(
                "rows inserted into '{}' must be JSON objects",
                self.table
            )));
        }
        executor.execute(&format!("INSERT INTO {} {}", self.table, row))
    }
}

impl Composable for Query {
    fn to_sql(&self) -> String {
        let mut sql = format!("SELECT * FROM {}", self.table);
        self.push_filters(&mut sql);

        if let Some((column, descending)) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(column);
            sql.push_str(if *descending { " DESC" } else { " ASC" });
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        statements: Mutex<Vec<String>>,
        rows: Rows,
    }

    impl Executor for Recorder {
        fn run(&self, sql: &str) -> Result<QueryResult> {
            self.statements.lock().push(sql.to_string());
            Ok(QueryResult {
                rows: self.rows.clone(),
                rows_affected: 1,
            })
        }
    }

    #[test]
    fn test_build_select() {
        let query = Query::table("users")
            .filter("name", "mike")
            .filter("active", true)
            .order_by_desc("id")
            .limit(10)
            .offset(5);

        assert_eq!(
            query.to_sql(),
            r#"SELECT * FROM users WHERE name = "mike" AND active = true ORDER BY id DESC LIMIT 10 OFFSET 5"#
        );
    }

    #[test]
    fn test_terminal_operations_render_statements() {
        let recorder = Recorder {
            rows: vec![json!({"count": 3})],
            ..Default::default()
        };
        let query = Query::table("users").filter("id", 7);

        assert_eq!(query.count(&recorder).unwrap(), 3);
        assert!(query.exists(&recorder).unwrap());
        query.first(&recorder).unwrap();
        query.delete(&recorder).unwrap();
        query.insert(&recorder, json!({"id": 8})).unwrap();

        let statements = recorder.statements.lock().clone();
        assert_eq!(
            statements,
            vec![
                "SELECT COUNT(*) FROM users WHERE id = 7",
                "SELECT COUNT(*) FROM users WHERE id = 7",
                "SELECT * FROM users WHERE id = 7 LIMIT 1",
                "DELETE FROM users WHERE id = 7",
                r#"INSERT INTO users {"id":8}"#,
            ]
        );
    }

    #[test]
    fn test_count_rejects_unexpected_rows() {
        let renamed = Recorder {
            rows: vec![json!({"COUNT(*)": 3})],
            ..Default::default()
        };
        let query = Query::table("users");
        assert!(matches!(
            query.count(&renamed),
            Err(ShardingError::Driver(DriverError::Statement(_)))
        ));
        assert!(query.exists(&renamed).is_err());

        let empty = Recorder::default();
        assert!(matches!(
            query.count(&empty),
            Err(ShardingError::Driver(DriverError::Statement(_)))
        ));
    }

    #[test]
    fn test_insert_rejects_non_objects() {
        let recorder = Recorder::default();
        let result = Query::table("users").insert(&recorder, json!([1, 2]));
        assert!(matches!(result, Err(ShardingError::WrongUsage(_))));
        assert!(recorder.statements.lock().is_empty());
    }
}
