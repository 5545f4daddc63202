//! Source dialect selection and statement parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::dialect::{
    AnsiDialect, BigQueryDialect, Dialect, DuckDbDialect, GenericDialect, HiveDialect,
    MySqlDialect, PostgreSqlDialect, SQLiteDialect, SnowflakeDialect,
};
use sqlparser::parser::Parser;

use crate::SchemaError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Generic,
    Ansi,
    Postgres,
    DuckDb,
    Sqlite,
    MySql,
    Snowflake,
    BigQuery,
    Hive,
}

impl SqlDialect {
    pub fn parser_dialect(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Generic => Box::new(GenericDialect {}),
            SqlDialect::Ansi => Box::new(AnsiDialect {}),
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
            SqlDialect::DuckDb => Box::new(DuckDbDialect {}),
            SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
            SqlDialect::MySql => Box::new(MySqlDialect {}),
            SqlDialect::Snowflake => Box::new(SnowflakeDialect {}),
            SqlDialect::BigQuery => Box::new(BigQueryDialect {}),
            SqlDialect::Hive => Box::new(HiveDialect {}),
        }
    }

    /// Parse the first statement of `sql`.
    ///
    /// Files sometimes carry trailing statements the parser cannot handle;
    /// when the whole text fails we retry chunk by chunk and keep the first
    /// chunk that parses to something.
    pub fn parse_first_statement(&self, sql: &str) -> Result<Statement, SchemaError> {
        let dialect = self.parser_dialect();
        match Parser::parse_sql(dialect.as_ref(), sql) {
            Ok(statements) => statements.into_iter().next().ok_or(SchemaError::EmptyInput),
            Err(whole) => {
                for chunk in sql.split(';') {
                    if strip_sql_comments(chunk).trim().is_empty() {
                        continue;
                    }
                    return match Parser::parse_sql(dialect.as_ref(), chunk) {
                        Ok(statements) => {
                            statements.into_iter().next().ok_or(SchemaError::EmptyInput)
                        }
                        Err(_) => Err(SchemaError::Parse(whole.to_string())),
                    };
                }
                Err(SchemaError::Parse(whole.to_string()))
            }
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlDialect::Generic => "generic",
            SqlDialect::Ansi => "ansi",
            SqlDialect::Postgres => "postgres",
            SqlDialect::DuckDb => "duckdb",
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::MySql => "mysql",
            SqlDialect::Snowflake => "snowflake",
            SqlDialect::BigQuery => "bigquery",
            SqlDialect::Hive => "hive",
        };
        f.write_str(name)
    }
}

impl FromStr for SqlDialect {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" | "" => Ok(SqlDialect::Generic),
            "ansi" => Ok(SqlDialect::Ansi),
            "postgres" | "postgresql" | "pg" => Ok(SqlDialect::Postgres),
            "duckdb" | "duck" => Ok(SqlDialect::DuckDb),
            "sqlite" => Ok(SqlDialect::Sqlite),
            "mysql" => Ok(SqlDialect::MySql),
            "snowflake" => Ok(SqlDialect::Snowflake),
            "bigquery" => Ok(SqlDialect::BigQuery),
            "hive" | "spark" => Ok(SqlDialect::Hive),
            other => Err(SchemaError::UnknownDialect(other.to_string())),
        }
    }
}

fn strip_sql_comments(chunk: &str) -> String {
    let mut out = String::with_capacity(chunk.len());
    let mut in_block = false;
    for line in chunk.lines() {
        let mut rest = line;
        loop {
            if in_block {
                match rest.find("*/") {
                    Some(end) => {
                        rest = &rest[end + 2..];
                        in_block = false;
                    }
                    None => break,
                }
            } else if let Some(start) = rest.find("/*") {
                out.push_str(&rest[..start]);
                rest = &rest[start + 2..];
                in_block = true;
            } else {
                let code = rest.split("--").next().unwrap_or("");
                out.push_str(code);
                break;
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_statement_wins() -> anyhow::Result<()> {
        let stmt = SqlDialect::Generic.parse_first_statement(
            "-- leading comment\nSELECT 1 AS a; SELECT 2 AS b;",
        )?;
        assert_eq!(stmt.to_string(), "SELECT 1 AS a");
        Ok(())
    }

    #[test]
    fn falls_back_to_first_parsable_chunk() -> anyhow::Result<()> {
        let stmt = SqlDialect::Generic
            .parse_first_statement("/* header */ ;\nSELECT x FROM t; THIS IS NOT SQL;")?;
        assert_eq!(stmt.to_string(), "SELECT x FROM t");
        Ok(())
    }

    #[test]
    fn dialect_names_round_trip() {
        for d in [SqlDialect::DuckDb, SqlDialect::Postgres, SqlDialect::Sqlite] {
            assert_eq!(d.to_string().parse::<SqlDialect>().ok(), Some(d));
        }
        assert!("cobol".parse::<SqlDialect>().is_err());
    }
}
