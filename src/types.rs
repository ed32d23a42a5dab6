//! SQL type categories and literal synthesis
//!
//! Column types are reduced to JDBC-style categories. The category decides
//! how a sampled value is written into a rewritten statement (quoted or not)
//! and which zero value stands in when no sample exists.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Type category of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Bit,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Float,
    Double,
    Numeric,
    Decimal,
    Char,
    Varchar,
    LongVarchar,
    Date,
    Time,
    TimeWithTimezone,
    Timestamp,
    TimestampWithTimezone,
    Binary,
    VarBinary,
    LongVarBinary,
    Other,
}

impl SqlType {
    /// Map a PostgreSQL type name (`information_schema.columns.data_type` or
    /// `udt_name`) to its category
    pub fn from_postgres(pg_type: &str) -> Self {
        match pg_type.trim().to_lowercase().as_str() {
            "bit" | "bit varying" | "varbit" => SqlType::Bit,
            "boolean" | "bool" => SqlType::Boolean,
            "smallint" | "int2" | "smallserial" => SqlType::SmallInt,
            "integer" | "int" | "int4" | "serial" => SqlType::Integer,
            "bigint" | "int8" | "bigserial" | "oid" => SqlType::BigInt,
            "real" | "float4" => SqlType::Real,
            "double precision" | "float8" => SqlType::Double,
            "numeric" | "decimal" => SqlType::Numeric,
            "character" | "char" | "bpchar" => SqlType::Char,
            "character varying" | "varchar" | "name" | "citext" => SqlType::Varchar,
            "text" => SqlType::LongVarchar,
            "date" => SqlType::Date,
            "time" | "time without time zone" => SqlType::Time,
            "timetz" | "time with time zone" => SqlType::TimeWithTimezone,
            "timestamp" | "timestamp without time zone" => SqlType::Timestamp,
            "timestamptz" | "timestamp with time zone" => SqlType::TimestampWithTimezone,
            "bytea" => SqlType::Binary,
            _ => SqlType::Other,
        }
    }

    /// `java.sql.Types` code, as consumed by the replay tool
    pub fn jdbc_code(&self) -> i32 {
        match self {
            SqlType::Bit => -7,
            SqlType::Boolean => 16,
            SqlType::TinyInt => -6,
            SqlType::SmallInt => 5,
            SqlType::Integer => 4,
            SqlType::BigInt => -5,
            SqlType::Real => 7,
            SqlType::Float => 6,
            SqlType::Double => 8,
            SqlType::Numeric => 2,
            SqlType::Decimal => 3,
            SqlType::Char => 1,
            SqlType::Varchar => 12,
            SqlType::LongVarchar => -1,
            SqlType::Date => 91,
            SqlType::Time => 92,
            SqlType::TimeWithTimezone => 2013,
            SqlType::Timestamp => 93,
            SqlType::TimestampWithTimezone => 2014,
            SqlType::Binary => -2,
            SqlType::VarBinary => -3,
            SqlType::LongVarBinary => -4,
            SqlType::Other => 1111,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SqlType::Bit => "BIT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::Float => "FLOAT",
            SqlType::Double => "DOUBLE",
            SqlType::Numeric => "NUMERIC",
            SqlType::Decimal => "DECIMAL",
            SqlType::Char => "CHAR",
            SqlType::Varchar => "VARCHAR",
            SqlType::LongVarchar => "LONGVARCHAR",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::TimeWithTimezone => "TIME_WITH_TIMEZONE",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampWithTimezone => "TIMESTAMP_WITH_TIMEZONE",
            SqlType::Binary => "BINARY",
            SqlType::VarBinary => "VARBINARY",
            SqlType::LongVarBinary => "LONGVARBINARY",
            SqlType::Other => "OTHER",
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, SqlType::Boolean)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::TinyInt
                | SqlType::SmallInt
                | SqlType::Integer
                | SqlType::BigInt
                | SqlType::Real
                | SqlType::Float
                | SqlType::Double
                | SqlType::Numeric
                | SqlType::Decimal
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            SqlType::Date
                | SqlType::Time
                | SqlType::TimeWithTimezone
                | SqlType::Timestamp
                | SqlType::TimestampWithTimezone
        )
    }

    /// Textual and temporal values need single quotes; numeric and boolean
    /// values do not. Binary values are written as quoted `\x` literals,
    /// bit strings as `B'...'`.
    pub fn needs_quotes(&self) -> bool {
        !(self.is_numeric() || self.is_boolean())
    }

    /// Zero value for the category, used when a table has no sample
    pub fn default_value(&self) -> String {
        self.default_value_at(Local::now().naive_local())
    }

    pub(crate) fn default_value_at(&self, now: NaiveDateTime) -> String {
        match self {
            t if t.is_binary() => "\\x".to_string(),
            t if t.is_numeric() => "0".to_string(),
            t if t.is_boolean() => "false".to_string(),
            SqlType::Bit => "0".to_string(),
            SqlType::Char => " ".to_string(),
            SqlType::Date => now.format("%Y-%m-%d").to_string(),
            SqlType::Time | SqlType::TimeWithTimezone => now.format("%H:%M:%S").to_string(),
            SqlType::Timestamp | SqlType::TimestampWithTimezone => {
                now.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
            }
            _ => String::new(),
        }
    }
}

/// A literal ready to be spliced into a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlLiteral {
    pub sql_type: SqlType,
    /// Unquoted textual form
    pub raw: String,
}

impl SqlLiteral {
    /// Build a literal from a sampled value, falling back to the type's
    /// zero value when the sample is missing or NULL
    pub fn synthesize(sql_type: SqlType, sample: Option<&str>) -> Self {
        let raw = match sample {
            Some(value) => normalize_sample(sql_type, value),
            None => sql_type.default_value(),
        };
        Self { sql_type, raw }
    }

    /// Row-count literal used for forced `LIMIT 1`
    pub fn row_count(count: u64) -> Self {
        Self {
            sql_type: SqlType::Integer,
            raw: count.to_string(),
        }
    }

    /// Text as written into SQL
    pub fn to_sql(&self) -> String {
        if self.sql_type == SqlType::Bit {
            format!("B'{}'", self.raw)
        } else if self.sql_type.needs_quotes() {
            format!("'{}'", self.raw.replace('\'', "''"))
        } else {
            self.raw.clone()
        }
    }
}

/// PostgreSQL renders booleans as `t`/`f` in text form
fn normalize_sample(sql_type: SqlType, value: &str) -> String {
    if sql_type.is_boolean() {
        match value {
            "t" | "1" | "true" => "true".to_string(),
            "f" | "0" | "false" => "false".to_string(),
            other => other.to_string(),
        }
    } else {
        value.to_string()
    }
}
