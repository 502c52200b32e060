//! Row-to-entity mapping.
//!
//! An [`Entity`] describes its writable attributes once through
//! [`MapperBuilder`]; the resulting [`EntityMapper`] is cached per type for
//! the life of the process and matches result columns to attributes by name,
//! ignoring ASCII case.

use crate::backend::QueryRow;
use crate::error::{QueryError, Result};
use crate::value::SqlValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use heck::ToSnakeCase;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// A record type backed by one table.
pub trait Entity: Default + Send + Sync + 'static {
    /// Rust type name the table name is derived from
    const TYPE_NAME: &'static str;

    /// `BlogPost` → `blog_posts`
    fn table_name() -> String {
        table_name_for(Self::TYPE_NAME)
    }

    fn identity_column() -> &'static str {
        "id"
    }

    /// Value of the identity attribute
    fn identity(&self) -> SqlValue;

    /// Register writable attributes
    fn describe(mapper: &mut MapperBuilder<Self>);
}

/// Snake-case and pluralise a type name.
pub fn table_name_for(type_name: &str) -> String {
    let snake = type_name.to_snake_case();
    let consonant_y = snake.len() > 1
        && snake.ends_with('y')
        && !snake[..snake.len() - 1].ends_with(['a', 'e', 'i', 'o', 'u']);

    if consonant_y {
        format!("{}ies", &snake[..snake.len() - 1])
    } else if snake.ends_with(['s', 'x', 'z']) || snake.ends_with("ch") || snake.ends_with("sh") {
        format!("{}es", snake)
    } else {
        format!("{}s", snake)
    }
}

/// Conversion from a raw result cell.
pub trait FromSqlValue: Sized {
    /// Target type label used in conversion errors
    const TARGET: &'static str;

    /// `None` when the value cannot convert
    fn from_sql_value(value: &SqlValue) -> Option<Self>;

    /// Value for a NULL cell; non-nullable targets fail
    fn from_null() -> Option<Self> {
        None
    }
}

/// Convert `value`, naming `column` in the error.
pub fn convert<T: FromSqlValue>(column: &str, value: &SqlValue) -> Result<T> {
    let converted = if value.is_null() {
        T::from_null()
    } else {
        T::from_sql_value(value)
    };
    converted.ok_or_else(|| QueryError::conversion(column, value, T::TARGET))
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    const TARGET: &'static str = T::TARGET;

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        T::from_sql_value(value).map(Some)
    }

    fn from_null() -> Option<Self> {
        Some(None)
    }
}

impl FromSqlValue for SqlValue {
    const TARGET: &'static str = "value";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        Some(value.clone())
    }

    fn from_null() -> Option<Self> {
        Some(SqlValue::Null)
    }
}

// Explicit converters: temporal, boolean, decimal and identifier targets.

impl FromSqlValue for NaiveDateTime {
    const TARGET: &'static str = "timestamp";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Timestamp(ts) => Some(*ts),
            SqlValue::TimestampTz(ts) => Some(ts.naive_utc()),
            SqlValue::Text(s) => parse_timestamp(s),
            SqlValue::Int(secs) => DateTime::from_timestamp(*secs, 0).map(|ts| ts.naive_utc()),
            _ => None,
        }
    }
}

impl FromSqlValue for DateTime<Utc> {
    const TARGET: &'static str = "timestamptz";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::TimestampTz(ts) => Some(*ts),
            SqlValue::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|ts| ts.with_timezone(&Utc))
                .ok()
                .or_else(|| parse_timestamp(s).map(|ts| ts.and_utc())),
            other => NaiveDateTime::from_sql_value(other).map(|ts| ts.and_utc()),
        }
    }
}

impl FromSqlValue for NaiveDate {
    const TARGET: &'static str = "date";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()
                .or_else(|| parse_timestamp(s).map(|ts| ts.date())),
            other => NaiveDateTime::from_sql_value(other).map(|ts| ts.date()),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    let s = s.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(|d| d.and_time(chrono::NaiveTime::MIN)))
}

impl FromSqlValue for bool {
    const TARGET: &'static str = "bool";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Int(i) => Some(*i != 0),
            SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "t" | "yes" => Some(true),
                "0" | "false" | "f" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl FromSqlValue for Decimal {
    const TARGET: &'static str = "decimal";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Decimal(d) => Some(*d),
            SqlValue::Int(i) => Some(Decimal::from(*i)),
            SqlValue::Float(f) => Decimal::from_str(&f.to_string()).ok(),
            SqlValue::Text(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }
}

impl FromSqlValue for Uuid {
    const TARGET: &'static str = "uuid";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Uuid(u) => Some(*u),
            SqlValue::Text(s) => Uuid::parse_str(s.trim()).ok(),
            SqlValue::Bytes(b) => Uuid::from_slice(b).ok(),
            _ => None,
        }
    }
}

// Generic conversions.

macro_rules! impl_from_sql_int {
    ($($ty:ty),*) => {
        $(
            impl FromSqlValue for $ty {
                const TARGET: &'static str = stringify!($ty);

                fn from_sql_value(value: &SqlValue) -> Option<Self> {
                    match value {
                        SqlValue::Int(i) => <$ty>::try_from(*i).ok(),
                        SqlValue::Bool(b) => Some(<$ty>::from(*b)),
                        SqlValue::Float(f) if f.fract() == 0.0 => <$ty>::try_from(*f as i64).ok(),
                        SqlValue::Decimal(d) if d.fract().is_zero() => {
                            d.to_string().parse::<i64>().ok().and_then(|i| <$ty>::try_from(i).ok())
                        }
                        SqlValue::Text(s) => s.trim().parse().ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_from_sql_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

macro_rules! impl_from_sql_float {
    ($($ty:ty),*) => {
        $(
            impl FromSqlValue for $ty {
                const TARGET: &'static str = stringify!($ty);

                fn from_sql_value(value: &SqlValue) -> Option<Self> {
                    match value {
                        SqlValue::Float(f) => Some(*f as $ty),
                        SqlValue::Int(i) => Some(*i as $ty),
                        SqlValue::Decimal(d) => d.to_string().parse().ok(),
                        SqlValue::Text(s) => s.trim().parse().ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_from_sql_float!(f32, f64);

impl FromSqlValue for String {
    const TARGET: &'static str = "string";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Bytes(b) => String::from_utf8(b.clone()).ok(),
            SqlValue::Json(serde_json::Value::String(s)) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    const TARGET: &'static str = "bytes";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Bytes(b) => Some(b.clone()),
            SqlValue::Text(s) => Some(s.as_bytes().to_vec()),
            _ => None,
        }
    }
}

impl FromSqlValue for serde_json::Value {
    const TARGET: &'static str = "json";

    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Json(v) => Some(v.clone()),
            SqlValue::Text(s) => serde_json::from_str(s).ok(),
            SqlValue::Bool(b) => Some(serde_json::Value::Bool(*b)),
            SqlValue::Int(i) => Some(serde_json::Value::from(*i)),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
            _ => None,
        }
    }

    fn from_null() -> Option<Self> {
        Some(serde_json::Value::Null)
    }
}

type Setter<E> = Box<dyn Fn(&mut E, &SqlValue) -> Result<()> + Send + Sync>;

struct Attribute<E> {
    name: &'static str,
    set: Setter<E>,
}

/// Collects attribute setters for one entity type.
pub struct MapperBuilder<E> {
    attributes: Vec<Attribute<E>>,
}

impl<E: 'static> MapperBuilder<E> {
    fn new() -> Self {
        Self {
            attributes: Vec::new(),
        }
    }

    /// Register a writable attribute.
    ///
    /// ```rust
    /// # use relq::mapper::{Entity, MapperBuilder};
    /// # use relq::SqlValue;
    /// #[derive(Default)]
    /// struct User { id: i64, name: String }
    ///
    /// impl Entity for User {
    ///     const TYPE_NAME: &'static str = "User";
    ///     fn identity(&self) -> SqlValue { self.id.into() }
    ///     fn describe(m: &mut MapperBuilder<Self>) {
    ///         m.field("id", |u: &mut User, v| u.id = v);
    ///         m.field("name", |u: &mut User, v| u.name = v);
    ///     }
    /// }
    /// ```
    pub fn field<V, F>(&mut self, name: &'static str, setter: F) -> &mut Self
    where
        V: FromSqlValue + 'static,
        F: Fn(&mut E, V) + Send + Sync + 'static,
    {
        self.attributes.push(Attribute {
            name,
            set: Box::new(move |entity: &mut E, value: &SqlValue| {
                setter(entity, convert::<V>(name, value)?);
                Ok(())
            }),
        });
        self
    }
}

/// Compiled row mapper for one entity type
pub struct EntityMapper<E> {
    attributes: Vec<Attribute<E>>,
    by_name: HashMap<String, usize>,
}

impl<E: Entity> EntityMapper<E> {
    fn build() -> Self {
        let mut builder = MapperBuilder::new();
        E::describe(&mut builder);
        let by_name = builder
            .attributes
            .iter()
            .enumerate()
            .map(|(i, attr)| (attr.name.to_ascii_lowercase(), i))
            .collect();
        Self {
            attributes: builder.attributes,
            by_name,
        }
    }

    /// Map one row. Unmatched columns are ignored; unmatched attributes
    /// keep their default.
    pub fn map_row(&self, row: &QueryRow) -> Result<E> {
        let mut entity = E::default();
        for (column, value) in &row.columns {
            if let Some(&i) = self.by_name.get(&column.to_ascii_lowercase()) {
                (self.attributes[i].set)(&mut entity, value)?;
            }
        }
        Ok(entity)
    }

    pub fn map_rows(&self, rows: &[QueryRow]) -> Result<Vec<E>> {
        rows.iter().map(|row| self.map_row(row)).collect()
    }

    /// Attribute names, in registration order
    pub fn attribute_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.attributes.iter().map(|attr| attr.name)
    }
}

type MapperCache = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

fn cache() -> &'static MapperCache {
    static CACHE: OnceLock<MapperCache> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

/// Cached mapper for `E`, built on first use.
///
/// Concurrent first calls may each build a mapper; the first one stored is
/// kept and the others are dropped.
pub fn mapper_for<E: Entity>() -> Arc<EntityMapper<E>> {
    let key = TypeId::of::<E>();
    if let Some(existing) = cache().read().get(&key).cloned() {
        if let Ok(mapper) = existing.downcast::<EntityMapper<E>>() {
            return mapper;
        }
    }

    let built: Arc<dyn Any + Send + Sync> = Arc::new(EntityMapper::<E>::build());
    let stored = cache().write().entry(key).or_insert(built).clone();
    stored
        .downcast::<EntityMapper<E>>()
        .unwrap_or_else(|_| Arc::new(EntityMapper::<E>::build()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct AuditEntry {
        id: i64,
        actor: String,
        approved: bool,
        amount: Decimal,
        request_id: Uuid,
        created_at: NaiveDateTime,
        note: Option<String>,
    }

    impl Entity for AuditEntry {
        const TYPE_NAME: &'static str = "AuditEntry";

        fn identity(&self) -> SqlValue {
            self.id.into()
        }

        fn describe(m: &mut MapperBuilder<Self>) {
            m.field("id", |e: &mut Self, v| e.id = v)
                .field("actor", |e: &mut Self, v| e.actor = v)
                .field("approved", |e: &mut Self, v| e.approved = v)
                .field("amount", |e: &mut Self, v| e.amount = v)
                .field("request_id", |e: &mut Self, v| e.request_id = v)
                .field("created_at", |e: &mut Self, v| e.created_at = v)
                .field("note", |e: &mut Self, v| e.note = v);
        }
    }

    #[test]
    fn test_table_names() {
        assert_eq!(AuditEntry::table_name(), "audit_entries");
        assert_eq!(table_name_for("User"), "users");
        assert_eq!(table_name_for("BlogPost"), "blog_posts");
        assert_eq!(table_name_for("Address"), "addresses");
        assert_eq!(table_name_for("Key"), "keys");
        assert_eq!(table_name_for("Batch"), "batches");
    }

    #[test]
    fn test_map_row_converts_and_matches_case_insensitively() {
        let row: QueryRow = vec![
            ("ID", SqlValue::Int(9)),
            ("Actor", SqlValue::Text("it's me".into())),
            ("approved", SqlValue::Int(1)),
            ("amount", SqlValue::Text("12.50".into())),
            ("request_id", SqlValue::Text("67e55044-10b1-426f-9247-bb680e5fe0c8".into())),
            ("created_at", SqlValue::Text("2024-05-01 08:30:00".into())),
            ("note", SqlValue::Null),
            ("unmapped", SqlValue::Int(3)),
        ]
        .into_iter()
        .collect();

        let entry = mapper_for::<AuditEntry>().map_row(&row).unwrap();

        assert_eq!(entry.id, 9);
        assert_eq!(entry.actor, "it's me");
        assert!(entry.approved);
        assert_eq!(entry.amount, Decimal::from_str("12.50").unwrap());
        assert_eq!(entry.request_id.to_string(), "67e55044-10b1-426f-9247-bb680e5fe0c8");
        assert_eq!(entry.created_at.to_string(), "2024-05-01 08:30:00");
        assert_eq!(entry.note, None);
    }

    #[test]
    fn test_missing_columns_keep_defaults() {
        let row: QueryRow = vec![("id", SqlValue::Int(1))].into_iter().collect();
        let entry = mapper_for::<AuditEntry>().map_row(&row).unwrap();
        assert_eq!(entry, AuditEntry { id: 1, ..Default::default() });
    }

    #[test]
    fn test_conversion_failure_names_types() {
        let row: QueryRow = vec![("id", SqlValue::Text("abc".into()))].into_iter().collect();
        let err = mapper_for::<AuditEntry>().map_row(&row).unwrap_err();
        match err {
            QueryError::TypeConversion { column, source_type, target_type } => {
                assert_eq!(column, "id");
                assert_eq!(source_type, "text");
                assert_eq!(target_type, "i64");
            }
            other => panic!("unexpected error: {other}"),
        }

        let null_row: QueryRow = vec![("approved", SqlValue::Null)].into_iter().collect();
        assert!(mapper_for::<AuditEntry>().map_row(&null_row).is_err());
    }

    #[test]
    fn test_mapper_is_cached() {
        let a = mapper_for::<AuditEntry>();
        let b = mapper_for::<AuditEntry>();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.attribute_names().count(), 7);
    }

    #[test]
    fn test_concurrent_first_use() {
        #[derive(Default)]
        struct Racer {
            id: i64,
        }
        impl Entity for Racer {
            const TYPE_NAME: &'static str = "Racer";
            fn identity(&self) -> SqlValue {
                self.id.into()
            }
            fn describe(m: &mut MapperBuilder<Self>) {
                m.field("id", |e: &mut Self, v| e.id = v);
            }
        }

        let handles: Vec<_> = (0..8).map(|_| std::thread::spawn(mapper_for::<Racer>)).collect();
        let mappers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(mappers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
