//! Property-based tests for record conversion, bulk loading and rollback
//!
//! These tests verify through property-based testing that:
//! - Record conversion keeps one row per record and maps absent values to NULL
//! - Table name validation accepts identifiers and nothing else
//! - Bulk loads are all-or-nothing for any batch size and failure position
//! - Rollback is idempotent and never leaves a handle open

#[cfg(test)]
mod tests {
    use dalite::core::db::schema::TableName;
    use dalite::core::db::table::ColumnType;
    use dalite::{DaliteError, DataSource, TabularData};
    use proptest::prelude::*;
    use rusqlite::types::Value;
    use rusqlite::Connection;
    use serde::Serialize;
    use tempfile::TempDir;

    // Test infrastructure

    #[derive(Debug, Clone, Serialize)]
    struct Reading {
        id: i64,
        sensor: Option<String>,
        level: Option<f64>,
    }

    /// Creates an empty readings database in a temporary directory
    fn create_temp_db() -> (TempDir, DataSource) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("readings.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "
                CREATE TABLE readings (
                    id INTEGER PRIMARY KEY,
                    sensor TEXT,
                    level REAL CHECK (level IS NULL OR level >= 0)
                );
                CREATE TABLE balances (id INTEGER PRIMARY KEY, amount INTEGER NOT NULL);
                INSERT INTO balances (id, amount) VALUES (1, 100);
            ",
            )
            .unwrap();
        (dir, DataSource::new(path.as_path()))
    }

    fn arb_reading(id: i64) -> impl Strategy<Value = Reading> {
        (
            prop::option::of("[a-z]{1,12}"),
            prop::option::of(0.0f64..1_000_000.0),
        )
            .prop_map(move |(sensor, level)| Reading { id, sensor, level })
    }

    fn arb_readings(max: usize) -> impl Strategy<Value = Vec<Reading>> {
        (0..=max).prop_flat_map(|len| {
            (1..=len as i64)
                .map(arb_reading)
                .collect::<Vec<_>>()
        })
    }

    fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-zA-Z_][a-zA-Z0-9_]{0,29}".prop_map(|s: String| s)
    }

    proptest! {
        #[test]
        fn conversion_keeps_one_row_per_record(readings in arb_readings(40)) {
            let table = TabularData::from_records(&readings).unwrap();
            prop_assert_eq!(table.rows.len(), readings.len());

            for (row, reading) in table.rows.iter().zip(&readings) {
                prop_assert_eq!(row.len(), table.columns.len());
                prop_assert_eq!(&row[0], &Value::Integer(reading.id));
                prop_assert_eq!(reading.sensor.is_none(), row[1] == Value::Null);
                prop_assert_eq!(reading.level.is_none(), row[2] == Value::Null);
            }

            if let Some(level) = table.columns.get(2) {
                let any_level = readings.iter().any(|r| r.level.is_some());
                prop_assert_eq!(level.column_type == ColumnType::Real, any_level);
            }
        }

        #[test]
        fn identifiers_are_valid_table_names(schema in prop::option::of(arb_identifier()), name in arb_identifier()) {
            let raw = match &schema {
                Some(schema) => format!("{}.{}", schema, name),
                None => name.clone(),
            };
            let parsed = TableName::parse(&raw).unwrap();
            prop_assert_eq!(parsed.schema, schema);
            prop_assert_eq!(parsed.name, name);
        }

        #[test]
        fn names_with_sql_are_rejected(name in arb_identifier(), suffix in "[ ;'\"()-]{1,3}[a-z ]{0,10}") {
            let raw = format!("{}{}", name, suffix);
            prop_assume!(!raw.trim().chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
            prop_assert!(TableName::parse(&raw).is_none());
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn bulk_load_is_all_or_nothing(readings in arb_readings(60), bad in any::<prop::sample::Index>()) {
            let (_dir, source) = create_temp_db();
            let mut readings = readings;

            let poisoned = !readings.is_empty() && bad.index(4) == 0;
            if poisoned {
                let at = bad.index(readings.len());
                readings[at].level = Some(-1.0);
            }

            let result = source.bulk_insert("readings", &readings);
            let stored: i64 = source.select_scalar("SELECT COUNT(*) FROM readings", &(), None).unwrap();

            if poisoned {
                let is_bulk_error = matches!(result, Err(DaliteError::BulkLoad { .. }));
                prop_assert!(is_bulk_error);
                prop_assert_eq!(stored, 0);
            } else {
                prop_assert_eq!(result.unwrap(), readings.len());
                prop_assert_eq!(stored, readings.len() as i64);
            }
            prop_assert_eq!(source.open_handles(), 0);
        }

        #[test]
        fn rollback_is_idempotent(deltas in prop::collection::vec(-50i64..50, 1..8), repeats in 1usize..4) {
            let (_dir, source) = create_temp_db();
            let mut session = source.session();
            session.create_connection().unwrap();
            session.begin_transaction().unwrap();

            for delta in &deltas {
                session
                    .execute("UPDATE balances SET amount = amount + ?1 WHERE id = 1", &[delta], None)
                    .unwrap();
            }

            for _ in 0..repeats {
                session.rollback_transaction();
            }

            let amount: i64 = source.select_scalar("SELECT amount FROM balances WHERE id = 1", &(), None).unwrap();
            prop_assert_eq!(amount, 100);
            prop_assert_eq!(source.open_handles(), 0);
        }

        #[test]
        fn scalar_null_policy(value in prop::option::of(any::<i64>())) {
            let (_dir, source) = create_temp_db();
            source
                .execute("INSERT INTO readings (id, sensor, level) VALUES (7, 'gauge', NULL)", &(), None)
                .unwrap();
            source
                .execute("UPDATE readings SET level = ?1 WHERE id = 7", &[value.map(|v| (v.unsigned_abs() % 1000) as f64)], None)
                .unwrap();

            let scalar: f64 = source.select_scalar("SELECT level FROM readings WHERE id = 7", &(), None).unwrap();
            let nullable: Vec<Option<f64>> = source.select("SELECT level FROM readings WHERE id = 7", &(), None).unwrap();

            match value {
                Some(v) => {
                    let expected = (v.unsigned_abs() % 1000) as f64;
                    prop_assert_eq!(scalar, expected);
                    prop_assert_eq!(nullable, vec![Some(expected)]);
                }
                None => {
                    prop_assert_eq!(scalar, 0.0);
                    prop_assert_eq!(nullable, vec![None]);
                }
            }
        }
    }
}
