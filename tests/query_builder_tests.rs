use pushframe::{
    Column, ColumnType, ConnectParams, Connection, Dialect, Error, MaterializedTable, SelectItem,
    Agg, Value,
};

fn setup() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to open in-memory store");
    conn.execute_batch(
        "CREATE TABLE flights (
            id INTEGER,
            year INTEGER,
            depdelay REAL,
            arrdelay REAL,
            distance REAL,
            uniqcarrier TEXT
        );
        INSERT INTO flights VALUES (1, 2003, 10.0, 5.0, 500.0, 'AA');
        INSERT INTO flights VALUES (2, 2003, 20.0, 25.0, 800.0, 'BB');
        INSERT INTO flights VALUES (3, 2004, 30.0, 12.0, 650.0, 'AA');
        INSERT INTO flights VALUES (4, 2004, NULL, 7.0, 400.0, 'CC');
        INSERT INTO flights VALUES (5, 2008, 15.0, 9.0, 700.0, 'BB');
        INSERT INTO flights VALUES (6, 2008, 40.0, NULL, 900.0, 'CC');
        CREATE TABLE carriers (code TEXT, description TEXT);
        INSERT INTO carriers VALUES ('AA', 'Alpha Airlines');
        INSERT INTO carriers VALUES ('BB', 'Beta Airways');",
    )
    .expect("Failed to seed tables");
    conn
}

fn sorted_rows(table: &MaterializedTable) -> Vec<String> {
    let mut rows: Vec<String> = table.rows().iter().map(|r| format!("{r:?}")).collect();
    rows.sort();
    rows
}

fn row_by_text(table: &MaterializedTable, column: &str, value: &str) -> Vec<Value> {
    let idx = table.column_index(column).expect("column exists");
    table
        .rows()
        .iter()
        .find(|r| r[idx] == Value::Text(value.to_string()))
        .unwrap_or_else(|| panic!("no row with {column} = {value}"))
        .clone()
}

#[test]
fn test_list_tables_and_reference() {
    let conn = setup();
    let tables = conn.list_tables().unwrap();
    assert!(tables.iter().any(|t| t == "flights"));
    assert!(tables.iter().any(|t| t == "carriers"));

    assert!(matches!(
        conn.table("missing"),
        Err(Error::TableNotFound(_))
    ));

    let flights = conn.table("flights").unwrap();
    assert_eq!(
        flights.columns().join(","),
        "id,year,depdelay,arrdelay,distance,uniqcarrier"
    );
}

#[test]
fn test_unknown_column_rejected_at_composition() {
    let conn = setup();
    let query = conn.table("flights").unwrap().query();
    assert!(matches!(
        query.filter("nope > 1"),
        Err(Error::ColumnNotFound(_))
    ));
    assert!(matches!(
        query.mutate("x", "nope + 1"),
        Err(Error::ColumnNotFound(_))
    ));
}

#[test]
fn test_to_sql_is_deterministic() {
    let conn = setup();
    let build = || {
        conn.table("flights")
            .unwrap()
            .query()
            .filter("year = 2003")
            .unwrap()
            .mutate("gain", "depdelay - arrdelay")
            .unwrap()
    };
    assert_eq!(build().to_sql(Dialect::Sqlite), build().to_sql(Dialect::Sqlite));
}

#[test]
fn test_composition_never_mutates() {
    let conn = setup();
    let base = conn.table("flights").unwrap().query();
    let before = base.to_sql(Dialect::Sqlite);
    let derived = base.filter("year = 2003").unwrap();
    assert_eq!(base.to_sql(Dialect::Sqlite), before);
    assert_ne!(derived.to_sql(Dialect::Sqlite), before);
}

#[test]
fn test_filter_order_is_insensitive_for_row_sets() {
    let conn = setup();
    let base = conn.table("flights").unwrap().query();
    let one = base
        .filter("depdelay > 12")
        .unwrap()
        .filter("year = 2003")
        .unwrap();
    let two = base
        .filter("year = 2003")
        .unwrap()
        .filter("depdelay > 12")
        .unwrap();
    let rows_one = sorted_rows(&conn.materialize(&one).unwrap());
    let rows_two = sorted_rows(&conn.materialize(&two).unwrap());
    assert_eq!(rows_one, rows_two);
    assert_eq!(rows_one.len(), 1);
}

#[test]
fn test_consecutive_filters_share_one_where_clause() {
    let conn = setup();
    let query = conn
        .table("flights")
        .unwrap()
        .query()
        .filter("year = 2003")
        .unwrap()
        .filter("depdelay > 12")
        .unwrap();
    let sql = query.to_sql(Dialect::Sqlite);
    assert_eq!(sql.matches("WHERE").count(), 1);
    assert!(sql.contains("AND"));
}

#[test]
fn test_select_keep_and_derive() {
    let conn = setup();
    let query = conn
        .table("flights")
        .unwrap()
        .query()
        .select(&[
            SelectItem::keep("uniqcarrier"),
            SelectItem::derive("gain", "depdelay - arrdelay"),
        ])
        .unwrap();
    assert_eq!(query.columns().join(","), "uniqcarrier,gain");

    let table = conn.materialize(&query).unwrap();
    assert_eq!(table.column_names(), vec!["uniqcarrier", "gain"]);
    let row = row_by_text(&table, "uniqcarrier", "AA");
    assert_eq!(row[1].as_f64(), Some(5.0));
}

#[test]
fn test_select_exclude_and_mixing_rules() {
    let conn = setup();
    let query = conn.table("flights").unwrap().query();

    let dropped = query.select(&[SelectItem::exclude("id")]).unwrap();
    assert_eq!(
        dropped.columns().join(","),
        "year,depdelay,arrdelay,distance,uniqcarrier"
    );

    assert!(matches!(
        query.select(&[SelectItem::keep("id"), SelectItem::exclude("year")]),
        Err(Error::Plan(_))
    ));
    assert!(matches!(
        query.select(&[SelectItem::exclude("ghost")]),
        Err(Error::ColumnNotFound(_))
    ));
}

#[test]
fn test_mutate_adds_and_replaces() {
    let conn = setup();
    let base = conn.table("flights").unwrap().query();

    let added = base.mutate("gain", "depdelay - arrdelay").unwrap();
    assert!(added.columns().contains(&"gain".to_string()));

    // Replacing keeps the column list unchanged
    let replaced = base.mutate("depdelay", "depdelay * 2").unwrap();
    assert_eq!(replaced.columns(), base.columns());
    let table = conn
        .materialize(&replaced.filter("id = 1").unwrap())
        .unwrap();
    assert_eq!(table.value(0, "depdelay").unwrap().as_f64(), Some(20.0));
}

#[test]
fn test_group_by_aggregate_ignores_nulls() {
    let conn = setup();
    let query = conn
        .table("flights")
        .unwrap()
        .query()
        .group_by(&["uniqcarrier"])
        .unwrap()
        .aggregate(&[Agg::mean("arrdelay", "avg_arrdelay"), Agg::count("n")])
        .unwrap();
    let table = conn.materialize(&query).unwrap();
    assert_eq!(table.len(), 3);

    // CC has one NULL arrdelay: AVG skips it, COUNT(*) does not
    let cc = row_by_text(&table, "uniqcarrier", "CC");
    assert_eq!(cc[table.column_index("avg_arrdelay").unwrap()].as_f64(), Some(7.0));
    assert_eq!(cc[table.column_index("n").unwrap()], Value::Integer(2));
}

#[test]
fn test_collapse_is_row_equivalent() {
    let conn = setup();
    let query = conn
        .table("flights")
        .unwrap()
        .query()
        .filter("year < 2008")
        .unwrap()
        .mutate("gain", "depdelay - arrdelay")
        .unwrap();
    let direct = conn.materialize(&query).unwrap();
    let collapsed = conn.materialize(&query.collapse()).unwrap();
    assert_eq!(sorted_rows(&direct), sorted_rows(&collapsed));
    assert_eq!(query.collapse().columns(), query.columns());
}

#[test]
fn test_round_trip_determinism() {
    let conn = setup();
    let build = || {
        conn.table("flights")
            .unwrap()
            .query()
            .filter("year <= 2004")
            .unwrap()
            .mutate("gain", "depdelay - arrdelay")
            .unwrap()
            .select(&[
                SelectItem::keep("id"),
                SelectItem::keep("uniqcarrier"),
                SelectItem::keep("gain"),
            ])
            .unwrap()
    };
    let first = conn.materialize(&build()).unwrap();
    let second = conn.materialize(&build()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_left_join_preserves_rows_and_fills_nulls() {
    let conn = setup();
    let flights = conn.table("flights").unwrap().query();
    let carriers = conn.table("carriers").unwrap().query();
    let joined = flights
        .left_join(&carriers, &[("uniqcarrier", "code")])
        .unwrap();
    assert!(joined.columns().contains(&"description".to_string()));

    let table = conn.materialize(&joined).unwrap();
    assert_eq!(table.len(), 6);

    let idx = table.column_index("description").unwrap();
    let aa = row_by_text(&table, "uniqcarrier", "AA");
    assert_eq!(aa[idx], Value::Text("Alpha Airlines".to_string()));
    let cc = row_by_text(&table, "uniqcarrier", "CC");
    assert_eq!(cc[idx], Value::Null);
}

#[test]
fn test_left_join_local_uploads_table() {
    let conn = setup();
    let mut lookup = MaterializedTable::new(vec![
        Column::new("code", ColumnType::Text),
        Column::new("region", ColumnType::Text),
    ]);
    lookup
        .push_row(vec![
            Value::Text("AA".to_string()),
            Value::Text("east".to_string()),
        ])
        .unwrap();
    lookup
        .push_row(vec![
            Value::Text("BB".to_string()),
            Value::Text("west".to_string()),
        ])
        .unwrap();

    let joined = conn
        .table("flights")
        .unwrap()
        .query()
        .left_join_local(&lookup, &[("uniqcarrier", "code")])
        .unwrap();
    let table = conn.materialize(&joined).unwrap();
    assert_eq!(table.len(), 6);
    let idx = table.column_index("region").unwrap();
    assert_eq!(
        row_by_text(&table, "uniqcarrier", "BB")[idx],
        Value::Text("west".to_string())
    );
    assert_eq!(row_by_text(&table, "uniqcarrier", "CC")[idx], Value::Null);
}

#[test]
fn test_materialized_table_feeds_back_as_new_base() {
    let conn = setup();
    let summary = conn
        .materialize(
            &conn
                .table("flights")
                .unwrap()
                .query()
                .group_by(&["uniqcarrier"])
                .unwrap()
                .aggregate(&[Agg::count("n")])
                .unwrap(),
        )
        .unwrap();

    // A fresh lineage over the uploaded result
    let base = conn.register_local("carrier_counts", &summary).unwrap();
    let filtered = conn
        .materialize(&base.query().filter("n >= 2").unwrap())
        .unwrap();
    assert_eq!(filtered.len(), 3);

    assert!(matches!(
        conn.register_local("carrier_counts", &summary),
        Err(Error::Plan(_))
    ));
}

#[test]
fn test_join_key_mismatch_is_schema_error() {
    let conn = setup();
    let flights = conn.table("flights").unwrap().query();
    let carriers = conn.table("carriers").unwrap().query();
    assert!(matches!(
        flights.left_join(&carriers, &[("uniqcarrier", "ghost")]),
        Err(Error::SchemaMismatch(_))
    ));
}

#[test]
fn test_execution_error_carries_generated_sql() {
    let conn = setup();
    match conn.query_raw("SELECT ghost FROM flights") {
        Err(Error::Execution { sql, .. }) => assert!(sql.contains("ghost")),
        other => panic!("expected execution error, got {other:?}"),
    }
}

#[test]
fn test_unsupported_dialect_is_connection_error() {
    let params = ConnectParams {
        dialect: Dialect::Postgres,
        ..ConnectParams::sqlite("ignored")
    };
    assert!(matches!(
        Connection::open(&params),
        Err(Error::Connection(_))
    ));
}

#[test]
fn test_file_backed_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pushframe_test.db");
    let params = ConnectParams::sqlite(path.to_string_lossy());

    let conn = Connection::open(&params).unwrap();
    conn.execute_raw("CREATE TABLE t (id INTEGER)").unwrap();
    conn.execute_raw("INSERT INTO t VALUES (42)").unwrap();
    drop(conn);

    let conn = Connection::open(&params).unwrap();
    let table = conn.materialize(&conn.table("t").unwrap().query()).unwrap();
    assert_eq!(table.value(0, "id"), Some(&Value::Integer(42)));
}

#[test]
fn test_connect_params_debug_redacts_password() {
    let mut params = ConnectParams::sqlite(":memory:");
    params.password = "hunter2".to_string();
    let debug = format!("{params:?}");
    assert!(!debug.contains("hunter2"));
    assert!(debug.contains("<redacted>"));
}
