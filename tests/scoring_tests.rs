use pushframe::{fit, score_remote, Connection, Dialect, MaterializedTable, Value};

// Gains follow gain = 2 + 0.3 * depdelay + 0.004 * distance (+ 5 for BB),
// so a full-rank fit reproduces them exactly and remote scoring can be
// checked against local arithmetic.
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
        )",
    )
    .expect("Failed to create table");

    let mut inserts = String::new();
    let mut id = 0;
    for year in 2003..=2008 {
        for (carrier, carrier_effect) in [("AA", 0.0), ("BB", 5.0)] {
            // depdelay and distance vary on independent grids so the design
            // matrix is full rank
            for i in 0..2 {
                for j in 0..2 {
                    id += 1;
                    let depdelay = 4.0 + 3.0 * i as f64;
                    let distance = 250.0 + 200.0 * j as f64;
                    let gain = 2.0 + 0.3 * depdelay + 0.004 * distance + carrier_effect;
                    let arrdelay = depdelay - gain;
                    inserts.push_str(&format!(
                        "INSERT INTO flights VALUES ({id}, {year}, {depdelay:?}, {arrdelay:?}, {distance:?}, '{carrier}');\n"
                    ));
                }
            }
        }
    }
    // A carrier that never appears in the training years
    inserts.push_str("INSERT INTO flights VALUES (999, 2008, 10.0, 3.0, 500.0, 'ZZ');\n");
    conn.execute_batch(&inserts).expect("Failed to seed rows");
    conn
}

fn train_and_score(conn: &Connection) -> (pushframe::FittedModel, MaterializedTable) {
    let flights = conn.table("flights").unwrap();
    let training = flights
        .query()
        .filter("year <= 2007")
        .unwrap()
        .mutate("gain", "depdelay - arrdelay")
        .unwrap();
    let sample = conn.materialize(&training).unwrap();
    let model = fit(&sample, "gain", &["depdelay", "distance"], "uniqcarrier").unwrap();
    let coefficients = model.coefficient_table().unwrap();

    let scoring = flights
        .query()
        .filter("year = 2008")
        .unwrap()
        .mutate("gain", "depdelay - arrdelay")
        .unwrap();
    let scores = score_remote(
        &scoring,
        &model,
        &coefficients,
        ("uniqcarrier", "uniqcarrier"),
        "uniqcarrier",
    )
    .unwrap();
    let result = conn.materialize(&scores).unwrap();
    (model, result)
}

fn row_by_carrier<'a>(table: &'a MaterializedTable, carrier: &str) -> &'a [Value] {
    let idx = table.column_index("uniqcarrier").unwrap();
    table
        .rows()
        .iter()
        .find(|r| r[idx] == Value::Text(carrier.to_string()))
        .unwrap_or_else(|| panic!("no scored row for carrier {carrier}"))
}

#[test]
fn test_remote_scoring_matches_local_arithmetic() {
    let conn = setup();
    let (model, result) = train_and_score(&conn);

    let predicted_idx = result.column_index("avg_predicted").unwrap();
    let observed_idx = result.column_index("avg_gain").unwrap();
    let n_idx = result.column_index("n").unwrap();

    for carrier in ["AA", "BB"] {
        // Local mean prediction over the 2008 rows of this carrier
        let mut local_sum = 0.0;
        let mut local_n = 0;
        for i in 0..2 {
            for j in 0..2 {
                let depdelay = 4.0 + 3.0 * i as f64;
                let distance = 250.0 + 200.0 * j as f64;
                local_sum += model.predict(&[depdelay, distance], carrier).unwrap();
                local_n += 1;
            }
        }
        let local_mean = local_sum / local_n as f64;

        let row = row_by_carrier(&result, carrier);
        let remote_predicted = row[predicted_idx].as_f64().unwrap();
        let remote_observed = row[observed_idx].as_f64().unwrap();

        assert!(
            (remote_predicted - local_mean).abs() < 1e-9,
            "{carrier}: remote {remote_predicted} vs local {local_mean}"
        );
        // Training data is exactly linear, so predictions match observations
        assert!((remote_predicted - remote_observed).abs() < 1e-6);
        assert_eq!(row[n_idx], Value::Integer(4));
    }
}

#[test]
fn test_unseen_category_scores_null_not_error() {
    let conn = setup();
    let (_, result) = train_and_score(&conn);

    let row = row_by_carrier(&result, "ZZ");
    assert_eq!(row[result.column_index("avg_predicted").unwrap()], Value::Null);
    // The observed response still aggregates normally
    assert!(row[result.column_index("avg_gain").unwrap()]
        .as_f64()
        .is_some());
}

#[test]
fn test_train_and_test_partitions_are_disjoint() {
    let conn = setup();
    let flights = conn.table("flights").unwrap();

    let train_ids = conn
        .materialize(&flights.query().filter("year <= 2007").unwrap())
        .unwrap();
    let test_ids = conn
        .materialize(&flights.query().filter("year = 2008").unwrap())
        .unwrap();

    let collect = |table: &MaterializedTable| -> Vec<i64> {
        let idx = table.column_index("id").unwrap();
        table
            .rows()
            .iter()
            .map(|r| match r[idx] {
                Value::Integer(id) => id,
                _ => panic!("non-integer id"),
            })
            .collect()
    };
    let train: Vec<i64> = collect(&train_ids);
    let test: Vec<i64> = collect(&test_ids);
    assert!(!train.is_empty() && !test.is_empty());
    assert!(train.iter().all(|id| !test.contains(id)));
}

#[test]
fn test_scoring_query_compiles_to_join_and_aggregate() {
    let conn = setup();
    let flights = conn.table("flights").unwrap();
    let training = flights
        .query()
        .filter("year <= 2007")
        .unwrap()
        .mutate("gain", "depdelay - arrdelay")
        .unwrap();
    let sample = conn.materialize(&training).unwrap();
    let model = fit(&sample, "gain", &["depdelay", "distance"], "uniqcarrier").unwrap();
    let coefficients = model.coefficient_table().unwrap();

    let scoring = flights
        .query()
        .filter("year = 2008")
        .unwrap()
        .mutate("gain", "depdelay - arrdelay")
        .unwrap();
    let scores = score_remote(
        &scoring,
        &model,
        &coefficients,
        ("uniqcarrier", "uniqcarrier"),
        "uniqcarrier",
    )
    .unwrap();

    let sql = scores.to_sql(Dialect::Sqlite);
    assert!(sql.contains("LEFT JOIN"));
    assert!(sql.contains("GROUP BY"));
    assert!(sql.contains("AVG"));
    // Compiling for inspection must not require the store
    assert!(sql.contains("pf_lookup_"));
}
