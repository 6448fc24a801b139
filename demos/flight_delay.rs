//! End-to-end workflow: analyze a flights table without pulling it into
//! local memory. Filters, sampling, and the final scoring arithmetic all run
//! inside the store; only a bounded training sample and a small aggregate
//! ever cross into the process.

use pushframe::{approximate_sample, fit, score_remote, Connection};

fn main() -> pushframe::Result<()> {
    env_logger::init();
    let conn = Connection::open_in_memory()?;
    conn.set_sample_seed(1)?;

    println!("1. Seeding a synthetic flights dataset...");
    seed_flights(&conn)?;
    println!("   tables: {:?}\n", conn.list_tables()?);

    // Training partition: 2003-2007, with the per-flight gain derived remotely
    let flights = conn.table("flights")?;
    let training = flights
        .query()
        .filter("year >= 2003 AND year <= 2007")?
        .filter("depdelay IS NOT NULL AND arrdelay IS NOT NULL")?
        .mutate("gain", "depdelay - arrdelay")?;
    println!("2. Deferred training query (nothing executed yet):");
    println!("   {}\n", training.to_sql(conn.dialect()));

    println!("3. Materializing an approximate 50% sample...");
    let sample = approximate_sample(&training, 0.5)?;
    let sample_table = conn.materialize(&sample)?;
    print!("{sample_table}");

    println!("4. Fitting gain ~ depdelay + distance + uniqcarrier on the sample...");
    let model = fit(&sample_table, "gain", &["depdelay", "distance"], "uniqcarrier")?;
    println!("   intercept: {:.4}", model.intercept());
    for (name, coef) in model.continuous_coefficients() {
        println!("   {name}: {coef:.4}");
    }
    for (name, coef) in model.category_coefficients() {
        println!("   carrier {name}: {coef:.4}");
    }
    println!(
        "   (reference carrier: {})\n",
        model.reference_category()
    );

    let coefficients = model.coefficient_table()?;
    println!("5. Coefficient lookup table (joined remotely for scoring):");
    print!("{coefficients}");

    // Score the disjoint 2008 partition inside the store and pull back only
    // the per-carrier aggregate, decorated with the carrier name
    let scoring = flights
        .query()
        .filter("year = 2008")?
        .mutate("gain", "depdelay - arrdelay")?;
    let scores = score_remote(
        &scoring,
        &model,
        &coefficients,
        ("uniqcarrier", "uniqcarrier"),
        "uniqcarrier",
    )?
    .left_join(&conn.table("carriers")?.query(), &[("uniqcarrier", "code")])?;

    println!("6. Remote scoring query:");
    println!("   {}\n", scores.to_sql(conn.dialect()));
    println!("7. Scored 2008 partition, aggregated per carrier:");
    print!("{}", conn.materialize(&scores)?);

    Ok(())
}

// Gains follow an exact linear model so the fit is easy to eyeball:
// gain = 2 + 0.3 * depdelay + 0.004 * distance (+ 5 for carrier BB)
fn seed_flights(conn: &Connection) -> pushframe::Result<()> {
    conn.execute_batch(
        "CREATE TABLE flights (
            year INTEGER,
            depdelay REAL,
            arrdelay REAL,
            distance REAL,
            uniqcarrier TEXT
        );
        CREATE TABLE carriers (code TEXT, description TEXT);
        INSERT INTO carriers VALUES ('AA', 'Alpha Airlines');
        INSERT INTO carriers VALUES ('BB', 'Beta Airways');",
    )?;

    let mut inserts = String::new();
    for year in 2003..=2008 {
        for (carrier, carrier_effect) in [("AA", 0.0), ("BB", 5.0)] {
            // Independent delay and distance grids keep the fit full rank
            for i in 0..3 {
                for j in 0..2 {
                    let depdelay = 4.0 + 3.0 * i as f64;
                    let distance = 250.0 + 200.0 * j as f64;
                    let gain = 2.0 + 0.3 * depdelay + 0.004 * distance + carrier_effect;
                    let arrdelay = depdelay - gain;
                    inserts.push_str(&format!(
                        "INSERT INTO flights VALUES ({year}, {depdelay:?}, {arrdelay:?}, {distance:?}, '{carrier}');\n"
                    ));
                }
            }
        }
    }
    conn.execute_batch(&inserts)
}
