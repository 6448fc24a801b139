use clap::Parser;
use pushframe::{
    approximate_sample, ConnectParams, Connection, Dialect, MaterializedTable, Value,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::process;

#[derive(Parser)]
#[command(name = "pf")]
#[command(about = "pushframe shell - compose and run queries against a SQL store")]
#[command(version)]
struct Cli {
    /// Database (file path or :memory: for the sqlite dialect)
    database: String,

    /// Store host (recorded in the connection parameters)
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Store port
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// User name
    #[arg(long, default_value = "")]
    user: String,

    /// Password
    #[arg(long, default_value = "")]
    password: String,

    /// Store dialect (sqlite, postgres, mysql)
    #[arg(long, default_value = "sqlite")]
    dialect: String,

    /// Execute one SQL statement and exit
    #[arg(short, long)]
    command: Option<String>,

    /// Output format (table, csv, json)
    #[arg(long, default_value = "table")]
    mode: String,

    /// Seed for the rand_uniform() sampling function
    #[arg(long)]
    seed: Option<u64>,

    /// Quiet mode (output results only)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

impl OutputFormat {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "csv" => Some(OutputFormat::Csv),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let dialect: Dialect = match cli.dialect.parse() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    let params = ConnectParams {
        host: cli.host.clone(),
        port: cli.port,
        database: cli.database.clone(),
        user: cli.user.clone(),
        password: cli.password.clone(),
        dialect,
    };

    let conn = match Connection::open(&params) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    if let Some(seed) = cli.seed {
        if let Err(e) = conn.set_sample_seed(seed) {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }

    let mut format = OutputFormat::parse(&cli.mode).unwrap_or_else(|| {
        eprintln!("Unknown output mode '{}', using table", cli.mode);
        OutputFormat::Table
    });

    if let Some(command) = &cli.command {
        if let Err(e) = run_statement(&conn, command, format) {
            eprintln!("Error: {e}");
            process::exit(1);
        }
        return;
    }

    if !cli.quiet {
        println!("pushframe shell - type .help for commands");
    }
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Error: failed to start line editor: {e}");
            process::exit(1);
        }
    };

    loop {
        match editor.readline("pf> ") {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                if line == ".exit" || line == ".quit" {
                    break;
                }
                if let Err(e) = run_line(&conn, &line, &mut format) {
                    eprintln!("Error: {e}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {e}");
                break;
            }
        }
    }
}

fn run_line(
    conn: &Connection,
    line: &str,
    format: &mut OutputFormat,
) -> pushframe::Result<()> {
    if let Some(rest) = line.strip_prefix('.') {
        let mut parts = rest.split_whitespace();
        match parts.next() {
            Some("help") => {
                println!(".tables                    list tables");
                println!(".sample <table> <fraction> preview an approximate sample");
                println!(".seed <n>                  reseed rand_uniform()");
                println!(".mode <table|csv|json>     switch output format");
                println!(".exit                      leave the shell");
                println!("anything else runs as SQL against the store");
            }
            Some("tables") => {
                for name in conn.list_tables()? {
                    println!("{name}");
                }
            }
            Some("mode") => match parts.next().and_then(OutputFormat::parse) {
                Some(new_format) => *format = new_format,
                None => eprintln!("usage: .mode <table|csv|json>"),
            },
            Some("seed") => match parts.next().and_then(|s| s.parse::<u64>().ok()) {
                Some(seed) => conn.set_sample_seed(seed)?,
                None => eprintln!("usage: .seed <n>"),
            },
            Some("sample") => {
                let table = parts.next();
                let fraction = parts.next().and_then(|s| s.parse::<f64>().ok());
                match (table, fraction) {
                    (Some(table), Some(fraction)) => {
                        let query = approximate_sample(&conn.table(table)?.query(), fraction)?;
                        println!("-- {}", query.to_sql(conn.dialect()));
                        print_result(&conn.materialize(&query)?, *format);
                    }
                    _ => eprintln!("usage: .sample <table> <fraction>"),
                }
            }
            _ => eprintln!("unknown command '.{rest}', try .help"),
        }
        return Ok(());
    }

    run_statement(conn, line, *format)
}

fn run_statement(conn: &Connection, sql: &str, format: OutputFormat) -> pushframe::Result<()> {
    let head = sql.trim_start().to_ascii_uppercase();
    if head.starts_with("SELECT") || head.starts_with("WITH") || head.starts_with("PRAGMA") {
        print_result(&conn.query_raw(sql)?, format);
    } else {
        let affected = conn.execute_raw(sql)?;
        println!("{affected} rows affected");
    }
    Ok(())
}

fn print_result(result: &MaterializedTable, format: OutputFormat) {
    match format {
        OutputFormat::Table => print!("{}", format_table_output(result)),
        OutputFormat::Csv => print!("{}", format_csv_output(result)),
        OutputFormat::Json => println!("{}", format_json_output(result)),
    }
}

fn format_table_output(result: &MaterializedTable) -> String {
    if result.is_empty() {
        return "No rows returned\n".to_string();
    }

    // Column widths over all rows, capped at 20 chars
    let mut col_widths: Vec<usize> = result
        .columns()
        .iter()
        .map(|col| col.name.len())
        .collect();
    for row in result.rows() {
        for (i, cell) in row.iter().enumerate() {
            col_widths[i] = col_widths[i].max(cell.to_string().len()).min(20);
        }
    }

    let mut output = String::new();
    for (i, col) in result.columns().iter().enumerate() {
        if i > 0 {
            output.push('|');
        }
        output.push_str(&format!(" {:width$} ", col.name, width = col_widths[i]));
    }
    output.push('\n');

    for (i, &width) in col_widths.iter().enumerate() {
        if i > 0 {
            output.push('+');
        }
        output.push_str(&format!("-{}-", "-".repeat(width)));
    }
    output.push('\n');

    for row in result.rows() {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push('|');
            }
            let cell_str = cell.to_string();
            let truncated = if cell_str.len() > col_widths[i] {
                format!("{}...", &cell_str[..col_widths[i].saturating_sub(3)])
            } else {
                cell_str
            };
            output.push_str(&format!(" {:width$} ", truncated, width = col_widths[i]));
        }
        output.push('\n');
    }

    output
}

fn format_csv_output(result: &MaterializedTable) -> String {
    let mut output = String::new();

    for (i, col) in result.columns().iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        output.push_str(&escape_csv_field(&col.name));
    }
    output.push('\n');

    for row in result.rows() {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push(',');
            }
            output.push_str(&escape_csv_field(&cell.to_string()));
        }
        output.push('\n');
    }

    output
}

fn format_json_output(result: &MaterializedTable) -> String {
    let rows: Vec<serde_json::Value> = result
        .rows()
        .iter()
        .map(|row| {
            let mut object = serde_json::Map::new();
            for (col, cell) in result.columns().iter().zip(row) {
                object.insert(col.name.clone(), json_value(cell));
            }
            serde_json::Value::Object(object)
        })
        .collect();
    serde_json::to_string_pretty(&rows).unwrap_or_else(|e| format!("JSON error: {e}"))
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::from(s.as_str()),
        Value::Null => serde_json::Value::Null,
    }
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
