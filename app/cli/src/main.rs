//! FILENAME: app/cli/src/main.rs
// PURPOSE: Command-line host running the pivot lifecycle against a SQLite database.
// FORMAT (stderr logs): seq|level|category|message

mod logging;
mod output;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use engine::{QueryError, QueryExecutor, QueryResult, RowSink, Schema, SqliteExecutor};
use persistence::SessionState;
use pivot_engine::{
    NamedParameter, OutputSchema, PivotConfig, PivotFunction, RowTransformer, NPV_COLUMN_LIST,
    NPV_GROUP_COLUMNS, NPV_PIVOT_COLUMN, NPV_PIVOT_VALUES,
};

use crate::output::{CsvSink, JsonLinesSink, OutputFormat};

/// Pivot the rows of a query into one wide row per group.
///
/// Column arguments accept input column names or 0-based positions.
#[derive(Parser, Debug)]
#[command(name = "pivot", version)]
struct Args {
    /// SQLite database file (opened read-only).
    #[arg(long, value_name = "PATH")]
    db: PathBuf,

    /// Query producing the input rows.
    #[arg(long)]
    input: String,

    /// Mapping query: pivot key in the first column, then one display-name
    /// column per value column.
    #[arg(long = "column-list", value_name = "SQL")]
    column_list: Option<String>,

    /// Column whose values select the output block.
    #[arg(long = "pivotcol", value_name = "COLUMN")]
    pivot_col: Option<String>,

    /// Group columns (comma separated or repeated).
    #[arg(long = "groupcol", value_name = "COLUMN", value_delimiter = ',')]
    group_cols: Vec<String>,

    /// Value columns copied into each block (comma separated or repeated).
    #[arg(long = "pivotval", value_name = "COLUMN", value_delimiter = ',')]
    value_cols: Vec<String>,

    /// JSON file of named parameters. Flags given on the command line override it.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,

    /// Write rows here instead of stdout.
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Session state file. Reused when present, written after session start otherwise.
    #[arg(long, value_name = "PATH")]
    session: Option<PathBuf>,

    /// Print the output schema as JSON and stop after describe.
    #[arg(long)]
    describe_only: bool,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Mirror log lines into this file.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose, args.log_file.as_deref()).map_err(anyhow::Error::msg)?;

    let exec = SqliteExecutor::open_read_only(&args.db)
        .with_context(|| format!("cannot open database {}", args.db.display()))?;
    let out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    match run(&args, &exec, out) {
        Ok(rows) => {
            log::info!(target: "CLI", "wrote {} rows", rows);
            Ok(())
        }
        Err(e) => {
            log::error!(target: "CLI", "{:#}", e);
            Err(e)
        }
    }
}

/// Runs describe, session start (or restore), create and the row stream.
/// Returns the number of output rows.
fn run<W: Write>(args: &Args, exec: &SqliteExecutor, mut out: W) -> Result<u64> {
    let input = args.input.trim().trim_end_matches(';').trim();
    let schema = exec
        .execute(&format!("SELECT * FROM ({}) LIMIT 0", input), |result| {
            Ok::<_, QueryError>(result.schema().clone())
        })
        .context("cannot describe input query")?;

    let config = build_config(args, &schema)?;
    let mapping_query = config
        .get(NPV_COLUMN_LIST)
        .and_then(NamedParameter::as_string)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let mut func = PivotFunction::new(config, schema, exec);
    let output = func.describe()?.clone();
    if args.describe_only {
        serde_json::to_writer_pretty(&mut out, &output)?;
        writeln!(out)?;
        out.flush()?;
        return Ok(0);
    }

    open_session(&mut func, args, &mapping_query, &output)?;
    let mut transformer = func.create()?;
    // Each fetched row goes straight through the transformer, so completed
    // partitions reach the sink while the input query is still running.
    let emitted = exec.execute(&ordered_input(input, &output), |result| -> Result<u64> {
        match args.format {
            OutputFormat::Csv => {
                let mut sink = CsvSink::new(out, &output.columns)?;
                let n = stream(&mut transformer, result, &mut sink)?;
                sink.finish()?;
                Ok(n)
            }
            OutputFormat::Json => {
                let mut sink = JsonLinesSink::new(out, &output.columns);
                let n = stream(&mut transformer, result, &mut sink)?;
                sink.finish()?;
                Ok(n)
            }
        }
    })?;
    func.shutdown();
    Ok(emitted)
}

/// Named parameters from `--config` and the column flags.
fn build_config(args: &Args, schema: &Schema) -> Result<PivotConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            serde_json::from_str::<PivotConfig>(&text)
                .with_context(|| format!("invalid parameters in {}", path.display()))?
        }
        None => PivotConfig::new(),
    };
    if let Some(col) = &args.pivot_col {
        config.set(NPV_PIVOT_COLUMN, NamedParameter::ColumnRef(resolve_column(schema, col)?));
    }
    if !args.group_cols.is_empty() {
        config.set(NPV_GROUP_COLUMNS, NamedParameter::ColumnRefList(resolve_columns(schema, &args.group_cols)?));
    }
    if !args.value_cols.is_empty() {
        config.set(NPV_PIVOT_VALUES, NamedParameter::ColumnRefList(resolve_columns(schema, &args.value_cols)?));
    }
    if let Some(query) = &args.column_list {
        config.set(NPV_COLUMN_LIST, NamedParameter::text(query.as_str()));
    }
    Ok(config)
}

fn resolve_column(schema: &Schema, name: &str) -> Result<usize> {
    name.trim()
        .parse::<usize>()
        .ok()
        .or_else(|| schema.index_of(name.trim()))
        .with_context(|| format!("input has no column '{}'", name))
}

fn resolve_columns(schema: &Schema, names: &[String]) -> Result<Vec<usize>> {
    names.iter().map(|n| resolve_column(schema, n)).collect()
}

/// The input query ordered by the published order keys (1-based ordinals).
fn ordered_input(input: &str, output: &OutputSchema) -> String {
    let ordinals: Vec<String> = output.order_by.iter().map(|idx| (idx + 1).to_string()).collect();
    format!("SELECT * FROM ({}) ORDER BY {}", input, ordinals.join(", "))
}

fn open_session<E: QueryExecutor>(
    func: &mut PivotFunction<E>,
    args: &Args,
    mapping_query: &str,
    output: &OutputSchema,
) -> Result<()> {
    match &args.session {
        Some(path) if path.exists() => {
            let state = persistence::load_session(path)?;
            if state.mapping_query != mapping_query {
                bail!(
                    "session file {} was built from a different mapping query",
                    path.display()
                );
            }
            func.restore_session(state.map);
        }
        Some(path) => {
            let map = func.start()?;
            let state = SessionState::new(mapping_query, (*map).clone()).with_output(output.clone());
            persistence::save_session(&state, path)?;
        }
        None => {
            func.start()?;
        }
    }
    Ok(())
}

fn stream<S>(transformer: &mut RowTransformer, result: &mut QueryResult<'_>, sink: &mut S) -> Result<u64>
where
    S: RowSink,
    S::Error: std::fmt::Display,
{
    while let Some(row) = result.fetch()? {
        transformer.process_sorted(&row, sink)?;
    }
    transformer.flush(sink)?;
    Ok(transformer.partitions_flushed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> SqliteExecutor {
        let exec = SqliteExecutor::open_in_memory().unwrap();
        exec.connection()
            .execute_batch(
                "CREATE TABLE sales (store VARCHAR(16), quarter VARCHAR(2), amount INT, units INT);
                 CREATE TABLE quarters (quarter VARCHAR(2), amount_name VARCHAR(16), units_name VARCHAR(16));
                 INSERT INTO quarters VALUES ('Q1', 'q1_amount', 'q1_units'), ('Q2', 'q2_amount', 'q2_units');
                 INSERT INTO sales VALUES
                    ('store_B', 'Q2', 20, 2), ('store_A', 'Q1', 100, 1),
                    ('store_A', 'Q2', 200, 3);",
            )
            .unwrap();
        exec
    }

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "pivot",
            "--db",
            ":memory:",
            "--input",
            "SELECT store, quarter, amount FROM sales;",
            "--column-list",
            "SELECT quarter, amount_name FROM quarters ORDER BY quarter",
            "--pivotcol",
            "quarter",
            "--groupcol",
            "store",
            "--pivotval",
            "amount",
        ];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    fn run_to_string(args: &Args, exec: &SqliteExecutor) -> Result<String> {
        let mut buf = Vec::new();
        run(args, exec, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    #[test]
    fn test_csv_run() {
        let exec = database();
        let out = run_to_string(&args(&[]), &exec).unwrap();
        assert_eq!(out, "store,q1_amount,q2_amount\nstore_A,100,200\nstore_B,,20\n");
    }

    #[test]
    fn test_json_run() {
        let exec = database();
        let out = run_to_string(&args(&["--format", "json"]), &exec).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["store"], "store_B");
        assert!(lines[1]["q1_amount"].is_null());
        assert_eq!(lines[1]["q2_amount"], 20);
    }

    #[test]
    fn test_multiple_value_columns_by_position() {
        let exec = database();
        let args = Args::parse_from([
            "pivot",
            "--db",
            ":memory:",
            "--input",
            "SELECT store, quarter, amount, units FROM sales",
            "--column-list",
            "SELECT quarter, amount_name, units_name FROM quarters ORDER BY quarter",
            "--pivotcol",
            "1",
            "--groupcol",
            "0",
            "--pivotval",
            "2,3",
        ]);
        let out = run_to_string(&args, &exec).unwrap();
        let header = out.lines().next().unwrap();
        assert_eq!(header, "store,q1_amount,q1_units,q2_amount,q2_units");
        assert!(out.contains("store_A,100,1,200,3"));
    }

    #[test]
    fn test_describe_only() {
        let exec = database();
        let out = run_to_string(&args(&["--describe-only"]), &exec).unwrap();
        let schema: OutputSchema = serde_json::from_str(&out).unwrap();
        assert_eq!(schema.width(), 3);
        assert_eq!(schema.block_count, 2);
    }

    #[test]
    fn test_session_file_reused() {
        let exec = database();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let session = path.to_str().unwrap();

        let first = run_to_string(&args(&["--session", session]), &exec).unwrap();
        assert!(path.exists());
        let second = run_to_string(&args(&["--session", session]), &exec).unwrap();
        assert_eq!(first, second);

        let state = persistence::load_session(&path).unwrap();
        assert_eq!(state.map.len(), 2);
    }

    #[test]
    fn test_session_from_other_query_rejected() {
        let exec = database();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let session = path.to_str().unwrap();
        run_to_string(&args(&["--session", session]), &exec).unwrap();

        let other = Args::parse_from([
            "pivot",
            "--db",
            ":memory:",
            "--input",
            "SELECT store, quarter, amount FROM sales",
            "--column-list",
            "SELECT quarter, quarter FROM quarters",
            "--pivotcol",
            "quarter",
            "--groupcol",
            "store",
            "--pivotval",
            "amount",
            "--session",
            session,
        ]);
        let err = run_to_string(&other, &exec).unwrap_err();
        assert!(err.to_string().contains("different mapping query"));
    }

    #[test]
    fn test_config_file() {
        let exec = database();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        fs::write(
            &path,
            r#"{
                "PIVOTCOL": {"kind": "column_ref", "value": 1},
                "groupcol": {"kind": "column_ref_list", "value": [0]},
                "pivotval": {"kind": "column_ref_list", "value": [2]},
                "column_list": {"kind": "constant", "value": {"VarChar": "SELECT quarter, quarter FROM quarters ORDER BY 1"}}
            }"#,
        )
        .unwrap();
        let args = Args::parse_from([
            "pivot",
            "--db",
            ":memory:",
            "--input",
            "SELECT store, quarter, amount FROM sales",
            "--config",
            path.to_str().unwrap(),
        ]);
        let out = run_to_string(&args, &exec).unwrap();
        assert_eq!(out.lines().next(), Some("store,Q1,Q2"));
    }

    #[test]
    fn test_unknown_column() {
        let exec = database();
        let err = run_to_string(&args(&["--pivotval", "missing"]), &exec).unwrap_err();
        assert!(err.to_string().contains("no column 'missing'"));
    }

    #[test]
    fn test_unmapped_key_fails_run() {
        let exec = database();
        exec.connection()
            .execute_batch("INSERT INTO sales VALUES ('store_C', 'Q9', 1, 1);")
            .unwrap();
        let err = run_to_string(&args(&[]), &exec).unwrap_err();
        assert!(err.to_string().contains("Q9"));
    }
}
