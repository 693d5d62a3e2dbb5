use std::io::Write;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use data::output::{self, OutputFormat};
use data::ReadOptions;
use session::Session;

pub mod data;
pub mod session;

#[derive(Parser)]
#[command(name = "tabpeek")]
struct Cli {
    #[arg(help = "Path to a .csv, .xls, .xlsx or .dta file")]
    path: PathBuf,

    #[arg(long = "tail", help = "Show the last rows instead of the first")]
    tail: bool,

    #[arg(
        long = "rows",
        short = 'n',
        default_value = "1000",
        help = "Number of data rows to show"
    )]
    rows: NonZeroUsize,

    #[arg(long = "info", help = "Print file metadata instead of rows")]
    info: bool,

    #[arg(
        long = "output-format",
        short = 'o',
        default_value = "plain",
        help = "Output format: plain, json, or csv"
    )]
    output_format: String,

    #[arg(
        long = "delimiter",
        short = 'd',
        default_value = ",",
        help = "Field delimiter for CSV input"
    )]
    delimiter: char,

    #[arg(long = "no-header", help = "Treat the first CSV line as data")]
    no_header: bool,
}

pub fn main() {
    // Reset SIGPIPE to default so writing to a broken pipe exits cleanly
    // instead of panicking.
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tabpeek=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting tabpeek");
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let output_format = match cli.output_format.as_str() {
        "json" => OutputFormat::Json,
        "csv" => OutputFormat::Csv,
        "plain" => OutputFormat::Plain,
        other => {
            return Err(anyhow!(
                "unknown output format: {other}. Valid formats: plain, json, csv"
            ))
        }
    };

    if !cli.delimiter.is_ascii() {
        return Err(anyhow!("delimiter must be a single ASCII character"));
    }
    let options = ReadOptions {
        delimiter: cli.delimiter as u8,
        has_header: !cli.no_header,
    };

    let mut session = Session::new(options);
    let file_info = session.open(&cli.path)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if cli.info {
        match output_format {
            OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&file_info)?)?,
            _ => write!(out, "{file_info}")?,
        }
        return Ok(());
    }

    let window = if cli.tail {
        session.tail(cli.rows)?
    } else {
        session.head(cli.rows)?
    };
    info!(
        "Showing {} rows, {} columns",
        window.rows.len(),
        window.columns.len()
    );

    out.write_all(output::render_window(&window, output_format)?.as_bytes())?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_to_first_thousand_rows() {
        let cli = Cli::try_parse_from(["tabpeek", "data.csv"]).unwrap();
        assert_eq!(cli.rows.get(), 1000);
        assert!(!cli.tail);
        assert_eq!(cli.output_format, "plain");
        assert_eq!(cli.delimiter, ',');
    }

    #[test]
    fn parses_tail_request() {
        let cli =
            Cli::try_parse_from(["tabpeek", "--tail", "-n", "25", "-o", "json", "survey.dta"])
                .unwrap();
        assert!(cli.tail);
        assert_eq!(cli.rows.get(), 25);
        assert_eq!(cli.path, PathBuf::from("survey.dta"));
    }

    #[test]
    fn rejects_zero_rows() {
        assert!(Cli::try_parse_from(["tabpeek", "-n", "0", "data.csv"]).is_err());
    }

    #[test]
    fn unknown_output_format_fails_before_reading() {
        let cli = Cli::try_parse_from(["tabpeek", "-o", "xml", "/nonexistent/data.csv"]).unwrap();
        let err = run(cli).unwrap_err();
        assert!(err.to_string().starts_with("unknown output format: xml"));
    }
}
