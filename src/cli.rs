//! CLI definition and dispatch.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::error::BarscriptError;
use crate::domain::runtime::context::RunResult;
use crate::domain::runtime::scheduler::{PageEvent, Runner};
use crate::domain::script::{self, emit};
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;

#[derive(Parser, Debug)]
#[command(name = "barscript", about = "Bar-replay script engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a script over candle history
    Run {
        /// Script file
        script: PathBuf,
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(short, long)]
        symbol: Option<String>,
        #[arg(short, long)]
        timeframe: Option<String>,
        /// Newest N candles to load
        #[arg(short, long)]
        limit: Option<usize>,
        /// Range start, YYYY-MM-DD
        #[arg(long)]
        start: Option<String>,
        /// Range end, YYYY-MM-DD
        #[arg(long)]
        end: Option<String>,
        /// Emit results in pages of this many bars
        #[arg(long)]
        page_size: Option<usize>,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Compile a script and print the rewritten unit
    Check {
        /// Script file
        script: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_tracing();
    match cli.command {
        Command::Run {
            script,
            data_dir,
            symbol,
            timeframe,
            limit,
            start,
            end,
            page_size,
            config,
        } => run_script(RunArgs {
            script,
            data_dir,
            symbol,
            timeframe,
            limit,
            start,
            end,
            page_size,
            config,
        }),
        Command::Check { script } => run_check(&script),
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

struct RunArgs {
    script: PathBuf,
    data_dir: Option<PathBuf>,
    symbol: Option<String>,
    timeframe: Option<String>,
    limit: Option<usize>,
    start: Option<String>,
    end: Option<String>,
    page_size: Option<usize>,
    config: Option<PathBuf>,
}

fn run_script(args: RunArgs) -> ExitCode {
    let source = match fs::read_to_string(&args.script) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to read {}: {e}", args.script.display());
            return ExitCode::from(1);
        }
    };
    let unit = match script::compile(&source) {
        Ok(unit) => unit,
        Err(e) => {
            eprintln!("error: {}", e.display_with_context(&source));
            return (&BarscriptError::from(e)).into();
        }
    };

    let config = match load_config(args.config.as_ref()) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let data_dir = args
        .data_dir
        .or_else(|| {
            config
                .as_ref()
                .and_then(|c| c.get_string("data", "dir"))
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from("."));
    let symbol = match args.symbol.or_else(|| {
        config
            .as_ref()
            .and_then(|c| c.get_string("run", "symbol"))
    }) {
        Some(s) => s,
        None => {
            eprintln!("error: symbol is required (--symbol or [run] symbol)");
            return ExitCode::from(2);
        }
    };
    let tf_text = args
        .timeframe
        .or_else(|| {
            config
                .as_ref()
                .and_then(|c| c.get_string("run", "timeframe"))
        })
        .unwrap_or_else(|| "1D".to_string());
    let timeframe = match Timeframe::parse(&tf_text) {
        Ok(tf) => tf,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    let limit = args.limit.or_else(|| {
        config
            .as_ref()
            .map(|c| c.get_int("run", "limit", 0))
            .filter(|n| *n > 0)
            .map(|n| n as usize)
    });
    let start = match parse_date(args.start.as_deref()) {
        Ok(v) => v,
        Err(code) => return code,
    };
    let end = match parse_date(args.end.as_deref()) {
        Ok(v) => v,
        Err(code) => return code,
    };

    let adapter = CsvAdapter::new(data_dir);
    let runner = Runner::from_provider(&unit, &adapter, symbol, timeframe)
        .with_limit(limit)
        .with_range(start, end);

    match args.page_size {
        Some(page_size) => {
            let mut first_bar = 0;
            for event in runner.run_paginated(None, page_size) {
                match event {
                    Ok(PageEvent::Page(page)) => {
                        print_result(&page.rows, page.first_bar);
                        first_bar = page.first_bar;
                    }
                    Ok(PageEvent::Idle) => {
                        eprintln!("caught up at bar {first_bar}, waiting for data");
                        break;
                    }
                    Err(e) => {
                        eprintln!("error: {e}");
                        return (&e).into();
                    }
                }
            }
            ExitCode::SUCCESS
        }
        None => match runner.run(None) {
            Ok(ctx) => {
                print_result(&ctx.result, 0);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                (&e).into()
            }
        },
    }
}

fn run_check(path: &PathBuf) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to read {}: {e}", path.display());
            return ExitCode::from(1);
        }
    };
    match script::compile(&source) {
        Ok(unit) => {
            print!("{}", emit::emit(&unit));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e.display_with_context(&source));
            (&BarscriptError::from(e)).into()
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Option<FileConfigAdapter>, ExitCode> {
    let Some(path) = path else {
        return Ok(None);
    };
    FileConfigAdapter::from_file(path).map(Some).map_err(|e| {
        eprintln!("error: {e}");
        (&e).into()
    })
}

fn parse_date(text: Option<&str>) -> Result<Option<i64>, ExitCode> {
    let Some(text) = text else {
        return Ok(None);
    };
    match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        Ok(date) => {
            let ms = date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_millis())
                .unwrap_or(0);
            Ok(Some(ms))
        }
        Err(e) => {
            eprintln!("error: invalid date '{text}': {e}");
            Err(ExitCode::from(2))
        }
    }
}

fn print_result(result: &RunResult, first_bar: usize) {
    match result {
        RunResult::Empty => {}
        RunResult::Scalar(values) => {
            for (i, v) in values.iter().enumerate() {
                println!("{}\t{}", first_bar + i, v);
            }
        }
        RunResult::Named(fields) => {
            let rows = fields.first().map(|(_, v)| v.len()).unwrap_or(0);
            for row in 0..rows {
                let cells: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v[row]))
                    .collect();
                println!("{}\t{}", first_bar + row, cells.join(" "));
            }
        }
    }
}
