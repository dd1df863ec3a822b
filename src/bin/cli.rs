use anyhow::{Context, Result};
use branchline::cli::{self, Command, ImportArgs, ItemsArgs};
use branchline::config::Config;
use branchline::context::{AppContext, StandardContext};
use branchline::history::ImportHistory;
use branchline::import::{CommitPolicy, ImportRequest, ReconciliationPlan, RowOutcome};
use branchline::model::Item;
use branchline::storage::{BranchRegistry, LocalStorage};
use branchline::store::{BranchStore, FilterOptions};
use branchline::tabular;
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::env;
use std::fs::{self, OpenOptions};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let invocation = match cli::parse_args(&args) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Try 'branchline --help'.");
            std::process::exit(2);
        }
    };

    if invocation.command == Command::Help {
        cli::print_help("branchline");
        return Ok(());
    }

    let ctx = StandardContext::new(invocation.root.clone());
    let config = Config::load_or_default(&ctx)?;
    init_logging(&ctx, &config, invocation.verbose);

    match invocation.command {
        Command::Import(args) => {
            let blocked = run_import(&ctx, &config, &args)?;
            if blocked {
                std::process::exit(1);
            }
        }
        Command::Items(args) => run_items(&ctx, &config, &args)?,
        Command::Branches => run_branches(&ctx, &config)?,
        Command::History { branch } => {
            let branch = branch.unwrap_or_else(|| config.default_branch.clone());
            run_history(&ctx, &branch)?
        }
        Command::Help => cli::print_help("branchline"),
    }
    Ok(())
}

/// Warnings go to stderr, everything at the configured level to the log file.
fn init_logging(ctx: &dyn AppContext, config: &Config, verbose: bool) {
    let file_level = config.log_level_filter().unwrap_or(LevelFilter::Info);
    let term_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        term_level,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = ctx.get_log_path()
        && let Ok(file) = OpenOptions::new().create(true).append(true).open(&path)
    {
        loggers.push(WriteLogger::new(
            file_level.max(term_level),
            simplelog::Config::default(),
            file,
        ));
    }
    // Only fails if a logger is already installed.
    let _ = CombinedLogger::init(loggers);
}

/// Returns true when the plan was blocked by row errors.
fn run_import(ctx: &dyn AppContext, config: &Config, args: &ImportArgs) -> Result<bool> {
    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read '{}'", args.file.display()))?;
    let table = tabular::parse_csv(&text)
        .with_context(|| format!("Failed to parse '{}'", args.file.display()))?;
    log::info!(
        "Read {} row(s) with {} column(s) from '{}'",
        table.len(),
        table.headers.len(),
        args.file.display()
    );

    let branch = args
        .branch
        .clone()
        .unwrap_or_else(|| config.default_branch.clone());
    let policy = if args.skip_error_rows {
        CommitPolicy::SkipErrorRows
    } else {
        config.commit_policy
    };
    let source = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| args.file.display().to_string());

    let request = ImportRequest::new(
        &branch,
        table.headers,
        table.rows,
        args.column_mapping(config.tags_delimiter),
        args.strategy.clone(),
    )
    .with_policy(policy)
    .with_source(&source);

    let report = LocalStorage::import_into_branch(ctx, &request, !args.dry_run)?;
    print_plan(&report.plan);

    if report.plan.has_blocking_errors {
        println!("Blocked: fix the rows above or use --skip-error-rows. Nothing was written.");
        return Ok(true);
    }
    if args.dry_run {
        println!("Dry run: nothing was written.");
    } else if report.committed {
        println!("Wrote {} item(s) to branch '{}'.", report.written, branch);
    } else {
        println!("Branch '{}' is already up to date.", branch);
    }
    Ok(false)
}

fn print_plan(plan: &ReconciliationPlan) {
    for row in &plan.rows {
        // 1-based data row number.
        let n = row.index + 1;
        let id = row.source_id.as_deref().unwrap_or("-");
        match &row.outcome {
            RowOutcome::Insert { item } => println!("row {:>4}  insert     {}  {}", n, id, item.title),
            RowOutcome::Update { previous, item } => {
                if previous.title != item.title {
                    println!(
                        "row {:>4}  update     {}  {} (was {})",
                        n, id, item.title, previous.title
                    )
                } else {
                    println!("row {:>4}  update     {}  {}", n, id, item.title)
                }
            }
            RowOutcome::Unchanged { .. } => println!("row {:>4}  unchanged  {}", n, id),
            RowOutcome::Error { error } => println!("row {:>4}  error      {}", n, error),
        }
    }
    let s = plan.summary;
    println!(
        "{} row(s): {} insert, {} update, {} unchanged, {} error",
        s.total(),
        s.inserted,
        s.updated,
        s.unchanged,
        s.errors
    );
}

fn format_item(item: &Item) -> String {
    let dates = match (item.start_date, item.end_date) {
        (Some(s), Some(e)) if s != e => format!("{} .. {}", s, e),
        (Some(s), _) => s.to_string(),
        (None, Some(e)) => format!("   ... {}", e),
        (None, None) => "-".to_string(),
    };
    let mut line = format!("{:<24} [{}] {}", dates, item.item_type, item.title);
    for (label, value) in [
        ("project", &item.project),
        ("lane", &item.lane),
        ("owner", &item.owner),
    ] {
        if let Some(v) = value {
            line.push_str(&format!("  {}:{}", label, v));
        }
    }
    for tag in &item.tags {
        line.push_str(&format!(" #{}", tag));
    }
    line
}

fn run_items(ctx: &dyn AppContext, config: &Config, args: &ItemsArgs) -> Result<()> {
    let branch = args.branch.as_deref().unwrap_or(&config.default_branch);
    let mut store = BranchStore::new();
    store.insert(branch.to_string(), LocalStorage::load_branch(ctx, branch)?);

    let options = FilterOptions {
        item_type: args.item_type,
        project: args.project.as_deref(),
        lane: args.lane.as_deref(),
        tag: args.tag.as_deref(),
        search_term: args.search.as_deref().unwrap_or_default(),
    };
    let items = store.filter(branch, &options);
    for item in &items {
        println!("{}", format_item(item));
    }
    eprintln!("{} item(s) in '{}'", items.len(), branch);
    Ok(())
}

fn run_branches(ctx: &dyn AppContext, config: &Config) -> Result<()> {
    for entry in BranchRegistry::list(ctx, &config.default_branch)? {
        let count = LocalStorage::load_branch(ctx, &entry.name)?.len();
        let marker = if entry.name == config.default_branch {
            "*"
        } else {
            " "
        };
        println!("{} {} ({} items)", marker, entry.name, count);
    }
    Ok(())
}

fn run_history(ctx: &dyn AppContext, branch: &str) -> Result<()> {
    let history = ImportHistory::load(ctx, branch)?;
    if history.is_empty() {
        println!("No imports recorded for '{}'.", branch);
        return Ok(());
    }
    for entry in &history.entries {
        let s = entry.summary;
        println!(
            "{}  {:<20} {:<16} +{} ~{} ={} !{}",
            entry.at.format("%Y-%m-%d %H:%M:%S"),
            entry.source.as_deref().unwrap_or("-"),
            entry.strategy,
            s.inserted,
            s.updated,
            s.unchanged,
            s.errors
        );
    }
    Ok(())
}
