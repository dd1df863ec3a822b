// File: ./src/cli.rs
//! Command-line parsing and help text shared by the `branchline` binary.
use crate::import::IdStrategy;
use crate::import::mapping::{ColumnMapping, TargetField, parse_assignment};
use crate::model::ItemType;
use crate::model::parser::parse_item_type;
use anyhow::{Result, anyhow, bail};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Import(ImportArgs),
    Items(ItemsArgs),
    Branches,
    History { branch: Option<String> },
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportArgs {
    pub file: PathBuf,
    pub mapping: Vec<(TargetField, String)>,
    pub strategy: IdStrategy,
    pub branch: Option<String>,
    pub tags_delimiter: Option<char>,
    pub skip_error_rows: bool,
    pub dry_run: bool,
}

impl ImportArgs {
    pub fn column_mapping(&self, default_delimiter: char) -> ColumnMapping {
        let mut mapping = ColumnMapping::new();
        for (field, header) in &self.mapping {
            mapping.set(*field, header);
        }
        mapping.tags_delimiter = Some(self.tags_delimiter.unwrap_or(default_delimiter));
        mapping
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemsArgs {
    pub branch: Option<String>,
    pub item_type: Option<ItemType>,
    pub project: Option<String>,
    pub lane: Option<String>,
    pub tag: Option<String>,
    pub search: Option<String>,
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub root: Option<PathBuf>,
    pub verbose: bool,
    pub command: Command,
}

fn take_value<'a>(args: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<String> {
    args.next()
        .cloned()
        .ok_or_else(|| anyhow!("{} needs a value", flag))
}

fn parse_delimiter(raw: &str) -> Result<char> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_whitespace() => Ok(c),
        _ => bail!("--tags-delimiter must be a single non-space character, got '{}'", raw),
    }
}

/// Parses `args` without the binary name.
pub fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut root = None;
    let mut verbose = false;
    let mut positional: Vec<&String> = Vec::new();
    let mut rest: Vec<&String> = Vec::new();

    // Global flags may appear anywhere; everything else is kept in order.
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-r" | "--root" => root = Some(PathBuf::from(take_value(&mut iter, arg)?)),
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => {
                return Ok(Invocation {
                    root,
                    verbose,
                    command: Command::Help,
                });
            }
            _ if positional.is_empty() && !arg.starts_with('-') => positional.push(arg),
            _ => rest.push(arg),
        }
    }

    let Some(name) = positional.first() else {
        return Ok(Invocation {
            root,
            verbose,
            command: Command::Help,
        });
    };

    let command = match name.as_str() {
        "help" => Command::Help,
        "import" => Command::Import(parse_import(&rest)?),
        "items" => Command::Items(parse_items(&rest)?),
        "branches" => {
            if let Some(extra) = rest.first() {
                bail!("Unexpected argument '{}'", extra);
            }
            Command::Branches
        }
        "history" => {
            let mut branch = None;
            let mut it = rest.into_iter();
            while let Some(arg) = it.next() {
                match arg.as_str() {
                    "-b" | "--branch" => branch = Some(take_value(&mut it, arg)?),
                    other => bail!("Unexpected argument '{}'", other),
                }
            }
            Command::History { branch }
        }
        other => bail!("Unknown command '{}'. Try --help.", other),
    };

    Ok(Invocation {
        root,
        verbose,
        command,
    })
}

fn parse_import(args: &[&String]) -> Result<ImportArgs> {
    let mut file = None;
    let mut mapping = Vec::new();
    let mut strategy = IdStrategy::Generate;
    let mut branch = None;
    let mut tags_delimiter = None;
    let mut skip_error_rows = false;
    let mut dry_run = false;

    let mut it = args.iter().copied();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-m" | "--map" => {
                let raw = take_value(&mut it, arg)?;
                mapping.push(parse_assignment(&raw).map_err(|e| anyhow!(e))?);
            }
            "--id" => {
                let raw = take_value(&mut it, arg)?;
                strategy = raw.parse().map_err(|e: String| anyhow!(e))?;
            }
            "-b" | "--branch" => branch = Some(take_value(&mut it, arg)?),
            "--tags-delimiter" => {
                tags_delimiter = Some(parse_delimiter(&take_value(&mut it, arg)?)?)
            }
            "--skip-error-rows" => skip_error_rows = true,
            "-n" | "--dry-run" => dry_run = true,
            other if other.starts_with('-') => bail!("Unknown import option '{}'", other),
            other => {
                if file.is_some() {
                    bail!("Only one input file can be imported at a time");
                }
                file = Some(PathBuf::from(other));
            }
        }
    }

    Ok(ImportArgs {
        file: file.ok_or_else(|| anyhow!("import needs a CSV file"))?,
        mapping,
        strategy,
        branch,
        tags_delimiter,
        skip_error_rows,
        dry_run,
    })
}

fn parse_items(args: &[&String]) -> Result<ItemsArgs> {
    let mut out = ItemsArgs::default();
    let mut it = args.iter().copied();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-b" | "--branch" => out.branch = Some(take_value(&mut it, arg)?),
            "--type" => {
                let raw = take_value(&mut it, arg)?;
                out.item_type = Some(
                    parse_item_type(&raw).ok_or_else(|| anyhow!("Unknown item type '{}'", raw))?,
                );
            }
            "--project" => out.project = Some(take_value(&mut it, arg)?),
            "--lane" => out.lane = Some(take_value(&mut it, arg)?),
            "--tag" => out.tag = Some(take_value(&mut it, arg)?),
            "-s" | "--search" => out.search = Some(take_value(&mut it, arg)?),
            other => bail!("Unexpected argument '{}'", other),
        }
    }
    Ok(out)
}

pub fn print_help(binary_name: &str) {
    println!(
        "Branchline v{} - Import tabular plans into timeline branches",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("USAGE:");
    println!(
        "    {} import <file.csv> --map <field>=<header>... [--id <strategy>] [options]",
        binary_name
    );
    println!("    {} items [--branch <name>] [filters]", binary_name);
    println!("    {} branches", binary_name);
    println!("    {} history [--branch <name>]", binary_name);
    println!("    {} --help", binary_name);
    println!();
    println!("GLOBAL OPTIONS:");
    println!("    -r, --root <path>         Use a different directory for config and data.");
    println!("    -v, --verbose             Log debug output (one line per row on import).");
    println!("    -h, --help                Show this help message.");
    println!();
    println!("IMPORT OPTIONS:");
    println!("    -m, --map <field>=<hdr>   Map a source header to an item field.");
    println!("                              Fields: title, type, start_date, end_date,");
    println!("                              owner, lane, project, tags.");
    println!("                              title and type are required.");
    println!("    --id generate             Every row becomes a new item (default).");
    println!("    --id match                Match rows by project + title, case-insensitive.");
    println!("    --id column:<header>      Use a source column as the stable row ID.");
    println!("    -b, --branch <name>       Target branch (default from config, else 'main').");
    println!("    --tags-delimiter <c>      Character separating tags (default ',').");
    println!("    --skip-error-rows         Commit valid rows even if some rows fail.");
    println!("    -n, --dry-run             Show the plan without writing anything.");
    println!();
    println!("ITEMS FILTERS:");
    println!("    --type <t>                task, milestone, release or meeting");
    println!("    --project <p>  --lane <l>  --tag <t>  -s, --search <text>");
    println!();
    println!("EXAMPLES:");
    println!(
        "    {} import plan.csv -m title=Name -m type=Kind -m start_date=Start --id match",
        binary_name
    );
    println!(
        "    {} import jira.csv -m title=Summary -m type=Type --id column:Key --dry-run",
        binary_name
    );
    println!("    {} items --branch main --type milestone", binary_name);
    println!();
    println!("Exit status is 1 when the import plan has blocking row errors.");
}
