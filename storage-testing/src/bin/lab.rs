//! Build lab layouts, dump them and check that dumps reload unchanged

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use storage_graph::{Document, Report};
use storage_models::dump_file_name;
use storage_testing::dump::{self, Lab, Selection};
use storage_testing::{layout, spec};

#[derive(Parser)]
#[command(name = "lab")]
#[command(about = "Storage graph dump lab", long_about = None)]
struct Cli {
    /// Graph config (TOML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the bundled lab specs
    List,
    /// Build a spec's device tree and dump it
    Export {
        /// Spec name under resources/lab-specs, or a path to a TOML file
        spec: String,
        /// Output file; defaults to `<spec>[<device>][-recursive].xml`
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Only dump devices whose name contains this pattern
        #[arg(long)]
        device: Option<String>,
        /// With --device, dump the first match and everything stacked on it
        #[arg(long, requires = "device")]
        recursive: bool,
    },
    /// Summarize a dump and rebuild it
    Inspect {
        file: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Dump a spec, reload the dump and dump it again; both must match
    Roundtrip {
        spec: String,
        /// Start from the devices whose name contains this pattern
        #[arg(long)]
        device: Option<String>,
        /// With --device, start from the first match and everything stacked on it
        #[arg(long, requires = "device")]
        recursive: bool,
    },
}

fn print_report(stage: &str, report: &Report) {
    if report.is_empty() {
        return;
    }
    eprintln!("{stage}:");
    for issue in report.issues() {
        eprintln!("  {issue}");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("storage_graph=info,storage_testing=info,warn")
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = dump::load_config(cli.config.as_deref())?;
    let lab = Lab::new(config)?;

    match cli.command {
        Commands::List => {
            let root = spec::specs_root();
            let mut names: Vec<String> = std::fs::read_dir(&root)
                .with_context(|| format!("reading {}", root.display()))?
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let path = entry.path();
                    (path.extension()? == "toml")
                        .then(|| path.file_stem()?.to_str().map(str::to_string))
                        .flatten()
                })
                .collect();
            names.sort();
            for name in names {
                let description = spec::load_by_name(&name)
                    .ok()
                    .and_then(|spec| spec.description)
                    .unwrap_or_default();
                println!("{name:<16}{description}");
            }
        }
        Commands::Export {
            spec,
            output,
            device,
            recursive,
        } => {
            let spec = spec::load(&spec)?;
            let tree = layout::build(&spec)?;
            let selection = device
                .as_deref()
                .map(|pattern| Selection::new(pattern, recursive));

            let outcome = lab.export_tree(&tree, selection.as_ref())?;
            print_report("export", &outcome.report);

            let path = output.unwrap_or_else(|| {
                PathBuf::from(dump_file_name(&spec.name, device.as_deref(), recursive))
            });
            outcome
                .document
                .write_with_indent(&path, lab.config().indent)?;
            println!("{}", path.display());
        }
        Commands::Inspect { file, json } => {
            let document = Document::read(&file)?;
            let summary = dump::summarize(&document);
            let (tree, outcome) = lab.import(&document);

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{summary}");
                for device in tree.devices() {
                    println!("  {:<20}{:<36}{}", device.name(), device.type_name(), device.core().size);
                }
            }
            print_report("import", &outcome.report);
            if outcome.report.has_errors() {
                bail!("{} rebuilt with errors", file.display());
            }
        }
        Commands::Roundtrip {
            spec,
            device,
            recursive,
        } => {
            let spec = spec::load(&spec)?;
            let tree = layout::build(&spec)?;
            let selection = device
                .as_deref()
                .map(|pattern| Selection::new(pattern, recursive));
            let trip = lab.round_trip_selected(&tree, selection.as_ref())?;

            print_report("export", &trip.export_report);
            print_report("import", &trip.import_report);
            print_report("re-export", &trip.reexport_report);

            if let Some((line, before, after)) = trip.first_difference() {
                bail!(
                    "dumps of '{}' differ at line {line}:\n  - {}\n  + {}",
                    spec.name,
                    before.trim(),
                    after.trim()
                );
            }
            println!(
                "{}: {} devices, {} bytes, dumps identical",
                spec.name,
                trip.devices,
                trip.first_xml.len()
            );
        }
    }

    Ok(())
}
