use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use fm_core::{
	logging, CollectionChange, Collaborators, DirectoryEvent, EntryRef, GroupOption,
	LiveDirectory, LiveDirectoryConfig, NotifyBackend, SortDirection, SortKey,
};
use serde::Serialize;
use tokio::signal;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
	Human,
	Json,
}

#[derive(Parser, Debug)]
#[command(name = "fm-watch", about = "Print a directory listing and keep it live")]
struct Args {
	/// Directory to load
	path: PathBuf,

	/// Directory holding live_directory.json, created with defaults if missing
	#[arg(long, env = "FM_CONFIG_DIR")]
	config_dir: Option<PathBuf>,

	/// Sort key: Name, DateModified, DateCreated, DateAccessed, Size, FileType, ...
	#[arg(long)]
	sort: Option<SortKey>,

	#[arg(long, default_value_t = false)]
	descending: bool,

	/// Group option: Name, DateModified, Size, FileType, SyncStatus, FileTag, ...
	#[arg(long)]
	group: Option<GroupOption>,

	/// Include hidden items
	#[arg(long, default_value_t = false)]
	show_hidden: bool,

	/// Only list names containing this text
	#[arg(long)]
	filter: Option<String>,

	/// Output format
	#[arg(long, value_enum, default_value = "human")]
	format: OutputFormat,
}

#[derive(Serialize)]
struct EntryRow {
	name: String,
	kind: String,
	is_dir: bool,
	size: Option<u64>,
	modified: Option<DateTime<Utc>>,
}

impl From<&EntryRef> for EntryRow {
	fn from(entry: &EntryRef) -> Self {
		let props = entry.props();
		Self {
			name: entry.name().to_string(),
			kind: entry.kind().to_string(),
			is_dir: entry.is_dir(),
			size: props.size,
			modified: props.modified,
		}
	}
}

fn print_listing(directory: &LiveDirectory, format: OutputFormat) -> Result<()> {
	match format {
		OutputFormat::Json => {
			let rows = directory
				.entries()
				.iter()
				.map(EntryRow::from)
				.collect::<Vec<_>>();
			println!("{}", serde_json::to_string(&rows)?);
		}
		OutputFormat::Human => match directory.groups() {
			Some(groups) => {
				for group in groups {
					println!("== {} ({})", group.header.text, group.items.len());
					group.items.iter().for_each(print_row);
				}
			}
			None => directory.entries().iter().for_each(print_row),
		},
	}

	Ok(())
}

fn print_row(entry: &EntryRef) {
	let row = EntryRow::from(entry);
	println!(
		"{:<10} {:>12} {:<17} {}{}",
		row.kind,
		row.size.map(|size| size.to_string()).unwrap_or_default(),
		row.modified
			.map(|modified| modified.format("%Y-%m-%d %H:%M").to_string())
			.unwrap_or_default(),
		row.name,
		if row.is_dir { "/" } else { "" },
	);
}

fn print_change(
	directory: &LiveDirectory,
	change: &CollectionChange,
	format: OutputFormat,
) -> Result<()> {
	match format {
		OutputFormat::Json => print_listing(directory, format),
		OutputFormat::Human => {
			if let CollectionChange::Updated { mutations, .. } = change {
				println!("-- {} change(s)", mutations.len());
			}
			print_listing(directory, format)
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	let mut config = match &args.config_dir {
		Some(dir) => LiveDirectoryConfig::load_from(dir)?,
		None => LiveDirectoryConfig::default(),
	};

	if let Some(key) = args.sort {
		config.view.sort.key = key;
	}
	if args.descending {
		config.view.sort.direction = SortDirection::Descending;
	}
	if let Some(option) = args.group {
		config.view.group.option = option;
	}
	if args.show_hidden {
		config.visibility.show_hidden = true;
	}

	let _guard = logging::init_tracing(&config.logging)?;

	let directory = LiveDirectory::new(config, Collaborators::default(), Arc::new(NotifyBackend));
	let mut events = directory.subscribe();

	if args.filter.is_some() {
		directory.set_name_filter(args.filter.clone()).await;
	}

	let summary = directory
		.load(args.path.clone())
		.await
		.with_context(|| format!("loading {}", args.path.display()))?;

	info!(
		entries = summary.entries,
		watch_mode = ?summary.watch_mode,
		"Listing loaded, press Ctrl+C to stop"
	);
	if let Some(failure) = &summary.partial_failure {
		eprintln!("listing is incomplete: {failure}");
	}
	print_listing(&directory, args.format)?;

	loop {
		tokio::select! {
			res = signal::ctrl_c() => {
				res.context("listening for Ctrl+C")?;
				break;
			}
			event = events.recv() => match event {
				Some(DirectoryEvent::CollectionChanged(change)) => {
					print_change(&directory, &change, args.format)?;
				}
				Some(DirectoryEvent::WatchModeChanged(mode)) => {
					eprintln!("watch mode: {mode:?}");
				}
				Some(DirectoryEvent::LoadFailed { path, error }) => {
					eprintln!("{}: {error}", path.display());
				}
				Some(_) => {}
				None => break,
			}
		}
	}

	directory.close().await;

	Ok(())
}
