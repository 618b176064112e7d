//! logtable CLI
//!
//! Offline inspection of a file-backed log directory.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use logtable::codec::codec_for;
use logtable::log::{FileLog, SegmentReader, SegmentRecovery};
use logtable::model::EntityTypeDescriptor;
use logtable::{CodecKind, Config, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// logtable CLI
#[derive(Parser, Debug)]
#[command(name = "logtable")]
#[command(about = "Inspect the log of a logtable data directory")]
#[command(version)]
struct Args {
    /// Log directory (`{data_dir}/log`)
    #[arg(short, long, default_value = "./logtable_data/log")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List topics with their partition counts and record counts
    Topics,

    /// Print every record of a topic
    Dump {
        /// Topic name (`{database}.{entity}`)
        topic: String,
    },

    /// Check the segment files of a topic without modifying them
    Verify {
        /// Topic name (`{database}.{entity}`)
        topic: String,
    },

    /// Decode a topic with an entity descriptor and print its current rows
    Scan {
        /// Descriptor JSON file
        schema: PathBuf,

        /// Database the topic belongs to
        #[arg(short, long, default_value = "logtable")]
        database: String,

        /// Topic name; overrides `{database}.{entity}`
        #[arg(short, long)]
        topic: Option<String>,

        /// Codec the records were written with
        #[arg(short, long, default_value = "binary")]
        codec: CodecKind,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,logtable=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let outcome = match &args.command {
        Commands::Topics => list_topics(&args.log_dir),
        Commands::Dump { topic } => dump(&args.log_dir, topic),
        Commands::Verify { topic } => verify(&args.log_dir, topic),
        Commands::Scan {
            schema,
            database,
            topic,
            codec,
        } => scan(&args.log_dir, schema, database, topic.as_deref(), *codec),
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            tracing::error!("{}", e);
            process::exit(1);
        }
    }
}

/// Topic directories under the log root, sorted by name
fn topic_dirs(log_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let path = entry?.path();
        if FileLog::read_topic_spec(&path).is_ok() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn list_topics(log_dir: &Path) -> Result<bool> {
    for dir in topic_dirs(log_dir)? {
        let spec = FileLog::read_topic_spec(&dir)?;
        let mut records = 0u64;
        for partition in 0..spec.partitions {
            let report = SegmentRecovery::verify(&FileLog::segment_path(&dir, partition))?;
            records += report.entries_recovered;
        }
        println!(
            "{}\tpartitions={}\treplication={}\trecords={}",
            spec.name, spec.partitions, spec.replication_factor, records
        );
    }
    Ok(true)
}

fn dump(log_dir: &Path, topic: &str) -> Result<bool> {
    let dir = FileLog::topic_dir(log_dir, topic);
    let spec = FileLog::read_topic_spec(&dir)?;

    for partition in 0..spec.partitions {
        let reader = SegmentReader::open(&FileLog::segment_path(&dir, partition))?;
        for entry in reader.entries() {
            let entry = entry?;
            let value = match &entry.record.value {
                Some(container) => format!(
                    "{} {} {} bytes",
                    container.type_tag,
                    container.codec,
                    container.payload.len()
                ),
                None => "<tombstone>".to_string(),
            };
            println!(
                "{}@{}\tts={}\tkey={} bytes\t{}",
                partition,
                entry.offset,
                entry.record.timestamp,
                entry.record.key.len(),
                value
            );
        }
    }
    Ok(true)
}

fn verify(log_dir: &Path, topic: &str) -> Result<bool> {
    let dir = FileLog::topic_dir(log_dir, topic);
    let spec = FileLog::read_topic_spec(&dir)?;

    let mut clean = true;
    for partition in 0..spec.partitions {
        let report = SegmentRecovery::verify(&FileLog::segment_path(&dir, partition))?;
        println!(
            "partition {}: {} valid, {} corrupted, last offset {:?}, {} trailing bytes",
            partition,
            report.entries_recovered,
            report.entries_corrupted,
            report.last_offset,
            report.trailing_bytes
        );
        clean &= report.is_clean();
    }
    Ok(clean)
}

/// Topic to scan: the explicit one, else the entity's topic in `database`
fn scan_topic(database: &str, topic: Option<&str>, entity: &str) -> String {
    match topic {
        Some(topic) => topic.to_string(),
        None => Config::builder()
            .database_name(database)
            .build()
            .topic_name(entity),
    }
}

/// Replay a topic into a key → row map without starting a store
fn scan(
    log_dir: &Path,
    schema: &Path,
    database: &str,
    topic: Option<&str>,
    codec: CodecKind,
) -> Result<bool> {
    let descriptor = EntityTypeDescriptor::from_json(&std::fs::read_to_string(schema)?)?;
    let topic = scan_topic(database, topic, descriptor.name());
    let dir = FileLog::topic_dir(log_dir, &topic);
    let spec = FileLog::read_topic_spec(&dir)?;
    let codec = codec_for(codec);

    let mut rows = std::collections::BTreeMap::new();
    let mut undecodable = 0u64;
    for partition in 0..spec.partitions {
        let reader = SegmentReader::open(&FileLog::segment_path(&dir, partition))?;
        for entry in reader.entries() {
            let entry = entry?;
            let decoded = codec.decode_key(&descriptor, &entry.record.key).and_then(|key| {
                let row = entry
                    .record
                    .value
                    .as_ref()
                    .map(|c| codec.decode(&descriptor, c))
                    .transpose()?;
                Ok((key, row))
            });
            match decoded {
                Ok((key, Some(row))) => {
                    rows.insert(key, row);
                }
                Ok((key, None)) => {
                    rows.remove(&key);
                }
                Err(e) => {
                    tracing::warn!(partition, offset = entry.offset, error = %e, "undecodable record");
                    undecodable += 1;
                }
            }
        }
    }

    for (key, row) in &rows {
        let values: Vec<String> = row.values().iter().map(ToString::to_string).collect();
        println!("{}\t{}", key, values.join("\t"));
    }
    tracing::info!(rows = rows.len(), undecodable, "scan complete");
    Ok(undecodable == 0)
}
