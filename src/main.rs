use person_resolver_lib::{input_loader, logger};
use person_resolver_lib::{EngineConfig, Lookup, Profile, Query, Resolver};

use std::error::Error;
use std::path::{Path, PathBuf};
use clap::{Parser, Subcommand};
use log::{info, warn, error};
use chrono::Local;

#[derive(Parser)]
#[command(name = "person-resolver", about = "Resolve people into public profiles, cached across runs")]
struct Cli {
    /// TOML engine config; defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve one person and print the profile
    Lookup {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        national_id: String,
    },
    /// Resolve every row of a CSV or Excel file into a results CSV
    Batch {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "results.csv")]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let mut resolver = Resolver::from_config(&config)?;

    match cli.command {
        Command::Lookup { first_name, last_name, national_id } => {
            let query = Query::new(first_name, last_name, national_id);
            let outcome = resolver.lookup(&query)?;
            resolver.finish()?;
            match outcome.profile() {
                Some(profile) => {
                    for line in profile.summary_lines() {
                        println!("{}", line);
                    }
                }
                None => println!("{}: {}", query.cache_key(), outcome.status()),
            }
        }
        Command::Batch { input, output } => run_batch(&mut resolver, &input, &output)?,
    }
    Ok(())
}

fn run_batch(resolver: &mut Resolver, input: &Path, output: &Path) -> Result<(), Box<dyn Error>> {
    let records = input_loader::load_records(input);
    if records.is_empty() {
        error!("No people found in {:?}. Expected columns: FirstName, LastName, PersonNumber", input);
        return Ok(());
    }

    let mut csv_writer = csv::Writer::from_path(output)?;
    csv_writer.write_record([
        "row", "first_name", "last_name", "national_id", "status",
        "street", "zip", "locality", "country", "phone",
        "companies", "businesses", "living_with", "url", "timestamp",
    ])?;

    let total = records.len();
    let mut found = 0;

    for (i, record) in records.iter().enumerate() {
        let query = &record.query;
        info!("Processing {} / {} : {} {}", i + 1, total, query.first_name, query.last_name);

        // A cache write failure aborts the batch; everything else is per-row.
        let outcome = resolver.lookup(query)?;
        if let Lookup::RetryExhausted { stage, attempts } = &outcome {
            warn!("{:?} for {} timed out {} times", stage, query.cache_key(), attempts);
        }
        if outcome.profile().is_some() {
            found += 1;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut row = vec![
            record.row.to_string(),
            query.first_name.clone(),
            query.last_name.clone(),
            query.national_id.clone(),
            outcome.status().to_string(),
        ];
        row.extend(profile_columns(outcome.profile()));
        row.push(timestamp);

        csv_writer.write_record(&row)?;
        csv_writer.flush()?;
    }

    resolver.finish()?;
    info!("Batch completed. {} of {} people resolved; results in {:?}", found, total, output);
    Ok(())
}

fn profile_columns(profile: Option<&Profile>) -> Vec<String> {
    let Some(profile) = profile else {
        return vec![String::new(); 9];
    };
    let address = profile.address.as_ref();
    vec![
        address.map(|a| a.street.clone()).unwrap_or_default(),
        address.map(|a| a.zip.clone()).unwrap_or_default(),
        address.map(|a| a.locality.clone()).unwrap_or_default(),
        address.map(|a| a.country.clone()).unwrap_or_default(),
        profile.phone.clone().unwrap_or_default(),
        profile.companies.iter().cloned().collect::<Vec<_>>().join("; "),
        profile.businesses.join("; "),
        profile.living_with.join("; "),
        profile.source_url.clone(),
    ]
}
