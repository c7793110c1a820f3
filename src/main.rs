// file: src/main.rs
// description: commandline application entry point with command handling
// reference: application bootstrap and orchestration

use anyhow::{Context, Result};
use brokenspoke_analyzer::database::{
    CityFiles, ComputeSettings, DatabaseUrl, ImportOptions, Ingestor, PostgresClient,
    SchemaManager, compute,
};
use brokenspoke_analyzer::exporter::{LocalExporter, create_calver_directories};
use brokenspoke_analyzer::models::{ComputePart, Exporter, Location};
use brokenspoke_analyzer::pipeline::{
    PipelineOrchestrator, PrepareOptions, RunOptions, RunSummary, prepare,
};
use brokenspoke_analyzer::utils::files::{delete_folder_contents, user_cache_dir};
use brokenspoke_analyzer::utils::logging::{format_header, format_info, format_success};
use brokenspoke_analyzer::{Config, Validator};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bna")]
#[command(version)]
#[command(about = "Run a Bicycle Network Analysis locally", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    config: PathBuf,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    color: bool,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct LocationArgs {
    /// Country where the city is located
    country: String,
    /// Name of the city
    city: String,
    /// State, province or region, required for US cities
    region: Option<String>,
    /// US census place FIPS code of the city
    fips_code: Option<String>,
}

impl LocationArgs {
    fn location(&self) -> Location {
        Location::new(
            &self.country,
            &self.city,
            self.region.as_deref(),
            self.fips_code.as_deref(),
        )
    }
}

#[derive(Args, Debug, Clone)]
struct CityArgs {
    country: String,
    city: String,
    region: Option<String>,
}

impl CityArgs {
    fn location(&self) -> Location {
        Location::new(&self.country, &self.city, self.region.as_deref(), None)
    }
}

#[derive(Args, Debug, Clone)]
struct DatabaseArgs {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

impl DatabaseArgs {
    fn resolve(&self, config: &Config) -> Result<DatabaseUrl> {
        let raw = config.database_url(self.database_url.as_deref())?;
        DatabaseUrl::parse(&raw).context("Invalid database URL")
    }
}

#[derive(Args, Debug, Clone, Default)]
struct PrepareFlags {
    /// Population of a synthetic census block
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    block_population: Option<u32>,

    /// Size of a synthetic census block in meters
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    block_size: Option<u32>,

    /// Default residential speed limit of non-US cities, in km/h
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    city_speed_limit: Option<u32>,

    /// Year of the LODES employment data
    #[arg(long)]
    lodes_year: Option<u16>,

    /// Directory receiving one sub-directory per city
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    retries: Option<u32>,

    /// Base URL of a mirror serving the US census files
    #[arg(long)]
    mirror: Option<String>,

    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long)]
    no_cache: bool,
}

impl PrepareFlags {
    fn options(&self, config: &Config) -> PrepareOptions {
        let mut options = PrepareOptions::from_config(config);
        if let Some(value) = self.block_population {
            options.block_population = value;
        }
        if let Some(value) = self.block_size {
            options.block_size = value;
        }
        if let Some(value) = self.city_speed_limit {
            options.city_speed_limit = value;
        }
        if self.lodes_year.is_some() {
            options.lodes_year = self.lodes_year;
        }
        if let Some(dir) = &self.data_dir {
            options.data_dir = dir.clone();
        }
        if let Some(retries) = self.retries {
            options.download.retries = retries;
        }
        if self.mirror.is_some() {
            options.download.mirror = self.mirror.clone();
        }
        if self.cache_dir.is_some() {
            options.cache_dir = self.cache_dir.clone();
        }
        options.no_cache = self.no_cache;
        options
    }
}

#[derive(Args, Debug, Clone, Default)]
struct ComputeFlags {
    /// Distance in meters kept around the city boundary
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    buffer: Option<u32>,

    /// Maximum trip distance in meters
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_trip_distance: Option<u32>,

    /// Parts of the analysis to compute, all by default
    #[arg(long = "with-parts", value_enum)]
    with_parts: Vec<ComputePart>,
}

impl ComputeFlags {
    fn buffer(&self, config: &Config) -> u32 {
        self.buffer.unwrap_or(config.analysis.buffer)
    }

    fn max_trip_distance(&self, config: &Config) -> u32 {
        self.max_trip_distance
            .unwrap_or(config.analysis.max_trip_distance)
    }

    fn parts(&self) -> Vec<ComputePart> {
        if self.with_parts.is_empty() {
            ComputePart::all()
        } else {
            self.with_parts.clone()
        }
    }
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    location: LocationArgs,

    #[command(flatten)]
    prepare: PrepareFlags,

    #[command(flatten)]
    compute: ComputeFlags,

    #[command(flatten)]
    database: DatabaseArgs,

    /// Base directory of the calendar versioned results
    #[arg(long)]
    export_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Exporter::Local)]
    with_export: Exporter,

    /// Zip the exported files into bundle.zip
    #[arg(long)]
    with_bundle: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and derive the input files of a city
    Prepare {
        #[command(flatten)]
        location: LocationArgs,
        #[command(flatten)]
        flags: PrepareFlags,
    },

    /// Import prepared files into the database
    Import {
        #[command(subcommand)]
        target: ImportCommand,
    },

    /// Compute the scores of an imported city
    Compute {
        #[command(flatten)]
        city: CityArgs,
        /// Directory holding the prepared files of the city
        #[arg(long)]
        data_dir: PathBuf,
        #[command(flatten)]
        flags: ComputeFlags,
        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Export the results
    Export {
        #[command(subcommand)]
        target: ExportCommand,
    },

    /// Configure the database
    Configure {
        #[command(subcommand)]
        target: ConfigureCommand,
    },

    /// Manage the download cache
    Cache {
        #[command(subcommand)]
        target: CacheCommand,
    },

    /// Prepare, import, compute and export in one go
    Run(RunArgs),

    /// Run the analysis on a database started for the occasion
    RunWith {
        #[command(subcommand)]
        target: RunWithCommand,
    },
}

#[derive(Subcommand)]
enum ImportCommand {
    /// Import every input of a city
    All {
        #[command(flatten)]
        location: LocationArgs,
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long)]
        buffer: Option<u32>,
        #[arg(long)]
        lodes_year: Option<u16>,
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Import the city boundary and census blocks
    Neighborhood {
        #[command(flatten)]
        city: CityArgs,
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long)]
        buffer: Option<u32>,
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Import US employment data of a state
    Jobs {
        state_abbreviation: String,
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long)]
        lodes_year: Option<u16>,
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Import the OSM network and the speed limits
    Osm {
        #[command(flatten)]
        location: LocationArgs,
        #[arg(long)]
        data_dir: PathBuf,
        #[command(flatten)]
        database: DatabaseArgs,
    },
}

#[derive(Subcommand)]
enum ExportCommand {
    /// Export into <EXPORT_DIR>/<country>/<region>/<city>/<calver>
    Local {
        #[command(flatten)]
        city: CityArgs,
        export_dir: Option<PathBuf>,
        #[arg(long)]
        with_bundle: bool,
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Export straight into <EXPORT_DIR>
    LocalCustom {
        export_dir: PathBuf,
        #[arg(long)]
        with_bundle: bool,
        #[command(flatten)]
        database: DatabaseArgs,
    },
}

#[derive(Subcommand)]
enum ConfigureCommand {
    /// Size the database after the docker engine resources
    Docker {
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Configure system parameters, extensions and schemas
    Custom {
        cores: usize,
        memory_mb: u64,
        pguser: String,
        #[command(flatten)]
        database: DatabaseArgs,
    },
    System {
        cores: usize,
        memory_mb: u64,
        #[command(flatten)]
        database: DatabaseArgs,
    },
    Extensions {
        #[command(flatten)]
        database: DatabaseArgs,
    },
    Schemas {
        pguser: String,
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Drop every table of a previous analysis
    Reset {
        #[command(flatten)]
        database: DatabaseArgs,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Delete the content of the cache directory
    Clean {
        #[arg(short = 'n', long)]
        dry_run: bool,
        #[arg(short, long)]
        quiet: bool,
    },
    /// Show the cache directory
    Dir,
}

#[derive(Subcommand)]
enum RunWithCommand {
    /// Use the database described by the local docker compose file
    Compose(RunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    brokenspoke_analyzer::utils::logging::init_logger(cli.color, cli.verbose);
    colored::control::set_override(cli.color);

    info!("Loading configuration from: {}", cli.config.display());
    let config = if cli.config.exists() {
        Config::load(Some(cli.config.as_path())).context("Failed to load configuration")?
    } else {
        info!(
            "Config file {} not found, using default configuration",
            cli.config.display()
        );
        Config::load(None).context("Failed to load configuration")?
    };

    match cli.command {
        Commands::Prepare { location, flags } => {
            cmd_prepare(&config, location.location(), &flags).await?;
        }
        Commands::Import { target } => cmd_import(&config, target).await?,
        Commands::Compute {
            city,
            data_dir,
            flags,
            database,
        } => {
            cmd_compute(&config, city.location(), &data_dir, &flags, &database).await?;
        }
        Commands::Export { target } => cmd_export(&config, target).await?,
        Commands::Configure { target } => cmd_configure(&config, target).await?,
        Commands::Cache { target } => cmd_cache(&config, target)?,
        Commands::Run(args) => {
            cmd_run(&config, &args, false).await?;
        }
        Commands::RunWith {
            target: RunWithCommand::Compose(args),
        } => {
            cmd_run(&config, &args, true).await?;
        }
    }

    Ok(())
}

async fn cmd_prepare(config: &Config, location: Location, flags: &PrepareFlags) -> Result<()> {
    let options = flags.options(config);
    let city = prepare(&location, &options)
        .await
        .context("Failed to prepare the city files")?;
    println!(
        "{}",
        format_success(&format!("Files ready in {}", city.files.dir.display()))
    );
    Ok(())
}

fn lodes_year(config: &Config, explicit: Option<u16>) -> Option<u16> {
    explicit.or(config.analysis.lodes_year)
}

async fn cmd_import(config: &Config, target: ImportCommand) -> Result<()> {
    let scripts_dir = config.paths.scripts_dir.as_path();

    match target {
        ImportCommand::All {
            location,
            data_dir,
            buffer,
            lodes_year: year,
            database,
        } => {
            let location = location
                .location()
                .validate_for_analysis()
                .context("Invalid city")?;
            let client = connect(config, &database).await?;
            let files = CityFiles::new(data_dir, location.slug());
            let options = ImportOptions {
                buffer: buffer.unwrap_or(config.analysis.buffer),
                lodes_year: lodes_year(config, year),
                city_speed_limit: None,
                processes: config.database.workers,
            };
            Ingestor::new(&client, scripts_dir)
                .import_all(&location, &files, &options)
                .await
                .context("Import failed")?;
        }
        ImportCommand::Neighborhood {
            city,
            data_dir,
            buffer,
            database,
        } => {
            let location = city.location();
            location.require_region_for_usa()?;
            let client = connect(config, &database).await?;
            let files = CityFiles::new(data_dir, location.slug());
            let output_srid = files.output_srid()?;
            Ingestor::new(&client, scripts_dir)
                .import_neighborhood(
                    &location,
                    &files,
                    output_srid,
                    buffer.unwrap_or(config.analysis.buffer),
                )
                .await
                .context("Neighborhood import failed")?;
        }
        ImportCommand::Jobs {
            state_abbreviation,
            data_dir,
            lodes_year: year,
            database,
        } => {
            Validator::validate_state_abbreviation(&state_abbreviation)?;
            let files = CityFiles::new(data_dir, String::new());
            let year = lodes_year(config, year)
                .or_else(|| files.prepared_lodes_year(&state_abbreviation))
                .context("A LODES year is required")?;
            let client = connect(config, &database).await?;
            Ingestor::new(&client, scripts_dir)
                .import_jobs(&state_abbreviation, year, &files)
                .await
                .context("Jobs import failed")?;
        }
        ImportCommand::Osm {
            location,
            data_dir,
            database,
        } => {
            let location = location
                .location()
                .validate_for_analysis()
                .context("Invalid city")?;
            let client = connect(config, &database).await?;
            let files = CityFiles::new(data_dir, location.slug());
            let output_srid = files.output_srid()?;
            let state = location.state_info();
            let options = ImportOptions {
                buffer: config.analysis.buffer,
                lodes_year: None,
                city_speed_limit: None,
                processes: config.database.workers,
            };
            Ingestor::new(&client, scripts_dir)
                .import_osm_data(
                    &files,
                    output_srid,
                    &state.fips,
                    &location.city_fips(),
                    &options,
                )
                .await
                .context("OSM import failed")?;
        }
    }

    println!("{}", format_success("Import complete"));
    Ok(())
}

async fn cmd_compute(
    config: &Config,
    location: Location,
    data_dir: &Path,
    flags: &ComputeFlags,
    database: &DatabaseArgs,
) -> Result<()> {
    location.require_region_for_usa()?;
    let url = database.resolve(config)?;
    let files = CityFiles::new(data_dir, location.slug());

    let settings = ComputeSettings {
        output_srid: files.output_srid()?,
        buffer: flags.buffer(config),
        max_trip_distance: flags.max_trip_distance(config),
        state_default_speed: None,
        city_default_speed: None,
        import_jobs: location.is_usa(),
        experimental: config.analysis.experimental,
        workers: config.database.workers,
    };
    compute(&url, &config.paths.scripts_dir, settings, &flags.parts())
        .await
        .context("Compute failed")?;

    println!("{}", format_success("Compute complete"));
    Ok(())
}

async fn cmd_export(config: &Config, target: ExportCommand) -> Result<()> {
    let (dir, with_bundle, database) = match target {
        ExportCommand::Local {
            city,
            export_dir,
            with_bundle,
            database,
        } => {
            let location = city.location();
            let base = export_dir.unwrap_or_else(|| config.paths.export_dir.clone());
            let dir = create_calver_directories(
                &base,
                &location.country,
                &location.city,
                location.region.as_deref(),
                None,
            )?;
            (dir, with_bundle, database)
        }
        ExportCommand::LocalCustom {
            export_dir,
            with_bundle,
            database,
        } => (export_dir, with_bundle, database),
    };

    let client = connect(config, &database).await?;
    let exporter = LocalExporter::new(&dir)?;
    let manifest = exporter
        .export_all(&client, with_bundle)
        .await
        .context("Export failed")?;

    println!(
        "{}",
        format_success(&format!(
            "{} files exported to {}",
            manifest.files.len(),
            manifest.export_dir.display()
        ))
    );
    if let Some(bundle) = &manifest.bundle {
        println!("{}", format_info(&format!("Bundle: {}", bundle.display())));
    }
    Ok(())
}

async fn cmd_configure(config: &Config, target: ConfigureCommand) -> Result<()> {
    match target {
        ConfigureCommand::Docker { database } => {
            let client = connect(config, &database).await?;
            SchemaManager::new(&client)
                .configure_docker_db()
                .await
                .context("Failed to configure the docker database")?;
        }
        ConfigureCommand::Custom {
            cores,
            memory_mb,
            pguser,
            database,
        } => {
            let client = connect(config, &database).await?;
            SchemaManager::new(&client)
                .configure_db(cores, memory_mb, &pguser)
                .await
                .context("Failed to configure the database")?;
        }
        ConfigureCommand::System {
            cores,
            memory_mb,
            database,
        } => {
            let client = connect(config, &database).await?;
            SchemaManager::new(&client)
                .configure_system(cores, memory_mb)
                .await
                .context("Failed to configure system parameters")?;
        }
        ConfigureCommand::Extensions { database } => {
            let client = connect(config, &database).await?;
            SchemaManager::new(&client)
                .configure_extensions()
                .await
                .context("Failed to configure extensions")?;
        }
        ConfigureCommand::Schemas { pguser, database } => {
            let client = connect(config, &database).await?;
            SchemaManager::new(&client)
                .configure_schemas(&pguser)
                .await
                .context("Failed to configure schemas")?;
        }
        ConfigureCommand::Reset { database } => {
            warn!("Resetting database - all analysis tables will be lost");
            let client = connect(config, &database).await?;
            let dropped = SchemaManager::new(&client)
                .reset_tables()
                .await
                .context("Failed to drop tables")?;
            info!("{dropped} tables dropped");
        }
    }

    println!("{}", format_success("Database configured"));
    Ok(())
}

fn cache_dir(config: &Config) -> Result<PathBuf> {
    match &config.cache.dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(user_cache_dir()?),
    }
}

fn cmd_cache(config: &Config, target: CacheCommand) -> Result<()> {
    let dir = cache_dir(config)?;
    match target {
        CacheCommand::Dir => println!("{}", dir.display()),
        CacheCommand::Clean { dry_run, quiet } => {
            info!("Cleaning cache {}", dir.display());
            let report = delete_folder_contents(&dir, true, dry_run)
                .with_context(|| format!("Failed to clean {}", dir.display()))?;
            if !quiet {
                if dry_run {
                    println!("{}", format_header("=== DRY RUN PREVIEW ==="));
                }
                println!(
                    "Deleted {} items (including hidden)",
                    report.total_item_count()
                );
                println!("Space reclaimed: {} GB", report.space_gb());
                for error in &report.errors {
                    warn!("{error}");
                }
            }
            info!("Cache cleaned");
        }
    }
    Ok(())
}

async fn cmd_run(config: &Config, args: &RunArgs, with_compose: bool) -> Result<()> {
    let location = args.location.location();
    let url = if with_compose {
        DatabaseUrl::parse(&config.compose.database_url).context("Invalid compose database URL")?
    } else {
        args.database.resolve(config)?
    };

    let mut options = RunOptions::from_config(config, url);
    options.prepare = args.prepare.options(config);
    options.buffer = args.compute.buffer(config);
    options.max_trip_distance = args.compute.max_trip_distance(config);
    options.parts = args.compute.parts();
    options.exporter = args.with_export;
    options.with_bundle = args.with_bundle;
    if let Some(dir) = &args.export_dir {
        options.export_dir = dir.clone();
    }

    let orchestrator = PipelineOrchestrator::new(options);
    let result = if with_compose {
        orchestrator
            .run_with_compose(&location, &config.compose)
            .await
    } else {
        orchestrator.run(&location).await
    };
    let summary = result.context("Analysis failed")?;

    report_run(&summary);
    Ok(())
}

fn report_run(summary: &RunSummary) {
    println!(
        "{}",
        format_info(&format!("City files: {}", summary.city.files.dir.display()))
    );
    if let Some(manifest) = &summary.export {
        println!(
            "{}",
            format_info(&format!(
                "Results: {} ({} files)",
                manifest.export_dir.display(),
                manifest.files.len()
            ))
        );
    }
}

async fn connect(config: &Config, database: &DatabaseArgs) -> Result<PostgresClient> {
    let url = database.resolve(config)?;
    let client = PostgresClient::connect(&url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    client.ping().await.context("Database connection failed")?;
    Ok(client)
}
