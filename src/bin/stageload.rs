use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use stageload::bulkload::{
    BulkLoader, ColumnDescriptor, LoadSummary, LoadTransaction, SchemaDescriptor,
};
use stageload::config::AppConfig;
use stageload::databricks::{ApiClient, DatabricksFiles, StatementConnector};
use stageload::staging::{StagingClient, StagingVolumeManager};

#[derive(Parser)]
#[command(name = "stageload", about = "Staged bulk loads into Databricks tables")]
struct Cli {
    /// Path to config file
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a CSV file into the configured table
    Load {
        /// CSV file to load
        input: PathBuf,
        /// Field delimiter of the input file
        #[arg(long, default_value_t = ',')]
        input_delimiter: char,
        /// The input has no header row
        #[arg(long)]
        no_header: bool,
        /// Input value that stands for NULL
        #[arg(long, default_value = "")]
        null_value: String,
    },
    /// List staging volumes under the configured catalog and schema
    Volumes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let now = Instant::now();
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)?;
    config.validate()?;

    tracing::info!("Configuration '{}' loaded successfully", &cli.config);
    tracing::debug!("{:?}", config);

    let databricks = &config.databricks;
    let api = ApiClient::for_host(
        &databricks.server_hostname,
        databricks.credentials.clone(),
        databricks.user_agent.as_ref(),
    )?;
    let files: Arc<dyn StagingClient> = Arc::new(DatabricksFiles::new(api.clone()));

    match cli.command {
        Command::Volumes => {
            let volumes = files
                .list_volumes(&databricks.catalog_name, &databricks.schema_name)
                .await?;
            for name in volumes
                .iter()
                .filter(|v| v.starts_with(&config.staging.volume_name_prefix))
            {
                println!("{}.{}.{}", databricks.catalog_name, databricks.schema_name, name);
            }
        }
        Command::Load {
            input,
            input_delimiter,
            no_header,
            null_value,
        } => {
            let warehouse_id = databricks
                .warehouse_id()
                .ok_or_else(|| anyhow!("no warehouse id in {}", databricks.http_path))?;
            let connector = Arc::new(StatementConnector::new(
                api,
                warehouse_id,
                &databricks.catalog_name,
                &databricks.schema_name,
            ));
            let staging = StagingVolumeManager::new(
                files,
                &config.staging.volume_name_prefix,
                config.staging.cleanup(),
            );
            let loader = BulkLoader::new(staging, connector, config.load_options()?);

            let delimiter = u8::try_from(input_delimiter)
                .map_err(|_| anyhow!("input delimiter must be ASCII"))?;
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(delimiter)
                .has_headers(!no_header)
                .from_reader(
                    File::open(&input)
                        .with_context(|| format!("cannot open {}", input.display()))?,
                );

            let schema = match config.load.input_schema() {
                Some(schema) => schema,
                None if !no_header => SchemaDescriptor::new(
                    reader
                        .headers()?
                        .iter()
                        .map(|name| ColumnDescriptor::declared(name, "string"))
                        .collect(),
                ),
                None => return Err(anyhow!("load.columns is required for input without a header")),
            };

            let transaction = loader.begin(schema, 1).await?;
            match load_records(&transaction, &mut reader, &null_value).await {
                Ok(summary) => {
                    transaction.commit().await?;
                    tracing::info!(
                        "Loaded {} rows from {} in {}ms",
                        summary.rows,
                        input.display(),
                        now.elapsed().as_millis()
                    );
                }
                Err(e) => {
                    transaction.abort().await;
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

async fn load_records(
    transaction: &LoadTransaction,
    reader: &mut csv::Reader<File>,
    null_value: &str,
) -> Result<LoadSummary> {
    let mut task = transaction.open_task(0).await?;
    let result: Result<LoadSummary> = async {
        for record in reader.records() {
            let record = record?;
            let row: Vec<Option<&str>> = record
                .iter()
                .map(|field| (field != null_value).then_some(field))
                .collect();
            task.add_row(&row)?;
        }
        Ok(task.finish().await?)
    }
    .await;
    task.close().await;
    result
}
