use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use ggpk::bundle::BundleReader;
use ggpk::config::Config;
use ggpk::container::{GgpkReader, Pattern};
use ggpk::convert::DdsConverter;
use ggpk::driver::{self, DriverOptions};
use ggpk::pipeline::{self, PipelineOptions};
use ggpk::schema::{Schema, DEFAULT_PRODUCT_BIT};
use ggpk::server::{self, AppState};
use ggpk::table::decode::{decode as decode_table, derive_table_name};

#[derive(Parser)]
#[command(name = "ggpk", version, about = "Reader and decoder chain for a GGPK-style game archive")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the outer container archive's logical paths (§4.A)
    ListContainer {
        archive: PathBuf,
        /// Case-insensitive substring filter
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Extract one or more files out of the outer container archive (§4.A)
    ExtractContainer {
        archive: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Case-insensitive substring filter; omit to extract everything
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Enumerate logical paths inside the bundle subsystem (§4.B)
    ListBundle {
        archive: PathBuf,
        #[arg(long)]
        bundle_tool: PathBuf,
    },
    /// Run the extraction pipeline: bundle extract, optional DDS
    /// conversion, optional table decode, cleanup (§4.E)
    Extract {
        archive: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        bundle_tool: PathBuf,
        /// One of the fixed presets (all, data, textures, audio, ui,
        /// items, skills, passives); takes precedence over --pattern
        #[arg(long)]
        preset: Option<String>,
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long)]
        schema: Option<PathBuf>,
        #[arg(long)]
        dds_tool: Option<PathBuf>,
        #[arg(long)]
        auto_convert: bool,
        #[arg(long, default_value = "png")]
        image_format: String,
        /// By default, localized-language paths are excluded (§4.B)
        #[arg(long)]
        include_languages: bool,
    },
    /// Decode a single `.datc64` file against a schema (§4.C)
    DecodeTable {
        input: PathBuf,
        #[arg(long)]
        schema: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Decode every `.datc64` file under a directory in parallel (§4.D)
    DecodeBatch {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        no_cache: bool,
    },
    /// Start the HTTP backend query surface the GUI consumes (§4.F)
    Serve {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
        #[arg(long)]
        bundle_tool: PathBuf,
        #[arg(long)]
        dds_tool: PathBuf,
    },
}

fn to_pattern(pattern: Option<String>) -> Option<Pattern> {
    pattern.map(Pattern::Substring)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    match Cli::parse().command {
        // ── ListContainer ───────────────────────────────────────────────
        Commands::ListContainer { archive, pattern } => {
            let reader = GgpkReader::open(&archive)?;
            let pat = to_pattern(pattern);
            let paths = reader.list(pat.as_ref())?;
            for path in &paths {
                println!("{path}");
            }
            println!("── {} file(s) ──", paths.len());
        }

        // ── ExtractContainer ────────────────────────────────────────────
        Commands::ExtractContainer { archive, output, pattern } => {
            let reader = GgpkReader::open(&archive)?;
            let index = reader.build_index()?;
            let pat = to_pattern(pattern);
            let mut extracted = 0usize;
            for descriptor in &index {
                if let Some(p) = &pat {
                    if !p.matches(&descriptor.logical_path) {
                        continue;
                    }
                }
                let dest = output.join(&descriptor.logical_path);
                reader.extract(descriptor, &dest)?;
                extracted += 1;
            }
            println!("Extracted {extracted} file(s) → {}", output.display());
        }

        // ── ListBundle ──────────────────────────────────────────────────
        Commands::ListBundle { archive, bundle_tool } => {
            let bundle_reader = BundleReader::new(bundle_tool);
            let (bundle_count, file_count, paths) = bundle_reader.list_files(&archive).await?;
            for path in &paths {
                println!("{path}");
            }
            println!("── bundles: {bundle_count}  files: {file_count} ──");
        }

        // ── Extract (pipeline) ──────────────────────────────────────────
        Commands::Extract {
            archive,
            output,
            bundle_tool,
            preset,
            pattern,
            schema,
            dds_tool,
            auto_convert,
            image_format,
            include_languages,
        } => {
            let bundle_reader = BundleReader::new(bundle_tool);
            let pattern = preset
                .as_deref()
                .and_then(pipeline::preset_pattern)
                .map(str::to_string)
                .or(pattern)
                .ok_or("either --preset or --pattern is required")?;

            let dds_converter = dds_tool.map(DdsConverter::new);
            let schema = match schema {
                Some(path) => Some(Arc::new(Schema::load(path)?)),
                None => None,
            };

            let options = PipelineOptions {
                exclude_languages: !include_languages,
                auto_convert_images: auto_convert,
                image_format,
            };

            let metrics = pipeline::run(
                &bundle_reader,
                &archive,
                &output,
                &pattern,
                dds_converter.as_ref(),
                schema,
                DEFAULT_PRODUCT_BIT,
                options,
            )
            .await?;

            println!("Extracted:        {}", metrics.extracted);
            println!("Images converted:  {} (failed: {})", metrics.images.converted, metrics.images.failed);
            println!("Tables decoded:    {} (failed: {})", metrics.data.parsed, metrics.data.failed);
            println!("Elapsed:           {} ms", metrics.elapsed_ms);
        }

        // ── DecodeTable ─────────────────────────────────────────────────
        Commands::DecodeTable { input, schema, output } => {
            let schema = Schema::load(&schema)?;
            let table_name = derive_table_name(&input.to_string_lossy());
            let tables = schema.tables_for_product(DEFAULT_PRODUCT_BIT);
            let table_def = tables
                .get(&table_name)
                .ok_or_else(|| format!("no schema entry for table '{table_name}'"))?;

            let bytes = std::fs::read(&input)?;
            let outcome = decode_table(&bytes, table_def)?;

            if let Some(warning) = &outcome.warning {
                eprintln!("warning: {warning}");
            }

            match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)?;
                    serde_json::to_writer_pretty(file, &outcome.rows)?;
                    println!("Decoded {} row(s) of '{}' → {}", outcome.row_count, table_name, path.display());
                }
                None => {
                    println!("{}", serde_json::to_string_pretty(&outcome.rows)?);
                }
            }
        }

        // ── DecodeBatch ─────────────────────────────────────────────────
        Commands::DecodeBatch { input, output, schema, filter, limit, concurrency, no_cache } => {
            let schema = Arc::new(Schema::load(&schema)?);
            let options = DriverOptions {
                filter,
                limit,
                concurrency: concurrency.unwrap_or_else(driver::default_concurrency),
                use_cache: !no_cache,
            };

            let report = driver::run_batch(&input, &output, schema, DEFAULT_PRODUCT_BIT, options)?;

            let mut decoded = 0;
            let mut cached = 0;
            let mut skipped = 0;
            let mut failed = 0;
            for result in &report.results {
                match &result.status {
                    ggpk::TaskStatus::Decoded { .. } => decoded += 1,
                    ggpk::TaskStatus::Cached => cached += 1,
                    ggpk::TaskStatus::Skipped(reason) => {
                        skipped += 1;
                        eprintln!("skipped {}: {reason}", result.input.display());
                    }
                    ggpk::TaskStatus::Failed(err) => {
                        failed += 1;
                        eprintln!("failed {}: {err}", result.input.display());
                    }
                }
            }
            println!(
                "decoded={decoded} cached={cached} skipped={skipped} failed={failed}  ({} ms)",
                report.elapsed_ms
            );
        }

        // ── Serve ───────────────────────────────────────────────────────
        Commands::Serve { config, addr, bundle_tool, dds_tool } => {
            let config = Config::load(&config)?;
            let schema = Schema::load(&config.schema_path)?;
            let state = AppState::new(config, schema, bundle_tool, dds_tool);
            let router = server::gen_router(state);

            let listener = tokio::net::TcpListener::bind(&addr).await?;
            println!("Listening on {addr}");
            axum::serve(listener, router).await?;
        }
    }

    Ok(())
}
