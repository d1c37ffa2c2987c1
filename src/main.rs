use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use webmap_print::services::{Quality, ScaleMode};
use webmap_print::templates::{SelectionResults, TemplateSelection};
use webmap_print::webmap::MapState;
use webmap_print::{PrintCoordinator, PrintRequest, PrintServiceConfig};

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,
    /// YAML print service configuration
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the configured geoprocessing task url
    #[clap(long, global = true)]
    service_url: Option<String>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show formats, layouts and templates published by the service
    Info,
    Layouts {
        #[clap(short, long)]
        template: String,
    },
    Templates,
    Print {
        /// Map state JSON file
        #[clap(short, long)]
        map: PathBuf,
        /// Server template; repeat to print several
        #[clap(short, long)]
        template: Vec<String>,
        /// Configured user template id, resolved against --selection
        #[clap(long, conflicts_with = "template")]
        user_template: Option<String>,
        /// Selection results JSON file for conditional templates
        #[clap(long)]
        selection: Option<PathBuf>,
        #[clap(long)]
        layout: Option<String>,
        #[clap(short, long)]
        format: Option<String>,
        #[clap(long)]
        title: Option<String>,
        #[clap(long)]
        author: Option<String>,
        #[clap(long)]
        copyright: Option<String>,
        /// Print at this scale instead of the map scale
        #[clap(short, long)]
        scale: Option<f64>,
        /// Fit the map extent instead of keeping a scale
        #[clap(long, conflicts_with = "scale")]
        fit_extent: bool,
        /// Quality preset name or dpi
        #[clap(short, long)]
        quality: Option<String>,
        #[clap(long)]
        legend: bool,
        /// Write the assembled web map JSON to this file
        #[clap(long)]
        dump_webmap: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    let mut config = match &args.config {
        Some(path) => PrintServiceConfig::from_file(path)?,
        None => PrintServiceConfig::default(),
    }
    .with_env_overrides();
    if let Some(url) = args.service_url {
        config.service_url = Some(url);
    }

    let coordinator = PrintCoordinator::from_config(config)?;

    match args.command {
        Commands::Info => {
            let info = coordinator.service_info().await?;
            for warning in info.warnings() {
                warn!("{}", warning);
            }
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Layouts { template } => {
            info!("Listing layouts of template: {}", template);
            for layout in coordinator.list_layouts(&template).await? {
                println!("{}", layout);
            }
        }
        Commands::Templates => {
            for template in coordinator.list_templates().await? {
                println!("{}", template);
            }
        }
        Commands::Print {
            map,
            template,
            user_template,
            selection,
            layout,
            format,
            title,
            author,
            copyright,
            scale,
            fit_extent,
            quality,
            legend,
            dump_webmap,
        } => {
            let map_state: MapState = serde_json::from_str(
                &fs::read_to_string(&map)
                    .with_context(|| format!("reading map state {}", map.display()))?,
            )?;

            let template = match user_template {
                Some(id) => {
                    let results: SelectionResults = match selection {
                        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
                        None => SelectionResults::default(),
                    };
                    coordinator.template_for(&id, &results)?
                }
                None => match template.len() {
                    0 => anyhow::bail!("either --template or --user-template is required"),
                    1 => TemplateSelection::Single(template[0].clone()),
                    _ => TemplateSelection::Candidates(template),
                },
            };

            let layout = layout
                .or_else(|| coordinator.config().default_layout.clone())
                .context("no --layout given and no default_layout configured")?;
            let format = format
                .or_else(|| coordinator.config().default_format.clone())
                .unwrap_or_else(|| "PDF".to_string());

            let mut text_elements = IndexMap::new();
            for (name, value) in [("title", title), ("author", author), ("copyright", copyright)] {
                if let Some(value) = value {
                    text_elements.insert(name.to_string(), value);
                }
            }

            let scale_mode = match (scale, fit_extent) {
                (Some(scale), _) => ScaleMode::Force(scale),
                (None, true) => ScaleMode::Extent,
                (None, false) => ScaleMode::Keep,
            };
            let quality = quality.map(|q| match q.parse::<u32>() {
                Ok(dpi) => Quality::Dpi(dpi),
                Err(_) => Quality::Preset(q),
            });

            let request = PrintRequest {
                template,
                layout,
                format,
                text_elements,
                quality,
                scale_mode,
                extent: None,
                lods: None,
                include_legend: legend,
            };

            info!("Printing {} on layout {}", map.display(), request.layout);
            let task = coordinator.print(map_state, request);
            let cancel = task.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling print");
                    cancel.cancel();
                }
            });

            let output = task.wait().await?;
            if let Some(path) = dump_webmap {
                fs::write(&path, output.web_map.to_json_string()?)
                    .with_context(|| format!("writing web map to {}", path.display()))?;
            }
            println!("{}", output.url);
        }
    }

    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_ref()
        .unwrap_or(&"info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("hyper=off,reqwest=warn,{}", log_level)))
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}
