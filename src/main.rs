//! Command-line inspector for the active configuration.
//!
//! The source is selected from the environment exactly as a service using
//! the library would select it (`CONFIG_SOURCE`, `CONF_PROFILE`, `NACOS_*`).

use std::collections::BTreeMap;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use app_config::lifecycle::signals::shutdown_signal;
use app_config::observability::logging;
use app_config::{format, Configuration, Format, SourceKind};

#[derive(Parser)]
#[command(name = "app-config")]
#[command(about = "Inspect the configuration a service would load", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List section names
    Sections,
    /// Print one section
    Show {
        name: String,
        #[arg(short, long, value_enum, default_value_t = Output::Json)]
        output: Output,
    },
    /// Print a remote section every time it changes
    Watch { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    Json,
    Yaml,
    Toml,
}

impl From<Output> for Format {
    fn from(output: Output) -> Self {
        match output {
            Output::Json => Format::Json,
            Output::Yaml => Format::Yaml,
            Output::Toml => Format::Toml,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init("app_config=info");
    let cli = Cli::parse();

    let config = Configuration::from_env().await?;
    tracing::debug!(?config, "Configuration ready");

    match cli.command {
        Commands::Sections => {
            for name in config.section_names() {
                println!("{name}");
            }
        }
        Commands::Show { name, output } => {
            let raw = config.raw_section(&name)?;
            let rendered = render(Format::from(output), &name, &raw)?;
            println!("{rendered}");
        }
        Commands::Watch { name } => {
            if config.kind() != SourceKind::Remote {
                eprintln!("Error: local configuration never changes; set CONFIG_SOURCE=remote");
                return Ok(());
            }
            println!("{}", render(Format::Json, &name, &config.raw_section(&name)?)?);

            let watched = name.clone();
            config.register_change_listener(&name, move |value: Value| {
                match render(Format::Json, &watched, &format::plain_value(value)) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(e) => eprintln!("Error: {e}"),
                }
            })?;

            shutdown_signal().await?;
            config.shutdown();
            tracing::info!("Shutdown complete");
        }
    }

    Ok(())
}

/// Render `{name: value}` so every format, TOML included, has a table root.
fn render(format: Format, name: &str, value: &Value) -> Result<String, Box<dyn std::error::Error>> {
    let wrapped = BTreeMap::from([(name, value)]);
    let bytes = format.marshal(&wrapped)?;
    Ok(String::from_utf8(bytes)?.trim_end().to_string())
}
