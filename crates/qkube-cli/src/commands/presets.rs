//! Presets command - List supported Kubernetes versions

use std::path::PathBuf;

use clap::{Args, ValueEnum};

use qkube_common::PresetCatalog;

use crate::{config, Result};

/// List supported Kubernetes versions and their images
#[derive(Args, Debug)]
pub struct PresetsArgs {
    /// Preset catalog YAML replacing the built-in presets
    #[arg(long)]
    pub presets: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

/// How presets are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned columns
    Table,
    /// YAML list of presets
    Yaml,
}

/// Run the presets command
pub fn run(args: PresetsArgs) -> Result<()> {
    let catalog = config::load_presets(args.presets.as_deref())?;
    print!("{}", render(&catalog, args.output)?);
    Ok(())
}

fn render(catalog: &PresetCatalog, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => {
            let presets: Vec<_> = catalog.iter().collect();
            Ok(serde_yaml::to_string(&presets)?)
        }
        OutputFormat::Table => {
            let mut out = format!(
                "{:<10} {:<14} {:<14} {:<10} {:<10} {}\n",
                "VERSION", "MASTER IMAGE", "NODE IMAGE", "MASTER", "NODE", "CNI PATH"
            );
            for preset in catalog.iter() {
                out.push_str(&format!(
                    "{:<10} {:<14} {:<14} {:<10} {:<10} {}\n",
                    preset.version,
                    preset.master_image_id,
                    preset.node_image_id,
                    format!("{}c/{}M", preset.master_cpu, preset.master_memory),
                    format!("{}c/{}M", preset.node_cpu, preset.node_memory),
                    preset.cni_manifest_path
                ));
            }
            Ok(out)
        }
    }
}
