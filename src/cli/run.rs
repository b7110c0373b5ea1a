// src/cli/run.rs
// PNG in, antialiased PNG out, on the software device

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};

use super::args::{CliConfig, USAGE};
use crate::assets::DirectoryAssets;
use crate::config::{InputMode, MlaaConfig};
use crate::device::{GraphicsDevice, RenderTargetDesc};
use crate::pipeline::Mlaa;
use crate::software::SoftwareDevice;
use crate::storage::ExternalStorage;
use crate::util::{read_png_rgba8, write_png_rgba8};

/// Config file (when given) with command-line overrides applied on top
pub fn resolve_config(cli: &CliConfig) -> Result<MlaaConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config at {}", path.display()))?;
            MlaaConfig::from_json_str(&text)?
        }
        None => MlaaConfig::default(),
    };
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    if let Some(steps) = cli.max_search_steps {
        config.max_search_steps = steps;
    }
    if let Some(policy) = cli.policy {
        config.error_policy = policy;
    }
    config.validate()?;
    Ok(config)
}

/// Edge map with opaque alpha so viewers show it
fn visible_edges(mut rgba: Vec<u8>) -> Vec<u8> {
    rgba.chunks_exact_mut(4).for_each(|px| px[3] = 255);
    rgba
}

fn read_depth(path: &Path, width: u32, height: u32) -> Result<Vec<f32>> {
    let image = read_png_rgba8(path)?;
    ensure!(
        (image.width, image.height) == (width, height),
        "depth image is {}x{}, color image is {}x{}",
        image.width,
        image.height,
        width,
        height
    );
    Ok(image.data.chunks_exact(4).map(|px| px[0] as f32 / 255.0).collect())
}

/// Entry point of the `mlaa` binary (argv without the program name).
pub fn run_cli(args: &[String]) -> Result<()> {
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return Ok(());
    }
    let cli = CliConfig::parse(args)?;
    run(&cli)
}

/// Run the pipeline once as described by `cli`.
pub fn run(cli: &CliConfig) -> Result<()> {
    let config = resolve_config(cli)?;
    let image = read_png_rgba8(&cli.input)?;
    let (width, height) = (image.width, image.height);

    let device = SoftwareDevice::new();
    let source = device.create_color_texture(width, height, &image.data)?;
    let input = match cli.mode {
        InputMode::Depth => {
            let path = cli.depth.as_deref().context("--mode depth needs --depth")?;
            let depth = read_depth(path, width, height)?;
            device.create_depth_texture(width, height, &depth)?
        }
        InputMode::Luma | InputMode::Color => source.clone(),
    };
    let destination = device.create_render_target(&RenderTargetDesc {
        label: "mlaa.output".to_string(),
        width,
        height,
    })?;
    let surface = device.surface_level(&destination, 0)?;

    let assets = DirectoryAssets::new(&cli.assets);
    let mut mlaa = Mlaa::with_config(
        &device,
        width,
        height,
        ExternalStorage::none(),
        &assets,
        config,
    )?;
    mlaa.run(&input, &source, &surface, cli.mode)?;

    write_png_rgba8(&cli.output, &device.read_rgba8(&destination), width, height)?;
    if let Some(path) = &cli.edges {
        let edges = visible_edges(device.read_rgba8(mlaa.edge_texture()));
        write_png_rgba8(path, &edges, width, height)?;
    }

    log::info!(
        target: "mlaa",
        "{} -> {} ({}x{}, mode {}, threshold {}, {} search steps)",
        cli.input.display(),
        cli.output.display(),
        width,
        height,
        cli.mode,
        mlaa.threshold(),
        mlaa.max_search_steps()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorPolicy;
    use std::path::PathBuf;

    fn cli(config: Option<PathBuf>) -> CliConfig {
        CliConfig {
            input: "in.png".into(),
            output: "out.png".into(),
            assets: "assets".into(),
            mode: InputMode::Luma,
            depth: None,
            threshold: Some(0.25),
            max_search_steps: None,
            edges: None,
            policy: Some(ErrorPolicy::Permissive),
            config,
        }
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mlaa.json");
        fs::write(&path, r#"{"threshold": 0.05, "max-search-steps": 32, "error-policy": "strict"}"#).unwrap();

        let config = resolve_config(&cli(Some(path))).unwrap();
        assert_eq!(config.threshold, 0.25);
        assert_eq!(config.max_search_steps, 32);
        assert_eq!(config.error_policy, ErrorPolicy::Permissive);
    }

    #[test]
    fn out_of_range_override_is_rejected() {
        let mut args = cli(None);
        args.threshold = Some(3.0);
        assert!(resolve_config(&args).is_err());
    }

    #[test]
    fn edge_map_is_made_opaque() {
        assert_eq!(visible_edges(vec![255, 0, 0, 0, 0, 0, 0, 0]), vec![255, 0, 0, 255, 0, 0, 0, 255]);
    }
}
