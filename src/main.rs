use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use base64::Engine as Base64Engine;
use clap::Parser;
use log::info;

use domshot::{ComposeOptions, DomShot, ExitPolicy, HostConfig, PhantomHost, HOST_PROGRAM_ENV};

/// Render HTML, CSS and page script to a PNG with a headless browser.
#[derive(Debug, Parser)]
#[command(name = "domshot", version, about)]
struct Cli {
    /// Input files (.css, .js, .html), loaded in order
    files: Vec<PathBuf>,

    /// Where to write the image
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = 800)]
    width: u32,

    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Inline page script, appended after the input files (repeatable)
    #[arg(long = "js", value_name = "CODE")]
    inline_js: Vec<String>,

    /// Page global as NAME=JSON (repeatable)
    #[arg(long = "var", value_name = "NAME=JSON")]
    vars: Vec<String>,

    /// Host executable
    #[arg(long, env = HOST_PROGRAM_ENV, default_value = "phantomjs")]
    phantomjs: PathBuf,

    /// Kill the host after this many milliseconds (0 disables)
    #[arg(long, default_value_t = 30000)]
    timeout_ms: u64,

    /// Do not fail the render on console or error output from the page
    #[arg(long)]
    lenient: bool,

    /// Always exit 0 from the script, even if the capture failed
    #[arg(long)]
    unconditional_exit: bool,

    /// Print the composed script instead of rendering
    #[arg(long)]
    print_script: bool,

    /// Execute the script against the built-in mock host and print the transcript
    #[arg(long)]
    dry_run: bool,

    /// Write the image to stdout as base64 instead of to --output
    #[arg(long)]
    base64: bool,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_var(spec: &str) -> anyhow::Result<(&str, serde_json::Value)> {
    let (name, json) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=JSON, got {:?}", spec))?;
    let value = serde_json::from_str(json)
        .with_context(|| format!("value of --var {} is not valid JSON", name))?;
    Ok((name, value))
}

fn build_shot(cli: &Cli) -> anyhow::Result<DomShot> {
    let mut shot = DomShot::new();
    shot.set_clip(cli.width, cli.height);
    shot.set_options(ComposeOptions {
        exit_policy: if cli.unconditional_exit {
            ExitPolicy::Unconditional
        } else {
            ExitPolicy::VerifyRender
        },
        ..Default::default()
    });
    shot.load_files(&cli.files)?;
    for js in &cli.inline_js {
        shot.load_js(js);
    }
    for spec in &cli.vars {
        let (name, value) = parse_var(spec)?;
        shot.set_global(name, &value)?;
    }
    Ok(shot)
}

#[cfg(feature = "dry-run")]
fn dry_run(shot: &DomShot, target: &Path) -> anyhow::Result<()> {
    let transcript = domshot::DryRunHost::new().run(&shot.script(target)?)?;
    println!("{}", serde_json::to_string_pretty(&transcript)?);
    Ok(())
}

#[cfg(not(feature = "dry-run"))]
fn dry_run(_shot: &DomShot, _target: &Path) -> anyhow::Result<()> {
    bail!("this build of domshot has no dry-run support (feature `dry-run`)")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let shot = build_shot(&cli)?;
    let script_target = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("domshot.png"));

    if cli.print_script {
        print!("{}", shot.script(&script_target)?);
        return Ok(());
    }

    if cli.dry_run {
        return dry_run(&shot, &script_target);
    }

    let host = PhantomHost::new(HostConfig {
        program: cli.phantomjs.clone(),
        timeout_ms: cli.timeout_ms,
        strict_output: !cli.lenient,
        ..Default::default()
    });

    if cli.base64 {
        let png = shot.render(&host)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", encoded)?;
        return Ok(());
    }

    let Some(output) = cli.output.as_ref() else {
        bail!("--output is required unless --print-script, --dry-run or --base64 is given");
    };
    shot.render_to_file(&host, output)?;
    info!("wrote {}", output.display());
    Ok(())
}
