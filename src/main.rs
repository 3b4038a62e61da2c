//! emio - inspect and convert electron-microscopy image files.

use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use em_imageio::config::{AverageArgs, Cli, Command, ConvertArgs, ConvertStackArgs, InfoArgs, InvertArgs};
use em_imageio::{ImageHandler, ImageStack, Location, Result};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let handler = cli.external.build_handler();
    let result = match cli.command {
        Command::Info(args) => run_info(&handler, args),
        Command::Convert(args) => run_convert(&handler, args),
        Command::ConvertStack(args) => run_convert_stack(&handler, args),
        Command::Average(args) => run_average(&handler, args),
        Command::Invert(args) => run_invert(&handler, args),
    };
    handler.registry().close();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "em_imageio=debug,emio=debug"
    } else {
        "em_imageio=info,emio=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Info Command
// =============================================================================

#[derive(Serialize)]
struct FileInfo {
    location: String,
    exists: bool,
    format: &'static str,
    /// `[X, Y, Z, N]`
    dimensions: Option<[usize; 4]>,
    data_type: Option<&'static str>,
}

fn describe(handler: &ImageHandler, text: &str) -> Result<FileInfo> {
    let location = Location::parse(text)?;
    let dimensions = handler.get_dimensions(&location)?;
    let data_type = handler.get_data_type(&location)?;

    Ok(FileInfo {
        location: location.to_string(),
        exists: dimensions.is_some(),
        format: handler.registry().resolve_location(&location).name(),
        dimensions: dimensions.map(|d| [d.x, d.y, d.z, d.n]),
        data_type: data_type.map(|t| t.name()),
    })
}

fn run_info(handler: &ImageHandler, args: InfoArgs) -> Result<()> {
    for text in &args.locations {
        let info = describe(handler, text)?;
        if args.json {
            match serde_json::to_string(&info) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Cannot serialize info for {}: {}", text, e),
            }
            continue;
        }

        match (info.dimensions, info.data_type) {
            (Some([x, y, z, n]), Some(data_type)) => println!(
                "{}: {} {}x{}x{} x {} ({})",
                info.location, info.format, x, y, z, n, data_type
            ),
            _ => println!("{}: missing", info.location),
        }
    }
    Ok(())
}

// =============================================================================
// Conversion Commands
// =============================================================================

fn run_convert(handler: &ImageHandler, args: ConvertArgs) -> Result<()> {
    handler.convert(
        args.input.as_str(),
        args.output.as_str(),
        args.data_type.map(Into::into),
        None,
    )?;
    info!("Wrote {}", args.output);
    Ok(())
}

fn run_convert_stack(handler: &ImageHandler, args: ConvertStackArgs) -> Result<()> {
    handler.convert_stack_with_progress(&args.input, &args.output, args.first, args.last, |j, n| {
        debug!("Frame {}/{}", j, n)
    })?;
    info!("Wrote {}", args.output);
    Ok(())
}

fn run_average(handler: &ImageHandler, args: AverageArgs) -> Result<()> {
    let average = match args.locations.as_slice() {
        [single] if Location::parse(single)?.index().is_none() => handler.compute_average(single)?,
        many => handler.compute_average_of(many.iter())?,
    };
    handler
        .registry()
        .write(&ImageStack::from_frame(average), &args.output, false)?;
    info!("Wrote average to {}", args.output);
    Ok(())
}

fn run_invert(handler: &ImageHandler, args: InvertArgs) -> Result<()> {
    if args.stack {
        handler.invert_stack(&args.input, &args.output)?;
    } else {
        handler.invert(args.input.as_str(), args.output.as_str())?;
    }
    info!("Wrote {}", args.output);
    Ok(())
}
