// This is free and unencumbered software released into the public domain.

#[cfg(not(feature = "std"))]
compile_error!("asimov-timelapse-cataloger requires the 'std' feature");

use asimov_module::SysexitsError::{self, *};
use asimov_timelapse_module::{
    cli,
    shared::{Camera, CameraError, DriverInfo},
};
use clap::Parser;
use clientele::StandardOptions;
use serde_json::json;
use std::error::Error as StdError;

/// Describes video capture devices: driver, cropping, formats, probe results.
#[derive(Debug, Parser)]
struct Options {
    #[clap(flatten)]
    flags: StandardOptions,

    /// Device to describe (repeatable); defaults to every /dev/video* node
    #[arg(long, value_name = "DEVICE")]
    device: Vec<String>,

    #[arg(
        value_name = "FORMAT",
        short = 'o',
        long = "output",
        value_enum,
        default_value = "text"
    )]
    output: OutputFormat,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Jsonl,
}

pub fn main() -> Result<SysexitsError, Box<dyn StdError>> {
    asimov_module::dotenv().ok();
    let args = asimov_module::args_os()?;
    let options = Options::parse_from(args);

    if options.flags.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(EX_OK);
    }

    if options.flags.license {
        print!("{}", include_str!("../../UNLICENSE"));
        return Ok(EX_OK);
    }

    #[cfg(feature = "tracing")]
    asimov_module::init_tracing_subscriber(&options.flags).expect("failed to initialize logging");

    let exit_code = match run_cataloger(&options) {
        Ok(()) => EX_OK,
        Err(err) => cli::handle_error(&err, &options.flags),
    };

    Ok(exit_code)
}

fn run_cataloger(options: &Options) -> Result<(), CameraError> {
    let explicit = !options.device.is_empty();
    let devices = if explicit {
        options.device.clone()
    } else {
        cli::info_user(&options.flags, "enumerating video devices");
        video_nodes()
    };

    if devices.is_empty() {
        cli::warn_user(&options.flags, "no video devices found");
        return Ok(());
    }

    for device in devices {
        let info = match describe(&device) {
            Ok(info) => info,
            Err(err) if explicit => return Err(err),
            Err(err) => {
                cli::warn_user_with_error(&options.flags, &format!("skipping {device}"), &err);
                continue;
            },
        };

        match options.output {
            OutputFormat::Text => print_text(&device, &info),
            OutputFormat::Jsonl => {
                let mut value = json!({ "device": device });
                if let (Some(map), Ok(serde_json::Value::Object(fields))) =
                    (value.as_object_mut(), serde_json::to_value(&info))
                {
                    map.extend(fields);
                }
                println!("{value}");
            },
        }
    }

    Ok(())
}

fn describe(device: &str) -> Result<DriverInfo, CameraError> {
    let mut camera = Camera::open(device)?;
    camera.describe()
}

fn video_nodes() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    let mut nodes: Vec<(u32, String)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let index = name.strip_prefix("video")?.parse().ok()?;
            Some((index, format!("/dev/{name}")))
        })
        .collect();
    nodes.sort();
    nodes.into_iter().map(|(_, path)| path).collect()
}

fn print_text(device: &str, info: &DriverInfo) {
    println!("{device}: {} \"{}\" ({}) v{}", info.driver, info.card, info.bus_info, info.version);
    println!("  capabilities: {:#010x}", info.capabilities);
    match &info.cropping {
        Some(crop) => println!(
            "  cropping: bounds {}, default {}, pixel aspect {}:{}",
            crop.bounds, crop.default_rect, crop.pixel_aspect.0, crop.pixel_aspect.1
        ),
        None => println!("  cropping: not reported"),
    }
    for format in &info.formats {
        println!("  format: {} ({})", format.fourcc, format.description);
    }
    let accepted: Vec<String> = info.accepted.iter().map(ToString::to_string).collect();
    println!("  accepted: {}", accepted.join(", "));
}
