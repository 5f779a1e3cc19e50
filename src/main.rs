use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use image::RgbImage;
use log::{error, info};

use ql_labeler::{
    render_text_label, save_preview, save_previews, server, Dispatcher, Error, FontBook,
    ImageRef, ImageSource, LabelGeometry, LabelPage, LayoutEngine, LayoutMode, Media,
    Orientation, RasterEncoder, Settings, Sign, Transport, UsbTransport,
};

#[derive(Parser)]
#[command(
    name = "ql-labeler",
    version,
    about = "Lay out images and text on Brother QL labels and print them",
    long_about = "Lay out images and text on Brother QL labels and print them.\n\nPrinter, tape and encoding options are read from QL_* environment variables (a .env file is honoured)."
)]
struct Cli {
    /// Lay out and write previews without printing
    #[arg(long, global = true)]
    dry_run: bool,

    /// Directory for preview images
    #[arg(long, global = true, value_name = "DIR")]
    preview_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scale an image proportionally to the tape width
    Image {
        /// Image path or http(s) URL
        source: ImageRef,
        /// horizontal or vertical
        #[arg(default_value = "horizontal")]
        orientation: Orientation,
        /// Tape such as 62, 62red or 62x29
        tape: Option<Media>,
    },
    /// Stretch an image onto a 696x1044 label without rotating
    Fit {
        source: ImageRef,
    },
    /// Rotate an image and fit it as large as possible on one label
    Max {
        source: ImageRef,
    },
    /// Spread an image over a sequence of labels
    Split {
        source: ImageRef,
        /// Minimum number of labels
        #[arg(long, default_value_t = 5)]
        labels: u32,
        /// Height of the scaled image in pixels
        #[arg(long, value_name = "PX")]
        height: Option<u32>,
    },
    /// Print a text label with a date stamp
    Text {
        text: String,
    },
    /// Print the entry sign
    Sign {
        #[arg(long)]
        headline: Option<String>,
        #[arg(long)]
        emphasis: Option<String>,
    },
    /// Show the printer status
    Status,
    /// List attached Brother printers
    Devices,
    /// Cancel the current job
    Cancel,
    /// Run the HTTP label server
    Serve {
        /// Address to listen on
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{}:{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let mut settings = Settings::from_env()?;
    if let Some(dir) = cli.preview_dir {
        settings.preview_dir = dir;
    }
    let dry_run = cli.dry_run;

    match cli.command {
        Command::Image {
            source,
            orientation,
            tape,
        } => {
            if let Some(media) = tape {
                settings.printer = settings.printer.media(media);
                settings.geometry = LabelGeometry::for_media(media);
            }
            info!("Processing image in {} mode", orientation.as_str());
            print_layout(&settings, &source, orientation.mode(), dry_run)
        }
        Command::Fit { source } => print_layout(&settings, &source, LayoutMode::NoRotateFit, dry_run),
        Command::Max { source } => {
            print_layout(&settings, &source, LayoutMode::RotateMaxCoverage, dry_run)
        }
        Command::Split {
            source,
            labels,
            height,
        } => {
            settings.layout.min_labels = labels;
            settings.layout.working_height = height;
            print_layout(&settings, &source, LayoutMode::SplitSequence, dry_run)
        }
        Command::Text { text } => {
            let now = chrono::Local::now().naive_local();
            let image = render_text_label(&text, now, &fonts(&settings), settings.geometry)?;
            print_single(&settings, image, "text_label_preview.png", dry_run)
        }
        Command::Sign { headline, emphasis } => {
            let default = Sign::default();
            let sign = Sign::new(
                headline.unwrap_or(default.headline),
                emphasis.unwrap_or(default.emphasis),
            );
            let image = sign.render(&fonts(&settings), settings.geometry)?;
            print_single(&settings, image, "sign_preview.png", dry_run)
        }
        Command::Status => {
            let status = UsbTransport::new(settings.printer).status()?;
            println!("{}", status);
            Ok(())
        }
        Command::Devices => {
            let transport = UsbTransport::new(settings.printer);
            let probe = transport.probe();
            println!("{}", probe.message);
            for device in transport.devices() {
                println!("  {}", device);
            }
            Ok(())
        }
        Command::Cancel => UsbTransport::new(settings.printer).cancel(),
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                settings.bind = bind;
            }
            let transport = Arc::new(UsbTransport::new(settings.printer.clone()));
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(settings, transport))
        }
    }
}

fn fonts(settings: &Settings) -> FontBook {
    match &settings.font {
        Some(path) => FontBook::system().with_override(path),
        None => FontBook::system(),
    }
}

fn dispatcher(settings: &Settings) -> Result<Dispatcher<UsbTransport>, Error> {
    let encoder = RasterEncoder::new(settings.printer.clone())?;
    let transport = UsbTransport::new(settings.printer.clone());
    Ok(Dispatcher::new(encoder, transport, settings.page_pause))
}

fn print_layout(
    settings: &Settings,
    source: &ImageRef,
    mode: LayoutMode,
    dry_run: bool,
) -> Result<(), Error> {
    let image = ImageSource::new(settings.fetch_timeout).load(source)?;
    info!("Loaded {} ({}x{})", source, image.width(), image.height());

    let engine = LayoutEngine::new(settings.geometry, settings.layout);
    let pages = engine.layout(&image, mode)?;
    save_previews(&pages, &settings.preview_dir, mode);

    if dry_run {
        info!("Dry run, {} label(s) not printed", pages.len());
        return Ok(());
    }
    dispatcher(settings)?.dispatch(&pages)
}

fn print_single(settings: &Settings, image: RgbImage, preview: &str, dry_run: bool) -> Result<(), Error> {
    save_preview(&image, &settings.preview_dir, preview);
    if dry_run {
        info!("Dry run, label not printed");
        return Ok(());
    }
    dispatcher(settings)?.dispatch(&[LabelPage { index: 0, image }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn split_defaults_to_five_labels() {
        let cli = Cli::try_parse_from(["ql-labeler", "--dry-run", "split", "banner.png"]).unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Command::Split { labels, height, .. } => {
                assert_eq!(labels, 5);
                assert_eq!(height, None);
            }
            _ => panic!("expected split"),
        }
    }
}
