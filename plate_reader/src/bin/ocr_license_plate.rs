use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossbeam::channel::{unbounded, Receiver, Sender};
use plate_reader::logging::setup_tracing;
use plate_reader::plate_detection::anpr::Anpr;
use plate_reader::plate_detection::bounding_box_render::BoundingBoxRender;
use plate_reader::plate_detection::debug_view::{DebugView, DebugWindow};
use plate_reader::plate_detection::image_reader::ImageReader;
use plate_reader::AnprConfig;
use rusted_pipe::buffers::synchronizers::timestamp::TimestampSynchronizer;
use rusted_pipe::graph::metrics::Metrics;
use rusted_pipe::graph::{
    build::{link, Graph},
    processor::{Node, SourceNode, TerminalNode},
};

/// Reads Mexican licence plates from a folder of images.
#[derive(Parser)]
#[command(name = "ocr_license_plate", version, about)]
struct Cli {
    /// Directory of licence plate images, or a single image
    #[arg(short, long)]
    input: PathBuf,

    /// Tesseract page segmentation mode
    #[arg(long, default_value_t = 7)]
    psm: u32,

    /// Remove foreground pixels touching the plate crop border before OCR
    #[arg(short, long)]
    clear_border: bool,

    /// Show intermediate images and wait for a key press on each
    #[arg(short, long)]
    debug: bool,

    /// Minimum plate width / height ratio
    #[arg(long, default_value_t = 1.3)]
    min_ar: f64,

    /// Maximum plate width / height ratio
    #[arg(long, default_value_t = 3.0)]
    max_ar: f64,

    /// Number of largest contours considered as plates
    #[arg(long, default_value_t = 5)]
    keep: usize,

    /// Directory where annotated images are written
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Tesseract language data directory
    #[arg(long, env = "TESSDATA_PREFIX")]
    tessdata: Option<String>,

    /// Tesseract language
    #[arg(long, default_value = "eng")]
    lang: String,

    /// Give up on an image after this many seconds. Ignored with --debug,
    /// which waits for key presses.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

impl Cli {
    fn config(&self) -> AnprConfig {
        AnprConfig {
            min_ar: self.min_ar,
            max_ar: self.max_ar,
            keep: self.keep,
            psm: self.psm,
            clear_border: self.clear_border,
        }
    }

    fn wait_timeout(&self) -> Option<Duration> {
        if self.debug {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }
}

/// The running graph and what `main` needs to follow it.
struct Pipeline {
    graph: Graph,
    done: Receiver<PathBuf>,
    images: usize,
    /// Present with --debug. Every window is shown from the main thread and
    /// the reader emits the next image only once `next_image` is signalled.
    window: Option<(DebugWindow, Sender<()>)>,
}

fn setup_graph(cli: &Cli) -> Result<Pipeline> {
    let config = cli.config();
    config.validate()?;

    if let Some(output) = cli.output.as_ref() {
        std::fs::create_dir_all(output)
            .with_context(|| format!("Cannot create output directory {}", output.display()))?;
    }

    let mut reader = ImageReader::new(&cli.input)?;
    let images = reader.len();

    let (debug, window) = if cli.debug {
        let (debug, window) = DebugView::channel();
        let (next_image_s, next_image_r) = unbounded();
        reader = reader.with_gate(next_image_r);
        (debug, Some((window, next_image_s)))
    } else {
        (DebugView::default(), None)
    };

    let anpr = Anpr::new(&config, cli.tessdata.as_deref(), &cli.lang, debug.clone())
        .context("Cannot set up the plate reader")?;
    let (done_s, done_r) = unbounded();

    // Node that reads the images from the input directory
    let mut image_input_node = SourceNode::create_common("image_input".to_string(), Box::new(reader));

    let timestamp_synch = TimestampSynchronizer::default();

    // Node that locates the plate and reads it.
    let mut anpr_node = Node::create_common(
        "anpr".to_string(),
        Box::new(anpr),
        true,
        1000,
        1000,
        Box::new(timestamp_synch.clone()),
        true,
    );

    // Node that prints the plates and draws them on the original image.
    let render_node = TerminalNode::create_common(
        "bbox_render".to_string(),
        Box::new(BoundingBoxRender::new(cli.output.clone(), debug, done_s)),
        true,
        1000,
        1000,
        Box::new(timestamp_synch.clone()),
        true,
    );

    // Image -> ANPR
    link(
        image_input_node.write_channel.writer.c1(),
        anpr_node
            .read_channel
            .channels
            .write()
            .map_err(|_| anyhow!("ANPR read channel lock is poisoned"))?
            .c1(),
    )
    .map_err(|e| anyhow!("Cannot link image input to ANPR: {e:?}"))?;

    // ANPR -> BoundingBox
    link(
        anpr_node.write_channel.writer.c1(),
        render_node
            .read_channel
            .channels
            .write()
            .map_err(|_| anyhow!("Render read channel lock is poisoned"))?
            .c1(),
    )
    .map_err(|e| anyhow!("Cannot link ANPR to render: {e:?}"))?;

    let mut graph = Graph::new(Metrics::no_metrics());

    // We need to start each node independently
    graph.start_terminal_node(render_node);
    graph.start_node(anpr_node);
    graph.start_source_node(image_input_node);

    Ok(Pipeline {
        graph,
        done: done_r,
        images,
        window,
    })
}

/// Blocks until `images` results arrived or one took longer than `timeout`.
/// Returns how many arrived.
fn wait_for_images(
    done: &Receiver<PathBuf>,
    window: Option<&(DebugWindow, Sender<()>)>,
    images: usize,
    timeout: Option<Duration>,
) -> Result<usize> {
    let mut handled = 0;
    while handled < images {
        let path = match (window, timeout) {
            (Some((window, _)), _) => window.display_until(done)?,
            (None, Some(timeout)) => done.recv_timeout(timeout).ok(),
            (None, None) => done.recv().ok(),
        };
        let Some(path) = path else {
            break;
        };

        handled += 1;
        tracing::debug!("Done with {} ({}/{})", path.display(), handled, images);
        if let Some((_, next_image)) = window {
            let _ = next_image.send(());
        }
    }
    Ok(handled)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.debug);

    let pipeline = setup_graph(&cli)?;
    let images = pipeline.images;
    if images == 0 {
        tracing::warn!("No images found in {}", cli.input.display());
    }

    tracing::info!("Reading plates from {} images", images);
    let handled = wait_for_images(
        &pipeline.done,
        pipeline.window.as_ref(),
        images,
        cli.wait_timeout(),
    )?;

    pipeline.graph.stop(true, None);
    if handled < images {
        bail!("Timed out after handling {} of {} images", handled, images);
    }
    tracing::info!("Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let base = ["ocr_license_plate", "--input", "plates"];
        Cli::parse_from(base.iter().chain(args.iter()).copied())
    }

    #[test]
    fn debug_waits_without_timeout() {
        assert_eq!(cli(&[]).wait_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(
            cli(&["--timeout-secs", "5"]).wait_timeout(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(cli(&["--debug", "--timeout-secs", "5"]).wait_timeout(), None);
    }

    #[test]
    fn cli_maps_to_config() {
        let config = cli(&[
            "--min-ar",
            "2",
            "--max-ar",
            "4",
            "--keep",
            "3",
            "--clear-border",
        ])
        .config();
        assert_eq!(config.min_ar, 2.0);
        assert_eq!(config.max_ar, 4.0);
        assert_eq!(config.keep, 3);
        assert!(config.clear_border);
        assert_eq!(config.psm, 7);
    }

    #[test]
    fn counts_results_until_timeout() {
        let (done_s, done_r) = unbounded();
        done_s.send(PathBuf::from("a.png")).unwrap();
        done_s.send(PathBuf::from("b.png")).unwrap();

        let handled =
            wait_for_images(&done_r, None, 3, Some(Duration::from_millis(20))).unwrap();
        assert_eq!(handled, 2);
    }

    #[test]
    fn without_timeout_waits_for_slow_results() {
        let (done_s, done_r) = unbounded();
        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            done_s.send(PathBuf::from("slow.png")).unwrap();
        });

        assert_eq!(wait_for_images(&done_r, None, 1, None).unwrap(), 1);
        sender.join().unwrap();
    }

    #[test]
    fn debug_window_releases_the_next_image_after_each_result() {
        let (_debug, window) = DebugView::channel();
        let (next_image_s, next_image_r) = unbounded();
        let (done_s, done_r) = unbounded();
        done_s.send(PathBuf::from("a.png")).unwrap();
        done_s.send(PathBuf::from("b.png")).unwrap();

        let handled =
            wait_for_images(&done_r, Some(&(window, next_image_s)), 2, None).unwrap();
        assert_eq!(handled, 2);
        assert_eq!(next_image_r.try_iter().count(), 2);
    }
}
