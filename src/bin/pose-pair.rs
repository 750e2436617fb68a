// pose-pair — relative pose between two plaintext RGB-D frames.
//
// Runs the full GPU pipeline once per available Vulkan device:
//
//   pose-pair [OPTIONS] <frame1.txt> <frame2.txt>
//
// Options (defaults are the reference run's values):
//   --camera PATH        camera parameter file (fx fy cx cy)   [etc/kinect.conf]
//   --fast-thresh N      FAST absolute difference threshold    [40]
//   --fast-ring N        FAST ring length (9..=16)             [9]
//   --blend N            HIPS blend size (1 | 5 | 9)           [5]
//   --max-bits N         HIPS maximum 1-bits per descriptor    [480]
//   --max-error N        HIPS maximum error bits per match     [3]
//   --tree-leaves N      descriptor tree leaves                [512]
//   --tree-levels N      descriptor tree levels                [5]
//   --no-rotate          disable rotation-invariant matching
//   --iterations N       Gauss-Newton iterations               [10]
//   --hypotheses N       hypothesis pool size                  [8192]
//   --max-corners N      maximum tracked corners per frame     [2048]
//   --seed N             hypothesis mixing seed                [1]
//
// A failed device (compile error, driver fault) is reported and the run
// continues with the next device.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::process::exit;

use relpose::camera::CameraModel;
use relpose::gpu::pipeline::{PipelineConfig, PosePipeline};
use relpose::gpu::worker::Worker;
use relpose::rgbd::RgbdFrame;

struct Options {
    path1: String,
    path2: String,
    camera: String,
    config: PipelineConfig,
}

fn usage() -> ! {
    eprintln!("usage: pose-pair [OPTIONS] <frame1.txt> <frame2.txt>");
    eprintln!("run with RUST_LOG=info for per-stage telemetry");
    exit(2);
}

fn numeric(args: &mut impl Iterator<Item = String>, name: &str) -> u64 {
    args.next().and_then(|v| v.parse().ok()).unwrap_or_else(|| {
        eprintln!("option {name} needs a numeric value");
        usage();
    })
}

fn parse_options() -> Options {
    let mut config = PipelineConfig::default();
    let mut camera = String::from("etc/kinect.conf");
    let mut paths: Vec<String> = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--camera" => {
                camera = args.next().unwrap_or_else(|| usage());
            }
            "--fast-thresh" => config.fast_threshold = numeric(&mut args, &arg) as u8,
            "--fast-ring" => config.fast_ring = numeric(&mut args, &arg) as usize,
            "--blend" => config.blend = numeric(&mut args, &arg) as usize,
            "--max-bits" => config.max_bits = numeric(&mut args, &arg) as u32,
            "--max-error" => config.max_error = numeric(&mut args, &arg) as u32,
            "--tree-leaves" => config.tree_leaves = numeric(&mut args, &arg) as usize,
            "--tree-levels" => config.tree_levels = numeric(&mut args, &arg) as usize,
            "--no-rotate" => config.rotate = false,
            "--iterations" => config.iterations = numeric(&mut args, &arg) as usize,
            "--hypotheses" => config.hypotheses = numeric(&mut args, &arg) as usize,
            "--max-corners" => config.max_corners = numeric(&mut args, &arg) as usize,
            "--seed" => config.seed = numeric(&mut args, &arg),
            "--help" | "-h" => usage(),
            _ if arg.starts_with("--") => {
                eprintln!("unknown option {arg}");
                usage();
            }
            _ => paths.push(arg),
        }
    }

    if paths.len() != 2 {
        usage();
    }
    let path2 = paths.pop().unwrap_or_default();
    let path1 = paths.pop().unwrap_or_default();
    Options {
        path1,
        path2,
        camera,
        config,
    }
}

fn main() {
    env_logger::init();
    let opts = parse_options();

    eprintln!("reading frame 1 ({})", opts.path1);
    let frame1 = match RgbdFrame::read(Path::new(&opts.path1)) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{e}");
            exit(1);
        }
    };
    eprintln!("reading frame 2 ({})", opts.path2);
    let frame2 = match RgbdFrame::read(Path::new(&opts.path2)) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{e}");
            exit(1);
        }
    };

    let (width, height) = (frame1.gray.width(), frame1.gray.height());
    if (frame2.gray.width(), frame2.gray.height()) != (width, height) {
        eprintln!(
            "frame dimensions differ: {}x{} vs {}x{}",
            width,
            height,
            frame2.gray.width(),
            frame2.gray.height()
        );
        exit(1);
    }

    // Fall back to nominal Kinect intrinsics when no parameter file is
    // present, so the tool stays usable on bare captures.
    let camera = CameraModel::load(Path::new(&opts.camera)).unwrap_or_else(|e| {
        eprintln!("{e}; using nominal intrinsics");
        CameraModel::new(525.0, 525.0, width as f32 / 2.0, height as f32 / 2.0)
    });

    let workers = match Worker::all() {
        Ok(w) => w,
        Err(e) => {
            eprintln!("{e}");
            exit(1);
        }
    };
    eprintln!("found {} usable device(s)", workers.len());

    let mut any_ok = false;
    for worker in workers {
        eprintln!();
        eprintln!("running pipeline on \"{}\"", worker.adapter_info);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let pipeline =
                PosePipeline::new(worker.clone(), width, height, opts.config.clone())?;
            Ok::<_, relpose::gpu::worker::GpuError>(pipeline.run(&frame1, &frame2, &camera))
        }));

        match outcome {
            Ok(Ok(result)) => {
                any_ok = true;
                for t in &result.timings {
                    eprintln!("{:>10} us  {}", t.time.as_micros(), t.stage);
                }
                eprintln!();
                eprintln!(
                    "{:>8} corners (frame 1)",
                    result.corners1.len()
                );
                eprintln!(
                    "{:>8} corners (frame 2)",
                    result.corners2.len()
                );
                eprintln!("{:>8} correspondences", result.matches.len());
                eprintln!(
                    "{:>8.1} best score (hypothesis {})",
                    result.score, result.best_index
                );
                eprintln!();
                for r in 0..4 {
                    eprintln!(
                        "  [{:>9.5} {:>9.5} {:>9.5} {:>9.5}]",
                        result.pose[(r, 0)],
                        result.pose[(r, 1)],
                        result.pose[(r, 2)],
                        result.pose[(r, 3)],
                    );
                }
            }
            Ok(Err(e)) => eprintln!("device failed: {e}"),
            Err(_) => eprintln!("device run panicked; continuing with next device"),
        }
    }

    if !any_ok {
        exit(1);
    }
}
