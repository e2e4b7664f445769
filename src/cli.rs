// ============================================================================
// PixelTap CLI — headless capture runs through the readback pipeline
// ============================================================================
//
// Usage examples:
//   pixeltap --frames 8                          (async, depth from settings)
//   pixeltap --frames 8 --sync                   (always the newest frame)
//   pixeltap --sync false --save-settings        (make async the default again)
//   pixeltap --depth 3 --size 320x240 --output-dir shots/
//   pixeltap --backend soft --format r8 --verbose
//
// Each frame the target is cleared to a colour derived from its sequence
// number, read back, and the mapped pixels are checked against the colour of
// the capture the mapped buffer claims to hold.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};

use crate::gpu::{
    ColorBufferReader, GpuContext, PixelFormat, ReadRequest, ReadbackError, SoftDevice, SoftSurface,
    SourceDescriptor, TransferDevice,
};
use crate::settings::ReadbackSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// wgpu if an adapter is available, otherwise the CPU device.
    Auto,
    Gpu,
    Soft,
}

/// PixelTap headless readback runner.
#[derive(Parser, Debug)]
#[command(
    name = "pixeltap",
    about = "Render synthetic frames and read them back through a transfer-buffer ring",
    long_about = "Render a sequence of solid-colour frames and read each one back through\n\
                  the asynchronous readback pipeline, reporting which capture every\n\
                  read actually observed.\n\n\
                  Example:\n  \
                  pixeltap --frames 8 --depth 3\n  \
                  pixeltap --frames 4 --sync --output-dir shots/"
)]
pub struct CliArgs {
    /// Number of frames to render and read back.
    #[arg(short = 'n', long, default_value_t = 8)]
    pub frames: u32,

    /// Transfer-buffer depth (clamped to 1..=3).  Defaults to the settings file.
    #[arg(short, long)]
    pub depth: Option<u32>,

    /// Synchronous reads: always map the copy just issued.  `--sync false`
    /// switches a saved default back to async.
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub sync: Option<bool>,

    /// Render target size, WIDTHxHEIGHT.
    #[arg(long, default_value = "64x64", value_parser = parse_size)]
    pub size: (u32, u32),

    /// Pixel format: rgba8, bgra8, r8, rg8, rgba16f.
    #[arg(short, long, default_value = "rgba8", value_parser = parse_format)]
    pub format: PixelFormat,

    #[arg(long, value_enum, default_value_t = Backend::Auto)]
    pub backend: Backend,

    /// Write every read frame as PNG into this directory.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Session log file (defaults to the OS data directory).
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Persist --depth and --sync as the new defaults.
    #[arg(long)]
    pub save_settings: bool,

    /// Echo log lines to stderr and print per-frame timing.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Overlay the command-line choices onto the loaded settings.
    pub fn apply_to(&self, settings: &mut ReadbackSettings) {
        if let Some(depth) = self.depth {
            settings.transfer_depth = depth;
        }
        if let Some(sync) = self.sync {
            settings.sync_reads = sync;
        }
    }
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let w: u32 = w.trim().parse().map_err(|e| format!("width: {}", e))?;
    let h: u32 = h.trim().parse().map_err(|e| format!("height: {}", e))?;
    if w == 0 || h == 0 {
        return Err("size must be non-zero".to_string());
    }
    Ok((w, h))
}

fn parse_format(s: &str) -> Result<PixelFormat, String> {
    PixelFormat::parse(s).ok_or_else(|| format!("unknown pixel format '{}'", s))
}

// ============================================================================
// Frame colours
// ============================================================================

/// Colour of the frame rendered for capture `sequence`.
pub fn frame_rgb(sequence: u64) -> [u8; 3] {
    [
        (sequence * 37 % 256) as u8,
        (sequence * 91 % 256) as u8,
        (sequence * 53 % 256) as u8,
    ]
}

/// One pixel of `rgb` in `format`, or `None` when the format is not byte-exact.
pub fn pixel_bytes(format: PixelFormat, rgb: [u8; 3]) -> Option<Vec<u8>> {
    let [r, g, b] = rgb;
    match format {
        PixelFormat::Rgba8 => Some(vec![r, g, b, 255]),
        PixelFormat::Bgra8 => Some(vec![b, g, r, 255]),
        PixelFormat::R8 => Some(vec![r]),
        PixelFormat::Rg8 => Some(vec![r, g]),
        PixelFormat::Rgba16Float => None,
    }
}

// ============================================================================
// Run
// ============================================================================

/// What one run observed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u32,
    pub cold: u32,
    pub mismatches: u32,
}

/// Run all CLI processing and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let mut settings = ReadbackSettings::load();
    args.apply_to(&mut settings);
    if args.save_settings {
        if let Err(e) = settings.save() {
            eprintln!("error: could not save settings: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let (width, height) = args.size;
    let source = SourceDescriptor::new(width, height, args.format);

    let result = match args.backend {
        Backend::Soft => run_soft(&args, &settings, source),
        Backend::Gpu => run_gpu(&args, &settings, source),
        Backend::Auto => match run_gpu(&args, &settings, source) {
            Err(ReadbackError::NoAdapter) => {
                crate::log_warn!("[CLI] no GPU adapter, using the CPU device");
                run_soft(&args, &settings, source)
            }
            other => other,
        },
    };

    match result {
        Ok(summary) => {
            println!(
                "{} frames read, {} cold, {} mismatched",
                summary.frames, summary.cold, summary.mismatches
            );
            if summary.mismatches == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_gpu(args: &CliArgs, settings: &ReadbackSettings, source: SourceDescriptor) -> Result<RunSummary, ReadbackError> {
    let ctx = GpuContext::new(&settings.preferred_gpu, settings.force_software)?;
    let painter = ctx.clone();
    let mut reader = ColorBufferReader::with_settings(ctx, source, settings)?;
    let mut target = painter.create_render_target(source.width, source.height, source.format)?;
    capture_frames(args, settings, &mut reader, &mut target, |tex, seq| {
        let [r, g, b] = frame_rgb(seq);
        painter.clear_target(
            tex,
            wgpu::Color {
                r: r as f64 / 255.0,
                g: g as f64 / 255.0,
                b: b as f64 / 255.0,
                a: 1.0,
            },
        );
    })
}

fn run_soft(args: &CliArgs, settings: &ReadbackSettings, source: SourceDescriptor) -> Result<RunSummary, ReadbackError> {
    if pixel_bytes(source.format, [0, 0, 0]).is_none() {
        return Err(ReadbackError::ContractViolation(format!(
            "{:?} frames can only be rendered on the gpu backend",
            source.format
        )));
    }
    let mut reader = ColorBufferReader::with_settings(SoftDevice::new(), source, settings)?;
    let mut surface = SoftSurface::new(source);
    let format = source.format;
    capture_frames(args, settings, &mut reader, &mut surface, |surf, seq| {
        if let Some(px) = pixel_bytes(format, frame_rgb(seq)) {
            surf.fill(&px);
        }
    })
}

/// Render, read back and check `args.frames` frames.
pub fn capture_frames<D: TransferDevice>(
    args: &CliArgs,
    settings: &ReadbackSettings,
    reader: &mut ColorBufferReader<D>,
    target: &mut D::Target,
    mut render: impl FnMut(&mut D::Target, u64),
) -> Result<RunSummary, ReadbackError> {
    let source = *reader.source();
    let request = ReadRequest::full(&source, settings.sync_reads);
    let mut summary = RunSummary::default();
    let mut packed = Vec::new();

    crate::log_info!(
        "[CLI] {} frames, depth {}, {} reads",
        args.frames,
        reader.ring().len(),
        if request.sync { "sync" } else { "async" }
    );

    for _ in 0..args.frames {
        let sequence = reader.scheduler().captures() + 1;
        render(&mut *target, sequence);

        let started = Instant::now();
        let frame = reader.read_pixels(target, request)?;
        let elapsed = started.elapsed();
        let info = *frame.info();
        frame.copy_packed(&mut packed)?;
        if let Some(dir) = &args.output_dir {
            save_frame(dir, &frame, sequence)?;
        }
        frame.release()?;

        summary.frames += 1;
        let observed = match info.content {
            None => {
                summary.cold += 1;
                if packed.iter().any(|&b| b != 0) {
                    summary.mismatches += 1;
                }
                "cold".to_string()
            }
            Some(content) => {
                if let Some(expected) = pixel_bytes(source.format, frame_rgb(content.sequence))
                    && !packed.chunks_exact(expected.len()).all(|px| px == expected.as_slice())
                {
                    summary.mismatches += 1;
                    crate::log_frame!(
                        ERROR,
                        sequence,
                        info.slot,
                        "[CLI] pixels do not match capture {}",
                        content.sequence
                    );
                }
                format!("capture {}", content.sequence)
            }
        };

        if args.verbose {
            println!(
                "frame {:>4}: slot {} shows {:<12} stride {} ({:.2?})",
                sequence, info.slot, observed, info.row_stride, elapsed
            );
        }
    }

    let stats = reader.stats();
    crate::log_info!(
        "[CLI] done: {} captures, {} cold reads, {} invalid mappings",
        stats.captures,
        stats.cold_reads,
        stats.invalid_mappings
    );
    Ok(summary)
}

fn save_frame<D: TransferDevice>(
    dir: &Path,
    frame: &crate::gpu::MappedFrame<'_, D>,
    sequence: u64,
) -> Result<(), ReadbackError> {
    let path = dir.join(format!("frame_{:04}.png", sequence));
    frame.to_image()?.to_rgba8().save(&path)?;
    Ok(())
}
