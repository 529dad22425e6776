// ============================================================================
// rasterstack CLI — headless layer editing via command-line arguments
// ============================================================================
//
// Usage examples:
//   rasterstack -i base.png -i overlay.png -c select=1 -c blend=multiply -o out.png
//   rasterstack -i "shots/*.jpg" -c layout=3:320x240 -o collage.jpg -q 85
//   rasterstack --new 640x480:#ffffff -c "layer=circle:#ff0000,0.3" -c filter=blur -o c.png
//   rasterstack --draft work.rsd -c undo --export 1080x1080 -o post.png
//
// Inputs are stacked bottom to top in the order given; every --op runs
// through the project's history, so `undo` / `redo` work inside a command
// list exactly as they would interactively.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use image::Rgba;

use crate::canvas::{BlendMode, Region};
use crate::error::{EditorError, Result};
use crate::io::{self, SaveFormat};
use crate::ops::adjustments::AdjustmentKind;
use crate::ops::filters::Filter;
use crate::ops::generate::{parse_color, Fill};
use crate::ops::paint::Stroke;
use crate::project::{MaskBrush, Project};
use crate::settings::EditorSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// rasterstack headless layer editor.
#[derive(Parser, Debug)]
#[command(
    name = "rasterstack",
    about = "rasterstack headless multi-layer image editor",
    long_about = "Stack images as layers, run editing commands on them and write the\n\
                  composite. Supports PNG, JPEG, BMP and TGA output and .rsd drafts.\n\n\
                  Example:\n  \
                  rasterstack -i base.png -i top.png -c select=1 -c blend=screen -o out.png\n  \
                  rasterstack --new 512x512 -c layer=checker:#000,32 -o board.png"
)]
pub struct CliArgs {
    /// Input image(s), stacked bottom to top. Glob patterns accepted
    /// (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, num_args = 1..)]
    pub input: Vec<String>,

    /// Start from a saved draft instead of (or below) the inputs.
    #[arg(long, value_name = "FILE.rsd")]
    pub draft: Option<PathBuf>,

    /// Start from a blank canvas: WxH with an optional #rrggbb fill.
    #[arg(long, value_name = "WxH[:#rrggbb]")]
    pub new: Option<String>,

    /// Editing command, repeatable; run in order. See `command_help()`.
    #[arg(short = 'c', long = "op", value_name = "COMMAND")]
    pub ops: Vec<String>,

    /// Output image path.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format: png, jpeg, bmp, tga.
    /// When omitted, the format is inferred from --output's extension, defaulting to png.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1–100). Defaults to the settings file's jpeg_quality.
    #[arg(short, long, value_name = "1-100")]
    pub quality: Option<u8>,

    /// Scale the composite to cover WxH and centre-crop it.
    #[arg(long, value_name = "WxH")]
    pub export: Option<String>,

    /// Also write the final state as a draft.
    #[arg(long, value_name = "FILE.rsd")]
    pub save_draft: Option<PathBuf>,

    /// List drafts in the configured draft directory.
    #[arg(long)]
    pub list_drafts: bool,

    /// Delete every draft in the configured draft directory.
    #[arg(long)]
    pub clear_drafts: bool,

    /// Settings file (defaults to the platform config directory).
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Print debug logging and per-command timing.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    pub fn load_settings(&self) -> EditorSettings {
        match &self.settings {
            Some(path) => EditorSettings::load_from(path),
            None => EditorSettings::load(),
        }
    }
}

pub fn command_help() -> &'static str {
    "select=N  select-at=X,Y  layer=FILL  rename=NAME  toggle  duplicate  delete\n\
     move=up|down|N  merge-visible  blend=MODE  adjust=KIND:VALUE  offset=X,Y\n\
     translate=DX,DY  filter=NAME[@x0,y0,x1,y1]  rotate=DEG  flip=horizontal|vertical\n\
     resize=WxH  canvas=WxH  crop=x0,y0,x1,y1  layout=COLS[:WxH]\n\
     paint=x0,y0,...[/SIZE][:#COLOR]  erase=POINTS[/SIZE]  mask-hide=POINTS[/SIZE]\n\
     mask-reveal=POINTS[/SIZE]  invert-mask  feather-mask[=R]  auto-enhance\n\
     auto-balance  replace-bg=#COLOR  undo  redo"
}

// ============================================================================
// Commands
// ============================================================================

/// One parsed `--op` command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Select(usize),
    SelectAt(i64, i64),
    AddLayer(Fill),
    Rename(String),
    Toggle,
    Duplicate,
    Delete,
    Move(isize),
    MergeVisible,
    Blend(BlendMode),
    Adjust(AdjustmentKind, f32),
    Offset(i32, i32),
    Translate(i32, i32),
    Filter(Filter, Option<Region>),
    Rotate(f32),
    Flip { horizontal: bool },
    Resize(u32, u32),
    Canvas(u32, u32),
    Crop(Region),
    Layout(u32, Option<(u32, u32)>),
    Paint(Stroke, Rgba<u8>),
    Erase(Stroke),
    Mask(Stroke, MaskBrush),
    InvertMask,
    FeatherMask(f32),
    AutoEnhance,
    AutoBalance,
    ReplaceBackground(Rgba<u8>),
    Undo,
    Redo,
}

fn bad(msg: String) -> EditorError {
    EditorError::invalid(msg)
}

fn parse_num<T: std::str::FromStr>(s: &str, what: &str) -> Result<T> {
    s.trim()
        .parse::<T>()
        .map_err(|_| bad(format!("malformed {} '{}'", what, s)))
}

fn parse_pair<T: std::str::FromStr>(s: &str, what: &str) -> Result<(T, T)> {
    let (a, b) = s
        .split_once(',')
        .ok_or_else(|| bad(format!("{} needs two values, got '{}'", what, s)))?;
    Ok((parse_num(a, what)?, parse_num(b, what)?))
}

/// `WxH` → (w, h), both at least 1.
pub fn parse_size(s: &str) -> Result<(u32, u32)> {
    let (w, h) = s
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| bad(format!("size must look like WxH, got '{}'", s)))?;
    let (w, h) = (parse_num::<u32>(w, "width")?, parse_num::<u32>(h, "height")?);
    if w == 0 || h == 0 {
        return Err(bad(format!("size must be at least 1x1, got '{}'", s)));
    }
    Ok((w, h))
}

/// Stroke with the brush size from settings unless `/SIZE` is given.
fn parse_stroke(s: &str, settings: &EditorSettings) -> Result<Stroke> {
    if s.contains('/') {
        s.parse()
    } else {
        Stroke::parse_points(s, settings.brush_size)
    }
}

/// Parse one `--op` string. Defaults (brush size/colour, feather radius)
/// come from `settings`.
pub fn parse_command(op: &str, settings: &EditorSettings) -> Result<Command> {
    let (name, arg) = match op.split_once('=') {
        Some((n, a)) => (n.trim(), Some(a.trim())),
        None => (op.trim(), None),
    };
    let need = || arg.filter(|a| !a.is_empty()).ok_or_else(|| bad(format!("'{}' needs a value", name)));

    let cmd = match name.to_lowercase().as_str() {
        "select" => Command::Select(parse_num(need()?, "layer index")?),
        "select-at" => {
            let (x, y) = parse_pair(need()?, "point")?;
            Command::SelectAt(x, y)
        }
        "layer" => Command::AddLayer(need()?.parse()?),
        "rename" => Command::Rename(need()?.to_string()),
        "toggle" => Command::Toggle,
        "duplicate" => Command::Duplicate,
        "delete" => Command::Delete,
        "move" => Command::Move(match need()? {
            "up" => 1,
            "down" => -1,
            n => parse_num(n, "move delta")?,
        }),
        "merge-visible" | "merge" => Command::MergeVisible,
        "blend" => Command::Blend(need()?.parse()?),
        "adjust" => {
            let (kind, value) = need()?
                .split_once(':')
                .ok_or_else(|| bad(format!("adjust needs KIND:VALUE, got '{}'", op)))?;
            Command::Adjust(kind.parse()?, parse_num(value, "adjustment value")?)
        }
        "offset" => {
            let (x, y) = parse_pair(need()?, "offset")?;
            Command::Offset(x, y)
        }
        "translate" => {
            let (x, y) = parse_pair(need()?, "offset")?;
            Command::Translate(x, y)
        }
        "filter" => {
            let value = need()?;
            match value.split_once('@') {
                Some((f, region)) => Command::Filter(f.parse()?, Some(region.parse()?)),
                None => Command::Filter(value.parse()?, None),
            }
        }
        "rotate" => Command::Rotate(parse_num(need()?, "angle")?),
        "flip" => Command::Flip {
            horizontal: match need()?.to_lowercase().as_str() {
                "horizontal" | "h" => true,
                "vertical" | "v" => false,
                other => return Err(bad(format!("flip axis must be horizontal or vertical, got '{}'", other))),
            },
        },
        "resize" => {
            let (w, h) = parse_size(need()?)?;
            Command::Resize(w, h)
        }
        "canvas" => {
            let (w, h) = parse_size(need()?)?;
            Command::Canvas(w, h)
        }
        "crop" => Command::Crop(need()?.parse()?),
        "layout" => {
            let value = need()?;
            match value.split_once(':') {
                Some((cols, cell)) => Command::Layout(parse_num(cols, "columns")?, Some(parse_size(cell)?)),
                None => Command::Layout(parse_num(value, "columns")?, None),
            }
        }
        "paint" => {
            let value = need()?;
            match value.split_once(':') {
                Some((stroke, color)) => Command::Paint(parse_stroke(stroke, settings)?, parse_color(color)?),
                None => Command::Paint(parse_stroke(value, settings)?, settings.brush_color),
            }
        }
        "erase" => Command::Erase(parse_stroke(need()?, settings)?),
        "mask-hide" => Command::Mask(parse_stroke(need()?, settings)?, MaskBrush::Hide),
        "mask-reveal" => Command::Mask(parse_stroke(need()?, settings)?, MaskBrush::Reveal),
        "invert-mask" => Command::InvertMask,
        "feather-mask" => Command::FeatherMask(match arg.filter(|a| !a.is_empty()) {
            Some(r) => parse_num(r, "feather radius")?,
            None => settings.feather_radius,
        }),
        "auto-enhance" => Command::AutoEnhance,
        "auto-balance" => Command::AutoBalance,
        "replace-bg" => Command::ReplaceBackground(parse_color(need()?)?),
        "undo" => Command::Undo,
        "redo" => Command::Redo,
        _ => return Err(bad(format!("unknown command '{}'", name))),
    };
    Ok(cmd)
}

/// Run one command against the project.
pub fn execute(project: &mut Project, cmd: Command) -> Result<()> {
    match cmd {
        Command::Select(i) => project.select_layer(i),
        Command::SelectAt(x, y) => match project.select_layer_at(x, y) {
            Some(_) => Ok(()),
            None => Err(bad(format!("no visible layer at {},{}", x, y))),
        },
        Command::AddLayer(fill) => {
            let name = format!("Layer {}", project.document().len() + 1);
            project.add_generated_layer(name, fill).map(|_| ())
        }
        Command::Rename(name) => project.rename_layer(name),
        Command::Toggle => project.toggle_visibility().map(|_| ()),
        Command::Duplicate => project.duplicate_layer().map(|_| ()),
        Command::Delete => project.delete_layer(),
        Command::Move(delta) => {
            if !project.move_layer(delta)? {
                log::warn!("move {} is past the end of the stack; ignored", delta);
            }
            Ok(())
        }
        Command::MergeVisible => project.merge_visible(),
        Command::Blend(mode) => project.set_blend_mode(mode),
        Command::Adjust(kind, value) => project.set_adjustment(kind, value),
        Command::Offset(x, y) => project.set_offset(x, y),
        Command::Translate(dx, dy) => project.translate_layer(dx, dy),
        Command::Filter(filter, None) => project.apply_filter(filter),
        Command::Filter(filter, Some(region)) => project.apply_filter_to_region(filter, region),
        Command::Rotate(deg) => project.rotate_layer(deg),
        Command::Flip { horizontal } => project.flip_layer(horizontal),
        Command::Resize(w, h) => project.resize_canvas(w, h),
        Command::Canvas(w, h) => project.resize_canvas_no_scale(w, h),
        Command::Crop(region) => project.crop(region),
        Command::Layout(cols, cell) => project.layout_grid(cols, cell),
        Command::Paint(stroke, color) => project.paint(&stroke, color),
        Command::Erase(stroke) => project.erase(&stroke),
        Command::Mask(stroke, brush) => project.paint_mask(&stroke, brush),
        Command::InvertMask => project.invert_mask(),
        Command::FeatherMask(r) => project.feather_mask(r),
        Command::AutoEnhance => project.auto_enhance(),
        Command::AutoBalance => project.auto_balance(),
        Command::ReplaceBackground(c) => project.replace_background(c),
        Command::Undo => {
            if !project.undo()? {
                log::warn!("nothing to undo");
            }
            Ok(())
        }
        Command::Redo => {
            if !project.redo()? {
                log::warn!("nothing to redo");
            }
            Ok(())
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the CLI and return an OS exit code: `0` on success, `1` on any failure.
pub fn run(args: CliArgs, settings: &EditorSettings) -> ExitCode {
    match run_session(&args, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_session(args: &CliArgs, settings: &EditorSettings) -> Result<()> {
    if args.list_drafts || args.clear_drafts {
        manage_drafts(args, &settings.draft_dir)?;
        if args.input.is_empty() && args.new.is_none() && args.draft.is_none() {
            return Ok(());
        }
    }

    // Parse every command up front so a typo fails before any work
    let commands = args
        .ops
        .iter()
        .enumerate()
        .map(|(i, op)| {
            parse_command(op, settings).map_err(|e| bad(format!("op {} '{}': {}", i + 1, op, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut project = Project::with_history_limit(settings.max_history);
    open_sources(args, &mut project)?;

    for (i, (op, cmd)) in args.ops.iter().zip(commands).enumerate() {
        let start = Instant::now();
        execute(&mut project, cmd).map_err(|e| bad(format!("op {} '{}': {}", i + 1, op, e)))?;
        if args.verbose {
            println!("  {} ({:.0}ms)", op, start.elapsed().as_secs_f64() * 1000.0);
        }
    }

    if let Some(out) = &args.output {
        let image = match &args.export {
            Some(size) => {
                let (w, h) = parse_size(size)?;
                project.export_preset(w, h)?
            }
            None => project.composite()?,
        };
        let format = parse_format(args.format.as_deref(), Some(out))?;
        let quality = args.quality.unwrap_or(settings.jpeg_quality);
        io::save_image(&image, out, format, quality)?;
        println!("→ {} ({}x{})", out.display(), image.width(), image.height());
    }

    if let Some(path) = &args.save_draft {
        project.save_draft(path)?;
        println!("→ {} (draft, {} layers)", path.display(), project.document().len());
    }

    if args.output.is_none() && args.save_draft.is_none() {
        log::warn!("no --output or --save-draft given; nothing written");
    }
    Ok(())
}

/// Build the starting document from --draft, --new and the inputs, in that
/// order (inputs stack on top).
fn open_sources(args: &CliArgs, project: &mut Project) -> Result<()> {
    if let Some(draft) = &args.draft {
        project.load_draft(draft)?;
    }
    if let Some(value) = &args.new {
        let (size, color) = match value.split_once(':') {
            Some((size, color)) => (size, Some(parse_color(color)?)),
            None => (value.as_str(), None),
        };
        let (w, h) = parse_size(size)?;
        project.new_document(w, h, color.map_or(Fill::Blank, Fill::Solid))?;
    }

    let inputs = resolve_inputs(&args.input);
    if !args.input.is_empty() && inputs.is_empty() {
        return Err(bad("no input files matched the given pattern(s)".to_string()));
    }
    for path in &inputs {
        let image = io::load_image(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Layer".to_string());
        project.add_image_layer(name, image)?;
    }

    if project.document().is_empty() {
        return Err(bad("nothing to edit: give --input, --new or --draft".to_string()));
    }
    Ok(())
}

fn manage_drafts(args: &CliArgs, dir: &Path) -> Result<()> {
    if args.list_drafts {
        let drafts = io::list_drafts(dir)?;
        if drafts.is_empty() {
            println!("no drafts in {}", dir.display());
        }
        for path in drafts {
            match io::draft_layer_count(&path) {
                Ok(n) => println!("{} ({} layers)", path.display(), n),
                Err(e) => println!("{} (unreadable: {})", path.display(), e),
            }
        }
    }
    if args.clear_drafts {
        let removed = io::delete_all_drafts(dir)?;
        println!("deleted {} draft(s) from {}", removed, dir.display());
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            // Literal path — use directly
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        // Treat as glob pattern
        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    log::warn!("pattern '{}' matched no files", pattern);
                }
            }
            Err(e) => {
                log::warn!("invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Choose the [`SaveFormat`] from the `--format` string or infer it from the
/// output file extension. Defaults to PNG when neither is known.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<SaveFormat> {
    if let Some(f) = format_arg {
        return f.parse();
    }
    Ok(output.and_then(SaveFormat::from_path).unwrap_or_default())
}
