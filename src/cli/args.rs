use clap::{Args, Parser, Subcommand, ValueEnum};
use std::ops::Range;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "flowsize",
    version,
    about = "Flow-size distributions from fixed-width packet record files"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Split each input into balanced, order-preserving record groups
    Split(SplitArgs),
    /// Build windowed and interpolated flow-size histograms per input
    Hist(HistArgs),
    /// Total packets, keys and largest flow per input
    Stats(StatsArgs),
    /// Hashed key counter arrays, one file per seed
    Sketch(SketchArgs),
    /// Score a prediction array against a ground-truth histogram window
    Eval(EvalArgs),
}

#[derive(Args, Clone, Debug)]
pub struct LayoutArgs {
    /// Dataset variant supplying the default record layout
    #[arg(long, value_enum, default_value_t = PresetArg::Caida2016)]
    pub preset: PresetArg,

    /// Record width in bytes
    #[arg(long, value_name = "BYTES")]
    pub record_width: Option<usize>,

    /// Offset of the flow key inside each record
    #[arg(long, value_name = "BYTES")]
    pub key_offset: Option<usize>,

    /// Length of the flow key
    #[arg(long, value_name = "BYTES")]
    pub key_length: Option<usize>,

    /// Bytes requested from the input per read
    #[arg(long, value_name = "BYTES", default_value_t = 4096)]
    pub chunk_size: usize,
}

#[derive(Parser)]
pub struct SplitArgs {
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    #[arg(long)]
    pub out: PathBuf,

    #[command(flatten)]
    pub layout: LayoutArgs,

    /// Number of groups per input (defaults to the preset's)
    #[arg(long)]
    pub partitions: Option<usize>,

    /// Extension of the group files
    #[arg(long, default_value = "dat")]
    pub extension: String,

    #[arg(long, default_value_t = num_cpus::get())]
    pub threads: usize,
}

#[derive(Parser)]
pub struct HistArgs {
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    #[arg(long)]
    pub out: PathBuf,

    #[command(flatten)]
    pub layout: LayoutArgs,

    #[arg(long, value_enum, default_value_t = ProfileArg::Large)]
    pub profile: ProfileArg,

    /// Target grid as start:end[:step] segments, end exclusive
    #[arg(long, value_name = "SEGMENTS")]
    pub grid: Option<String>,

    /// Keep frequencies strictly above this value
    #[arg(long, value_name = "FREQ")]
    pub window_above: Option<u64>,

    /// Keep frequencies up to and including this value
    #[arg(long, value_name = "FREQ")]
    pub window_max: Option<u64>,

    /// Also pack the output directory into <out>.zip
    #[arg(long, default_value_t = false)]
    pub zip: bool,

    #[arg(long, default_value_t = num_cpus::get())]
    pub threads: usize,
}

#[derive(Parser)]
pub struct StatsArgs {
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output table
    #[arg(long, default_value = "stats.tsv")]
    pub out: PathBuf,

    #[command(flatten)]
    pub layout: LayoutArgs,

    #[arg(long, default_value_t = num_cpus::get())]
    pub threads: usize,
}

#[derive(Parser)]
pub struct SketchArgs {
    pub input: PathBuf,

    #[arg(long)]
    pub out: PathBuf,

    /// Key layout; the key defaults to bytes 8..16 when the record holds them
    #[command(flatten)]
    pub layout: LayoutArgs,

    /// Seed range, end exclusive
    #[arg(long, value_name = "START..END", value_parser = parse_seed_range, default_value = "0..2000")]
    pub seeds: Range<u32>,

    /// Counters per array
    #[arg(long, default_value_t = 4096)]
    pub counters: usize,

    #[arg(long, default_value_t = num_cpus::get())]
    pub threads: usize,
}

#[derive(Parser)]
pub struct EvalArgs {
    /// Ground-truth window table (frequency, key_count)
    #[arg(long)]
    pub truth: PathBuf,

    /// Predicted key counts, one per grid point
    #[arg(long)]
    pub pred: PathBuf,

    #[arg(long, value_enum, default_value_t = ProfileArg::Large)]
    pub profile: ProfileArg,

    #[arg(long, value_name = "SEGMENTS")]
    pub grid: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PresetArg {
    #[value(name = "imc")]
    Imc,
    #[value(name = "caida2016")]
    Caida2016,
    #[value(name = "caida2018")]
    Caida2018,
    #[value(name = "caida2018-tail")]
    Caida2018Tail,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ProfileArg {
    #[value(name = "small")]
    Small,
    #[value(name = "large")]
    Large,
}

pub fn parse_seed_range(s: &str) -> Result<Range<u32>, String> {
    let (start, end) = s
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got '{}'", s))?;
    let start: u32 = start.trim().parse().map_err(|e| format!("bad start: {}", e))?;
    let end: u32 = end.trim().parse().map_err(|e| format!("bad end: {}", e))?;
    if start >= end {
        return Err(format!("empty seed range {}..{}", start, end));
    }
    Ok(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn seed_ranges() {
        assert_eq!(parse_seed_range("0..2000").unwrap(), 0..2000);
        assert_eq!(parse_seed_range(" 5 .. 7").unwrap(), 5..7);
        assert!(parse_seed_range("7..7").is_err());
        assert!(parse_seed_range("7").is_err());
    }

    #[test]
    fn layout_overrides_parse() {
        let cli = Cli::try_parse_from([
            "flowsize",
            "hist",
            "a.dat",
            "b.dat",
            "--out",
            "o",
            "--preset",
            "caida2018",
            "--key-offset",
            "13",
            "--key-length",
            "8",
            "--profile",
            "small",
        ])
        .unwrap();
        let Commands::Hist(args) = cli.command else {
            panic!("expected hist");
        };
        assert_eq!(args.inputs.len(), 2);
        assert!(matches!(args.layout.preset, PresetArg::Caida2018));
        assert_eq!(args.layout.key_offset, Some(13));
        assert_eq!(args.layout.chunk_size, 4096);
    }
}
