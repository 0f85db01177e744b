//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

const DEVICE_HELP: &str = "Device serial [default: $ANDROID_SERIAL, or the only attached device]";
const OUTPUT_HELP: &str =
    "Output directory [default: $DROIDMAP_OUTPUT_DIR, $XDG_DATA_HOME/droidmap or ~/.droidmap]";

/// Automated exploration of Android apps.
///
/// Walks an app's screens over adb, catalogues every page it reaches and
/// writes a coverage report with the navigation graph. Screens that need a
/// human (fingerprint, captcha, ...) are handed to an operator.
#[derive(Debug, Parser)]
#[command(name = "droidmap", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Explore an app depth-first and write a coverage report
    #[command(after_help = "\
Examples:
  droidmap explore com.example.mail                  # Explore with defaults
  droidmap explore com.example.mail --max-depth 4    # Stay shallow
  droidmap explore -d emulator-5554 com.example.mail # Pick a device
  droidmap explore com.example.mail --assist headless --assume-resolved
  droidmap explore com.example.mail --category checkout:cart,pay,order")]
    Explore(ExploreArgs),

    /// Watch a human use the app and record what they do
    #[command(after_help = "\
Examples:
  droidmap monitor com.example.mail                  # Poll every second for 5 minutes
  droidmap monitor com.example.mail --duration 60    # Stop after a minute
  droidmap monitor com.example.mail --interval 500   # Poll twice a second")]
    Monitor(MonitorArgs),

    /// Parse a saved UI dump and print its elements
    #[command(after_help = "\
Examples:
  adb exec-out uiautomator dump /dev/tty > screen.xml
  droidmap parse screen.xml                          # Interactive elements as JSON
  droidmap parse screen.xml --all --format text      # Every element, one per line")]
    Parse(ParseArgs),

    /// Show an end-to-end usage example
    Examples,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AssistArg {
    /// Prompt on the terminal
    Interactive,
    /// No operator; decline unless --assume-resolved
    Headless,
}

#[derive(Debug, clap::Args)]
pub struct ExploreArgs {
    /// Package name of the app to explore
    pub package: String,

    #[arg(short, long, help = DEVICE_HELP)]
    pub device: Option<String>,

    /// Maximum navigation depth from the entry page
    #[arg(long, default_value_t = 10)]
    pub max_depth: usize,

    /// Wait after each action before capturing (milliseconds)
    #[arg(long, default_value_t = 2000, value_name = "MS")]
    pub settle: u64,

    /// Wait after launching the app (milliseconds)
    #[arg(long, default_value_t = 3000, value_name = "MS")]
    pub launch_wait: u64,

    /// Text typed into editable fields
    #[arg(long, default_value = "test")]
    pub input_text: String,

    /// Who handles screens that need a human
    #[arg(long, value_enum, default_value_t = AssistArg::Interactive)]
    pub assist: AssistArg,

    /// Headless only: treat blocked screens as passed after a short wait
    #[arg(long)]
    pub assume_resolved: bool,

    /// Seconds to wait for an operator before giving up on a screen
    #[arg(long, default_value_t = 300, value_name = "SECS")]
    pub assist_timeout: u64,

    /// Extra page category as id:keyword,keyword (repeatable)
    #[arg(long = "category", value_name = "SPEC")]
    pub categories: Vec<String>,

    /// Do not save screenshots and UI dumps
    #[arg(long)]
    pub no_artifacts: bool,

    #[arg(short, long, help = OUTPUT_HELP)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, clap::Args)]
pub struct MonitorArgs {
    /// Package name of the app to watch
    pub package: String,

    #[arg(short, long, help = DEVICE_HELP)]
    pub device: Option<String>,

    /// Polling interval (milliseconds)
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    pub interval: u64,

    /// Stop after this many seconds
    #[arg(long, default_value_t = 300, value_name = "SECS")]
    pub duration: u64,

    #[arg(short, long, help = OUTPUT_HELP)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, clap::Args)]
pub struct ParseArgs {
    /// UI dump file (uiautomator XML)
    pub file: PathBuf,

    /// Include non-interactive elements
    #[arg(long)]
    pub all: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = ParseFormat::Json)]
    pub format: ParseFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ParseFormat {
    /// JSON with title, activity, groups and elements
    Json,
    /// One element per line
    Text,
}

/// End-to-end example text for the `examples` command.
pub const EXAMPLES_TEXT: &str = r#"End-to-end example: map a mail app

# 1. Check the device is attached
adb devices

# 2. Explore, answering blocked screens yourself
droidmap explore com.example.mail --max-depth 5 -o ./mail-run

# 3. When a fingerprint or captcha screen shows up, droidmap pauses and
#    prompts on the terminal. Pass the screen on the device, then press
#    Enter (or type 'cancel' to skip that branch).

# 4. Inspect the results
ls ./mail-run/com.example.mail/*/
#   com.example.mail_report.json     coverage, cycles, dead ends, errors
#   com.example.mail_catalogue.json  pages, graph and operation log
#   com.example.mail_graph.mmd       Mermaid diagram
#   com.example.mail_graph.dot       Graphviz diagram
#   pages/                           screenshots and UI dumps per page

# 5. Record a manual session for comparison
droidmap monitor com.example.mail --duration 120 -o ./mail-run

# Stop either command early with Ctrl+C; the report is still written.
"#;
