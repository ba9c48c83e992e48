use clap::Parser;
use std::path::PathBuf;

/// Headless render cache and playback driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Render worker threads (default: settings file, then number of CPUs)
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Sequence length in frames
    #[arg(short = 'n', long = "length", value_name = "FRAMES", default_value_t = 96)]
    pub length: i64,

    /// Frame rate (integer frames per second)
    #[arg(long = "fps", value_name = "FPS", default_value_t = 24)]
    pub fps: i64,

    /// Frame width in pixels
    #[arg(long = "width", value_name = "PX", default_value_t = 320)]
    pub width: usize,

    /// Frame height in pixels
    #[arg(long = "height", value_name = "PX", default_value_t = 180)]
    pub height: usize,

    /// Play the sequence before background caching
    #[arg(short = 'p', long = "play")]
    pub play: bool,

    /// Shuttle speed for --play (negative plays backward, 0 is treated as 1)
    #[arg(short = 's', long = "speed", value_name = "N", default_value_t = 1, allow_hyphen_values = true)]
    pub speed: i32,

    /// Loop playback; stops after one extra pass
    #[arg(short = 'o', long = "loop")]
    pub loop_playback: bool,

    /// Cache root directory (overrides RENDERCACHE_CACHE_DIR and settings)
    #[arg(long = "cache-dir", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Enable logging to file (default: rendercache.log in the config directory)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["rendercache"]);
        assert_eq!(args.length, 96);
        assert_eq!(args.fps, 24);
        assert_eq!(args.speed, 1);
        assert!(!args.play);
        assert!(args.log_file.is_none());
        assert_eq!(args.verbosity, 0);
    }

    #[test]
    fn test_flags() {
        let args = Args::parse_from([
            "rendercache", "--workers", "3", "--play", "--speed", "-2", "--loop", "-vv", "--log",
        ]);
        assert_eq!(args.workers, Some(3));
        assert!(args.play);
        assert_eq!(args.speed, -2);
        assert!(args.loop_playback);
        assert_eq!(args.log_file, Some(None));
        assert_eq!(args.verbosity, 2);
    }

    #[test]
    fn test_log_with_path() {
        let args = Args::parse_from(["rendercache", "--log", "out.log"]);
        assert_eq!(args.log_file, Some(Some(PathBuf::from("out.log"))));
    }
}
