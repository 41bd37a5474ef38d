//! Best-effort error marker
//!
//! The output directory is recovered from raw argv before the full parse so a
//! failure in configuration resolution can still leave `error.txt` behind.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// File appended to on every fatal error
pub const ERROR_MARKER_FILE: &str = "error.txt";

const OUTDIR_FLAG: &str = "--outdir";

/// Where the error marker goes, if anywhere
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerLocation {
    output_dir: Option<PathBuf>,
}

impl MarkerLocation {
    /// Scan raw arguments for `--outdir <v>` or `--outdir=<v>`; never fails.
    /// The first occurrence wins.
    pub fn from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let mut output_dir = None;

        for (i, arg) in args.iter().enumerate() {
            let Some(arg) = arg.to_str() else { continue };
            if arg == OUTDIR_FLAG {
                output_dir = args.get(i + 1).map(PathBuf::from);
                break;
            }
            if let Some(value) = arg.strip_prefix("--outdir=") {
                output_dir = Some(PathBuf::from(value));
                break;
            }
        }

        Self {
            output_dir: output_dir.filter(|p| !p.as_os_str().is_empty()),
        }
    }

    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: Some(output_dir.into()),
        }
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn marker_path(&self) -> Option<PathBuf> {
        self.output_dir.as_ref().map(|dir| dir.join(ERROR_MARKER_FILE))
    }

    /// Append one line to the marker file, creating the directory when
    /// needed. Write failures are logged and swallowed.
    pub fn record(&self, message: &str) {
        let Some(dir) = &self.output_dir else {
            debug!("No --outdir on the command line; skipping error marker");
            return;
        };
        if let Err(e) = append_line(dir, message) {
            warn!("Could not write error marker in {}: {}", dir.display(), e);
        }
    }
}

fn append_line(dir: &Path, message: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(ERROR_MARKER_FILE))?;
    let line = message.replace(['\r', '\n'], " ");
    writeln!(file, "{}", line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test_case(&["lorafit", "--outdir", "out"], Some("out") ; "separate value")]
    #[test_case(&["lorafit", "--outdir=out/run"], Some("out/run") ; "equals form")]
    #[test_case(&["lorafit", "--data", "x", "--outdir", "a", "--outdir", "b"], Some("a") ; "first wins")]
    #[test_case(&["lorafit", "--outdir"], None ; "missing value")]
    #[test_case(&["lorafit", "--outdir="], None ; "empty value")]
    #[test_case(&["lorafit", "--out", "x"], None ; "prefix is not the flag")]
    #[test_case(&["lorafit"], None ; "absent")]
    fn test_from_args(args: &[&str], expected: Option<&str>) {
        let location = MarkerLocation::from_args(args.iter().copied());
        assert_eq!(location.output_dir(), expected.map(Path::new));
    }

    #[test]
    fn test_scan_ignores_unparsable_arguments() {
        // Unknown flags and bad values are the full parser's business
        let location =
            MarkerLocation::from_args(["lorafit", "--epochs", "many", "--bogus", "--outdir", "o"]);
        assert_eq!(location.output_dir(), Some(Path::new("o")));
    }

    #[test]
    fn test_record_appends_lines() {
        let dir = TempDir::new().unwrap();
        let outdir = dir.path().join("nested").join("out");
        let location = MarkerLocation::new(&outdir);

        location.record("first failure");
        location.record("second\nfailure");

        let content = std::fs::read_to_string(outdir.join(ERROR_MARKER_FILE)).unwrap();
        assert_eq!(content, "first failure\nsecond failure\n");
    }

    #[test]
    fn test_record_without_location_is_noop() {
        MarkerLocation::default().record("ignored");
    }

    #[test]
    fn test_record_swallows_write_failures() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        // A regular file where the directory should be
        MarkerLocation::new(blocker.join("out")).record("boom");
        assert!(!blocker.join("out").exists());
    }
}
