//! Stub retrieval binaries for unit tests.

use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Writes an executable bash script with `body` after the shebang.
pub(crate) fn install_script(dir: &Path, body: &str) -> PathBuf {
    let script_path = dir.join("stub-bin");
    fs::write(&script_path, format!("#!/usr/bin/env bash\nset -eu\n{body}")).unwrap();
    #[cfg(unix)]
    {
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
    }
    script_path
}

/// Installs a fake yt-dlp. Before `body` runs, `$output` holds the `--output`
/// template, `$url` the final argument, and `$metadata` is `1` for the
/// metadata-only invocation. Every argument vector is appended to
/// `<dir>/calls.log`, one line per call.
pub(crate) fn install_ytdlp_stub(dir: &Path, body: &str) -> PathBuf {
    let log = dir.join("calls.log");
    let preamble = format!(
        r#"printf '%s\n' "$*" >> '{log}'
output=""
metadata=0
url=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    --output)
      shift
      output="$1"
      ;;
    --write-info-json)
      metadata=1
      ;;
  esac
  url="$1"
  shift
done
"#,
        log = log.display()
    );
    install_script(dir, &format!("{preamble}{body}"))
}

/// Lines recorded by [`install_ytdlp_stub`].
pub(crate) fn recorded_calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Polls `dir` until it has no entries or a few seconds pass. Stream cleanup
/// runs on the blocking pool, so it can lag the end of the stream slightly.
pub(crate) async fn wait_until_empty(dir: &Path) {
    for _ in 0..100 {
        if fs::read_dir(dir).map_or(true, |mut entries| entries.next().is_none()) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
