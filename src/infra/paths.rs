// src/infra/paths.rs — XDG-compliant path management
//
// All paths respect the EDITSTREAM_HOME environment variable for isolation.
// When EDITSTREAM_HOME is set, config and data live under that directory.
// When unset, config uses ~/.editstream/ and data uses XDG_DATA_HOME/editstream.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Returns the EDITSTREAM_HOME override, if set.
fn editstream_home() -> Option<PathBuf> {
    std::env::var_os("EDITSTREAM_HOME").map(PathBuf::from)
}

/// Home directory, falling back to the working directory when none is known.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $EDITSTREAM_HOME/ or ~/.editstream/
pub fn config_dir() -> PathBuf {
    if let Some(home) = editstream_home() {
        return home;
    }
    dirs_home().join(".editstream")
}

/// Data directory: $EDITSTREAM_HOME/data/ or ~/.local/share/editstream/
pub fn data_dir() -> PathBuf {
    if let Some(home) = editstream_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "editstream")
        .map(|d| d.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

/// Default database path (log, raw events and session analytics).
pub fn db_path() -> PathBuf {
    data_dir().join("editstream.db")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}
