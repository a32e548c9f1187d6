use std::path::PathBuf;

pub const DAEMON_TCP_PORT: u16 = 9877;

#[cfg(unix)]
pub fn mpv_socket_name() -> String {
    format!("{}/chatsync-mpv.sock", std::env::temp_dir().display())
}

#[cfg(windows)]
pub fn mpv_socket_name() -> String {
    "chatsync-mpv".to_string()
}

/// `--input-ipc-server` argument matching a socket name from the config.
#[cfg(unix)]
pub fn mpv_socket_arg(socket_name: &str) -> String {
    format!("--input-ipc-server={}", socket_name)
}

#[cfg(windows)]
pub fn mpv_socket_arg(socket_name: &str) -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", socket_name)
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/chatsync/ on every unix, including macOS
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("chatsync")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatsync")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("chatsync")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatsync")
    }
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| p.exists())
}

/// Find mpv for `chatsync <media>`.
/// Checks `MPV_PATH`, then beside the current exe, then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    let exe_name = mpv_binary_name();
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    find_on_path(exe_name)
}
