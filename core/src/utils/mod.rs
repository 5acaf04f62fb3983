pub mod extract;

use std::path::PathBuf;
use which::which;

/// Resolves the full path to a tool binary.
/// Search order: ./tools/{name} → ./{name} → System PATH
pub fn get_binary_path(tool_name: &str) -> Option<String> {
    let binary_name = if cfg!(target_os = "windows") {
        format!("{}.exe", tool_name)
    } else {
        tool_name.to_string()
    };

    let tools_path = PathBuf::from("./tools").join(&binary_name);
    if tools_path.is_file() {
        return Some(tools_path.to_string_lossy().to_string());
    }

    let local_path = PathBuf::from("./").join(&binary_name);
    if local_path.is_file() {
        return Some(local_path.to_string_lossy().to_string());
    }

    if let Ok(path) = which(&binary_name) {
        return Some(path.to_string_lossy().to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_is_not_found() {
        assert!(get_binary_path("sheriff-definitely-not-a-real-tool").is_none());
    }
}
