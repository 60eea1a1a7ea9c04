use crate::command::ExitCode;
use crate::env::ShellState;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// Outcome of looking a command name up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A regular file with execute permission.
    Found(PathBuf),
    /// A file exists but cannot be executed.
    NotExecutable(PathBuf),
    NotFound,
}

/// A program outside the shell, ready to be spawned.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    path: PathBuf,
    argv: Vec<String>,
}

impl ExternalCommand {
    /// `argv[0]` is passed through unchanged, the way the user typed it.
    pub fn new(path: PathBuf, argv: Vec<String>) -> Self {
        Self { path, argv }
    }

    /// Build a process for this command running in `state`.
    ///
    /// The child gets a snapshot of the shell variables as its whole
    /// environment, and the shell's current directory.
    pub fn command(&self, state: &ShellState) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.args(&self.argv[1..])
            .env_clear()
            .envs(state.vars.iter())
            .current_dir(&state.current_dir);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.arg0(&self.argv[0]);
        }
        cmd
    }
}

/// Translate a finished process' status into a shell exit code.
pub fn exit_code_of(exit_status: ExitStatus) -> ExitCode {
    match exit_status.code() {
        Some(x) => x,
        None => terminated_by_signal(exit_status),
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> i32 {
    -1
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - A name containing a path separator is taken as a path, relative to
///   `current_dir` unless absolute. No `PATH` search happens. Anything there
///   that is not an executable regular file, a directory included, is
///   [`Resolution::NotExecutable`].
/// - A bare name is searched in each directory of `search_paths` in order; the
///   first executable regular file wins. If only non-executable regular files
///   carry the name, the first of those is reported as
///   [`Resolution::NotExecutable`]. Other entries, such as directories, are
///   not matches at all.
/// - An empty name is never found.
pub fn find_command_path(search_paths: &OsStr, current_dir: &Path, name: &str) -> Resolution {
    if name.is_empty() {
        return Resolution::NotFound;
    }

    if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        return classify(&current_dir.join(name));
    }

    let mut not_executable = None;
    for dir in std::env::split_paths(search_paths) {
        // An empty PATH entry means the current directory.
        let dir = if dir.as_os_str().is_empty() {
            current_dir.to_path_buf()
        } else {
            current_dir.join(dir)
        };
        let candidate = dir.join(name);
        match candidate.metadata() {
            Ok(meta) if meta.is_file() && is_executable(&meta) => {
                return Resolution::Found(candidate);
            }
            Ok(meta) if meta.is_file() && not_executable.is_none() => {
                not_executable = Some(candidate)
            }
            _ => {}
        }
    }
    not_executable.map_or(Resolution::NotFound, Resolution::NotExecutable)
}

fn classify(path: &Path) -> Resolution {
    match path.metadata() {
        Ok(meta) if meta.is_file() && is_executable(&meta) => Resolution::Found(path.to_path_buf()),
        Ok(_) => Resolution::NotExecutable(path.to_path_buf()),
        Err(_) => Resolution::NotFound,
    }
}

/// True for metadata of a file with any execute bit set.
#[cfg(unix)]
pub fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::fs::File;

    #[cfg(unix)]
    fn make_file(dir: &Path, name: &str, mode: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        File::create(&path).expect("create file");
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).expect("chmod");
        path
    }

    #[test]
    #[cfg(unix)]
    fn absolute_existing_true() {
        let res = find_command_path(OsStr::new("/bin"), Path::new("/"), "/bin/sh");
        assert_eq!(res, Resolution::Found(PathBuf::from("/bin/sh")));
    }

    #[test]
    #[cfg(unix)]
    fn absolute_nonexisting() {
        let res = find_command_path(OsStr::new("/bin"), Path::new("/"), "/bin/nonexisting");
        assert_eq!(res, Resolution::NotFound);
    }

    #[test]
    #[cfg(unix)]
    fn single_component_found_in_path() {
        let res = find_command_path(OsStr::new("/nonexistent-dir:/bin"), Path::new("/"), "sh");
        assert_eq!(res, Resolution::Found(PathBuf::from("/bin/sh")));
    }

    #[test]
    #[cfg(unix)]
    fn single_component_not_found_in_path() {
        let res = find_command_path(OsStr::new("/bin"), Path::new("/"), "nonexisting");
        assert_eq!(res, Resolution::NotFound);
    }

    #[test]
    fn empty_name_is_not_found() {
        let res = find_command_path(OsStr::new("/bin"), Path::new("/"), "");
        assert_eq!(res, Resolution::NotFound);
    }

    #[test]
    #[cfg(unix)]
    fn first_executable_match_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        make_file(first.path(), "tool", 0o644);
        let wanted = make_file(second.path(), "tool", 0o755);

        let search = std::env::join_paths([first.path(), second.path()]).unwrap();
        let res = find_command_path(&search, Path::new("/"), "tool");
        assert_eq!(res, Resolution::Found(wanted));
    }

    #[test]
    #[cfg(unix)]
    fn non_executable_only_match_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_file(dir.path(), "script", 0o644);
        let res = find_command_path(dir.path().as_os_str(), Path::new("/"), "script");
        assert_eq!(res, Resolution::NotExecutable(path));
    }

    #[test]
    #[cfg(unix)]
    fn directory_on_path_is_not_a_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tool")).unwrap();
        let res = find_command_path(dir.path().as_os_str(), Path::new("/"), "tool");
        assert_eq!(res, Resolution::NotFound);

        // A later regular file still wins over the earlier directory.
        let later = tempfile::tempdir().unwrap();
        let wanted = make_file(later.path(), "tool", 0o755);
        let search = std::env::join_paths([dir.path(), later.path()]).unwrap();
        let res = find_command_path(&search, Path::new("/"), "tool");
        assert_eq!(res, Resolution::Found(wanted));
    }

    #[test]
    #[cfg(unix)]
    fn relative_path_resolves_against_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        let path = make_file(&dir.path().join("bin"), "run", 0o755);

        let res = find_command_path(OsStr::new(""), dir.path(), "bin/run");
        assert_eq!(res, Resolution::Found(path));

        let res = find_command_path(OsStr::new(""), dir.path(), "./bin");
        assert_eq!(res, Resolution::NotExecutable(dir.path().join("./bin")));
    }

    #[test]
    #[cfg(unix)]
    fn exit_code_of_signal_is_offset() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code_of(ExitStatus::from_raw(9)), 128 + 9);
        assert_eq!(exit_code_of(ExitStatus::from_raw(3 << 8)), 3);
    }
}
