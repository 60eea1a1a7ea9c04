//! Execution of a parsed [`Pipeline`].
//!
//! Every stage is started before any is waited on. External stages are wired
//! to each other with OS pipes, so producers and consumers run concurrently.
//! A builtin in the middle of a pipeline runs to completion in-process; its
//! output is collected in memory and fed to the next stage by a writer thread.

use crate::builtin::BuiltinRegistry;
use crate::command::{ExitCode, Flow, StageIo};
use crate::env::ShellState;
use crate::error::ExecError;
use crate::external::{ExternalCommand, Resolution, exit_code_of, find_command_path};
use crate::parser::{CommandSegment, OutputTarget, Pipeline, WriteMode};
use log::{debug, warn};
use std::ffi::OsStr;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdout, Stdio};
use std::thread::{self, JoinHandle};

/// Where a stage reads its standard input from.
enum Input {
    /// The shell's own stdin.
    Inherit,
    File(File),
    /// Read end of the previous stage's stdout pipe.
    Upstream(ChildStdout),
    /// Complete output of a previous builtin.
    Captured(Vec<u8>),
    /// Nothing: the previous stage failed or wrote to a file.
    Empty,
}

/// Where a stage writes its standard output to.
enum Output {
    Inherit,
    File(File),
    /// Into the next stage.
    Pipe,
}

/// Where a stage writes its standard error to.
enum ErrorSink {
    Inherit,
    File(File),
}

impl ErrorSink {
    /// Report a stage failure. Failing to report is only logged.
    fn report(&mut self, message: &dyn Display) {
        let result = match self {
            ErrorSink::Inherit => writeln!(io::stderr(), "{}", message),
            ErrorSink::File(f) => writeln!(f, "{}", message),
        };
        if let Err(e) = result {
            warn!("cannot report error '{}': {}", message, e);
        }
    }
}

enum StageStatus {
    Running { name: String, child: Child },
    Finished(Flow),
}

/// A started stage and what it hands to the stage after it.
struct Started {
    status: StageStatus,
    next: Input,
}

impl Started {
    fn failed(code: ExitCode) -> Self {
        Self {
            status: StageStatus::Finished(Flow::Continue(code)),
            next: Input::Empty,
        }
    }
}

/// Run `pipeline` and record its status in `state.last_exit_code`.
///
/// The status is the last stage's. `Terminate` is only returned by a
/// builtin that is the sole stage; inside a longer pipeline it is a plain
/// exit status. A pipeline with no segments runs nothing and succeeds.
pub fn run(pipeline: &Pipeline, state: &mut ShellState, builtins: &BuiltinRegistry) -> Flow {
    let mut runner = Runner {
        state,
        builtins,
        feeders: Vec::new(),
    };
    let flow = runner.run(pipeline);
    runner.state.last_exit_code = flow.exit_code();
    flow
}

struct Runner<'a> {
    state: &'a mut ShellState,
    builtins: &'a BuiltinRegistry,
    feeders: Vec<JoinHandle<()>>,
}

impl Runner<'_> {
    fn run(&mut self, pipeline: &Pipeline) -> Flow {
        let segments = &pipeline.segments;
        let Some(last) = segments.len().checked_sub(1) else {
            return Flow::Continue(0);
        };

        let mut upstream = Input::Inherit;
        let mut stages = Vec::with_capacity(segments.len());
        for (i, segment) in segments.iter().enumerate() {
            let input = std::mem::replace(&mut upstream, Input::Empty);
            let started = self.start_stage(segment, input, i < last);
            upstream = started.next;
            stages.push(started.status);
        }
        // The last stage never pipes, so this only closes a leftover reader.
        drop(upstream);

        let mut flow = Flow::Continue(0);
        for status in stages {
            flow = match status {
                StageStatus::Running { name, mut child } => match child.wait() {
                    Ok(exit_status) => Flow::Continue(exit_code_of(exit_status)),
                    Err(e) => {
                        warn!("failed to wait for {}: {}", name, e);
                        Flow::Continue(1)
                    }
                },
                StageStatus::Finished(flow) => flow,
            };
        }
        for feeder in self.feeders.drain(..) {
            if feeder.join().is_err() {
                warn!("pipe writer thread panicked");
            }
        }

        match flow {
            Flow::Terminate(code) if segments.len() > 1 => Flow::Continue(code),
            flow => flow,
        }
    }

    /// Open the stage's redirections, then run or spawn its command.
    fn start_stage(&mut self, segment: &CommandSegment, input: Input, piped: bool) -> Started {
        let cwd = self.state.current_dir.clone();

        let mut stderr = match &segment.stderr {
            Some(target) => match open_output(&cwd, target) {
                Ok(f) => ErrorSink::File(f),
                Err(e) => {
                    ErrorSink::Inherit.report(&e);
                    return Started::failed(e.exit_code());
                }
            },
            None => ErrorSink::Inherit,
        };

        let output = match &segment.stdout {
            Some(target) => match open_output(&cwd, target) {
                Ok(f) => Output::File(f),
                Err(e) => {
                    stderr.report(&e);
                    return Started::failed(e.exit_code());
                }
            },
            None if piped => Output::Pipe,
            None => Output::Inherit,
        };

        let input = match &segment.stdin {
            Some(path) => match File::open(cwd.join(path)) {
                Ok(f) => Input::File(f),
                Err(source) => {
                    let e = ExecError::Redirect {
                        path: path.clone(),
                        source,
                    };
                    stderr.report(&e);
                    return Started::failed(e.exit_code());
                }
            },
            None => input,
        };

        let name = segment.name();
        if self.builtins.is_builtin(name) {
            return self.run_builtin(segment, input, output, stderr);
        }

        let search = OsStr::new(self.state.search_path()).to_os_string();
        let error = match find_command_path(&search, &cwd, name) {
            Resolution::Found(path) => {
                let command = ExternalCommand::new(path, segment.argv.clone());
                match self.spawn(&command, name, input, output, &stderr) {
                    Ok(started) => return started,
                    Err(e) => e,
                }
            }
            Resolution::NotExecutable(_) => ExecError::PermissionDenied(name.to_string()),
            Resolution::NotFound => ExecError::NotFound(name.to_string()),
        };
        stderr.report(&error);
        Started::failed(error.exit_code())
    }

    fn run_builtin(
        &mut self,
        segment: &CommandSegment,
        input: Input,
        output: Output,
        mut stderr: ErrorSink,
    ) -> Started {
        let args: Vec<&str> = segment.args().iter().map(String::as_str).collect();
        let Some(factory) = self.builtins.lookup(segment.name()) else {
            return Started::failed(crate::error::NOT_FOUND_STATUS);
        };
        let command = factory.create(&args);

        let mut stdin: Box<dyn Read> = match input {
            Input::Inherit => Box::new(io::stdin()),
            Input::File(f) => Box::new(f),
            Input::Upstream(out) => Box::new(out),
            Input::Captured(bytes) => Box::new(Cursor::new(bytes)),
            Input::Empty => Box::new(io::empty()),
        };
        let piped = matches!(output, Output::Pipe);
        let mut captured = Vec::new();
        let result = {
            let mut stdout: Box<dyn Write + '_> = match output {
                Output::Inherit => Box::new(io::stdout()),
                Output::File(f) => Box::new(f),
                Output::Pipe => Box::new(&mut captured),
            };
            let mut stderr_writer: Box<dyn Write + '_> = match &mut stderr {
                ErrorSink::Inherit => Box::new(io::stderr()),
                ErrorSink::File(f) => Box::new(f),
            };
            let mut io = StageIo {
                stdin: &mut stdin,
                stdout: &mut stdout,
                stderr: &mut stderr_writer,
            };
            command
                .execute(&mut io, self.state)
                .and_then(|flow| io.stdout.flush().map(|_| flow).map_err(Into::into))
        };

        let flow = match result {
            Ok(flow) => flow,
            Err(e) => {
                stderr.report(&format_args!("{}: {}", segment.name(), e));
                Flow::Continue(1)
            }
        };
        debug!("builtin {} finished with {:?}", segment.name(), flow);
        Started {
            status: StageStatus::Finished(flow),
            next: if piped {
                Input::Captured(captured)
            } else {
                Input::Empty
            },
        }
    }

    fn spawn(
        &mut self,
        command: &ExternalCommand,
        name: &str,
        input: Input,
        output: Output,
        stderr: &ErrorSink,
    ) -> Result<Started, ExecError> {
        let spawn_error = |source: io::Error| match source.kind() {
            io::ErrorKind::PermissionDenied => ExecError::PermissionDenied(name.to_string()),
            io::ErrorKind::NotFound => ExecError::NotFound(name.to_string()),
            _ => ExecError::Spawn {
                name: name.to_string(),
                source,
            },
        };

        let mut cmd = command.command(self.state);
        let mut feed = None;
        cmd.stdin(match input {
            Input::Inherit => Stdio::inherit(),
            Input::File(f) => Stdio::from(f),
            Input::Upstream(out) => Stdio::from(out),
            Input::Captured(bytes) => {
                feed = Some(bytes);
                Stdio::piped()
            }
            Input::Empty => Stdio::null(),
        });
        let piped = matches!(output, Output::Pipe);
        cmd.stdout(match output {
            Output::Inherit => Stdio::inherit(),
            Output::File(f) => Stdio::from(f),
            Output::Pipe => Stdio::piped(),
        });
        cmd.stderr(match stderr {
            ErrorSink::Inherit => Stdio::inherit(),
            ErrorSink::File(f) => Stdio::from(f.try_clone().map_err(spawn_error)?),
        });

        let spawned = cmd.spawn();
        // `cmd` owns the parent's copies of the descriptors handed to the
        // child. They must be closed now, or readers downstream never see EOF.
        drop(cmd);
        let mut child = spawned.map_err(spawn_error)?;
        debug!("spawned {} as pid {}", name, child.id());

        if let Some(bytes) = feed {
            if let Some(mut child_stdin) = child.stdin.take() {
                self.feeders.push(thread::spawn(move || {
                    if let Err(e) = child_stdin.write_all(&bytes) {
                        if e.kind() != io::ErrorKind::BrokenPipe {
                            warn!("failed to feed pipeline stage: {}", e);
                        }
                    }
                }));
            }
        }

        let next = match child.stdout.take() {
            Some(out) if piped => Input::Upstream(out),
            _ => Input::Empty,
        };
        Ok(Started {
            status: StageStatus::Running {
                name: name.to_string(),
                child,
            },
            next,
        })
    }
}

/// Open an output redirection target, relative to `cwd`.
fn open_output(cwd: &Path, target: &OutputTarget) -> Result<File, ExecError> {
    let mut options = OpenOptions::new();
    options.create(true);
    match target.mode {
        WriteMode::Truncate => options.write(true).truncate(true),
        WriteMode::Append => options.append(true),
    };
    options
        .open(cwd.join(&target.path))
        .map_err(|source| ExecError::Redirect {
            path: target.path.clone(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use std::fs;
    use std::path::PathBuf;

    struct Fixture {
        dir: tempfile::TempDir,
        state: ShellState,
        builtins: BuiltinRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut state = ShellState::empty(dir.path().to_path_buf());
            state.set_var("PATH", std::env::var("PATH").unwrap_or_default());
            Self {
                dir,
                state,
                builtins: BuiltinRegistry::default(),
            }
        }

        fn run(&mut self, line: &str) -> Flow {
            let pipeline = parse_line(line, &self.state).unwrap().unwrap();
            run(&pipeline, &mut self.state, &self.builtins)
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn read(&self, name: &str) -> String {
            fs::read_to_string(self.path(name)).unwrap()
        }
    }

    #[test]
    fn builtin_output_to_file() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("echo hello world > out.txt"), Flow::Continue(0));
        assert_eq!(fx.read("out.txt"), "hello world\n");

        fx.run("echo again >> out.txt");
        assert_eq!(fx.read("out.txt"), "hello world\nagain\n");

        fx.run("echo fresh 1> out.txt");
        assert_eq!(fx.read("out.txt"), "fresh\n");
    }

    #[test]
    fn missing_command_creates_targets_and_reports() {
        let mut fx = Fixture::new();
        let flow = fx.run("no_such_cmd_zz9 > out.txt 2> err.txt");
        assert_eq!(flow, Flow::Continue(127));
        assert_eq!(fx.state.last_exit_code, 127);
        assert_eq!(fx.read("out.txt"), "");
        assert_eq!(fx.read("err.txt"), "no_such_cmd_zz9: command not found\n");
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_126() {
        use std::os::unix::fs::PermissionsExt;
        let mut fx = Fixture::new();
        let script = fx.path("script.sh");
        fs::write(&script, "echo hi\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

        assert_eq!(fx.run("./script.sh 2> err.txt"), Flow::Continue(126));
        assert_eq!(fx.read("err.txt"), "./script.sh: Permission denied\n");
    }

    #[cfg(unix)]
    #[test]
    fn directory_named_like_command_is_not_found() {
        let mut fx = Fixture::new();
        fs::create_dir_all(fx.path("bin/tool")).unwrap();
        let search = fx.path("bin").display().to_string();
        fx.state.set_var("PATH", search);

        assert_eq!(fx.run("tool 2> err.txt"), Flow::Continue(127));
        assert_eq!(fx.read("err.txt"), "tool: command not found\n");

        // An explicit path to a directory is still not executable.
        assert_eq!(fx.run("bin/tool 2> err.txt"), Flow::Continue(126));
        assert_eq!(fx.read("err.txt"), "bin/tool: Permission denied\n");
    }

    #[test]
    fn empty_pipeline_does_nothing() {
        let mut fx = Fixture::new();
        fx.state.last_exit_code = 5;
        let pipeline = Pipeline {
            segments: Vec::new(),
        };
        assert_eq!(run(&pipeline, &mut fx.state, &fx.builtins), Flow::Continue(0));
        assert_eq!(fx.state.last_exit_code, 0);
    }

    #[test]
    fn redirect_open_failure_is_a_stage_error() {
        let mut fx = Fixture::new();
        let flow = fx.run("echo hi > missing/dir/out.txt 2> err.txt");
        assert_eq!(flow, Flow::Continue(1));
        assert!(fx.read("err.txt").starts_with("missing/dir/out.txt: "));
    }

    #[test]
    fn missing_input_file_is_reported() {
        let mut fx = Fixture::new();
        let flow = fx.run("cat < nope.txt 2> err.txt");
        assert_eq!(flow, Flow::Continue(1));
        assert!(fx.read("err.txt").starts_with("nope.txt: "));
    }

    #[cfg(unix)]
    #[test]
    fn external_pipeline_streams_between_stages() {
        let mut fx = Fixture::new();
        let flow = fx.run(r"printf 'a\nb\nc\n' | wc -l > count.txt");
        assert_eq!(flow, Flow::Continue(0));
        assert_eq!(fx.read("count.txt").trim(), "3");
    }

    #[cfg(unix)]
    #[test]
    fn last_stage_status_wins() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("false | true"), Flow::Continue(0));
        assert_eq!(fx.run("true | false"), Flow::Continue(1));
        assert_eq!(fx.state.last_exit_code, 1);
    }

    #[cfg(unix)]
    #[test]
    fn large_output_does_not_deadlock() {
        let mut fx = Fixture::new();
        // Far more than a pipe buffer holds.
        let flow = fx.run("head -c 2000000 /dev/zero | wc -c > n.txt");
        assert_eq!(flow, Flow::Continue(0));
        assert_eq!(fx.read("n.txt").trim(), "2000000");
    }

    #[cfg(unix)]
    #[test]
    fn builtin_feeds_external_stage() {
        let mut fx = Fixture::new();
        fx.run("echo one two three | wc -w > n.txt");
        assert_eq!(fx.read("n.txt").trim(), "3");
    }

    #[cfg(unix)]
    #[test]
    fn external_feeds_builtin_stage() {
        let mut fx = Fixture::new();
        // echo ignores its input; the upstream process must still be reaped.
        assert_eq!(fx.run("printf data | echo done > out.txt"), Flow::Continue(0));
        assert_eq!(fx.read("out.txt"), "done\n");
    }

    #[cfg(unix)]
    #[test]
    fn middle_stage_stderr_redirection_applies() {
        let mut fx = Fixture::new();
        let flow = fx.run("printf x | sh -c 'cat; echo oops >&2' 2> err.txt | wc -c > n.txt");
        assert_eq!(flow, Flow::Continue(0));
        assert_eq!(fx.read("err.txt"), "oops\n");
        assert_eq!(fx.read("n.txt").trim(), "1");
    }

    #[cfg(unix)]
    #[test]
    fn stdout_file_overrides_pipe() {
        let mut fx = Fixture::new();
        fx.run("printf abc > mid.txt | wc -c > n.txt");
        assert_eq!(fx.read("mid.txt"), "abc");
        assert_eq!(fx.read("n.txt").trim(), "0");
    }

    #[cfg(unix)]
    #[test]
    fn stdin_redirection_feeds_first_stage() {
        let mut fx = Fixture::new();
        fs::write(fx.path("in.txt"), "x\ny\n").unwrap();
        fx.run("wc -l < in.txt > n.txt");
        assert_eq!(fx.read("n.txt").trim(), "2");
    }

    #[cfg(unix)]
    #[test]
    fn failed_stage_does_not_stop_the_rest() {
        let mut fx = Fixture::new();
        let flow = fx.run("no_such_cmd_zz9 2> err.txt | wc -c > n.txt");
        assert_eq!(flow, Flow::Continue(0));
        assert_eq!(fx.read("n.txt").trim(), "0");
        assert_eq!(fx.read("err.txt"), "no_such_cmd_zz9: command not found\n");
    }

    #[test]
    fn exit_terminates_only_as_sole_stage() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("exit 4"), Flow::Terminate(4));
        assert_eq!(fx.run("exit 5 | echo x > out.txt"), Flow::Continue(0));
        assert_eq!(fx.run("echo x | exit 6"), Flow::Continue(6));
    }

    #[cfg(unix)]
    #[test]
    fn children_see_exported_variables_and_cwd() {
        let mut fx = Fixture::new();
        fx.run("export GREETING=hi");
        fx.run("sh -c 'echo $GREETING; pwd' > out.txt");
        let expected_dir = fs::canonicalize(fx.dir.path()).unwrap();
        let out = fx.read("out.txt");
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("hi"));
        assert_eq!(
            fs::canonicalize(lines.next().unwrap()).unwrap(),
            expected_dir
        );
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_of_external_command() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("sh -c 'exit 3'"), Flow::Continue(3));
        assert_eq!(fx.state.last_exit_code, 3);
    }
}
