use std::{
    fs,
    io::{self, BufRead, BufReader, Read, Write},
    path::Path,
    process::{Child, ChildStdin, Command, Stdio},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use crate::{
    config::{Config, DeliveryMode},
    error::{PagecutError, PagecutResult},
};

/// Return `true` when `flag` is present in `args`, either standalone or in
/// `flag=value` form.
pub(crate) fn args_contain(args: &[String], flag: &str) -> bool {
    args.iter()
        .any(|arg| arg == flag || arg.starts_with(&format!("{flag}=")))
}

fn format_framerate(framerate: f64) -> String {
    format!("{framerate}")
}

/// Build the encoder argument list. Order matters to most encoders: input
/// options precede the input source, output options precede the destination.
pub fn build_args(cfg: &Config) -> Vec<String> {
    let mut args = cfg.input_args.clone();

    if !args_contain(&cfg.input_args, "-framerate") {
        args.push("-framerate".to_string());
        args.push(format_framerate(cfg.framerate));
    }

    match &cfg.delivery {
        DeliveryMode::Stream => {
            if cfg.image_format.is_jpeg() {
                // Piping jpegs through the default demuxer can error; force
                // the image-sequence pipe demuxer and a single-image codec.
                args.extend(
                    ["-f", "image2pipe", "-vcodec", "mjpeg", "-i", "-"].map(str::to_string),
                );
            } else {
                args.extend(["-i", "pipe:0"].map(str::to_string));
            }
        }
        DeliveryMode::Directory { .. } => {
            let pattern = cfg
                .frame_pattern()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
            args.push("-i".to_string());
            args.push(pattern);
        }
    }

    if let Some(pix_fmt) = &cfg.pix_fmt
        && !args_contain(&cfg.output_args, "-pix_fmt")
    {
        args.push("-pix_fmt".to_string());
        args.push(pix_fmt.clone());
    }

    args.extend(cfg.output_args.iter().cloned());

    if cfg.stream_output {
        // Fragmented output keeps the container streamable over a pipe.
        args.extend(
            ["-movflags", "frag_keyframe+empty_moov", "-f", "mp4", "pipe:1"].map(str::to_string),
        );
    } else {
        args.push("-y".to_string());
        args.push(cfg.output.to_string_lossy().into_owned());
    }

    args
}

/// Ensure the parent directory of `path` exists.
pub(crate) fn ensure_parent_dir(path: &Path) -> PagecutResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| {
            PagecutError::filesystem(format!(
                "failed to create output directory '{}': {e}",
                parent.display()
            ))
        })?;
    }
    Ok(())
}

/// Drain a subprocess diagnostic stream line-by-line into tracing.
pub(crate) fn spawn_stderr_logger(
    stream: impl Read + Send + 'static,
    label: &'static str,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => tracing::debug!(target: "pagecut::subprocess", "{label}: {line}"),
                Err(_) => break,
            }
        }
    })
}

/// A running encoder subprocess.
///
/// Owns the child's pipes only while the process is alive; `wait` reaps the
/// child and surfaces its exit status.
pub struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    failed: Arc<AtomicBool>,
    stderr_task: Option<JoinHandle<()>>,
    stdout_task: Option<JoinHandle<io::Result<u64>>>,
}

impl EncoderProcess {
    /// Spawn the encoder with arguments built from `cfg`.
    ///
    /// Stdin is piped only in Stream delivery; stdout is piped into
    /// `output_stream` only when streaming output was requested; stderr is
    /// always drained into the log.
    pub fn spawn(
        cfg: &Config,
        output_stream: Option<Box<dyn Write + Send>>,
    ) -> PagecutResult<Self> {
        if !cfg.stream_output {
            ensure_parent_dir(&cfg.output)?;
        }

        let args = build_args(cfg);
        tracing::debug!(encoder = %cfg.encoder_path.display(), ?args, "spawning encoder");

        let mut cmd = Command::new(&cfg.encoder_path);
        cmd.args(&args)
            .stdin(match cfg.delivery {
                DeliveryMode::Stream => Stdio::piped(),
                DeliveryMode::Directory { .. } => Stdio::null(),
            })
            .stdout(if cfg.stream_output {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            PagecutError::encoder_spawn(format!(
                "failed to spawn encoder '{}': {e}",
                cfg.encoder_path.display()
            ))
        })?;

        let stdin = child.stdin.take();
        let failed = Arc::new(AtomicBool::new(false));

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_logger(stderr, "encoder"));

        let stdout_task = match (child.stdout.take(), output_stream) {
            (Some(mut stdout), Some(mut writer)) => {
                let flag = failed.clone();
                Some(std::thread::spawn(move || {
                    let copied = io::copy(&mut stdout, &mut writer);
                    if copied.is_err() {
                        flag.store(true, Ordering::SeqCst);
                    }
                    copied
                }))
            }
            (Some(_), None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PagecutError::encoder_stream(
                    "encoder stdout was piped but no output stream was provided",
                ));
            }
            _ => None,
        };

        Ok(Self {
            child,
            stdin,
            failed,
            stderr_task,
            stdout_task,
        })
    }

    /// Hand the encoder's input stream to the single stream-mode producer.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Shared flag set once any pipe to or from the encoder has failed.
    pub fn failure_flag(&self) -> Arc<AtomicBool> {
        self.failed.clone()
    }

    /// Wait for the encoder to exit and surface its outcome.
    pub fn wait(mut self) -> PagecutResult<()> {
        drop(self.stdin.take());

        let status = self.child.wait().map_err(|e| {
            PagecutError::encoder_stream(format!("failed to wait for encoder: {e}"))
        })?;

        if let Some(task) = self.stderr_task.take() {
            let _ = task.join();
        }

        if let Some(task) = self.stdout_task.take() {
            match task.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    return Err(PagecutError::encoder_stream(format!(
                        "failed to pipe encoder output: {e}"
                    )));
                }
                Err(_) => {
                    return Err(PagecutError::encoder_stream(
                        "encoder output pump thread panicked",
                    ));
                }
            }
        }

        if !status.success() {
            self.failed.store(true, Ordering::SeqCst);
            return Err(PagecutError::encoder_exit(format!(
                "encoder exited with status {status}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Host, ImageFormat, RawOptions};
    use std::path::PathBuf;

    fn host() -> Host {
        Host {
            parallelism: 4,
            working_dir: PathBuf::from("/work"),
            timestamp_ms: 1_700_000_000_000,
        }
    }

    fn resolve(raw: RawOptions) -> Config {
        Config::resolve(raw, &host()).unwrap()
    }

    fn position(args: &[String], needle: &str) -> usize {
        args.iter()
            .position(|a| a == needle)
            .unwrap_or_else(|| panic!("missing '{needle}' in {args:?}"))
    }

    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }

    #[test]
    fn args_contain_matches_standalone_and_assignment_forms() {
        let args = vec!["-framerate=30".to_string(), "-an".to_string()];
        assert!(args_contain(&args, "-framerate"));
        assert!(args_contain(&args, "-an"));
        assert!(!args_contain(&args, "-pix_fmt"));
    }

    #[test]
    fn directory_mode_reads_the_numbered_pattern() {
        let cfg = resolve(RawOptions::default());
        let args = build_args(&cfg);

        let input = position(&args, "-i");
        assert!(args[input + 1].ends_with("image-%09d.png"));
        assert!(has_flag_with_value(&args, "-framerate", "60"));
        assert!(has_flag_with_value(&args, "-pix_fmt", "yuv420p"));
        assert_eq!(args[args.len() - 2], "-y");
        assert_eq!(args[args.len() - 1], "/work/video.mp4");
    }

    #[test]
    fn stream_mode_reads_from_stdin() {
        let cfg = resolve(RawOptions {
            pipe_mode: true,
            ..RawOptions::default()
        });
        let args = build_args(&cfg);
        assert!(has_flag_with_value(&args, "-i", "pipe:0"));
    }

    #[test]
    fn jpeg_over_pipe_forces_the_image2pipe_demuxer() {
        let cfg = resolve(RawOptions {
            pipe_mode: true,
            image_format: ImageFormat::Jpeg,
            ..RawOptions::default()
        });
        let args = build_args(&cfg);

        assert!(has_flag_with_value(&args, "-f", "image2pipe"));
        assert!(has_flag_with_value(&args, "-vcodec", "mjpeg"));
        assert!(has_flag_with_value(&args, "-i", "-"));
        // The demuxer and codec overrides must precede the input source.
        assert!(position(&args, "-f") < position(&args, "-i"));
        assert!(position(&args, "-vcodec") < position(&args, "-i"));
    }

    #[test]
    fn user_framerate_suppresses_the_inserted_flag() {
        let cfg = resolve(RawOptions {
            input_args: vec!["-framerate".to_string(), "24".to_string()],
            ..RawOptions::default()
        });
        let args = build_args(&cfg);
        assert_eq!(args.iter().filter(|a| *a == "-framerate").count(), 1);
        assert!(has_flag_with_value(&args, "-framerate", "24"));
    }

    #[test]
    fn user_pix_fmt_suppresses_the_inserted_flag() {
        let cfg = resolve(RawOptions {
            output_args: vec!["-pix_fmt=rgb24".to_string()],
            ..RawOptions::default()
        });
        let args = build_args(&cfg);
        assert_eq!(
            args.iter()
                .filter(|a| a.starts_with("-pix_fmt"))
                .count(),
            1
        );
    }

    #[test]
    fn input_args_come_first_and_output_args_precede_the_destination() {
        let cfg = resolve(RawOptions {
            input_args: vec!["-loglevel".to_string(), "error".to_string()],
            output_args: vec!["-an".to_string()],
            ..RawOptions::default()
        });
        let args = build_args(&cfg);
        assert_eq!(args[0], "-loglevel");
        assert!(position(&args, "-an") > position(&args, "-i"));
        assert!(position(&args, "-an") < position(&args, "-y"));
    }

    #[test]
    fn stream_output_uses_fragmented_mp4_on_stdout() {
        let cfg = resolve(RawOptions {
            stream_output: true,
            ..RawOptions::default()
        });
        let args = build_args(&cfg);
        assert!(has_flag_with_value(
            &args,
            "-movflags",
            "frag_keyframe+empty_moov"
        ));
        assert!(has_flag_with_value(&args, "-f", "mp4"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
        assert!(!args.contains(&"-y".to_string()));
    }

    #[test]
    fn fractional_framerates_keep_their_precision() {
        let cfg = resolve(RawOptions {
            fps: Some(29.97),
            ..RawOptions::default()
        });
        let args = build_args(&cfg);
        assert!(has_flag_with_value(&args, "-framerate", "29.97"));
    }
}
