use env_logger::{Builder, Env, Target};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const LOG_BACKUPS: usize = 5;

/// Initialises logging with `level` as the default filter, overridable
/// with `RUST_LOG`. Records go to stderr and, when `file` is given, also to
/// a size-rotated log file. Repeated calls are ignored.
pub fn init_logger_with(level: &str, file: Option<&Path>) {
    let mut builder = Builder::from_env(Env::default().default_filter_or(level));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {} - {}",
            buf.timestamp_millis(),
            record.target(),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = file {
        match RotatingFile::open(path, LOG_MAX_BYTES, LOG_BACKUPS) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(StderrAndFile { file })));
            }
            Err(e) => eprintln!("Cannot open log file {}: {e}", path.display()),
        }
    }

    let _ = builder.try_init();
}

/// Copies every record to stderr before writing it to the file.
struct StderrAndFile<W> {
    file: W,
}

impl<W: Write> Write for StderrAndFile<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}

/// Append-only file that rolls over to `<path>.1` .. `<path>.<backups>`
/// once a write would take it past `max_bytes`.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64, backups: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            backups,
            file,
            written,
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups > 0 {
            for index in (1..self.backups).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    std::fs::rename(&from, self.backup_path(index + 1))?;
                }
            }
            std::fs::rename(&self.path, self.backup_path(1))?;
        }
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stockcast-logger-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn file_rolls_over_and_keeps_bounded_backups() {
        let dir = temp_dir("rotate");
        let path = dir.join("stockcast.log");
        let mut file = RotatingFile::open(&path, 64, 2).unwrap();
        for i in 0..10 {
            // 20 bytes per line, so three lines fit in each file.
            writeln!(file, "{i:019}").unwrap();
        }
        file.flush().unwrap();

        assert!(file.backup_path(1).exists());
        assert!(file.backup_path(2).exists());
        assert!(!file.backup_path(3).exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{:019}\n", 9));
        assert_eq!(
            std::fs::read_to_string(file.backup_path(1)).unwrap(),
            format!("{:019}\n{:019}\n{:019}\n", 6, 7, 8)
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reopening_counts_existing_bytes() {
        let dir = temp_dir("reopen");
        let path = dir.join("stockcast.log");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "x".repeat(60)).unwrap();

        let mut file = RotatingFile::open(&path, 64, 1).unwrap();
        writeln!(file, "{:019}", 1).unwrap();
        file.flush().unwrap();

        assert_eq!(std::fs::read_to_string(file.backup_path(1)).unwrap().len(), 60);
        assert_eq!(std::fs::read_to_string(&path).unwrap().len(), 20);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn records_reach_both_stderr_copy_and_file() {
        let mut tee = StderrAndFile { file: Vec::new() };
        tee.write_all(b"hello\n").unwrap();
        assert_eq!(tee.file, b"hello\n");
    }
}
