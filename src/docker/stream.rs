use std::io::{BufRead, BufReader, Read};
use std::process::Child;
use std::sync::mpsc::{self, Receiver, Sender};
use log::debug;
use super::LogLine;

/// Output of a running engine command, read line by line.
///
/// Every pipe is drained by its own reader thread, so a process writing a
/// lot to one pipe never blocks on the other. Once all pipes are closed the
/// process is reaped; a non-zero exit status that was not already reported
/// through an error line becomes a final [LogLine::Error]. Dropping the
/// stream early kills the process.
pub struct ProcessStream {
    label: String,
    child: Child,
    lines: Receiver<LogLine>,
    failed: bool,
    done: bool,
    reaped: bool,
}

impl ProcessStream {
    /// Every line of `reader` is output. Used when stdout and stderr share one pipe.
    pub fn merged(label: impl Into<String>, child: Child, reader: impl Read + Send + 'static) -> Self {
        let label = label.into();
        let (tx, rx) = mpsc::channel();
        forward(&label, reader, tx, |line| Some(LogLine::Output(line)));
        Self::new(label, child, rx)
    }

    /// Lines of `output` are status lines, every non-blank line of `errors` is an error.
    /// Lines of one pipe keep their order; the two pipes interleave as they are read.
    pub fn split(
        label: impl Into<String>,
        child: Child,
        output: impl Read + Send + 'static,
        errors: impl Read + Send + 'static,
    ) -> Self {
        let label = label.into();
        let (tx, rx) = mpsc::channel();
        forward(&label, output, tx.clone(), |line| Some(LogLine::Output(line)));
        forward(&label, errors, tx, |line| {
            (!line.trim().is_empty()).then_some(LogLine::Error(line))
        });
        Self::new(label, child, rx)
    }

    fn new(label: String, child: Child, lines: Receiver<LogLine>) -> Self {
        Self {
            label,
            child,
            lines,
            failed: false,
            done: false,
            reaped: false,
        }
    }

    fn reap(&mut self) -> Option<LogLine> {
        self.done = true;
        self.reaped = true;
        match self.child.wait() {
            Ok(status) if status.success() || self.failed => {
                debug!("{} finished with {status}", self.label);
                None
            }
            Ok(status) => Some(LogLine::Error(format!("{} failed with {status}", self.label))),
            Err(err) => Some(LogLine::Error(format!("wait for {}: {err}", self.label))),
        }
    }
}

/// Send the lines of `reader` to `tx` from a background thread until end of
/// file, a read error or a closed receiver.
fn forward(
    label: &str,
    reader: impl Read + Send + 'static,
    tx: Sender<LogLine>,
    classify: fn(String) -> Option<LogLine>,
) {
    let label = label.to_string();
    std::thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let (record, stop) = match line {
                Ok(line) => match classify(line) {
                    Some(record) => (record, false),
                    None => continue,
                },
                Err(err) => (LogLine::Error(format!("read output of {label}: {err}")), true),
            };
            if tx.send(record).is_err() || stop {
                break;
            }
        }
    });
}

impl Iterator for ProcessStream {
    type Item = LogLine;

    fn next(&mut self) -> Option<LogLine> {
        if self.done {
            return None;
        }

        match self.lines.recv() {
            Ok(line) => {
                if matches!(line, LogLine::Error(_)) {
                    self.failed = true;
                }
                Some(line)
            }
            // Every reader thread has finished.
            Err(_) => self.reap(),
        }
    }
}

impl Drop for ProcessStream {
    fn drop(&mut self) {
        if !self.reaped {
            debug!("Stopping {}", self.label);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
