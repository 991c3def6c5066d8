//! Terminal operator: single key presses from stdin, text to stdout.

use async_trait::async_trait;
use sensor_silo_core::{Error, Operator, Result};
use std::io::{Read, Write};

/// Operator at the local terminal.
#[derive(Debug, Default)]
pub struct TerminalOperator {
    /// A progress reading is on the current line.
    progress_line: bool,
}

impl TerminalOperator {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Puts stdin in non-canonical, no-echo mode until dropped.
struct RawMode {
    saved: libc::termios,
}

impl RawMode {
    /// `None` when stdin is not a terminal.
    fn enable() -> Option<Self> {
        // SAFETY: isatty only inspects the descriptor
        if unsafe { libc::isatty(libc::STDIN_FILENO) } != 1 {
            return None;
        }

        // SAFETY: termios is plain old data, all-zero is a valid value
        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: termios points to a valid, writable struct
        if unsafe { libc::tcgetattr(libc::STDIN_FILENO, &mut termios) } != 0 {
            return None;
        }
        let saved = termios;

        termios.c_lflag &= !(libc::ICANON | libc::ECHO);
        termios.c_cc[libc::VMIN] = 1;
        termios.c_cc[libc::VTIME] = 0;
        // SAFETY: termios was filled in by tcgetattr above
        if unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &termios) } != 0 {
            return None;
        }
        Some(Self { saved })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        // SAFETY: restores the attributes read in enable()
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &self.saved);
        }
    }
}

fn read_one_key() -> std::io::Result<char> {
    let _raw = RawMode::enable();
    let mut byte = [0u8; 1];
    std::io::stdin().lock().read_exact(&mut byte)?;
    Ok(match byte[0] {
        b'\r' => '\n',
        other => other as char,
    })
}

#[async_trait]
impl Operator for TerminalOperator {
    async fn read_key(&mut self) -> Result<char> {
        tokio::task::spawn_blocking(read_one_key)
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
            .map_err(Error::Io)
    }

    fn display(&mut self, text: &str) {
        if std::mem::take(&mut self.progress_line) {
            println!();
        }
        println!(" {}", text);
    }

    fn progress(&mut self, raw_value: f64) {
        self.progress_line = true;
        print!("\r   {:>10.3}", raw_value);
        let _ = std::io::stdout().flush();
    }
}
