use std::io::{self, BufRead, Write};

use rollcall_client::{DialogPresenter, DialogRequest};

/// Prints dialogs to stderr. Only confirmations wait for input.
pub struct TerminalPresenter {
    pub assume_yes: bool,
}

impl DialogPresenter for TerminalPresenter {
    fn present(&mut self, request: &DialogRequest) -> bool {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{} {}: {}", request.kind.icon(), request.title, request.message);
        if !request.show_cancel {
            return true;
        }
        if self.assume_yes {
            let _ = writeln!(err, "  (yes)");
            return true;
        }

        let _ = write!(err, "  [y/N] ");
        let _ = err.flush();
        drop(err);

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => false,
            Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        }
    }
}
