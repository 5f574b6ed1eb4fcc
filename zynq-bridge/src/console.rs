use std::io::{self, BufRead, Write};

use zynq_server::InputProvider;

/// Operator input read line by line, asking for the file when `load` names none.
pub struct Console<R, W> {
    input: R,
    prompt: W,
}

impl Console<io::BufReader<io::Stdin>, io::Stdout> {
    pub fn stdin() -> Self {
        Console::new(io::BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, prompt: W) -> Self {
        Console { input, prompt }
    }

    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(e) => {
                log::error!("Could not read operator input: {}", e);
                None
            }
        }
    }

    fn ask_path(&mut self, pointer: &str) -> Option<String> {
        if let Err(e) = write!(self.prompt, "file to load to pointer {} : ", pointer)
            .and_then(|_| self.prompt.flush())
        {
            log::warn!("Could not show the prompt: {}", e);
        }
        self.read_line()
    }
}

impl<R, W> InputProvider for Console<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    fn next_line(&mut self) -> Option<String> {
        let line = self.read_line()?;
        let mut tokens = line.split_whitespace();
        match (tokens.next(), tokens.next(), tokens.next()) {
            (Some("load"), Some(pointer), None) => {
                let pointer = pointer.to_string();
                let path = self.ask_path(&pointer)?;
                Some(format!("load {} {}", pointer, path.trim()))
            }
            _ => Some(line),
        }
    }
}
