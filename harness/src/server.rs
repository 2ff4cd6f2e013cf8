use std::io::Write;
use std::process::{Child, Stdio};

pub struct Server(Child);

impl Server {
    pub fn new(
        path: &std::path::Path,
        id: usize,
        client_port: u16,
        server_port: u16,
        beacon_port: u16,
        beacons: &[u16],
        verbose: u8,
    ) -> Self {
        let triple = format!("{},{},{}", id, client_port, server_port);
        let mut command = std::process::Command::new(path);
        if verbose > 0 {
            let verbosity = "-".to_string() + &"v".repeat(verbose as usize);
            command.arg(&verbosity);
        }
        command.arg(&triple)
            .args(&["--beacon-bind", &format!("127.0.0.1:{}", beacon_port)]);
        for port in beacons {
            command.args(&["--beacon-target", &format!("127.0.0.1:{}", port)]);
        }
        command.stdin(Stdio::piped())
            .spawn()
            .map(Server)
            .expect("[INTERNAL ERROR]: could not spawn server")
    }

    /// Types `line` into the server console.
    pub fn console(&mut self, line: &str) {
        let written = self.0
            .stdin
            .as_mut()
            .map(|stdin| writeln!(stdin, "{}", line));
        if let Some(Err(error)) = written {
            println!("Failed to write to server console: {}", error);
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.0.kill().ok();
        self.0.wait().ok();
    }
}
