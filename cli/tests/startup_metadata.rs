//! Startup behavior of the built binary: config resolution and the backend
//! mode reported from `initialize`.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde_json::{Value, json};

struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Session {
    fn start(config_dir: &Path, config: &str, backend_override: Option<&str>) -> Self {
        let config_path = config_dir.join("config.toml");
        std::fs::write(&config_path, config).unwrap();

        let mut command = Command::new(env!("CARGO_BIN_EXE_tsbridge"));
        command
            .env("TSBRIDGE_CONFIG", &config_path)
            .env("RUST_LOG", "warn")
            .env_remove("TSBRIDGE_BACKEND")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(mode) = backend_override {
            command.env("TSBRIDGE_BACKEND", mode);
        }
        let mut child = command.spawn().unwrap();
        let stdin = child.stdin.take().unwrap();
        let stdout = BufReader::new(child.stdout.take().unwrap());
        Self {
            child,
            stdin,
            stdout,
        }
    }

    fn send(&mut self, message: &Value) {
        let body = message.to_string();
        write!(self.stdin, "Content-Length: {}\r\n\r\n{body}", body.len()).unwrap();
        self.stdin.flush().unwrap();
    }

    fn receive(&mut self) -> Value {
        let mut length = None;
        loop {
            let mut line = String::new();
            assert!(self.stdout.read_line(&mut line).unwrap() > 0, "server closed stdout");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                length = Some(value.trim().parse::<usize>().unwrap());
            }
        }
        let mut body = vec![0; length.expect("missing Content-Length")];
        self.stdout.read_exact(&mut body).unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn initialize(&mut self, root: &Path) -> Value {
        let root_uri = format!("file://{}", root.display());
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "processId": null, "rootUri": root_uri, "capabilities": {} }
        }));
        let reply = self.receive();
        assert_eq!(reply["id"], 1);
        reply["result"].clone()
    }

    fn shutdown(mut self) {
        self.send(&json!({"jsonrpc": "2.0", "id": 2, "method": "shutdown"}));
        let reply = self.receive();
        assert_eq!(reply["id"], 2);
        self.send(&json!({"jsonrpc": "2.0", "method": "exit"}));
        drop(self.stdin);
        let status = self.child.wait().unwrap();
        assert!(status.success());
    }
}

#[test]
fn auto_mode_with_missing_sidecar_reports_bridged() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start(
        dir.path(),
        "[backend]\nmode = \"auto\"\n\n[sidecar]\ncommand = \"/nonexistent/tsgo\"\n",
        None,
    );
    let result = session.initialize(dir.path());
    assert_eq!(result["backendMode"], "bridged");
    assert_eq!(result["serverInfo"]["name"], "tsbridge");
    assert_eq!(result["serverInfo"]["version"], env!("CARGO_PKG_VERSION"));
    session.shutdown();
}

#[test]
fn environment_override_forces_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start(
        dir.path(),
        "[backend]\nmode = \"bridged\"\n\n[sidecar]\ncommand = \"/nonexistent/tsgo\"\n\n[tsserver]\nnode = \"/nonexistent/node\"\n",
        Some("sidecar"),
    );
    let result = session.initialize(dir.path());
    assert_eq!(result["backendMode"], "sidecar");
    session.shutdown();
}

#[test]
fn invalid_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    // The file is unparseable; the environment override still applies.
    let mut session = Session::start(dir.path(), "[backend\nmode = ", Some("bridged"));
    let result = session.initialize(dir.path());
    assert_eq!(result["backendMode"], "bridged");
    session.shutdown();
}

#[test]
fn version_flag_prints_and_exits() {
    let output = Command::new(env!("CARGO_BIN_EXE_tsbridge"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(
        stdout.trim(),
        format!("tsbridge {}", env!("CARGO_PKG_VERSION"))
    );
}
