// ABOUTME: Composes the three in-sandbox phases into one shell command
// ABOUTME: Each phase is announced with a per-run marker so failures can be attributed from logs

use std::collections::HashMap;
use std::fmt;

/// Virtual environment location inside the sandbox, outside the mounted workspace
pub const VENV_DIR: &str = "/tmp/scriptbox-venv";

const MARKER_TAG: &str = "@@scriptbox:";
const MARKER_END: &str = "@@";

/// Ordered phases of one sandbox run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Environment,
    Dependencies,
    Script,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Environment => "environment",
            Phase::Dependencies => "dependencies",
            Phase::Script => "script",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "environment" => Some(Phase::Environment),
            "dependencies" => Some(Phase::Dependencies),
            "script" => Some(Phase::Script),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase transition recovered from the sandbox logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerEvent {
    Begin(Phase),
    Failed(Phase, i64),
    ScriptExit(i64),
}

/// Sentinel format shared by the composed command and the classifier.
///
/// The nonce is fresh per run, so a script printing marker-shaped text cannot
/// impersonate the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMarker {
    nonce: String,
}

impl PhaseMarker {
    pub fn new() -> Self {
        Self {
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn with_nonce(nonce: impl Into<String>) -> Self {
        Self {
            nonce: nonce.into(),
        }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    fn prefix(&self) -> String {
        format!("{}{}:", MARKER_TAG, self.nonce)
    }

    /// Render one marker line body, e.g. `begin:script`
    pub fn render(&self, body: &str) -> String {
        format!("{}{}{}", self.prefix(), body, MARKER_END)
    }

    /// Extract a marker event from one log line.
    ///
    /// The marker may trail unterminated script output on the same line.
    pub fn parse_line(&self, line: &str) -> Option<MarkerEvent> {
        let prefix = self.prefix();
        let start = line.find(&prefix)? + prefix.len();
        let rest = &line[start..];
        let body = &rest[..rest.find(MARKER_END)?];

        let mut parts = body.split(':');
        let event = match (parts.next()?, parts.next(), parts.next()) {
            ("begin", Some(phase), None) => MarkerEvent::Begin(Phase::parse(phase)?),
            ("fail", Some(phase), Some(code)) => {
                MarkerEvent::Failed(Phase::parse(phase)?, code.parse().ok()?)
            }
            ("exit", Some("script"), Some(code)) => MarkerEvent::ScriptExit(code.parse().ok()?),
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(event)
    }

    /// All marker events in log order
    pub fn scan(&self, logs: &str) -> Vec<MarkerEvent> {
        logs.lines()
            .filter_map(|line| self.parse_line(line.trim_end_matches('\r')))
            .collect()
    }
}

impl Default for PhaseMarker {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the single composed command run inside the sandbox
#[derive(Debug, Clone)]
pub struct PhaseExecutor {
    python: String,
    venv_dir: String,
}

impl Default for PhaseExecutor {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            venv_dir: VENV_DIR.to_string(),
        }
    }
}

impl PhaseExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command vector for the container: `/bin/sh -c <script>`
    pub fn compose(
        &self,
        marker: &PhaseMarker,
        script_name: &str,
        manifest_name: &str,
        script_args: Option<&str>,
    ) -> Vec<String> {
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            self.shell_script(marker, script_name, manifest_name, script_args),
        ]
    }

    /// The shell program chaining the three phases
    pub fn shell_script(
        &self,
        marker: &PhaseMarker,
        script_name: &str,
        manifest_name: &str,
        script_args: Option<&str>,
    ) -> String {
        let venv_python = format!("{}/bin/python", self.venv_dir);
        let mut invocation = format!("{} {}", shell_escape(&venv_python), shell_escape(script_name));
        if let Some(args) = script_args.map(str::trim).filter(|a| !a.is_empty()) {
            // Left unquoted so the sandbox shell splits it like an interactive shell would
            invocation.push(' ');
            invocation.push_str(args);
        }

        let lines = [
            format!(
                "m() {{ printf '{}%s{}\\n' \"$1\"; }}",
                marker.prefix(),
                MARKER_END
            ),
            "m begin:environment".to_string(),
            format!(
                "{} -m venv {}",
                shell_escape(&self.python),
                shell_escape(&self.venv_dir)
            ),
            "rc=$?".to_string(),
            "if [ \"$rc\" -ne 0 ]; then m \"fail:environment:$rc\"; exit \"$rc\"; fi".to_string(),
            "m begin:dependencies".to_string(),
            format!(
                "{} -m pip install -r {}",
                shell_escape(&venv_python),
                shell_escape(manifest_name)
            ),
            "rc=$?".to_string(),
            "if [ \"$rc\" -ne 0 ]; then m \"fail:dependencies:$rc\"; exit \"$rc\"; fi".to_string(),
            "m begin:script".to_string(),
            invocation,
            "rc=$?".to_string(),
            "m \"exit:script:$rc\"".to_string(),
            "exit \"$rc\"".to_string(),
        ];
        lines.join("\n")
    }

    /// Environment that keeps the phases quiet, unbuffered and out of the workspace
    pub fn environment(&self) -> HashMap<String, String> {
        HashMap::from([
            ("HOME".to_string(), "/tmp".to_string()),
            ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
            ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
            ("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string()),
            ("PIP_NO_CACHE_DIR".to_string(), "1".to_string()),
            ("PIP_ROOT_USER_ACTION".to_string(), "ignore".to_string()),
        ])
    }
}

pub(crate) fn shell_escape(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let escaped = arg.replace('\'', "'\\''");
    format!("'{}'", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn marker() -> PhaseMarker {
        PhaseMarker::with_nonce("abc123")
    }

    #[test]
    fn test_compose_wraps_in_shell() {
        let command = PhaseExecutor::new().compose(&marker(), "main.py", "requirements.txt", None);

        assert_eq!(command.len(), 3);
        assert_eq!(command[0], "/bin/sh");
        assert_eq!(command[1], "-c");
    }

    #[test]
    fn test_phases_are_ordered_and_gated() {
        let script = PhaseExecutor::new().shell_script(
            &marker(),
            "main.py",
            "requirements.txt",
            Some("--message 'hello world' --number 3"),
        );

        let venv = script.find("-m venv '/tmp/scriptbox-venv'").unwrap();
        let pip = script
            .find("'/tmp/scriptbox-venv/bin/python' -m pip install -r 'requirements.txt'")
            .unwrap();
        let run = script
            .find("'/tmp/scriptbox-venv/bin/python' 'main.py' --message 'hello world' --number 3")
            .unwrap();
        assert!(venv < pip && pip < run);

        assert!(script.contains("m \"fail:environment:$rc\"; exit \"$rc\""));
        assert!(script.contains("m \"fail:dependencies:$rc\"; exit \"$rc\""));
        assert!(script.ends_with("m \"exit:script:$rc\"\nexit \"$rc\""));
        assert!(script.contains("@@scriptbox:abc123:%s@@"));
    }

    #[test]
    fn test_blank_script_args_are_ignored() {
        let script =
            PhaseExecutor::new().shell_script(&marker(), "main.py", "requirements.txt", Some("  "));
        assert!(script.contains("'/tmp/scriptbox-venv/bin/python' 'main.py'\n"));
    }

    #[test]
    fn test_file_names_are_quoted() {
        let script = PhaseExecutor::new().shell_script(
            &marker(),
            "it's main.py",
            "reqs; rm -rf .txt",
            None,
        );
        assert!(script.contains("'it'\\''s main.py'"));
        assert!(script.contains("-r 'reqs; rm -rf .txt'"));
    }

    #[test]
    fn test_marker_round_trip_through_parser() {
        let marker = marker();

        assert_eq!(
            marker.parse_line(&marker.render("begin:dependencies")),
            Some(MarkerEvent::Begin(Phase::Dependencies))
        );
        assert_eq!(
            marker.parse_line(&marker.render("fail:dependencies:1")),
            Some(MarkerEvent::Failed(Phase::Dependencies, 1))
        );
        assert_eq!(
            marker.parse_line(&marker.render("exit:script:42")),
            Some(MarkerEvent::ScriptExit(42))
        );
    }

    #[test]
    fn test_marker_after_unterminated_output() {
        let marker = marker();
        let line = format!("partial output{}", marker.render("exit:script:0"));
        assert_eq!(marker.parse_line(&line), Some(MarkerEvent::ScriptExit(0)));
    }

    #[test]
    fn test_foreign_or_malformed_markers_are_ignored() {
        let marker = marker();

        assert_eq!(
            marker.parse_line("@@scriptbox:othernonce:exit:script:0@@"),
            None
        );
        assert_eq!(marker.parse_line(&marker.render("begin:deploy")), None);
        assert_eq!(marker.parse_line(&marker.render("exit:script:abc")), None);
        assert_eq!(marker.parse_line(&marker.render("exit:script:1:2")), None);
        assert_eq!(marker.parse_line("@@scriptbox:abc123:begin:script"), None);
    }

    #[test]
    fn test_scan_handles_crlf() {
        let marker = marker();
        let logs = format!(
            "{}\r\nCollecting requests\r\n{}\r\n",
            marker.render("begin:environment"),
            marker.render("begin:dependencies")
        );
        assert_eq!(
            marker.scan(&logs),
            vec![
                MarkerEvent::Begin(Phase::Environment),
                MarkerEvent::Begin(Phase::Dependencies)
            ]
        );
    }

    #[test]
    fn test_fresh_markers_differ() {
        assert_ne!(PhaseMarker::new(), PhaseMarker::new());
    }

    #[test]
    fn test_environment_keeps_workspace_clean() {
        let env = PhaseExecutor::new().environment();
        assert_eq!(
            env.get("PYTHONDONTWRITEBYTECODE").map(String::as_str),
            Some("1")
        );
        assert_eq!(env.get("HOME").map(String::as_str), Some("/tmp"));
    }
}
