//! Discovery endpoint payloads.
//!
//! DevTools frontends find debuggable targets by polling `GET /json` (or
//! `/json/list`) and `GET /json/version`. The bodies here mirror what those
//! frontends expect field-for-field; the `type` is reported as `"node"` so
//! stock frontends offer the full JavaScript debugging UI.

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;

use serde::Serialize;

use crate::identifiers::TargetId;

// ============================================================================
// Constants
// ============================================================================

/// Reported in `/json/version` as `"Browser"`.
const BROWSER_NAME: &str = concat!("devtools-agent/", env!("CARGO_PKG_VERSION"));

/// Devtools protocol version the discovery endpoint advertises.
const PROTOCOL_VERSION: &str = "1.1";

/// Human-readable target description shown in frontend target pickers.
const TARGET_DESCRIPTION: &str = "javascript engine instance";

// ============================================================================
// Target
// ============================================================================

/// The single debuggable entity exposed by one agent.
///
/// Immutable after construction; the id doubles as the WebSocket path.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    /// Unguessable per-process id.
    pub id: TargetId,
    /// Script path when the host supplied one, else the process name.
    pub title: String,
    /// `file://` URL of the resolved script path, or empty.
    pub url: String,
}

impl Target {
    /// Builds target metadata from the host-supplied script path.
    pub(crate) fn new(id: TargetId, script_path: Option<&Path>) -> Self {
        let title = script_path
            .map(|p| p.display().to_string())
            .or_else(process_name)
            .unwrap_or_else(|| "devtools-agent".to_string());
        let url = script_path
            .map(|p| {
                let resolved = p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
                format!("file://{}", resolved.display())
            })
            .unwrap_or_default();
        Self { id, title, url }
    }
}

/// File stem of the running executable, the fallback target title.
fn process_name() -> Option<String> {
    executable_title(&std::env::current_exe().ok()?)
}

/// Title derived from an executable path: the file stem, so a platform
/// suffix like `.exe` never leaks into the target list.
fn executable_title(path: &Path) -> Option<String> {
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
}

// ============================================================================
// Wire Models
// ============================================================================

/// One entry of the `/json/list` array.
#[derive(Debug, Serialize)]
struct TargetDescriptor<'a> {
    description: &'static str,
    #[serde(rename = "devtoolsFrontendUrl")]
    devtools_frontend_url: String,
    id: &'a TargetId,
    title: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    url: &'a str,
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Body of `/json/version`.
#[derive(Debug, Serialize)]
struct VersionInfo {
    #[serde(rename = "Browser")]
    browser: &'static str,
    #[serde(rename = "Protocol-Version")]
    protocol_version: &'static str,
}

// ============================================================================
// Renderers
// ============================================================================

/// The `ws://<host>:<port>/<id>` session URL frontends dial.
pub(crate) fn ws_url(host: &str, port: u16, id: &TargetId) -> String {
    format!("ws://{host}:{port}/{id}")
}

/// The copy-pasteable frontend URL pointing a bundled devtools UI at the
/// target.
pub(crate) fn frontend_url(host: &str, port: u16, id: &TargetId) -> String {
    format!("devtools://devtools/bundled/inspector.html?ws={host}:{port}/{id}")
}

/// Renders the `/json` / `/json/list` body: a one-element target array.
pub(crate) fn list_response_body(target: &Target, host: &str, port: u16) -> String {
    let descriptor = TargetDescriptor {
        description: TARGET_DESCRIPTION,
        devtools_frontend_url: frontend_url(host, port, &target.id),
        id: &target.id,
        title: &target.title,
        kind: "node",
        url: &target.url,
        web_socket_debugger_url: ws_url(host, port, &target.id),
    };
    serde_json::to_string(&[descriptor]).expect("target descriptor serialization cannot fail")
}

/// Renders the `/json/version` body.
pub(crate) fn version_response_body() -> String {
    serde_json::to_string(&VersionInfo {
        browser: BROWSER_NAME,
        protocol_version: PROTOCOL_VERSION,
    })
    .expect("version info serialization cannot fail")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn test_target() -> Target {
        Target {
            id: TargetId::from_string("0b24a33c-1a52-4c42-973c-1b24ed5cc07c"),
            title: "app.js".to_string(),
            url: "file:///srv/app.js".to_string(),
        }
    }

    #[test]
    fn test_list_body_shape() {
        let body = list_response_body(&test_target(), "127.0.0.1", 9229);
        let parsed: Value = serde_json::from_str(&body).expect("valid json");
        let entries = parsed.as_array().expect("array body");
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry["id"], "0b24a33c-1a52-4c42-973c-1b24ed5cc07c");
        assert_eq!(entry["title"], "app.js");
        assert_eq!(entry["type"], "node");
        assert_eq!(entry["url"], "file:///srv/app.js");
        assert_eq!(
            entry["webSocketDebuggerUrl"],
            "ws://127.0.0.1:9229/0b24a33c-1a52-4c42-973c-1b24ed5cc07c"
        );
        assert!(
            entry["devtoolsFrontendUrl"]
                .as_str()
                .unwrap()
                .starts_with("devtools://devtools/bundled/inspector.html?ws=127.0.0.1:9229/")
        );
        assert!(entry.get("faviconUrl").is_none());
    }

    #[test]
    fn test_version_body_shape() {
        let parsed: Value = serde_json::from_str(&version_response_body()).expect("valid json");
        assert_eq!(parsed["Protocol-Version"], "1.1");
        let browser = parsed["Browser"].as_str().unwrap();
        assert!(browser.starts_with("devtools-agent/"));
    }

    #[test]
    fn test_target_without_script_uses_process_name_and_empty_url() {
        let target = Target::new(TargetId::generate(), None);
        assert!(!target.title.is_empty());
        assert!(!target.title.contains('/'));
        assert!(target.url.is_empty());
    }

    #[test]
    fn test_process_fallback_title_is_the_executable_stem() {
        assert_eq!(
            executable_title(Path::new("/opt/host/app.exe")),
            Some("app".to_string())
        );
        assert_eq!(
            executable_title(Path::new("target/debug/engine-host")),
            Some("engine-host".to_string())
        );
        assert_eq!(executable_title(Path::new("/")), None);
    }

    #[test]
    fn test_target_with_script_resolves_file_url() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let target = Target::new(TargetId::generate(), Some(file.path()));
        assert!(target.url.starts_with("file://"));
        assert!(target.title.contains(
            file.path()
                .file_name()
                .and_then(|n| n.to_str())
                .expect("utf8 name")
        ));
    }
}
