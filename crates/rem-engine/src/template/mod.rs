//! Template rendering.
//!
//! Two placeholder flavors cover every file this engine writes:
//!
//! - `%%NAME%%` — config templates (nginx vhosts, rserver.conf, PAM). The
//!   caller supplies explicit name/value bindings; unbound placeholders are
//!   left verbatim so downstream tooling can spot them.
//! - `{{NAME}}` — systemd unit templates. Values come from a lookup (the
//!   process environment in production), and every name found in the text is
//!   resolved through it.
//!
//! Replacement values pass through [`subst::escape_replacement`] before they
//! reach the splice, so URLs, Windows-style paths, and crontab-looking
//! strings land in rendered files byte for byte.

pub mod subst;

use regex::Regex;
use rem_common::{Error, Result};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use subst::{escape_replacement, splice_all};
use tracing::{debug, info, warn};

fn unit_placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").unwrap())
}

/// Render template text with explicit `%%NAME%%` bindings.
///
/// Bindings apply in order; supplying the same name twice keeps the last
/// value and logs the collision. An empty name would turn into the `%%%%`
/// needle and match nothing useful, so it is rejected outright. Placeholders
/// with no binding stay as-is.
pub fn render_str(template: &str, bindings: &[(String, String)]) -> String {
    let mut resolved: Vec<(&str, &str)> = Vec::with_capacity(bindings.len());
    for (name, value) in bindings {
        if name.is_empty() {
            warn!("ignoring binding with an empty placeholder name");
            continue;
        }
        match resolved.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => {
                warn!("placeholder {name} bound more than once; keeping the last value");
                entry.1 = value;
            }
            None => resolved.push((name, value)),
        }
    }

    let mut out = template.to_string();
    for (name, value) in resolved {
        let needle = format!("%%{name}%%");
        out = splice_all(&out, &needle, &escape_replacement(value));
    }
    out
}

/// Read and render a `%%NAME%%` template file.
pub fn render(path: &Path, bindings: &[(String, String)]) -> Result<String> {
    debug!("rendering template {}", path.display());
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::TemplateNotFound {
                path: path.to_path_buf(),
            }
        } else {
            Error::Io(e)
        }
    })?;
    let text = String::from_utf8(bytes).map_err(|_| Error::TemplateEncoding {
        path: path.to_path_buf(),
    })?;
    Ok(render_str(&text, bindings))
}

/// A rendered unit template plus the placeholders nothing resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedUnit {
    pub text: String,
    pub missing: Vec<String>,
}

/// Every distinct `{{NAME}}` in the text, in order of first appearance.
pub fn unit_placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in unit_placeholder_re().captures_iter(text) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Render `{{NAME}}` placeholders through a lookup. Names the lookup cannot
/// resolve are reported and left verbatim.
pub fn render_unit_str<F>(text: &str, lookup: F) -> RenderedUnit
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = text.to_string();
    let mut missing = Vec::new();
    for name in unit_placeholders(text) {
        match lookup(&name) {
            Some(value) => {
                let needle = format!("{{{{{name}}}}}");
                out = splice_all(&out, &needle, &escape_replacement(&value));
            }
            None => missing.push(name),
        }
    }
    if !missing.is_empty() {
        warn!(
            "unit template has unresolved placeholders: {}",
            missing.join(", ")
        );
    }
    RenderedUnit { text: out, missing }
}

/// Read a unit template and resolve its placeholders from the process
/// environment.
pub fn render_unit_from_env(path: &Path) -> Result<RenderedUnit> {
    debug!("rendering unit template {}", path.display());
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::TemplateNotFound {
                path: path.to_path_buf(),
            }
        } else {
            Error::Io(e)
        }
    })?;
    let text = String::from_utf8(bytes).map_err(|_| Error::TemplateEncoding {
        path: path.to_path_buf(),
    })?;
    Ok(render_unit_str(&text, |name| std::env::var(name).ok()))
}

/// Write rendered content to its destination, creating parent directories
/// and applying an explicit mode when one is required (PAM files, key
/// material).
pub fn write_rendered(path: &Path, contents: &str, mode: Option<u32>) -> Result<()> {
    let wrap = |source: std::io::Error| Error::RenderedWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(wrap)?;
    }
    fs::write(path, contents).map_err(wrap)?;
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(wrap)?;
    }
    info!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn bind(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_str_basic() {
        let out = render_str(
            "server_name %%SERVER_NAME%%;\nroot %%DOC_ROOT%%;\n",
            &bind(&[("SERVER_NAME", "rstudio.example.com"), ("DOC_ROOT", "/srv/www")]),
        );
        assert_eq!(out, "server_name rstudio.example.com;\nroot /srv/www;\n");
    }

    #[test]
    fn test_unbound_placeholder_left_verbatim() {
        let out = render_str("a %%KNOWN%% b %%UNKNOWN%%", &bind(&[("KNOWN", "v")]));
        assert_eq!(out, "a v b %%UNKNOWN%%");
    }

    #[test]
    fn test_url_value_survives() {
        let out = render_str(
            "proxy_pass %%UPSTREAM%%;",
            &bind(&[("UPSTREAM", "http://example.com/foo?bar&baz")]),
        );
        assert_eq!(out, "proxy_pass http://example.com/foo?bar&baz;");
    }

    #[test]
    fn test_hostile_values_survive() {
        for value in [r"back\slash", "amp&ersand", "slash/path", "#hash", r"\&"] {
            let out = render_str("v=%%V%%", &bind(&[("V", value)]));
            assert_eq!(out, format!("v={value}"));
        }
    }

    #[test]
    fn test_duplicate_binding_last_wins() {
        let out = render_str("%%X%%", &bind(&[("X", "first"), ("X", "second")]));
        assert_eq!(out, "second");
    }

    #[test]
    fn test_empty_value_erases_placeholder() {
        let out = render_str("[%%GONE%%]", &bind(&[("GONE", "")]));
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_empty_name_is_skipped() {
        let out = render_str("a %%%% b", &bind(&[("", "wildcard")]));
        assert_eq!(out, "a %%%% b");
    }

    #[test]
    fn test_missing_template_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = render(&dir.path().join("absent.conf"), &[]).unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound { .. }));
    }

    #[test]
    fn test_non_utf8_template_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.conf");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(&[0x66, 0xff, 0xfe, 0x67]).unwrap();

        let err = render(&path, &[]).unwrap_err();
        assert!(matches!(err, Error::TemplateEncoding { .. }));
    }

    #[test]
    fn test_unit_placeholder_discovery() {
        let text = "ExecStart={{BIN}} --port {{PORT}}\nUser={{BIN}}\n";
        assert_eq!(unit_placeholders(text), vec!["BIN", "PORT"]);
    }

    #[test]
    fn test_unit_render_reports_missing() {
        let rendered = render_unit_str(
            "ExecStart={{BIN}} --port {{PORT}}",
            |name| (name == "BIN").then(|| "/usr/bin/rserver".to_string()),
        );
        assert_eq!(rendered.text, "ExecStart=/usr/bin/rserver --port {{PORT}}");
        assert_eq!(rendered.missing, vec!["PORT"]);
    }

    #[test]
    fn test_unit_render_resolves_all() {
        let rendered = render_unit_str("{{A}}-{{B}}-{{A}}", |name| match name {
            "A" => Some("1".into()),
            "B" => Some("2".into()),
            _ => None,
        });
        assert_eq!(rendered.text, "1-2-1");
        assert!(rendered.missing.is_empty());
    }

    #[test]
    fn test_write_rendered_creates_parents_and_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("etc/pam.d/rstudio");
        write_rendered(&dest, "auth required pam_sss.so\n", Some(0o600)).unwrap();

        assert_eq!(
            fs::read_to_string(&dest).unwrap(),
            "auth required pam_sss.so\n"
        );
        let mode = fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_render_then_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("vhost.conf.tmpl");
        fs::write(
            &template,
            "server {\n  server_name %%HOST%%;\n  proxy_pass %%UPSTREAM%%;\n}\n",
        )
        .unwrap();

        let rendered = render(
            &template,
            &bind(&[
                ("HOST", "stats.example.org"),
                ("UPSTREAM", "http://127.0.0.1:8787?a&b"),
            ]),
        )
        .unwrap();
        let dest = dir.path().join("etc/nginx/sites-available/rstudio");
        write_rendered(&dest, &rendered, None).unwrap();

        let on_disk = fs::read_to_string(&dest).unwrap();
        assert!(on_disk.contains("server_name stats.example.org;"));
        assert!(on_disk.contains("proxy_pass http://127.0.0.1:8787?a&b;"));
    }
}
