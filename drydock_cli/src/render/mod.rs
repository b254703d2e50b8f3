use std::collections::HashMap;
use std::iter;
use tera::{Context, Tera, Value};

use drydock_definitions::ClusterSpec;

use super::{Result, ResultExt};

pub mod extraargs;
pub use self::extraargs::ExtraArgs;

pub mod values;

/// Callback mutating the value map before template execution
///
/// Applied in registration order; later options override earlier keys.
pub type BuildOption = Box<dyn Fn(&mut Context) -> Result<()> + Send + Sync>;

/// Document separator used when concatenating per-group renders
pub const DOC_SEPARATOR: &str = "\n---\n";

/// Stateless renderer of raw templates against a value map
///
/// Owns nothing between calls; determinism is up to the caller injecting
/// any timestamps through the context.
pub struct TemplateRenderer;

#[cfg_attr(feature = "cargo-clippy", allow(needless_pass_by_value))]
fn indent(v: Value, m: HashMap<String, Value>) -> tera::Result<Value> {
    let s: String = try_get_value!("indent", "value", String, v);
    let num_spaces: u64 = m.get("spaces").map(Value::as_u64).unwrap_or(None).unwrap_or(2);
    let pad = iter::repeat(' ').take(num_spaces as usize).collect::<String>();
    let mut xs = vec![];
    for l in s.lines() {
        xs.push(if l == "" { l.to_string() } else { format!("{}{}", pad, l) });
    }
    Ok(serde_json::to_value(&xs.join("\n")).unwrap())
}

impl TemplateRenderer {
    /// One-off template execution with whitespace-trimmed lines
    pub fn render(template: &str, ctx: &Context) -> Result<String> {
        let mut tera = Tera::default();
        tera.register_filter("indent", indent);
        tera.add_raw_template("manifest", template)
            .chain_err(|| "registering manifest template")?;
        let raw = tera.render("manifest", ctx).chain_err(|| "rendering manifest")?;
        let mut lines = vec![];
        for l in raw.lines() {
            let trimmed = l.trim_end();
            // drop lines that conditionals emptied out entirely
            if trimmed.is_empty() && l.len() > 2 {
                continue;
            }
            lines.push(trimmed.to_string());
        }
        let mut out = lines.join("\n");
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }
}

/// Rendered output of one reconciliation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedCluster {
    pub control_plane: Vec<u8>,
    pub workers: Vec<u8>,
}

impl RenderedCluster {
    /// Both streams concatenated, for the on-disk artifact
    pub fn combined(&self) -> Vec<u8> {
        let mut out = self.control_plane.clone();
        if !self.workers.is_empty() {
            out.extend_from_slice(DOC_SEPARATOR.as_bytes());
            out.extend_from_slice(&self.workers);
        }
        out
    }
}

/// Serialize a value as a partial yaml block at a given indent
///
/// This is how flag maps and taint lists end up embedded in the bigger
/// templates without fighting yaml nesting inside tera.
pub fn to_partial_yaml<T: serde::Serialize>(value: &T, indent: usize) -> Result<String> {
    let raw = serde_yaml::to_string(value)?;
    let body = raw.trim_start_matches("---").trim_start_matches('\n');
    let pad = " ".repeat(indent);
    let mut lines = vec![];
    for l in body.trim_end().lines() {
        if l.is_empty() {
            lines.push(String::new());
        } else {
            lines.push(format!("{}{}", pad, l));
        }
    }
    Ok(lines.join("\n"))
}

/// Parse a rendered stream back into typed documents
pub fn parse_documents(raw: &[u8]) -> Result<Vec<serde_yaml::Value>> {
    let text = String::from_utf8_lossy(raw);
    let mut docs = vec![];
    for chunk in split_documents(&text) {
        let doc: serde_yaml::Value = serde_yaml::from_str(&chunk)?;
        if !doc.is_null() {
            docs.push(doc);
        }
    }
    Ok(docs)
}

fn split_documents(raw: &str) -> Vec<String> {
    let mut docs = vec![];
    let mut current = String::new();
    for line in raw.lines() {
        if line.trim_end() == "---" {
            if !current.trim().is_empty() {
                docs.push(current.clone());
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        docs.push(current);
    }
    docs
}

fn doc_kind(doc: &serde_yaml::Value) -> Option<&str> {
    doc.get("kind").and_then(|k| k.as_str())
}

/// Drop every document of the given kind and re-serialize the stream
///
/// The scale path runs the full render and then removes the provider
/// machine templates, so applying the residual only mutates replica counts.
pub fn strip_documents_of_kind(raw: &[u8], kind: &str) -> Result<Vec<u8>> {
    let docs = parse_documents(raw)?;
    let kept: Vec<&serde_yaml::Value> = docs.iter().filter(|d| doc_kind(d) != Some(kind)).collect();
    serialize_documents(&kept)
}

/// Re-serialize parsed documents into a `---` separated stream
pub fn serialize_documents(docs: &[&serde_yaml::Value]) -> Result<Vec<u8>> {
    let mut parts = vec![];
    for d in docs {
        let s = serde_yaml::to_string(d)?;
        parts.push(s.trim_start_matches("---").trim_start_matches('\n').trim_end().to_string());
    }
    Ok(parts.join(DOC_SEPARATOR).into_bytes())
}

/// Count documents of a kind in a rendered stream
pub fn count_documents_of_kind(raw: &[u8], kind: &str) -> Result<usize> {
    Ok(parse_documents(raw)?
        .iter()
        .filter(|d| doc_kind(d) == Some(kind))
        .count())
}

/// Names of every document of a kind, in stream order
pub fn names_of_kind(raw: &[u8], kind: &str) -> Result<Vec<String>> {
    Ok(parse_documents(raw)?
        .iter()
        .filter(|d| doc_kind(d) == Some(kind))
        .filter_map(|d| {
            d.get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(|n| n.as_str())
                .map(String::from)
        })
        .collect())
}

/// Swap the default public registry host for the mirror endpoint
///
/// Applied to rendered output when a registry mirror is configured, so
/// embedded image references and template overrides follow the mirror.
pub fn substitute_mirror(raw: &str, mirror_endpoint: &str) -> String {
    raw.replace(drydock_definitions::structs::registry::DEFAULT_PUBLIC_REGISTRY, mirror_endpoint)
}

/// Apply build options in order over a context
pub fn apply_build_options(ctx: &mut Context, opts: &[BuildOption]) -> Result<()> {
    for opt in opts {
        opt(ctx)?;
    }
    Ok(())
}

/// Shared entry for provider modules: base context plus provider values
pub fn context_for(spec: &ClusterSpec, opts: &[BuildOption]) -> Result<Context> {
    let mut ctx = values::base_context(spec)?;
    apply_build_options(&mut ctx, opts)?;
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tera::Context;

    #[test]
    fn render_and_strip_round_trip() {
        let tpl = "\
apiVersion: v1
kind: A
metadata:
  name: {{ name }}
---
apiVersion: v1
kind: MachineTemplate
metadata:
  name: {{ name }}-mt
---
apiVersion: v1
kind: B
metadata:
  name: {{ name }}
";
        let mut ctx = Context::new();
        ctx.insert("name", "mgmt");
        let rendered = TemplateRenderer::render(tpl, &ctx).unwrap();
        assert_eq!(count_documents_of_kind(rendered.as_bytes(), "MachineTemplate").unwrap(), 1);

        let stripped = strip_documents_of_kind(rendered.as_bytes(), "MachineTemplate").unwrap();
        assert_eq!(count_documents_of_kind(&stripped, "MachineTemplate").unwrap(), 0);
        assert_eq!(count_documents_of_kind(&stripped, "A").unwrap(), 1);
        assert_eq!(count_documents_of_kind(&stripped, "B").unwrap(), 1);
        assert_eq!(names_of_kind(rendered.as_bytes(), "MachineTemplate").unwrap(), vec!["mgmt-mt"]);
    }

    #[test]
    fn reserialized_documents_stay_structurally_equal() {
        let raw = b"kind: A\nmetadata:\n  name: x\n---\nkind: B\nspec:\n  replicas: 2\n";
        let docs = parse_documents(raw).unwrap();
        let out = serialize_documents(&docs.iter().collect::<Vec<_>>()).unwrap();
        let docs2 = parse_documents(&out).unwrap();
        assert_eq!(docs, docs2);
    }

    #[test]
    fn partial_yaml_indents() {
        let map = btreemap! {"cloud-provider".to_string() => "external".to_string()};
        let out = to_partial_yaml(&map, 4).unwrap();
        assert_eq!(out, "    cloud-provider: external");
    }

    #[test]
    fn mirror_substitution() {
        let rendered = "image: public.ecr.aws/drydock/kube-vip:v0.5.5";
        let out = substitute_mirror(rendered, "harbor.corp:443");
        assert_eq!(out, "image: harbor.corp:443/drydock/kube-vip:v0.5.5");
    }
}
