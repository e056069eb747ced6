//! Template rendering with a name-keyed compile cache.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::config::TemplateConfig;
use crate::metrics::TEMPLATE_FALLBACK_TOTAL;

use super::builtin;
use super::helpers::{self, HelperContext};
use super::parser::{self, Expr, Node, Path};
use super::types::TemplateResult;

/// Where a compiled template came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSource {
    File,
    Builtin,
    Passthrough,
}

/// A parsed template, immutable once compiled.
#[derive(Debug)]
pub struct CompiledTemplate {
    name: String,
    source: TemplateSource,
    nodes: Vec<Node>,
}

struct Scope {
    this: Value,
    index: Option<usize>,
    key: Option<String>,
}

impl CompiledTemplate {
    pub fn compile(name: &str, source: TemplateSource, text: &str) -> TemplateResult<Self> {
        Ok(Self {
            name: name.to_string(),
            source,
            nodes: parser::parse(text)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> TemplateSource {
        self.source
    }

    pub fn render(&self, data: &Value, ctx: &HelperContext) -> TemplateResult<String> {
        let mut scopes = vec![Scope {
            this: data.clone(),
            index: None,
            key: None,
        }];
        let mut out = String::new();
        render_nodes(&self.nodes, &mut scopes, ctx, &mut out)?;
        Ok(out)
    }
}

fn render_nodes(
    nodes: &[Node],
    scopes: &mut Vec<Scope>,
    ctx: &HelperContext,
    out: &mut String,
) -> TemplateResult<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output { expr, escape } => {
                let text = helpers::display(&eval(expr, scopes, ctx)?);
                if *escape {
                    out.push_str(&escape_html(&text));
                } else {
                    out.push_str(&text);
                }
            }
            Node::Conditional {
                expr,
                negate,
                then,
                otherwise,
            } => {
                let truthy = helpers::is_truthy(&eval(expr, scopes, ctx)?);
                let branch = if truthy != *negate { then } else { otherwise };
                render_nodes(branch, scopes, ctx, out)?;
            }
            Node::Each {
                expr,
                body,
                otherwise,
            } => {
                let items: Vec<(usize, Option<String>, Value)> = match eval(expr, scopes, ctx)? {
                    Value::Array(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (i, None, v))
                        .collect(),
                    Value::Object(map) => map
                        .into_iter()
                        .enumerate()
                        .map(|(i, (k, v))| (i, Some(k), v))
                        .collect(),
                    _ => Vec::new(),
                };

                if items.is_empty() {
                    render_nodes(otherwise, scopes, ctx, out)?;
                    continue;
                }

                for (index, key, this) in items {
                    scopes.push(Scope {
                        this,
                        index: Some(index),
                        key,
                    });
                    let result = render_nodes(body, scopes, ctx, out);
                    scopes.pop();
                    result?;
                }
            }
        }
    }
    Ok(())
}

fn eval(expr: &Expr, scopes: &[Scope], ctx: &HelperContext) -> TemplateResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => Ok(lookup(path, scopes)),
        Expr::Helper { name, args } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, scopes, ctx))
                .collect::<TemplateResult<Vec<_>>>()?;
            helpers::call(name, &values, ctx)
        }
    }
}

fn lookup(path: &Path, scopes: &[Scope]) -> Value {
    let Some(current) = scopes.last() else {
        return Value::Null;
    };

    match path {
        Path::This => current.this.clone(),
        Path::Index => current.index.map(Value::from).unwrap_or(Value::Null),
        Path::Key => current.key.clone().map(Value::String).unwrap_or(Value::Null),
        Path::Field {
            from_this: true,
            segments,
        } => walk(&current.this, segments).cloned().unwrap_or(Value::Null),
        Path::Field {
            from_this: false,
            segments,
        } => scopes
            .iter()
            .rev()
            .find_map(|scope| walk(&scope.this, segments))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

fn walk<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Cache key of the shared passthrough template. Not a valid template name.
const PASSTHROUGH_KEY: &str = "*passthrough*";

/// Renders named templates to HTML.
///
/// Lookup order for a name: `{dir}/{name}.hbs`, then the built-in template
/// of that name, then a generic passthrough that echoes the data. File and
/// built-in templates are cached by name until [`invalidate`](Self::invalidate)
/// is called. Unknown names share one cached passthrough, so the cache never
/// holds more than the file and built-in sets plus one entry.
pub struct TemplateRenderer {
    dir: Option<PathBuf>,
    cache: DashMap<String, Arc<CompiledTemplate>>,
    helpers: HelperContext,
}

impl TemplateRenderer {
    pub fn new(dir: Option<PathBuf>, helpers: HelperContext) -> Self {
        Self {
            dir,
            cache: DashMap::new(),
            helpers,
        }
    }

    pub fn from_config(config: &TemplateConfig) -> Self {
        Self::new(
            config.dir.as_ref().map(PathBuf::from),
            HelperContext {
                locale: config.locale.clone(),
                currency: config.currency.clone(),
            },
        )
    }

    /// Render `name` with `data`. Never fails: a broken template yields a
    /// diagnostic body carrying the serialized data.
    pub async fn render(&self, name: &str, data: &Value) -> String {
        let rendered = match self.resolve(name).await {
            Ok(template) => template.render(data, &self.helpers),
            Err(e) => Err(e),
        };

        match rendered {
            Ok(html) => html,
            Err(e) => {
                tracing::error!(template = %name, error = %e, "Template render failed, using diagnostic body");
                TEMPLATE_FALLBACK_TOTAL.with_label_values(&["diagnostic"]).inc();
                diagnostic_body(name, data)
            }
        }
    }

    /// Compiled template for `name`, compiling and caching on first use.
    ///
    /// Unknown names are not cached under their own name; a file added for
    /// them later is picked up on the next render.
    pub async fn resolve(&self, name: &str) -> TemplateResult<Arc<CompiledTemplate>> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(Arc::clone(cached.value()));
        }

        match self.compile(name).await? {
            Some(compiled) => Ok(self.store(name, compiled)),
            None => {
                tracing::warn!(template = %name, "Unknown template, using passthrough");
                TEMPLATE_FALLBACK_TOTAL.with_label_values(&["passthrough"]).inc();
                self.passthrough()
            }
        }
    }

    fn passthrough(&self) -> TemplateResult<Arc<CompiledTemplate>> {
        if let Some(cached) = self.cache.get(PASSTHROUGH_KEY) {
            return Ok(Arc::clone(cached.value()));
        }
        let compiled = CompiledTemplate::compile(
            "passthrough",
            TemplateSource::Passthrough,
            builtin::PASSTHROUGH,
        )?;
        Ok(self.store(PASSTHROUGH_KEY, compiled))
    }

    fn store(&self, key: &str, compiled: CompiledTemplate) -> Arc<CompiledTemplate> {
        let compiled = Arc::new(compiled);
        self.cache.insert(key.to_string(), Arc::clone(&compiled));
        tracing::debug!(template = %key, source = ?compiled.source(), "Template compiled");
        compiled
    }

    /// File or built-in template for `name`, `None` when neither exists.
    async fn compile(&self, name: &str) -> TemplateResult<Option<CompiledTemplate>> {
        if let Some(text) = self.read_file(name).await? {
            return CompiledTemplate::compile(name, TemplateSource::File, &text).map(Some);
        }

        if let Some(text) = builtin::source(name) {
            if self.dir.is_some() {
                TEMPLATE_FALLBACK_TOTAL.with_label_values(&["builtin"]).inc();
            }
            return CompiledTemplate::compile(name, TemplateSource::Builtin, text).map(Some);
        }

        Ok(None)
    }

    async fn read_file(&self, name: &str) -> TemplateResult<Option<String>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        if !is_safe_name(name) {
            tracing::warn!(template = %name, "Rejected template name");
            return Ok(None);
        }

        let path = dir.join(format!("{}.hbs", name));
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop one cached template. Returns whether it was cached.
    pub fn invalidate(&self, name: &str) -> bool {
        let removed = self.cache.remove(name).is_some();
        tracing::info!(template = %name, removed, "Template cache invalidated");
        removed
    }

    /// Drop every cached template. Returns how many were cached.
    pub fn invalidate_all(&self) -> usize {
        let count = self.cache.len();
        self.cache.clear();
        tracing::info!(count, "Template cache cleared");
        count
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn template_dir(&self) -> Option<&FsPath> {
        self.dir.as_deref()
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !name.contains("..")
}

fn diagnostic_body(name: &str, data: &Value) -> String {
    let serialized = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
    format!(
        "<!DOCTYPE html>\n<html>\n<body>\n  <h1>Notification</h1>\n  <p>Template {} could not be rendered.</p>\n  <pre>{}</pre>\n</body>\n</html>\n",
        escape_html(name),
        escape_html(&serialized)
    )
}
