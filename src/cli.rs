//! CLI: compile | normalize | link | eval
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::{Value, json};
use tracing::Level;

use crate::compiler::{CompiledSchema, SchemaCompiler};
use crate::config::{CompilerConfig, ConfigFile, Dialect};
use crate::data::DataTree;
use crate::pointer::{Pointer, Tree};
use crate::schema::Keyword;
use crate::validate::{FormatRegistry, StructuralValidator, Validator};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// compile form schemas, link documents against them and evaluate their expressions
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    /// more log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// compile a schema and print the per-node summary and errors
    Compile(CompileOut),
    /// print the normalized schema (refs inlined, inferred types)
    Normalize(NormalizeOut),
    /// link and validate data files against a schema
    Link(LinkOut),
    /// evaluate one expression keyword at a data pointer
    Eval(EvalOut),
}

#[derive(Args, Debug, Clone)]
struct SchemaSettings {
    /// schema document
    #[arg(long, short)]
    schema: PathBuf,

    /// JSON config file: { dialect, userData, enums, enumTimeoutMs }
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// overrides the config file's dialect
    #[arg(long, value_enum)]
    dialect: Option<DialectArg>,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum DialectArg {
    Draft4,
    Draft7,
    Draft2019,
}

#[derive(clap::Parser, Debug)]
struct CompileOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    /// live document used to resolve `reference` keywords
    #[arg(long, short)]
    data: Option<PathBuf>,

    /// write the output here instead of stdout
    #[arg(long, short)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct NormalizeOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    #[arg(long, short)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct LinkOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    /// One or more data files. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct EvalOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    #[arg(long, short)]
    data: PathBuf,

    /// absolute data pointer, e.g. /items/2/flag
    #[arg(long, short)]
    pointer: String,

    /// visible, readonly, requiredWhen, abstract, …
    #[arg(long, short)]
    keyword: String,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl SchemaSettings {
    fn config(&self) -> anyhow::Result<CompilerConfig> {
        let mut config = match self.config.as_ref() {
            None => CompilerConfig::new(),
            Some(path) => {
                let source = read(path)?;
                crate::path_de::from_str_with_path::<ConfigFile>(&source)
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("invalid config file {}", path.display()))?
                    .into_config()
            }
        };
        if let Some(dialect) = self.dialect {
            config.dialect = match dialect {
                DialectArg::Draft4 => Dialect::Draft4,
                DialectArg::Draft7 => Dialect::Draft7,
                DialectArg::Draft2019 => Dialect::Draft2019,
            };
        }
        Ok(config)
    }

    fn compile(&self, data: Option<&Value>) -> anyhow::Result<CompiledSchema> {
        let schema = load_json(&self.schema)?;
        let mut compiler = SchemaCompiler::new(self.config()?);
        let compiled = compiler
            .compile_with_data(&schema, data)
            .with_context(|| format!("cannot compile {}", self.schema.display()))?;
        report_compile(&self.schema, &compiled);
        Ok(compiled)
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn init_tracing(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(level)
            .with_target(false)
            .init();
    }

    pub fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            Command::Compile(target) => {
                let data = target.data.as_deref().map(load_json).transpose()?;
                let compiled = target.schema_settings.compile(data.as_ref())?;
                let output = json!({
                    "valid": compiled.is_valid(),
                    "errors": compiled.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
                    "nodes": compiled.summary(),
                });
                emit(&output, target.out.as_deref())
            }
            Command::Normalize(target) => {
                let compiled = target.schema_settings.compile(None)?;
                emit(&compiled.normalized(), target.out.as_deref())
            }
            Command::Link(target) => {
                let compiled = target.schema_settings.compile(None)?;
                let formats = FormatRegistry::with_defaults().context("default format patterns")?;
                let validator = StructuralValidator::new(&formats);
                let normalized = compiled.normalized();
                let paths = resolve_file_path_patterns(&target.input)?;
                let mut failed = 0usize;
                for path in &paths {
                    let value = load_json(path)?;
                    let mut tree = DataTree::new(&value);
                    let link_errors = tree.link(&compiled);
                    let report = validator.validate(&normalized, &value);
                    if link_errors.is_empty() && report.valid {
                        eprintln!("{} {}", "✔".green(), path.display());
                        continue;
                    }
                    failed += 1;
                    eprintln!("{} {}", "✘".red(), path.display());
                    for error in &link_errors {
                        eprintln!("    {} {error}", "link".yellow());
                    }
                    for error in &report.errors {
                        eprintln!("    {} `{}` {}", "invalid".yellow(), error.pointer, error.message);
                    }
                }
                if failed > 0 {
                    bail!("{failed} of {} data files failed", paths.len());
                }
                Ok(())
            }
            Command::Eval(target) => {
                let keyword = Keyword::from_name(&target.keyword)
                    .with_context(|| format!("unknown expression keyword `{}`", target.keyword))?;
                let data = load_json(&target.data)?;
                let compiled = target.schema_settings.compile(Some(&data))?;
                let mut tree = DataTree::new(&data);
                for error in tree.link(&compiled) {
                    eprintln!("{} {error}", "link".yellow());
                }
                let value = evaluate_pointer(&tree, &compiled, &target.pointer, keyword)?;
                println!("{}", serde_json::to_string_pretty(&value)?);
                Ok(())
            }
        }
    }
}

/// Existing nodes evaluate in place; a missing last segment evaluates for its parent slot.
fn evaluate_pointer(tree: &DataTree, compiled: &CompiledSchema, pointer: &str, keyword: Keyword) -> anyhow::Result<Value> {
    if let Some(id) = tree.by_pointer(pointer) {
        return Ok(tree.evaluate(compiled, id, keyword));
    }
    let mut tokens = Pointer::parse_absolute(pointer)?;
    let key = tokens.pop().with_context(|| format!("`{pointer}` names the root"))?;
    let parent_pointer = crate::pointer::join(&tokens);
    let parent = tree
        .by_pointer(&parent_pointer)
        .with_context(|| format!("no data at `{parent_pointer}`"))?;
    let parent_schema = tree
        .schema_of(parent)
        .with_context(|| format!("`{parent_pointer}` is not linked to the schema"))?;
    let schema = compiled
        .tree
        .child(parent_schema, &key)
        .with_context(|| format!("the schema has no `{key}` under `{parent_pointer}`"))?;
    Ok(tree.evaluate_at(compiled, schema, parent, &key, keyword))
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn report_compile(path: &Path, compiled: &CompiledSchema) {
    if compiled.is_valid() {
        eprintln!("{} {} ({} nodes)", "✔".green(), path.display(), compiled.tree.len());
        return;
    }
    eprintln!("{} {} ({} errors)", "✘".red(), path.display(), compiled.errors.len());
    for error in &compiled.errors {
        eprintln!("    {error}");
    }
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn load_json(path: &Path) -> anyhow::Result<Value> {
    let source = read(path)?;
    serde_json::from_str(&source).with_context(|| format!("failed to parse JSON source file ({})", path.display()))
}

fn emit(value: &Value, out: Option<&Path>) -> anyhow::Result<()> {
    let source = serde_json::to_string_pretty(value)?;
    match out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out, &source).with_context(|| format!("cannot write {}", out.display()))
        }
        None => {
            println!("{source}");
            Ok(())
        }
    }
}

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if !has_glob_chars(pattern) {
            out.push(PathBuf::from(pattern));
            continue;
        }
        let before = out.len();
        for entry in glob::glob(pattern).with_context(|| format!("bad glob pattern {pattern}"))? {
            out.push(entry?);
        }
        if out.len() == before {
            bail!("glob pattern matched no files: {pattern}");
        }
    }
    Ok(out)
}
