//! Translation of an exported model directory.
//!
//! Ties the stages together for every module of a model:
//!
//! ```text
//! source ──► SourceModule ──► SymbolTable ─┐
//!                 │                        ├─► ModuleModel ──► SpaceTransformer ──► .py
//! RuntimeFacts ───┼────────────────────────┤                └► Declarations     ──► .pxd
//! spec.json ──────┼────────────────────────┘
//!                 └──────────────────────────────────────────► (verbatim nodes)
//! ```

use crate::codegen::{Declarations, GenConfig, ModuleModel, SpaceTransformer};
use crate::config::{TranslationSpec, DEFAULT_SPEC_FILE};
use crate::consts::{self, MODULE_PREF};
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::parser::{SourceModule, SymbolTable};
use crate::unify::RuntimeFacts;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Options of one translation.
#[derive(Clone, Debug, Default)]
pub struct TranslateOptions {
    /// Override spec; defaults to `spec.json` next to the model directory.
    pub spec_path: Option<PathBuf>,
    /// Proceed without an override spec, sizing everything from observation.
    pub allow_inferred_sizes: bool,
    pub config: GenConfig,
}

impl TranslateOptions {
    pub fn with_spec(mut self, path: impl Into<PathBuf>) -> Self {
        self.spec_path = Some(path.into());
        self
    }

    pub fn allow_inferred_sizes(mut self) -> Self {
        self.allow_inferred_sizes = true;
        self
    }
}

/// Output for one module; paths are relative to the model directory.
#[derive(Clone, Debug)]
pub struct TranslatedModule {
    pub module: String,
    pub source_path: PathBuf,
    pub source: String,
    pub decl_path: PathBuf,
    pub declarations: String,
    pub model: ModuleModel,
}

/// Result of translating a model directory.
#[derive(Clone, Debug)]
pub struct Translation {
    pub package: String,
    pub modules: Vec<TranslatedModule>,
    /// `__init__.pxd` per package directory, relative paths.
    pub init_decls: Vec<(PathBuf, String)>,
    pub diagnostics: Diagnostics,
}

impl Translation {
    pub fn module(&self, name: &str) -> Option<&TranslatedModule> {
        self.modules.iter().find(|m| m.module == name)
    }

    /// Writes every generated file under `out_dir`.
    pub fn write_to(&self, out_dir: &Path) -> Result<()> {
        let files = self
            .modules
            .iter()
            .flat_map(|m| {
                [
                    (&m.source_path, &m.source),
                    (&m.decl_path, &m.declarations),
                ]
            })
            .chain(self.init_decls.iter().map(|(path, text)| (path, text)));
        for (rel, text) in files {
            let path = out_dir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            fs::write(&path, text).map_err(|e| Error::io(&path, e))?;
            tracing::debug!(path = %path.display(), "wrote");
        }
        Ok(())
    }

    /// Storage decisions of every module.
    pub fn report(&self) -> String {
        self.modules.iter().map(|m| m.model.report()).collect()
    }
}

/// Translates every traced module of `model_dir`.
///
/// Modules are taken from the trace, or discovered on disk when the trace
/// recorded none. Facts recorded under another package name are moved to the
/// directory's name.
pub fn translate(model_dir: &Path, facts: &RuntimeFacts, options: &TranslateOptions) -> Result<Translation> {
    let package = model_dir
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            let err = io::Error::new(io::ErrorKind::InvalidInput, "not a package directory");
            Error::io(model_dir, err)
        })?
        .to_string();

    let spec = load_spec(model_dir, options)?;

    let mut facts = facts.clone();
    facts.rename_package(&package);
    let mut diagnostics = std::mem::take(&mut facts.diagnostics);

    let mut modules = if facts.modules.is_empty() {
        discover(model_dir, &package)?
    } else {
        facts.modules.clone()
    };
    modules.sort();
    modules.dedup();

    let mut translated = Vec::with_capacity(modules.len());
    for module in &modules {
        translated.push(translate_module(
            model_dir,
            module,
            &facts,
            &spec,
            &options.config,
            &mut diagnostics,
        )?);
    }

    let init_decls = init_declarations(&translated);
    tracing::info!(
        package = %package,
        modules = translated.len(),
        diagnostics = diagnostics.len(),
        "translated model"
    );
    Ok(Translation {
        package,
        modules: translated,
        init_decls,
        diagnostics,
    })
}

fn load_spec(model_dir: &Path, options: &TranslateOptions) -> Result<TranslationSpec> {
    let path = match &options.spec_path {
        Some(path) => path.clone(),
        None => model_dir
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_SPEC_FILE),
    };
    match TranslationSpec::load(&path) {
        Err(err) if err.is_not_found() && options.allow_inferred_sizes => {
            tracing::info!(path = %path.display(), "no override spec, inferring sizes");
            Ok(TranslationSpec::default())
        }
        result => result,
    }
}

/// Relative source path of a module, e.g. `_m_Space1/_mx_classes.py`.
fn module_path(module: &str, ext: &str) -> PathBuf {
    let mut path: PathBuf = module.split('.').skip(1).collect();
    path.set_extension(ext);
    path
}

fn translate_module(
    model_dir: &Path,
    module: &str,
    facts: &RuntimeFacts,
    spec: &TranslationSpec,
    config: &GenConfig,
    diagnostics: &mut Diagnostics,
) -> Result<TranslatedModule> {
    let source_path = module_path(module, "py");
    let abs_path = model_dir.join(&source_path);
    let text = fs::read_to_string(&abs_path).map_err(|e| Error::io(&abs_path, e))?;
    let parsed = SourceModule::parse(&text).map_err(|source| Error::Parse {
        module: module.to_string(),
        source,
    })?;

    let table = SymbolTable::from_module(module, &parsed);
    let model = ModuleModel::build(&table, facts, spec, diagnostics);
    let source = SpaceTransformer::new(&model, config).transform(&parsed)?;
    let declarations = Declarations::from_model(&model, &config.sys_module).render();
    tracing::debug!(module, spaces = model.spaces.len(), "translated module");

    Ok(TranslatedModule {
        module: module.to_string(),
        decl_path: module_path(module, "pxd"),
        source_path,
        source,
        declarations,
        model,
    })
}

/// Model modules on disk, following `_m_` package directories.
fn discover(model_dir: &Path, package: &str) -> Result<Vec<String>> {
    let mut modules = Vec::new();
    let mut pending = vec![(model_dir.to_path_buf(), package.to_string())];
    while let Some((dir, prefix)) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if path.is_dir() && name.starts_with(MODULE_PREF) {
                pending.push((path.clone(), format!("{}.{}", prefix, name)));
            } else if let Some(stem) = name.strip_suffix(".py") {
                if consts::is_model_file(stem) {
                    modules.push(format!("{}.{}", prefix, stem));
                }
            }
        }
    }
    Ok(modules)
}

/// One `__init__.pxd` per directory, cimporting the modules it holds.
fn init_declarations(modules: &[TranslatedModule]) -> Vec<(PathBuf, String)> {
    let mut dirs: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    for module in modules {
        let dir = module
            .source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let stem = module
            .source_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        dirs.entry(dir).or_default().push(stem);
    }
    dirs.into_iter()
        .map(|(dir, stems)| {
            let text: String = stems
                .iter()
                .map(|stem| format!("from . cimport {}\n", stem))
                .collect();
            (dir.join("__init__.pxd"), text)
        })
        .collect()
}
