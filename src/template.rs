//! Project file templates.
//!
//! Rendering is a pure function of [`TemplateVars`]: no clock, no randomness,
//! so the same variables always produce byte-identical files. The set of
//! files is fixed and enumerated in [`ARTIFACTS`]; cleanup uses the same
//! inventory to know what to remove and restore.

use std::path::Path;

use handlebars::Handlebars;
use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::model::ProjectRecord;

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// What a generated file is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Manifest,
    RunnerConfig,
    ApiClient,
    GlobalSetup,
    GlobalTeardown,
    BddConfig,
    Hooks,
    World,
    SharedTypes,
    EnvFile,
    Docs,
}

/// A generated file and its path relative to the workspace root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: &'static str,
}

pub const MANIFEST_PATH: &str = "package.json";
pub const RUNNER_CONFIG_PATH: &str = "playwright.config.ts";

pub const ARTIFACTS: [Artifact; 11] = [
    Artifact { kind: ArtifactKind::Manifest, path: MANIFEST_PATH },
    Artifact { kind: ArtifactKind::RunnerConfig, path: RUNNER_CONFIG_PATH },
    Artifact { kind: ArtifactKind::ApiClient, path: "src/api/client.ts" },
    Artifact { kind: ArtifactKind::GlobalSetup, path: "tests/setup/global-setup.ts" },
    Artifact { kind: ArtifactKind::GlobalTeardown, path: "tests/setup/global-teardown.ts" },
    Artifact { kind: ArtifactKind::BddConfig, path: "cucumber.js" },
    Artifact { kind: ArtifactKind::Hooks, path: "features/support/hooks.ts" },
    Artifact { kind: ArtifactKind::World, path: "features/support/world.ts" },
    Artifact { kind: ArtifactKind::SharedTypes, path: "src/types/index.ts" },
    Artifact { kind: ArtifactKind::EnvFile, path: ".env" },
    Artifact { kind: ArtifactKind::Docs, path: "README.md" },
];

/// Directories created before templates are written.
pub const SUPPLEMENTARY_DIRS: [&str; 7] = [
    "features/step_definitions",
    "features/support",
    "src/api",
    "src/types",
    "tests/api",
    "tests/setup",
    "test-data",
];

/// Artifacts that cleanup deletes outright. The manifest and runner config
/// are rewritten to safe defaults instead.
pub fn removable_artifacts() -> impl Iterator<Item = &'static Artifact> {
    ARTIFACTS
        .iter()
        .filter(|a| !matches!(a.kind, ArtifactKind::Manifest | ArtifactKind::RunnerConfig))
}

// Variables
// ---------------------------------------------------------------------------

/// Everything a template may reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateVars {
    pub name: String,
    pub base_url: String,
    /// Absolute workspace path.
    pub base_path: String,
    pub description: String,
}

impl TemplateVars {
    pub fn new(project: &ProjectRecord, workspace: &Path) -> Self {
        Self {
            name: project.name.clone(),
            base_url: project.base_url.clone(),
            base_path: workspace.display().to_string(),
            description: project
                .description
                .clone()
                .unwrap_or_else(|| format!("API test project for {}", project.name)),
        }
    }

    /// npm-safe package name derived from the display name.
    pub fn package_name(&self) -> String {
        package_name(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// A rendered file ready to be written into a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub artifact: Artifact,
    pub contents: String,
}

const MINIMAL_RUNNER_CONFIG: &str = "minimal-runner-config";

/// Handlebars templates keyed by name. Every template source is compiled in
/// at build time.
const TEMPLATES: [(&str, &str); 10] = [
    ("runner-config", include_str!("../templates/playwright.config.ts.tmpl")),
    ("api-client", include_str!("../templates/client.ts.tmpl")),
    ("global-setup", include_str!("../templates/global-setup.ts.tmpl")),
    ("global-teardown", include_str!("../templates/global-teardown.ts.tmpl")),
    ("bdd-config", include_str!("../templates/cucumber.js.tmpl")),
    ("hooks", include_str!("../templates/hooks.ts.tmpl")),
    ("world", include_str!("../templates/world.ts.tmpl")),
    ("shared-types", include_str!("../templates/types.ts.tmpl")),
    ("env-file", include_str!("../templates/env.tmpl")),
    ("docs", include_str!("../templates/README.md.tmpl")),
];

/// Renders the project file set.
///
/// Strict mode is on, so a template referencing a variable that
/// [`TemplateVars`] does not carry is a render error rather than an empty
/// string. Output is not HTML-escaped.
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        for (name, source) in TEMPLATES {
            handlebars.register_template_string(name, source)?;
        }
        handlebars.register_template_string(
            MINIMAL_RUNNER_CONFIG,
            include_str!("../templates/minimal.playwright.config.ts.tmpl"),
        )?;

        Ok(Self { handlebars })
    }

    /// Render every artifact in inventory order.
    pub fn render_all(&self, vars: &TemplateVars) -> Result<Vec<RenderedFile>> {
        ARTIFACTS
            .iter()
            .map(|artifact| {
                Ok(RenderedFile {
                    artifact: *artifact,
                    contents: self.render(artifact.kind, vars)?,
                })
            })
            .collect()
    }

    pub fn render(&self, kind: ArtifactKind, vars: &TemplateVars) -> Result<String> {
        let name = match kind {
            ArtifactKind::Manifest => return Ok(manifest(vars)),
            ArtifactKind::RunnerConfig => "runner-config",
            ArtifactKind::ApiClient => "api-client",
            ArtifactKind::GlobalSetup => "global-setup",
            ArtifactKind::GlobalTeardown => "global-teardown",
            ArtifactKind::BddConfig => "bdd-config",
            ArtifactKind::Hooks => "hooks",
            ArtifactKind::World => "world",
            ArtifactKind::SharedTypes => "shared-types",
            ArtifactKind::EnvFile => "env-file",
            ArtifactKind::Docs => "docs",
        };
        Ok(self.handlebars.render(name, vars)?)
    }

    /// Runner config carrying nothing but the base URL.
    pub fn minimal_runner_config(&self, base_url: &str) -> Result<String> {
        Ok(self
            .handlebars
            .render(MINIMAL_RUNNER_CONFIG, &json!({ "base_url": base_url }))?)
    }
}

fn manifest(vars: &TemplateVars) -> String {
    let manifest = json!({
        "name": vars.package_name(),
        "version": "1.0.0",
        "private": true,
        "description": vars.description,
        "scripts": {
            "test": "playwright test",
            "test:bdd": "cucumber-js",
            "health-check": "playwright test --list",
        },
        "devDependencies": {
            "@playwright/test": "^1.47.0",
        },
    });
    to_pretty_json(&manifest)
}

/// Manifest that keeps the workspace installable after a failed generation.
pub fn minimal_manifest(name: &str) -> String {
    let manifest = json!({
        "name": package_name(name),
        "version": "1.0.0",
        "private": true,
        "scripts": {
            "test": "playwright test",
        },
        "devDependencies": {
            "@playwright/test": "^1.47.0",
        },
    });
    to_pretty_json(&manifest)
}

fn to_pretty_json(value: &serde_json::Value) -> String {
    // serde_json's default map is ordered, so key order is stable.
    let mut out = serde_json::to_string_pretty(value).unwrap_or_default();
    out.push('\n');
    out
}

fn package_name(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '-',
        })
        .collect();
    let slug = slug.trim_start_matches(['.', '_']).trim_matches('-');
    if slug.is_empty() {
        "test-project".to_string()
    } else {
        slug.to_string()
    }
}
