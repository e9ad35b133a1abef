//! Tests for template rendering and the artifact inventory.

use std::collections::HashSet;
use std::path::Path;

use testforge_rs::model::ProjectRecord;
use testforge_rs::template::{
    self, ARTIFACTS, ArtifactKind, MANIFEST_PATH, RUNNER_CONFIG_PATH, TemplateRenderer,
    TemplateVars,
};

fn renderer() -> TemplateRenderer {
    TemplateRenderer::new().unwrap()
}

fn vars() -> TemplateVars {
    let project = ProjectRecord::new("Orders API", "https://orders.example.test", "/srv/ws/Orders API");
    TemplateVars::new(&project, Path::new("/srv/ws/Orders API"))
}

#[test]
fn rendering_is_deterministic() {
    let renderer = renderer();
    assert_eq!(
        renderer.render_all(&vars()).unwrap(),
        renderer.render_all(&vars()).unwrap()
    );
    // a second engine instance renders the same bytes too
    assert_eq!(
        renderer.render_all(&vars()).unwrap(),
        TemplateRenderer::new().unwrap().render_all(&vars()).unwrap()
    );
}

#[test]
fn inventory_has_eleven_distinct_paths() {
    let rendered = renderer().render_all(&vars()).unwrap();
    assert_eq!(rendered.len(), 11);

    let paths: HashSet<_> = rendered.iter().map(|f| f.artifact.path).collect();
    assert_eq!(paths.len(), 11);
    assert!(paths.contains(MANIFEST_PATH));
    assert!(paths.contains(RUNNER_CONFIG_PATH));
    assert!(paths.contains(".env"));
}

#[test]
fn every_placeholder_is_substituted() {
    for file in renderer().render_all(&vars()).unwrap() {
        assert!(
            !file.contents.contains("{{"),
            "{} still has a placeholder",
            file.artifact.path
        );
    }
}

#[test]
fn base_url_reaches_the_runner_config_and_client() {
    let renderer = renderer();
    let vars = vars();
    for kind in [ArtifactKind::RunnerConfig, ArtifactKind::ApiClient, ArtifactKind::EnvFile] {
        let contents = renderer.render(kind, &vars).unwrap();
        assert!(
            contents.contains("https://orders.example.test"),
            "{kind:?} is missing the base URL"
        );
    }
}

#[test]
fn env_file_lists_project_variables() {
    let contents = renderer().render(ArtifactKind::EnvFile, &vars()).unwrap();
    assert_eq!(
        contents.trim_end(),
        "BASE_URL=https://orders.example.test\n\
         PROJECT_NAME=Orders API\n\
         WORKSPACE_PATH=/srv/ws/Orders API"
    );
}

#[test]
fn values_are_not_html_escaped() {
    let mut vars = vars();
    vars.base_url = "https://api.example.test/?a=1&b=<2>".to_string();

    let contents = renderer().render(ArtifactKind::EnvFile, &vars).unwrap();
    assert!(contents.contains("BASE_URL=https://api.example.test/?a=1&b=<2>"));
}

#[test]
fn description_defaults_from_the_name() {
    assert_eq!(vars().description, "API test project for Orders API");

    let project = ProjectRecord::new("x", "http://x", "/x").description("custom");
    assert_eq!(TemplateVars::new(&project, Path::new("/x")).description, "custom");
}

#[test]
fn manifest_is_valid_json_with_the_health_check_script() {
    let contents = renderer().render(ArtifactKind::Manifest, &vars()).unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&contents).unwrap();

    assert_eq!(manifest["name"], "orders-api");
    assert_eq!(manifest["description"], "API test project for Orders API");
    assert!(manifest["scripts"]["health-check"].is_string());
    assert!(manifest["devDependencies"]["@playwright/test"].is_string());
}

#[test]
fn package_names_are_npm_safe() {
    let mut vars = vars();
    vars.name = "  ..Payments / v2 ".to_string();
    assert_eq!(vars.package_name(), "payments---v2");

    vars.name = "***".to_string();
    assert_eq!(vars.package_name(), "test-project");
}

#[test]
fn minimal_defaults_carry_name_and_base_url() {
    let manifest: serde_json::Value =
        serde_json::from_str(&template::minimal_manifest("Orders API")).unwrap();
    assert_eq!(manifest["name"], "orders-api");
    assert!(manifest["scripts"]["test"].is_string());

    let config = renderer()
        .minimal_runner_config("https://orders.example.test")
        .unwrap();
    assert!(config.contains("baseURL: 'https://orders.example.test'"));
}

#[test]
fn substituted_values_are_not_rescanned() {
    let mut vars = vars();
    vars.base_url = "{{name}}".to_string();

    let contents = renderer().render(ArtifactKind::EnvFile, &vars).unwrap();
    assert!(contents.contains("BASE_URL={{name}}"));
}

#[test]
fn removable_artifacts_skip_manifest_and_runner_config() {
    let removable: Vec<_> = template::removable_artifacts().map(|a| a.kind).collect();
    assert_eq!(removable.len(), ARTIFACTS.len() - 2);
    assert!(!removable.contains(&ArtifactKind::Manifest));
    assert!(!removable.contains(&ArtifactKind::RunnerConfig));
}
