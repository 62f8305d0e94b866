use std::path::Path;

use buildchain_lib::config::Project;
use buildchain_lib::consts::{ENV_JOBS, ENV_SKOPEO, ENV_STATE_DIR};
use buildchain_lib::execute::{ConfigError, build, clean};
use serial_test::serial;

use super::common::TestEnv;

fn load(path: &Path) -> Result<Project, ConfigError> {
  temp_env::with_vars_unset([ENV_JOBS, ENV_SKOPEO, ENV_STATE_DIR], || Project::load(path))
}

const BUILD_FILE: &str = r#"
[settings]
build_root = "_build/root"

[[directories]]
name = "iso_mkdir_root"
path = "_build/root"

[[trees]]
name = "salt_tree"
source_root = "src"
task_deps = ["iso_mkdir_root"]
entries = [
  "salt/foo.sls",
  { kind = "template", source = "salt/top.sls.in", destination = "salt/top.sls", context = { VERSION = "1.2.3" }, file_deps = ["VERSION"] },
  { kind = "common_registry", destination = "salt/registry-common.inc" },
]
"#;

#[tokio::test]
#[serial]
async fn build_file_end_to_end() {
  let env = TestEnv::new();
  env.write_file("src/salt/foo.sls", "foo: true\n");
  env.write_file("src/salt/top.sls.in", "version: @VERSION@\n");
  env.write_file("VERSION", "1.2.3\n");
  let path = env.write_file("Buildchain.toml", BUILD_FILE);

  let project = load(&path).unwrap();
  let graph = project.graph().unwrap();
  let config = project.execute_config();

  let report = build(&graph, &["salt_tree"], &config).await.unwrap();
  assert!(report.is_success(), "{:?}", report.failed);
  assert_eq!(report.executed.len(), 4);
  assert!(report.groups.contains("salt_tree"));

  assert_eq!(env.read_file("_build/root/salt/foo.sls"), "foo: true\n");
  assert_eq!(env.read_file("_build/root/salt/top.sls"), "version: 1.2.3\n");
  assert!(env.read_file("_build/root/salt/registry-common.inc").contains("location = /v2/"));
  assert!(env.path("_build/.buildchain/fingerprints.json").exists());

  let report = build::<&str>(&graph, &[], &config).await.unwrap();
  assert!(report.executed.is_empty());

  let report = clean::<&str>(&graph, &[], &config).unwrap();
  assert!(report.is_success());
  assert!(!env.path("_build/root").exists());
}

#[tokio::test]
#[serial]
async fn missing_source_is_reported_before_running() {
  let env = TestEnv::new();
  let path = env.write_file(
    "Buildchain.toml",
    r#"
    [[trees]]
    name = "tree"
    entries = ["absent.txt", "present.txt"]
    "#,
  );
  env.write_file("present.txt", "x");

  let project = load(&path).unwrap();
  let graph = project.graph().unwrap();

  match build::<&str>(&graph, &[], &project.execute_config()).await {
    Err(ConfigError::MissingSource { target, .. }) => assert_eq!(target, "tree:absent.txt"),
    other => panic!("expected missing source, got {other:?}"),
  }
  assert!(!env.path("_build/root/present.txt").exists());
}

#[test]
#[serial]
fn dangling_task_dependency() {
  let env = TestEnv::new();
  let path = env.write_file(
    "Buildchain.toml",
    r#"
    [[directories]]
    name = "root"
    path = "out"
    task_deps = ["nowhere"]
    "#,
  );

  let project = load(&path).unwrap();
  assert!(matches!(
    project.graph(),
    Err(ConfigError::DanglingDependency { target, dependency }) if target == "root" && dependency == "nowhere"
  ));
}

#[test]
#[serial]
fn unknown_entry_kind_is_parse_error() {
  let env = TestEnv::new();
  let path = env.write_file(
    "Buildchain.toml",
    r#"
    [[trees]]
    name = "tree"
    entries = [{ kind = "symlink", source = "a", destination = "b" }]
    "#,
  );

  assert!(matches!(load(&path), Err(ConfigError::ParseBuildFile { .. })));
}
