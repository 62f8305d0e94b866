#![cfg(unix)]

use std::path::Path;

use buildchain_lib::execute::{BuildGraph, ExecuteConfig, ExecuteError, build, clean, is_up_to_date};
use buildchain_lib::fingerprint::FingerprintStore;
use buildchain_lib::target::{RemoteImage, StaticRegistryConfig, Target, TargetDecl};

use super::common::{TestEnv, fake_skopeo, manifest_digest, skopeo_calls, slow_fake_skopeo, wrong_digest};

fn pause(env: &TestEnv, tool: &Path, digest: &str, save_as_tar: bool) -> RemoteImage {
  RemoteImage {
    registry: "k8s.gcr.io".to_string(),
    name: "pause".to_string(),
    version: "3.1".to_string(),
    digest: digest.parse().unwrap(),
    remote_name: None,
    destination: env.path("root/images"),
    save_as_tar,
    cache_root: env.state_dir().join("images"),
    tool: tool.display().to_string(),
    task_deps: Vec::new(),
  }
}

fn files_in(dir: &Path) -> Vec<String> {
  let mut names: Vec<_> = std::fs::read_dir(dir)
    .unwrap()
    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
    .collect();
  names.sort();
  names
}

async fn build_all(graph: &BuildGraph, config: &ExecuteConfig) -> buildchain_lib::execute::BuildReport {
  build::<&str>(graph, &[], config).await.unwrap()
}

#[tokio::test]
async fn tar_image_build_rebuild_clean() {
  let env = TestEnv::new();
  let bin = env.path("bin");
  let tool = fake_skopeo(&bin);
  let config = env.config();

  let image = pause(&env, &tool, &manifest_digest(), true);
  let graph = BuildGraph::build(vec![image.declare()]).unwrap();

  let report = build_all(&graph, &config).await;
  assert!(report.is_success(), "{:?}", report.failed);
  assert_eq!(files_in(&env.path("root/images")), vec!["pause-3.1.tar"]);
  assert_eq!(
    env.read_file("root/images/pause-3.1.tar"),
    "k8s.gcr.io/pause:3.1",
    "archive carries the version tag"
  );
  assert_eq!(skopeo_calls(&bin), 2);

  let report = build_all(&graph, &config).await;
  assert!(report.executed.is_empty());
  assert_eq!(skopeo_calls(&bin), 2);

  let report = clean::<&str>(&graph, &[], &config).unwrap();
  assert_eq!(report.removed, vec![env.path("root/images/pause-3.1.tar")]);
  assert!(files_in(&env.path("root/images")).is_empty());

  let store = FingerprintStore::load(&config.state_dir);
  assert!(!is_up_to_date(graph.get("pause-3.1").unwrap(), &store));
}

#[tokio::test]
async fn directory_image_layout() {
  let env = TestEnv::new();
  let tool = fake_skopeo(&env.path("bin"));
  let config = env.config();

  let image = pause(&env, &tool, &manifest_digest(), false);
  let graph = BuildGraph::build(vec![image.declare()]).unwrap();

  let report = build_all(&graph, &config).await;
  assert!(report.is_success(), "{:?}", report.failed);
  assert_eq!(
    files_in(&env.path("root/images/pause/3.1")),
    vec!["ab".repeat(32), "manifest.json".to_string()]
  );

  clean::<&str>(&graph, &[], &config).unwrap();
  assert!(!env.path("root/images/pause").join("3.1").exists());
}

#[tokio::test]
async fn cached_digest_is_reused_for_another_version() {
  let env = TestEnv::new();
  let bin = env.path("bin");
  let tool = fake_skopeo(&bin);
  let config = env.config();

  let first = pause(&env, &tool, &manifest_digest(), true);
  let mut second = pause(&env, &tool, &manifest_digest(), true);
  second.version = "latest".to_string();

  let graph = BuildGraph::build(vec![first.declare(), second.declare().task_dep("pause-3.1")]).unwrap();
  let report = build_all(&graph, &config).await;
  assert!(report.is_success(), "{:?}", report.failed);

  // One pull, two archive exports
  assert_eq!(skopeo_calls(&bin), 3);
  assert_eq!(
    files_in(&env.path("root/images")),
    vec!["pause-3.1.tar", "pause-latest.tar"]
  );
}

#[tokio::test]
async fn tags_sharing_a_digest_pull_once_in_parallel() {
  let env = TestEnv::new();
  let bin = env.path("bin");
  let tool = slow_fake_skopeo(&bin, "0.3");
  let config = env.config();

  let first = pause(&env, &tool, &manifest_digest(), true);
  let mut second = pause(&env, &tool, &manifest_digest(), true);
  second.version = "latest".to_string();

  // No ordering between the two, so they run in the same wave
  let graph = BuildGraph::build(vec![first.declare(), second.declare()]).unwrap();
  assert_eq!(graph.waves(&graph.closure::<&str>(&[]).unwrap()).len(), 1);

  let report = build_all(&graph, &config).await;
  assert!(report.is_success(), "{:?}", report.failed);

  let log = std::fs::read_to_string(bin.join("skopeo.log")).unwrap();
  assert_eq!(log.lines().filter(|l| l.contains("docker://")).count(), 1, "{log}");
  assert_eq!(skopeo_calls(&bin), 3);
  assert_eq!(files_in(&env.state_dir().join("images/sha256")).len(), 1);
  assert_eq!(
    files_in(&env.path("root/images")),
    vec!["pause-3.1.tar", "pause-latest.tar"]
  );
}

#[tokio::test]
async fn digest_mismatch_leaves_no_output() {
  let env = TestEnv::new();
  let tool = fake_skopeo(&env.path("bin"));
  let config = env.config();

  let image = pause(&env, &tool, &wrong_digest(), true);
  let registry = StaticRegistryConfig {
    image_root: env.path("root/images"),
    server_root: "$images".to_string(),
    name_prefix: String::new(),
    destination: env.path("root/registry.inc"),
    task_deps: vec!["pause-3.1".to_string()],
  };
  let graph = BuildGraph::build(vec![image.declare(), registry.declare()]).unwrap();

  let report = build_all(&graph, &config).await;
  match report.failed.get("pause-3.1") {
    Some(ExecuteError::Integrity { expected, actual, .. }) => {
      assert_eq!(expected, &wrong_digest());
      assert_eq!(actual, &manifest_digest());
    }
    other => panic!("expected integrity failure, got {other:?}"),
  }
  assert!(report.skipped.contains_key("registry.inc"));
  assert!(!image.archive_path().exists());
  assert!(!image.cache_path().exists());
}

#[tokio::test]
async fn registry_config_follows_images() {
  let env = TestEnv::new();
  let tool = fake_skopeo(&env.path("bin"));
  let config = env.config();

  let image = pause(&env, &tool, &manifest_digest(), false);
  let registry = StaticRegistryConfig {
    image_root: env.path("root/images"),
    server_root: "$images".to_string(),
    name_prefix: "p-1.2.3/".to_string(),
    destination: env.path("root/registry.inc"),
    task_deps: Vec::new(),
  };
  let decls: Vec<TargetDecl> = vec![registry.declare(), image.declare()];
  let graph = BuildGraph::build(decls).unwrap();

  // The manifest lives under the image root, so the image runs first
  assert_eq!(graph.dependencies("registry.inc"), vec!["pause-3.1"]);

  let report = build_all(&graph, &config).await;
  assert!(report.is_success(), "{:?}", report.failed);

  let content = env.read_file("root/registry.inc");
  assert!(content.contains("location = /v2/p-1.2.3/pause/manifests/3.1 {"));
  assert!(content.contains(&format!("/v2/p-1.2.3/pause/manifests/{} {{", manifest_digest())));
}
